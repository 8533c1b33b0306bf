use logwarden::{
    config, llm,
    server::{self, ServerState},
    state::AppContext,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_tracing();
    let config = config::AppConfig::load()?;
    let llm_client = llm::client_from_config(&config.llm)?;
    let identity = llm_client.identity();
    info!(provider = identity.provider, model = ?identity.model, "llm client ready");
    let ctx = AppContext::new(config, llm_client)?;

    let server_state = ServerState::new(ctx.clone());
    let server_task = tokio::spawn(async move {
        if let Err(err) = server::serve(server_state).await {
            error!(error = ?err, "server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    ctx.request_shutdown();

    if let Err(err) = server_task.await {
        error!(error = ?err, "server task join error");
    }

    Ok(())
}
