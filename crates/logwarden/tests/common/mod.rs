use std::{fs, path::Path, sync::Arc, time::Duration};

use anyhow::Result;
use logwarden::{
    config::AppConfig,
    llm::LocalStubClient,
    server::{self, ServerState},
    state::AppContext,
};
use reqwest::Client;
use tokio::{net::TcpListener, task::JoinHandle, time::sleep};

pub struct TestServer {
    pub ctx: AppContext,
    pub base_url: String,
    pub client: Client,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn shutdown(self) -> Result<()> {
        self.ctx.request_shutdown();
        self.handle.await??;
        Ok(())
    }
}

/// Write a minimal config tree that runs against the offline stub model.
pub fn install_config(root: &Path, max_retained: usize) -> Result<()> {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir)?;
    fs::write(config_dir.join("llm.yml"), "provider: local_stub\n")?;
    fs::write(
        config_dir.join("store.yml"),
        format!("file_name: logs.json\nmax_retained: {max_retained}\nread_chunk_bytes: 64\n"),
    )?;
    fs::write(config_dir.join("analysis.yml"), "fetch_timeout_secs: 5\n")?;
    Ok(())
}

pub async fn spawn_server(root: &Path) -> Result<TestServer> {
    let config = AppConfig::load_from_root(root.to_path_buf())?;
    let ctx = AppContext::new(config, Arc::new(LocalStubClient))?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(server::serve_with_listener(
        listener,
        ServerState::new(ctx.clone()),
    ));

    let client = Client::new();
    let base_url = format!("http://{addr}");
    let mut attempts = 0;
    loop {
        match client.get(format!("{base_url}/healthz")).send().await {
            Ok(response) if response.status().is_success() => break,
            _ if attempts > 20 => anyhow::bail!("server did not become ready in time"),
            _ => {
                attempts += 1;
                sleep(Duration::from_millis(50)).await;
            }
        }
    }

    Ok(TestServer {
        ctx,
        base_url,
        client,
        handle,
    })
}
