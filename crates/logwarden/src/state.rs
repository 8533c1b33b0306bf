use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;
use tracing::info;

use crate::{
    agent::AgentRuntime,
    analysis::LogAnalyzer,
    config::AppConfig,
    interpreter::TimeInterpreter,
    llm::LlmClient,
    schedule::ScheduleRegistry,
    storage::LogStore,
};

#[derive(Clone)]
pub struct AppContext {
    config: Arc<AppConfig>,
    shutdown: Arc<Notify>,
    store: Arc<LogStore>,
    schedules: Arc<RwLock<ScheduleRegistry>>,
    analyzer: Arc<LogAnalyzer>,
    agent: Arc<AgentRuntime>,
}

impl AppContext {
    pub fn new(config: AppConfig, llm: Arc<dyn LlmClient>) -> anyhow::Result<Self> {
        let store = Arc::new(LogStore::from_config(&config.data_dir, &config.store));
        info!(
            path = %store.path().display(),
            max_retained = store.max_retained(),
            "log store ready"
        );
        let schedules = Arc::new(RwLock::new(ScheduleRegistry::new()));
        let interpreter = Arc::new(TimeInterpreter::new(Arc::clone(&llm)));
        let analyzer = Arc::new(LogAnalyzer::new(
            Arc::clone(&llm),
            Arc::clone(&interpreter),
            &config.analysis,
        )?);
        let agent = Arc::new(AgentRuntime::new(
            llm,
            Arc::clone(&analyzer),
            interpreter,
            Arc::clone(&schedules),
        ));

        Ok(Self {
            config: Arc::new(config),
            shutdown: Arc::new(Notify::new()),
            store,
            schedules,
            analyzer,
            agent,
        })
    }

    pub fn config(&self) -> Arc<AppConfig> {
        Arc::clone(&self.config)
    }

    pub fn store(&self) -> Arc<LogStore> {
        Arc::clone(&self.store)
    }

    pub fn schedules(&self) -> Arc<RwLock<ScheduleRegistry>> {
        Arc::clone(&self.schedules)
    }

    pub fn analyzer(&self) -> Arc<LogAnalyzer> {
        Arc::clone(&self.analyzer)
    }

    pub fn agent(&self) -> Arc<AgentRuntime> {
        Arc::clone(&self.agent)
    }

    pub fn shutdown_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}
