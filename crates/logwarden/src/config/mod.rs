use std::{env, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing_subscriber::{EnvFilter, fmt};

use crate::storage;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub analysis: AnalysisConfig,
    pub llm: LlmProviderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_file_name")]
    pub file_name: String,
    #[serde(default = "default_max_retained")]
    pub max_retained: usize,
    #[serde(default = "default_read_chunk_bytes")]
    pub read_chunk_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_prompt_entries")]
    pub max_prompt_entries: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum LlmProviderConfig {
    LocalStub,
    OpenAi {
        model: String,
        #[serde(default = "default_openai_api_key_env")]
        api_key_env: String,
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        organization: Option<String>,
        #[serde(default = "default_llm_timeout_secs")]
        timeout_secs: u64,
    },
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let root = match env::var("LOGWARDEN_APP_ROOT") {
            Ok(path) => PathBuf::from(path),
            Err(_) => env::current_dir()?,
        };
        let mut config = Self::load_from_root(root)?;
        if let Ok(bind_addr) = env::var("LOGWARDEN_SERVER_BIND") {
            config.server.bind_addr = bind_addr;
        }
        Ok(config)
    }

    /// Load `config/*.yml` under `root` without consulting the environment.
    pub fn load_from_root(root: PathBuf) -> anyhow::Result<Self> {
        let data_dir = root.join("data");
        let config_dir = root.join("config");
        let llm: LlmProviderConfig = storage::load_yaml(config_dir.join("llm.yml"))?;
        let mut store: StoreConfig = storage::load_yaml_or_default(config_dir.join("store.yml"))?;
        let analysis: AnalysisConfig =
            storage::load_yaml_or_default(config_dir.join("analysis.yml"))?;

        store.max_retained = store.max_retained.max(1);
        store.read_chunk_bytes = store.read_chunk_bytes.max(1);

        storage::ensure_data_layout(&data_dir)?;

        Ok(Self {
            data_dir,
            store,
            analysis,
            llm,
            server: ServerConfig {
                bind_addr: "0.0.0.0:8080".to_string(),
            },
        })
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            file_name: default_store_file_name(),
            max_retained: default_max_retained(),
            read_chunk_bytes: default_read_chunk_bytes(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_prompt_entries: default_max_prompt_entries(),
        }
    }
}

impl AnalysisConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl ServerConfig {
    pub fn addr(&self) -> &str {
        &self.bind_addr
    }
}

fn default_store_file_name() -> String {
    "logs.json".to_string()
}

fn default_max_retained() -> usize {
    storage::MAX_RETAINED
}

fn default_read_chunk_bytes() -> usize {
    storage::DEFAULT_READ_CHUNK_BYTES
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_max_prompt_entries() -> usize {
    200
}

fn default_openai_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    60
}

pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
