pub mod agent;
pub mod analysis;
pub mod config;
pub mod interpreter;
pub mod llm;
pub mod schedule;
pub mod server;
pub mod state;
pub mod storage;
