pub mod agent;
pub mod client;
pub mod commands;
pub mod config;
pub mod directive;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod journal;
pub mod llm;
pub mod metrics;
pub mod mind;
pub mod protocol;
pub mod scheduler;
pub mod security;
pub mod server;
pub mod shell;
pub mod soul;
pub mod terminal;
pub mod thoughts;
