pub mod bridge;
pub mod commands;
pub mod config;

/// Custom data passed to all commands
pub struct Data {
    pub config: config::Config,
    pub bridge: std::sync::Arc<bridge::Bridge>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;
