use super::classifier::LogEvent;
use async_trait::async_trait;
use serenity::all::{ChannelId, CreateEmbed, CreateMessage, Timestamp};
use serenity::http::Http;
use std::sync::Arc;
use tracing::debug;

/// Destination for classified events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one announcement. Failures are reported, never retried by the caller.
    async fn deliver(&self, channel: ChannelId, event: &LogEvent) -> anyhow::Result<()>;
}

/// Posts each event as a single embed in a Discord channel.
pub struct DiscordSink {
    http: Arc<Http>,
}

impl DiscordSink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn embed_color(event: &LogEvent) -> u32 {
    match event {
        LogEvent::ChatMessage { .. } => 0x3498DB,
        LogEvent::PlayerJoined { .. } => 0x2ECC71,
        LogEvent::PlayerLeft { .. } => 0xE74C3C,
        LogEvent::PlayerDeath { .. } => 0x607D8B,
        LogEvent::Unclassified { .. } => 0x95A5A6,
    }
}

#[async_trait]
impl EventSink for DiscordSink {
    async fn deliver(&self, channel: ChannelId, event: &LogEvent) -> anyhow::Result<()> {
        let Some(text) = event.announcement() else {
            return Ok(());
        };

        let embed = CreateEmbed::new()
            .description(text)
            .color(embed_color(event))
            .timestamp(Timestamp::now());

        debug!("Relaying {} event to channel {}", event.kind(), channel);
        channel
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await?;
        Ok(())
    }
}
