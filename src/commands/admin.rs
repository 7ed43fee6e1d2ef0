use crate::{Context, Error};
use tracing::{error, info};

/// Shut down the bot (Owner only)
#[poise::command(slash_command, prefix_command, owners_only, hide_in_help)]
pub async fn shutdown(ctx: Context<'_>) -> Result<(), Error> {
    info!("Shutdown command received from owner: {}", ctx.author().name);
    ctx.say("👋 Shutting down...").await?;
    if let Err(e) = ctx.data().bridge.shutdown().await {
        error!("Failed to flush chat bridge state during shutdown: {:#}", e);
    }
    ctx.framework().shard_manager().shutdown_all().await;
    Ok(())
}
