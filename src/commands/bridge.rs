use crate::bridge::{BridgeError, BridgeStatus, DisableOutcome, EnableOutcome};
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::{info, warn};

const STATUS_COLOR: u32 = 0x5865F2;

/// Control the Minecraft chat bridge
#[poise::command(
    slash_command,
    prefix_command,
    subcommands("enable", "disable", "status", "set_channel", "diag"),
    subcommand_required,
    guild_only
)]
pub async fn bridge(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Start relaying Minecraft chat to the configured channel
#[poise::command(slash_command, prefix_command, required_permissions = "ADMINISTRATOR")]
pub async fn enable(ctx: Context<'_>) -> Result<(), Error> {
    let bridge = &ctx.data().bridge;

    let channel = match bridge.check_ready() {
        Ok(channel) => channel,
        Err(e) => {
            ctx.say(format!("❌ Cannot enable the chat bridge: {e}.")).await?;
            return Ok(());
        }
    };

    if let Err(e) = channel.to_channel(ctx.serenity_context()).await {
        warn!("Chat bridge channel {} is not reachable: {}", channel, e);
        ctx.say(format!(
            "❌ Cannot enable the chat bridge: channel <#{channel}> could not be resolved. \
             Use `bridge set-channel` to pick another one."
        ))
        .await?;
        return Ok(());
    }

    info!("Bridge enable requested by {}", ctx.author().name);
    match bridge.enable().await {
        Ok(EnableOutcome::Started) => {
            ctx.say(format!("✅ Chat bridge enabled. Relaying to <#{channel}>."))
                .await?;
        }
        Ok(EnableOutcome::AlreadyActive) => {
            ctx.say(format!("ℹ️ Chat bridge is already active in <#{channel}>."))
                .await?;
        }
        Err(e) => {
            ctx.say(format!("❌ Cannot enable the chat bridge: {e}.")).await?;
        }
    }
    Ok(())
}

/// Stop relaying Minecraft chat
#[poise::command(slash_command, prefix_command, required_permissions = "ADMINISTRATOR")]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    info!("Bridge disable requested by {}", ctx.author().name);
    match ctx.data().bridge.disable().await {
        DisableOutcome::Stopped => ctx.say("✅ Chat bridge disabled.").await?,
        DisableOutcome::AlreadyInactive => ctx.say("ℹ️ Chat bridge is not active.").await?,
    };
    Ok(())
}

/// Show the chat bridge state
#[poise::command(slash_command, prefix_command)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let status = ctx.data().bridge.status().await;
    let channel = channel_label(ctx, status.channel).await;

    let embed = serenity::CreateEmbed::new()
        .title("⛏️ Minecraft Chat Bridge")
        .description(summary_line(&status))
        .field("Active", yes_no(status.active), true)
        .field("Poll task", running_label(status.task_running), true)
        .field("Channel", channel, true)
        .field("Log API", configured_label(status.api_configured), true)
        .color(STATUS_COLOR);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Change the relay channel until the bot restarts
#[poise::command(
    slash_command,
    prefix_command,
    rename = "set-channel",
    required_permissions = "ADMINISTRATOR"
)]
pub async fn set_channel(
    ctx: Context<'_>,
    #[description = "Channel that receives Minecraft chat"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
) -> Result<(), Error> {
    info!(
        "Bridge channel set to #{} ({}) by {}",
        channel.name,
        channel.id,
        ctx.author().name
    );
    ctx.data().bridge.set_channel(channel.id);

    let note = if ctx.data().bridge.is_active() {
        "Takes effect on the next poll."
    } else {
        "Use `bridge enable` to start relaying."
    };
    ctx.say(format!(
        "✅ Chat bridge channel set to <#{}> for this session. {note}",
        channel.id
    ))
    .await?;
    Ok(())
}

/// Show detailed chat bridge diagnostics
#[poise::command(slash_command, prefix_command, required_permissions = "ADMINISTRATOR")]
pub async fn diag(ctx: Context<'_>) -> Result<(), Error> {
    let diagnostics = ctx.data().bridge.diagnostics().await;
    let config = &ctx.data().config;
    let channel = channel_label(ctx, diagnostics.status.channel).await;

    let embed = serenity::CreateEmbed::new()
        .title("🔧 Chat Bridge Diagnostics")
        .field(
            "API URL",
            configured_label(config.log_api_url.is_some()),
            true,
        )
        .field(
            "API token",
            configured_label(config.log_api_token.is_some()),
            true,
        )
        .field(
            "Endpoint",
            diagnostics
                .endpoint
                .as_deref()
                .map(|e| format!("`{e}`"))
                .unwrap_or_else(|| "n/a".to_string()),
            false,
        )
        .field("Channel", channel, true)
        .field("Active", yes_no(diagnostics.status.active), true)
        .field(
            "Poll task",
            running_label(diagnostics.status.task_running),
            true,
        )
        .field(
            "HTTP session",
            if diagnostics.session_open { "Open" } else { "Closed" },
            true,
        )
        .field(
            "Poll interval",
            humantime::format_duration(diagnostics.poll_interval).to_string(),
            true,
        )
        .field(
            "Seen lines",
            format!("`{}`", diagnostics.seen_entries),
            true,
        )
        .field(
            "State file",
            format!("`{}`", diagnostics.state_path.display()),
            false,
        )
        .color(STATUS_COLOR);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// `#name` when the channel resolves, the raw id otherwise.
async fn channel_label(ctx: Context<'_>, channel: Option<serenity::ChannelId>) -> String {
    let Some(channel) = channel else {
        return "Not set".to_string();
    };
    match channel.to_channel(ctx.serenity_context()).await {
        Ok(serenity::Channel::Guild(guild_channel)) => format!("#{}", guild_channel.name),
        _ => format!("`{}` (unresolved)", channel),
    }
}

fn summary_line(status: &BridgeStatus) -> String {
    if !status.api_configured {
        return format!("❌ {}", BridgeError::ApiNotConfigured);
    }
    if status.channel.is_none() {
        return format!("❌ {}", BridgeError::ChannelNotConfigured);
    }
    match (status.active, status.task_running) {
        (true, true) => "✅ Relaying Minecraft chat.".to_string(),
        (true, false) => "⚠️ Marked active but the poll task is not running.".to_string(),
        (false, true) => "⏸️ Inactive. The poll task is still running and idles until re-enabled.".to_string(),
        (false, false) => "⏹️ Disabled.".to_string(),
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "Yes"
    } else {
        "No"
    }
}

fn running_label(running: bool) -> &'static str {
    if running {
        "Running"
    } else {
        "Stopped"
    }
}

fn configured_label(configured: bool) -> &'static str {
    if configured {
        "Configured"
    } else {
        "Missing"
    }
}
