pub mod admin;
pub mod bridge;

use crate::config::Config;
use crate::{Context, Error};
use poise::serenity_prelude as serenity;
use tracing::info;

/// Why a command was refused by the access restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDenied {
    Guild,
    Channel,
    User,
}

impl AccessDenied {
    pub fn message(self) -> &'static str {
        match self {
            AccessDenied::Guild => "❌ This bot is not enabled for this server.",
            AccessDenied::Channel => "❌ Commands are not allowed in this channel.",
            AccessDenied::User => "❌ You are not allowed to use this bot.",
        }
    }
}

/// Check an invocation against the configured guild, channel and user restrictions.
pub fn check_access(
    config: &Config,
    guild: Option<serenity::GuildId>,
    channel: serenity::ChannelId,
    user: serenity::UserId,
) -> Result<(), AccessDenied> {
    if let Some(allowed) = config.allowed_guild_id {
        if guild.map(|g| g.get()) != Some(allowed) {
            return Err(AccessDenied::Guild);
        }
    }
    if let Some(allowed) = config.allowed_channel_id {
        if channel.get() != allowed {
            return Err(AccessDenied::Channel);
        }
    }
    if let Some(allowed) = config.allowed_user_id {
        if user.get() != allowed {
            return Err(AccessDenied::User);
        }
    }
    Ok(())
}

/// Global command check, registered in the framework options.
pub async fn access_check(ctx: Context<'_>) -> Result<bool, Error> {
    let denied = check_access(
        &ctx.data().config,
        ctx.guild_id(),
        ctx.channel_id(),
        ctx.author().id,
    );

    match denied {
        Ok(()) => Ok(true),
        Err(reason) => {
            info!(
                "Rejected command `{}` from {} ({:?})",
                ctx.command().qualified_name,
                ctx.author().name,
                reason
            );
            ctx.say(reason.message()).await?;
            Ok(false)
        }
    }
}
