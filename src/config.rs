use dotenvy::dotenv;
use std::env;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub owner_id: Option<u64>,
    pub status_message: String,
    pub command_prefix: String,
    pub dev_guild_id: Option<u64>,
    pub register_commands: bool,

    // Remote log API
    pub log_api_url: Option<String>,
    pub log_api_token: Option<String>,
    pub log_api_timeout_secs: u64,

    // Chat bridge
    pub chat_channel_id: Option<u64>,
    pub poll_interval: Duration,
    pub bridge_autostart: bool,

    // Seen-log persistence
    pub seen_state_path: String,
    pub seen_retention_days: u64,
    pub seen_max_entries: usize,

    // Access restrictions
    pub allowed_guild_id: Option<u64>,
    pub allowed_channel_id: Option<u64>,
    pub allowed_user_id: Option<u64>,
}

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Non-empty string value of an env var.
fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Discord snowflake from an env var. `0` and unparsable values mean unset.
fn snowflake(key: &str) -> Option<u64> {
    env::var(key)
        .ok()
        .and_then(|id| id.trim().parse().ok())
        .filter(|id| *id != 0)
}

fn poll_interval() -> Duration {
    env::var("MC_BRIDGE_POLL_INTERVAL")
        .ok()
        .and_then(|v| humantime::parse_duration(v.trim()).ok())
        .filter(|d| !d.is_zero())
        .unwrap_or(DEFAULT_POLL_INTERVAL)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok();
        Self::build()
    }

    fn build() -> anyhow::Result<Self> {
        Ok(Config {
            discord_token: non_empty("DISCORD_TOKEN")
                .ok_or_else(|| anyhow::anyhow!("DISCORD_TOKEN must be set"))?,
            owner_id: snowflake("OWNER_ID"),
            status_message: env::var("STATUS_MESSAGE")
                .unwrap_or_else(|_| "Watching the Minecraft server".to_string()),
            command_prefix: non_empty("COMMAND_PREFIX").unwrap_or_else(|| "m.".to_string()),
            dev_guild_id: snowflake("DEV_GUILD_ID"),
            register_commands: env::var("REGISTER_COMMANDS")
                .unwrap_or_else(|_| "true".to_string())
                .parse()
                .unwrap_or(true),

            log_api_url: non_empty("MC_LOG_API_URL"),
            log_api_token: non_empty("MC_LOG_API_TOKEN"),
            log_api_timeout_secs: env::var("MC_LOG_API_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            chat_channel_id: snowflake("MC_CHAT_CHANNEL_ID"),
            poll_interval: poll_interval(),
            bridge_autostart: env::var("MC_BRIDGE_AUTOSTART")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),

            seen_state_path: env::var("MC_DEDUP_STATE_PATH")
                .unwrap_or_else(|_| "data/processed_logs.json".to_string()),
            seen_retention_days: env::var("MC_DEDUP_RETENTION_DAYS")
                .unwrap_or_else(|_| "7".to_string())
                .parse()
                .unwrap_or(7),
            seen_max_entries: env::var("MC_DEDUP_MAX_ENTRIES")
                .unwrap_or_else(|_| "10000".to_string())
                .parse()
                .unwrap_or(10000),

            allowed_guild_id: snowflake("MC_ALLOWED_GUILD_ID"),
            allowed_channel_id: snowflake("MC_ALLOWED_CHANNEL_ID"),
            allowed_user_id: snowflake("MC_ALLOWED_USER_ID"),
        })
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("owner_id", &self.owner_id)
            .field("status_message", &self.status_message)
            .field("command_prefix", &self.command_prefix)
            .field("dev_guild_id", &self.dev_guild_id)
            .field("register_commands", &self.register_commands)
            .field("log_api_url", &self.log_api_url)
            .field(
                "log_api_token",
                &self.log_api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("log_api_timeout_secs", &self.log_api_timeout_secs)
            .field("chat_channel_id", &self.chat_channel_id)
            .field("poll_interval", &self.poll_interval)
            .field("bridge_autostart", &self.bridge_autostart)
            .field("seen_state_path", &self.seen_state_path)
            .field("seen_retention_days", &self.seen_retention_days)
            .field("seen_max_entries", &self.seen_max_entries)
            .field("allowed_guild_id", &self.allowed_guild_id)
            .field("allowed_channel_id", &self.allowed_channel_id)
            .field("allowed_user_id", &self.allowed_user_id)
            .finish()
    }
}
