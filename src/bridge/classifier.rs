//! Classification of Minecraft server log lines into chat bridge events.
//!
//! Patterns are tried in a fixed order (chat, join, leave, death) and the first
//! match wins, so a chat message that happens to contain a death phrase is still
//! reported as chat.

use regex::Regex;
use std::sync::LazyLock;

/// Fixed prefix the vanilla server writes before every main-thread message.
const SERVER_PREFIX: &str = r"\[\d{2}:\d{2}:\d{2}\] \[Server thread/INFO\]: ";

/// Phrases that follow the victim's name in a vanilla death message.
/// "fell" is generic on purpose and covers "fell from", "fell off", etc.
pub const DEATH_PHRASES: &[&str] = &[
    "was slain",
    "was shot",
    "was killed",
    "was fireballed",
    "was pummeled",
    "was pricked",
    "was impaled",
    "was struck",
    "was burnt",
    "was squashed",
    "hit the ground",
    "fell",
    "drowned",
    "suffocated",
    "died",
    "perished",
    "went up in flames",
    "burned",
    "froze to death",
    "starved to death",
    "tried to swim in lava",
    "experienced kinetic energy",
    "withered",
    "blew up",
];

static CHAT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"{SERVER_PREFIX}(?:\[Not Secure\] )?<([^<>\s]+)> (.+)"
    ))
});

static JOIN_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile(&format!(r"{SERVER_PREFIX}([^<>\s]+) joined the game")));

static LEAVE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| compile(&format!(r"{SERVER_PREFIX}([^<>\s]+) left the game")));

static DEATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    let phrases = DEATH_PHRASES
        .iter()
        .map(|phrase| regex::escape(phrase))
        .collect::<Vec<_>>()
        .join("|");
    compile(&format!(r"{SERVER_PREFIX}([^<>\s]+\s+(?:{phrases}).*)"))
});

fn compile(pattern: &str) -> Regex {
    // The patterns are built from constants above; a failure here is a programming error.
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid log pattern {pattern:?}: {e}"))
}

/// A classified log line, consumed by the notification sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    ChatMessage { player: String, text: String },
    PlayerJoined { player: String },
    PlayerLeft { player: String },
    /// The full death sentence, victim included. The victim is not split out.
    PlayerDeath { message: String },
    Unclassified { raw: String },
}

impl LogEvent {
    /// Short label used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LogEvent::ChatMessage { .. } => "chat",
            LogEvent::PlayerJoined { .. } => "join",
            LogEvent::PlayerLeft { .. } => "leave",
            LogEvent::PlayerDeath { .. } => "death",
            LogEvent::Unclassified { .. } => "unclassified",
        }
    }

    /// Discord announcement text, or `None` for lines that are not relayed.
    pub fn announcement(&self) -> Option<String> {
        match self {
            LogEvent::ChatMessage { player, text } => Some(format!("💬 **{player}**: {text}")),
            LogEvent::PlayerJoined { player } => Some(format!("✅ **{player}** joined")),
            LogEvent::PlayerLeft { player } => Some(format!("❌ **{player}** left")),
            LogEvent::PlayerDeath { message } => Some(format!("💀 {message}")),
            LogEvent::Unclassified { .. } => None,
        }
    }
}

/// Classify a single raw log line. Only the first physical line is inspected.
pub fn classify(line: &str) -> LogEvent {
    let first = line.lines().next().unwrap_or_default();

    if let Some(caps) = CHAT_PATTERN.captures(first) {
        return LogEvent::ChatMessage {
            player: caps[1].trim().to_string(),
            text: caps[2].trim().to_string(),
        };
    }

    if let Some(caps) = JOIN_PATTERN.captures(first) {
        return LogEvent::PlayerJoined {
            player: caps[1].trim().to_string(),
        };
    }

    if let Some(caps) = LEAVE_PATTERN.captures(first) {
        return LogEvent::PlayerLeft {
            player: caps[1].trim().to_string(),
        };
    }

    if let Some(caps) = DEATH_PATTERN.captures(first) {
        return LogEvent::PlayerDeath {
            message: caps[1].trim().to_string(),
        };
    }

    LogEvent::Unclassified {
        raw: line.to_string(),
    }
}
