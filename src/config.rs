//! Application-level configuration loading, including default match rules and room limits.

use std::{env, fs, io::ErrorKind, path::PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

use crate::state::room::Rules;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_ROOM_BACK_CONFIG_PATH";

const DEFAULT_EMOJIS: [&str; 8] = ["👍", "👏", "🔥", "😂", "😮", "😢", "🎉", "❤️"];

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Rules applied when a room is created without explicit rules.
    pub default_rules: Rules,
    /// Delay of a pending action when the host does not pick one.
    pub pending_delay_ms: u64,
    /// Upper bound for a requested pending action delay.
    pub max_pending_delay_ms: u64,
    /// Interval at which clients are expected to send heartbeats.
    pub presence_poll_interval_ms: u64,
    /// Heartbeats a participant may miss before being shown offline.
    pub presence_missed_polls: u32,
    /// How long an idle lobby survives before the janitor may delete it.
    pub lobby_ttl_secs: u64,
    /// Minimum delay between two reactions of the same participant.
    pub reaction_cooldown_ms: u64,
    /// Emoji accepted by `sendReaction`.
    pub allowed_emojis: Vec<String>,
    /// Whether the server advances expired phases without a host `progress`.
    pub auto_advance: bool,
    /// Maximum number of non-removed participants per room.
    pub max_participants: usize,
    /// Attempts at generating an unused room code before giving up.
    pub room_code_attempts: u32,
    /// Interval between two janitor sweeps.
    pub janitor_interval_secs: u64,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        rounds = app_config.default_rules.rounds,
                        auto_advance = app_config.auto_advance,
                        "loaded room configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Clamp a requested pending delay, defaulting when absent.
    pub fn pending_delay(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.pending_delay_ms)
            .min(self.max_pending_delay_ms)
    }

    /// Window after the last heartbeat during which a participant counts as online.
    pub fn presence_window_ms(&self) -> i64 {
        (self.presence_poll_interval_ms * u64::from(self.presence_missed_polls)) as i64
    }

    /// Lobby time-to-live in milliseconds.
    pub fn lobby_ttl_ms(&self) -> i64 {
        (self.lobby_ttl_secs * 1_000) as i64
    }

    /// Whether `emoji` is in the accepted reaction set.
    pub fn is_allowed_emoji(&self, emoji: &str) -> bool {
        self.allowed_emojis.iter().any(|allowed| allowed == emoji)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_rules: Rules::default(),
            pending_delay_ms: 3_000,
            max_pending_delay_ms: 10_000,
            presence_poll_interval_ms: 5_000,
            presence_missed_polls: 2,
            lobby_ttl_secs: 1_800,
            reaction_cooldown_ms: 1_000,
            allowed_emojis: DEFAULT_EMOJIS.iter().map(|emoji| emoji.to_string()).collect(),
            auto_advance: true,
            max_participants: 50,
            room_code_attempts: 16,
            janitor_interval_secs: 30,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
///
/// Every field is optional; missing entries keep their default.
struct RawConfig {
    rules: Option<Rules>,
    pending_delay_ms: Option<u64>,
    max_pending_delay_ms: Option<u64>,
    presence_poll_interval_ms: Option<u64>,
    presence_missed_polls: Option<u32>,
    lobby_ttl_secs: Option<u64>,
    reaction_cooldown_ms: Option<u64>,
    allowed_emojis: Option<Vec<String>>,
    auto_advance: Option<bool>,
    max_participants: Option<usize>,
    room_code_attempts: Option<u32>,
    janitor_interval_secs: Option<u64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        Self {
            default_rules: value.rules.unwrap_or(defaults.default_rules),
            pending_delay_ms: value.pending_delay_ms.unwrap_or(defaults.pending_delay_ms),
            max_pending_delay_ms: value
                .max_pending_delay_ms
                .unwrap_or(defaults.max_pending_delay_ms),
            presence_poll_interval_ms: value
                .presence_poll_interval_ms
                .unwrap_or(defaults.presence_poll_interval_ms),
            presence_missed_polls: value
                .presence_missed_polls
                .unwrap_or(defaults.presence_missed_polls),
            lobby_ttl_secs: value.lobby_ttl_secs.unwrap_or(defaults.lobby_ttl_secs),
            reaction_cooldown_ms: value
                .reaction_cooldown_ms
                .unwrap_or(defaults.reaction_cooldown_ms),
            allowed_emojis: value
                .allowed_emojis
                .filter(|emojis| !emojis.is_empty())
                .unwrap_or(defaults.allowed_emojis),
            auto_advance: value.auto_advance.unwrap_or(defaults.auto_advance),
            max_participants: value.max_participants.unwrap_or(defaults.max_participants),
            room_code_attempts: value
                .room_code_attempts
                .unwrap_or(defaults.room_code_attempts)
                .max(1),
            janitor_interval_secs: value
                .janitor_interval_secs
                .unwrap_or(defaults.janitor_interval_secs)
                .max(1),
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
