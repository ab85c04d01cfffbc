use serde::Deserialize;
use std::path::Path;

/// Root messaging configuration. Loaded from an optional TOML file and
/// environment variables with the prefix `CAMPAIGN_MESSAGING__`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagingConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// When disabled, new actions are dropped instead of queued.
    #[serde(default = "default_queue_enabled")]
    pub enabled: bool,
    #[serde(default = "default_start_paused")]
    pub start_paused: bool,
    /// Dismiss the presenting message when a push-notification-opened action arrives.
    #[serde(default = "default_dismiss_on_push_opened")]
    pub dismiss_on_push_opened: bool,
    #[serde(default = "default_continue_on_activity_resumed")]
    pub continue_on_activity_resumed: bool,
    /// Run queue passes on a runtime worker instead of the caller's thread.
    #[serde(default = "default_use_worker_for_decisions")]
    pub use_worker_for_decisions: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(default = "default_state_path")]
    pub state_path: String,
}

// Default functions
fn default_queue_enabled() -> bool {
    true
}
fn default_start_paused() -> bool {
    false
}
fn default_dismiss_on_push_opened() -> bool {
    true
}
fn default_continue_on_activity_resumed() -> bool {
    true
}
fn default_use_worker_for_decisions() -> bool {
    false
}
fn default_state_path() -> String {
    "campaign-messaging-state.json".to_string()
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: default_queue_enabled(),
            start_paused: default_start_paused(),
            dismiss_on_push_opened: default_dismiss_on_push_opened(),
            continue_on_activity_resumed: default_continue_on_activity_resumed(),
            use_worker_for_decisions: default_use_worker_for_decisions(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
        }
    }
}

impl MessagingConfig {
    /// Load configuration from an optional config file, then environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CAMPAIGN_MESSAGING")
                .separator("__")
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        tracing::debug!(file = ?path, config = ?config, "Messaging configuration loaded");
        Ok(config)
    }
}
