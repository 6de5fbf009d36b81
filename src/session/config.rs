//! Session Configuration
//!
//! Serializable settings plus the lifecycle callbacks a host registers.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use super::error::{SessionError, SessionResult};
use super::events::{ActivityKind, SessionEnd, SessionUpdate};
use super::keys::{is_protocol_key, ReservedKeys};

pub const DEFAULT_TOKEN_KEY: &str = "token";
pub const DEFAULT_INACTIVE_TIMEOUT_KEY: &str = "inactiveTimeout";
pub const DEFAULT_INACTIVE_TIME_LIMIT_MINUTES: u64 = 15;
/// One year
pub const MAX_INACTIVE_TIME_LIMIT_MINUTES: u64 = 60 * 24 * 365;

/// Invoked when this instance becomes master
pub type MasterCallback = Arc<dyn Fn() + Send + Sync>;
/// Invoked when the session ends on this instance
pub type TimeoutCallback = Arc<dyn Fn(SessionEnd) + Send + Sync>;
/// Invoked when a peer changes replicated data
pub type UpdateCallback = Arc<dyn Fn(&SessionUpdate) + Send + Sync>;

/// Tunable session settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionSettings {
    /// Local key holding the session token
    pub token_key: String,
    /// Local key holding the inactivity deadline
    pub inactive_timeout_key: String,
    /// Inactivity limit in minutes
    pub inactive_time_limit: u64,
    /// Activity kinds that reset the deadline
    pub activity_events: Vec<ActivityKind>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            token_key: DEFAULT_TOKEN_KEY.to_string(),
            inactive_timeout_key: DEFAULT_INACTIVE_TIMEOUT_KEY.to_string(),
            inactive_time_limit: DEFAULT_INACTIVE_TIME_LIMIT_MINUTES,
            activity_events: ActivityKind::defaults(),
        }
    }
}

impl SessionSettings {
    /// Parse and validate settings from TOML
    pub fn from_toml_str(source: &str) -> SessionResult<Self> {
        let settings: Self = toml::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.inactive_time_limit == 0 {
            return Err(SessionError::InvalidConfig(
                "inactiveTimeLimit must be at least one minute".to_string(),
            ));
        }
        if self.inactive_time_limit > MAX_INACTIVE_TIME_LIMIT_MINUTES {
            return Err(SessionError::InvalidConfig(format!(
                "inactiveTimeLimit exceeds {} minutes",
                MAX_INACTIVE_TIME_LIMIT_MINUTES
            )));
        }

        for (name, key) in [
            ("tokenKey", &self.token_key),
            ("inactiveTimeoutKey", &self.inactive_timeout_key),
        ] {
            if key.is_empty() {
                return Err(SessionError::InvalidConfig(format!("{} is empty", name)));
            }
            if is_protocol_key(key) {
                return Err(SessionError::InvalidConfig(format!(
                    "{} collides with protocol key {}",
                    name, key
                )));
            }
        }

        if self.token_key == self.inactive_timeout_key {
            return Err(SessionError::InvalidConfig(format!(
                "tokenKey and inactiveTimeoutKey are both {}",
                self.token_key
            )));
        }

        Ok(())
    }

    /// Inactivity limit as a duration
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.inactive_time_limit * 60)
    }

    pub fn reserved_keys(&self) -> ReservedKeys {
        ReservedKeys::new(&self.token_key, &self.inactive_timeout_key)
    }
}

/// Optional lifecycle callbacks, no-ops when absent
#[derive(Clone, Default)]
pub(crate) struct Callbacks {
    pub on_become_master: Option<MasterCallback>,
    pub on_session_timeout: Option<TimeoutCallback>,
    pub on_session_update: Option<UpdateCallback>,
}

/// Settings and callbacks for one coordinator
#[derive(Clone, Default)]
pub struct SessionConfig {
    pub settings: SessionSettings,
    pub(crate) callbacks: Callbacks,
}

impl SessionConfig {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            callbacks: Callbacks::default(),
        }
    }

    pub fn with_token_key(mut self, key: impl Into<String>) -> Self {
        self.settings.token_key = key.into();
        self
    }

    pub fn with_inactive_timeout_key(mut self, key: impl Into<String>) -> Self {
        self.settings.inactive_timeout_key = key.into();
        self
    }

    /// Set the inactivity limit in minutes
    pub fn with_inactive_time_limit(mut self, minutes: u64) -> Self {
        self.settings.inactive_time_limit = minutes;
        self
    }

    pub fn with_activity_events(mut self, kinds: Vec<ActivityKind>) -> Self {
        self.settings.activity_events = kinds;
        self
    }

    pub fn on_become_master(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.callbacks.on_become_master = Some(Arc::new(callback));
        self
    }

    pub fn on_session_timeout(
        mut self,
        callback: impl Fn(SessionEnd) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_session_timeout = Some(Arc::new(callback));
        self
    }

    pub fn on_session_update(
        mut self,
        callback: impl Fn(&SessionUpdate) + Send + Sync + 'static,
    ) -> Self {
        self.callbacks.on_session_update = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("settings", &self.settings)
            .field("on_become_master", &self.callbacks.on_become_master.is_some())
            .field("on_session_timeout", &self.callbacks.on_session_timeout.is_some())
            .field("on_session_update", &self.callbacks.on_session_update.is_some())
            .finish()
    }
}
