/// Per-participant context handed to every component
use crate::config::Config;
use crate::timestamp::format_stamp;
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Wall clock used for `sentAt` stamps and elapsed labels
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Identity of the signed-in participant plus shared settings
#[derive(Clone)]
pub struct Session {
    user_id: String,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, config: Arc<Config>) -> Self {
        Self::with_clock(user_id, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        user_id: impl Into<String>,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            config,
            clock,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared handle to the same settings
    pub fn config_arc(&self) -> Arc<Config> {
        self.config.clone()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current time in `sentAt` format
    pub fn stamp(&self) -> String {
        format_stamp(self.now())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("user_id", &self.user_id)
            .field("config", &self.config)
            .finish()
    }
}
