/// Configuration for a [`Relay`](crate::Relay).
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use callrelay::RelayConfig;
///
/// let config = RelayConfig::new()
///     .name("edge-relay")
///     .max_attempts(3);
/// assert_eq!(config.max_attempts_limit(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Relay instance name, attached to log lines.
    pub(crate) name: String,
    /// Maximum attempts per call, the first one included.
    pub(crate) max_attempts: u32,
}

/// Default attempts per call (first try plus four retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

impl Default for RelayConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayConfig {
    /// Create a new config with defaults.
    ///
    /// If the `CALLRELAY_MAX_ATTEMPTS` environment variable holds a positive
    /// integer it replaces the default attempt limit. It can still be
    /// overridden with [`.max_attempts()`](Self::max_attempts).
    pub fn new() -> Self {
        let env = std::env::var("CALLRELAY_MAX_ATTEMPTS").ok();
        Self {
            name: "relay".to_string(),
            max_attempts: attempts_from_env(env.as_deref()),
        }
    }

    /// Set the relay instance name (default: `relay`).
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the attempt limit per call. Clamped to at least one.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Relay instance name, as set by [`.name()`](Self::name).
    pub fn relay_name(&self) -> &str {
        &self.name
    }

    /// Attempts allowed per call, as set by
    /// [`.max_attempts()`](Self::max_attempts) or the environment.
    pub fn max_attempts_limit(&self) -> u32 {
        self.max_attempts
    }
}

/// Attempt limit from a `CALLRELAY_MAX_ATTEMPTS` value. Anything but a
/// positive integer falls back to [`DEFAULT_MAX_ATTEMPTS`].
fn attempts_from_env(value: Option<&str>) -> u32 {
    value
        .and_then(|s| s.trim().parse::<u32>().ok())
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_MAX_ATTEMPTS)
}
