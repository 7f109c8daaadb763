//! Runtime configuration.
//!
//! Defaults per the runtime contract, optionally overridden by a TOML file
//! in the user config directory and then by `WARDEN_*` environment
//! variables. Out-of-range values are clamped with a warning rather than
//! rejected.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

const MIN_APPROVAL_TIMEOUT_MS: u64 = 1_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Default per-approval deadline. Minimum 1000.
    pub approval_timeout_ms: u64,
    /// Agent-loop step budget. Minimum 1.
    pub max_steps: usize,
    /// Budget for a single LM call or code run.
    pub per_step_timeout_ms: u64,
    /// Budget for the whole turn.
    pub total_timeout_ms: u64,
    /// How long a terminal event stays readable after emission.
    pub post_terminal_retention_ms: u64,
    /// Per-session event queue soft cap before coalescing kicks in.
    pub event_queue_soft_cap: usize,
    /// Append a planner trace footer to completed events.
    pub verbose_footer: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            approval_timeout_ms: 300_000,
            max_steps: 6,
            per_step_timeout_ms: 20_000,
            total_timeout_ms: 120_000,
            post_terminal_retention_ms: 30_000,
            event_queue_soft_cap: 1024,
            verbose_footer: false,
        }
    }
}

impl RuntimeConfig {
    /// Load from the config file (if present) and apply env overrides.
    pub fn load() -> Self {
        let mut config = Self::from_file().unwrap_or_default();
        config.apply_env();
        config.clamp()
    }

    /// `~/.config/warden/warden.toml` (platform equivalent via `dirs`).
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("warden")
            .join("warden.toml")
    }

    fn from_file() -> Option<Self> {
        let path = Self::config_path();
        let raw = std::fs::read_to_string(&path).ok()?;
        match toml::from_str(&raw) {
            Ok(config) => Some(config),
            Err(e) => {
                tracing::warn!(path = %path.display(), "Ignoring malformed config file: {}", e);
                None
            }
        }
    }

    fn apply_env(&mut self) {
        env_u64("WARDEN_APPROVAL_TIMEOUT_MS", &mut self.approval_timeout_ms);
        env_usize("WARDEN_MAX_STEPS", &mut self.max_steps);
        env_u64("WARDEN_PER_STEP_TIMEOUT_MS", &mut self.per_step_timeout_ms);
        env_u64("WARDEN_TOTAL_TIMEOUT_MS", &mut self.total_timeout_ms);
        env_u64(
            "WARDEN_POST_TERMINAL_RETENTION_MS",
            &mut self.post_terminal_retention_ms,
        );
        env_usize("WARDEN_EVENT_QUEUE_SOFT_CAP", &mut self.event_queue_soft_cap);
        if let Ok(raw) = std::env::var("WARDEN_VERBOSE_FOOTER") {
            self.verbose_footer = matches!(raw.as_str(), "1" | "true" | "yes");
        }
    }

    /// Clamp values into their documented ranges.
    pub fn clamp(mut self) -> Self {
        if self.approval_timeout_ms < MIN_APPROVAL_TIMEOUT_MS {
            tracing::warn!(
                approval_timeout_ms = self.approval_timeout_ms,
                "approval_timeout_ms below minimum, clamping to {}",
                MIN_APPROVAL_TIMEOUT_MS
            );
            self.approval_timeout_ms = MIN_APPROVAL_TIMEOUT_MS;
        }
        if self.max_steps == 0 {
            tracing::warn!("max_steps must be at least 1, clamping");
            self.max_steps = 1;
        }
        if self.event_queue_soft_cap == 0 {
            tracing::warn!("event_queue_soft_cap must be positive, using default");
            self.event_queue_soft_cap = Self::default().event_queue_soft_cap;
        }
        self
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_millis(self.approval_timeout_ms)
    }

    pub fn per_step_timeout(&self) -> Duration {
        Duration::from_millis(self.per_step_timeout_ms)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_millis(self.total_timeout_ms)
    }

    pub fn post_terminal_retention(&self) -> Duration {
        Duration::from_millis(self.post_terminal_retention_ms)
    }
}

fn env_u64(key: &str, slot: &mut u64) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring non-numeric env override"),
        }
    }
}

fn env_usize(key: &str, slot: &mut usize) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(value) => *slot = value,
            Err(_) => tracing::warn!(key, value = %raw, "Ignoring non-numeric env override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = RuntimeConfig::default();
        assert_eq!(config.approval_timeout_ms, 300_000);
        assert_eq!(config.max_steps, 6);
        assert_eq!(config.per_step_timeout_ms, 20_000);
        assert_eq!(config.total_timeout_ms, 120_000);
        assert_eq!(config.post_terminal_retention_ms, 30_000);
        assert_eq!(config.event_queue_soft_cap, 1024);
        assert!(!config.verbose_footer);
    }

    #[test]
    fn clamp_enforces_minimums() {
        let config = RuntimeConfig {
            approval_timeout_ms: 10,
            max_steps: 0,
            event_queue_soft_cap: 0,
            ..Default::default()
        }
        .clamp();
        assert_eq!(config.approval_timeout_ms, 1_000);
        assert_eq!(config.max_steps, 1);
        assert_eq!(config.event_queue_soft_cap, 1024);
    }

    #[test]
    fn toml_round_trip() {
        let config = RuntimeConfig {
            max_steps: 3,
            verbose_footer: true,
            ..Default::default()
        };
        let raw = toml::to_string(&config).unwrap();
        let parsed: RuntimeConfig = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.max_steps, 3);
        assert!(parsed.verbose_footer);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let parsed: RuntimeConfig = toml::from_str("max_steps = 2\n").unwrap();
        assert_eq!(parsed.max_steps, 2);
        assert_eq!(parsed.total_timeout_ms, 120_000);
    }
}
