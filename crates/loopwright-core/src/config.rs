//! Runtime configuration.
//!
//! Loaded from TOML, then overridden by environment variables:
//!
//! ## Memory
//! - `LOOPWRIGHT_MEMORY_RECENT_WINDOW` - Episodes scanned for similarity and extraction (default: 50)
//! - `LOOPWRIGHT_MEMORY_SIMILAR_LIMIT` - Similar episodes placed in objective context (default: 3)
//! - `LOOPWRIGHT_MEMORY_CONTEXT_PATTERNS` - Patterns placed in objective context (default: 5)
//! - `LOOPWRIGHT_MEMORY_PATTERN_THRESHOLD` - Minimum confidence to keep a pattern (default: 0.6)
//!
//! ## Coordinator
//! - `LOOPWRIGHT_COORDINATOR_ROSTER` - Comma-separated broadcast roster
//! - `LOOPWRIGHT_COORDINATOR_POLL_INTERVAL` - Response polling interval, humantime (default: 1s)
//!
//! ## Hooks (applied to the defaults every hook type inherits)
//! - `LOOPWRIGHT_HOOKS_ENABLED` - Enable approval hooks (default: true)
//! - `LOOPWRIGHT_HOOKS_AUTO_APPROVE` - Auto-approve confident requests (default: false)
//! - `LOOPWRIGHT_HOOKS_CONFIDENCE_THRESHOLD` - Auto-approve threshold (default: 0.8)
//! - `LOOPWRIGHT_HOOKS_COST_THRESHOLD` - Cost below which cost hooks pass (default: 10.0)
//! - `LOOPWRIGHT_HOOKS_TIMEOUT` - Approval expiry, humantime (default: 30m)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::approval::HookType;
use crate::error::ConfigError;

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub recent_window: usize,
    pub similar_limit: usize,
    pub context_pattern_limit: usize,
    pub pattern_threshold: f64,
    /// Episodes of each outcome handed to the learner per extraction
    pub extraction_sample: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recent_window: 50,
            similar_limit: 3,
            context_pattern_limit: 5,
            pattern_threshold: 0.6,
            extraction_sample: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Known workers; broadcasts go to these names
    pub roster: Vec<String>,
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            roster: ["research", "content", "quality", "strategy"]
                .into_iter()
                .map(String::from)
                .collect(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Per-hook-type approval policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookConfig {
    pub enabled: bool,
    pub auto_approve: bool,
    pub confidence_threshold: f64,
    pub cost_threshold: f64,
    /// How long a created approval stays open before it expires
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,
    pub notification_channels: Vec<String>,
}

impl Default for HookConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_approve: false,
            confidence_threshold: 0.8,
            cost_threshold: 10.0,
            timeout: Duration::from_secs(30 * 60),
            notification_channels: vec!["log".to_string()],
        }
    }
}

impl HookConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn auto_approving(threshold: f64) -> Self {
        Self {
            auto_approve: true,
            confidence_threshold: threshold,
            ..Self::default()
        }
    }
}

/// Hook defaults plus per-type overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksConfig {
    pub defaults: HookConfig,
    pub overrides: BTreeMap<HookType, HookConfig>,
}

impl HooksConfig {
    pub fn for_type(&self, hook_type: HookType) -> &HookConfig {
        self.overrides.get(&hook_type).unwrap_or(&self.defaults)
    }

    pub fn with_override(mut self, hook_type: HookType, config: HookConfig) -> Self {
        self.overrides.insert(hook_type, config);
        self
    }
}

// ============================================================================
// Runtime configuration
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub memory: MemoryConfig,
    pub coordinator: CoordinatorConfig,
    pub hooks: HooksConfig,
}

impl RuntimeConfig {
    /// Defaults overridden by `LOOPWRIGHT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        if let Some(window) = env.usize("LOOPWRIGHT_MEMORY_RECENT_WINDOW")? {
            self.memory.recent_window = window;
        }
        if let Some(limit) = env.usize("LOOPWRIGHT_MEMORY_SIMILAR_LIMIT")? {
            self.memory.similar_limit = limit;
        }
        if let Some(limit) = env.usize("LOOPWRIGHT_MEMORY_CONTEXT_PATTERNS")? {
            self.memory.context_pattern_limit = limit;
        }
        if let Some(threshold) = env.f64("LOOPWRIGHT_MEMORY_PATTERN_THRESHOLD")? {
            self.memory.pattern_threshold = threshold;
        }

        if let Some(roster) = env.string("LOOPWRIGHT_COORDINATOR_ROSTER") {
            self.coordinator.roster = roster
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(interval) = env.duration("LOOPWRIGHT_COORDINATOR_POLL_INTERVAL")? {
            self.coordinator.poll_interval = interval;
        }

        let hooks = &mut self.hooks.defaults;
        if let Some(enabled) = env.bool("LOOPWRIGHT_HOOKS_ENABLED")? {
            hooks.enabled = enabled;
        }
        if let Some(auto) = env.bool("LOOPWRIGHT_HOOKS_AUTO_APPROVE")? {
            hooks.auto_approve = auto;
        }
        if let Some(threshold) = env.f64("LOOPWRIGHT_HOOKS_CONFIDENCE_THRESHOLD")? {
            hooks.confidence_threshold = threshold;
        }
        if let Some(threshold) = env.f64("LOOPWRIGHT_HOOKS_COST_THRESHOLD")? {
            hooks.cost_threshold = threshold;
        }
        if let Some(timeout) = env.duration("LOOPWRIGHT_HOOKS_TIMEOUT")? {
            hooks.timeout = timeout;
        }

        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.memory.pattern_threshold) {
            return Err(ConfigError::ValidationError(format!(
                "memory.pattern_threshold must be within [0, 1], got {}",
                self.memory.pattern_threshold
            )));
        }
        if self.memory.recent_window == 0 {
            return Err(ConfigError::ValidationError(
                "memory.recent_window must be greater than 0".to_string(),
            ));
        }
        if self.coordinator.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "coordinator.poll_interval must be greater than 0".to_string(),
            ));
        }
        let hooks = std::iter::once(&self.hooks.defaults).chain(self.hooks.overrides.values());
        for hook in hooks {
            if !(0.0..=1.0).contains(&hook.confidence_threshold) {
                return Err(ConfigError::ValidationError(format!(
                    "hook confidence_threshold must be within [0, 1], got {}",
                    hook.confidence_threshold
                )));
            }
            if hook.cost_threshold < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "hook cost_threshold must not be negative, got {}",
                    hook.cost_threshold
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn parse<T>(&self, key: &str, kind: &str) -> Result<Option<T>, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.lookup)(key) {
            Some(val) => val
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| ConfigError::InvalidEnvVar {
                    key: key.to_string(),
                    message: format!("invalid {kind} value '{val}': {e}"),
                }),
            None => Ok(None),
        }
    }

    fn usize(&self, key: &str) -> Result<Option<usize>, ConfigError> {
        self.parse(key, "usize")
    }

    fn f64(&self, key: &str) -> Result<Option<f64>, ConfigError> {
        self.parse(key, "f64")
    }

    fn bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match (self.lookup)(key) {
            Some(val) => match val.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                _ => Err(ConfigError::InvalidEnvVar {
                    key: key.to_string(),
                    message: format!("invalid boolean value '{val}'"),
                }),
            },
            None => Ok(None),
        }
    }

    fn duration(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        match (self.lookup)(key) {
            Some(val) => humantime::parse_duration(val.trim())
                .map(Some)
                .map_err(|e| ConfigError::InvalidEnvVar {
                    key: key.to_string(),
                    message: format!("invalid duration '{val}': {e}"),
                }),
            None => Ok(None),
        }
    }
}

/// Serde adapter: durations as humantime strings (`"30m"`, `"1s"`).
pub mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = RuntimeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.memory.recent_window, 50);
        assert_eq!(config.coordinator.poll_interval, Duration::from_secs(1));
        assert_eq!(config.hooks.defaults.timeout, Duration::from_secs(1800));
    }

    #[test]
    fn toml_with_overrides_and_humantime() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [coordinator]
            roster = ["research", "content"]
            poll_interval = "250ms"

            [hooks.defaults]
            timeout = "10m"

            [hooks.overrides.cost_threshold]
            cost_threshold = 2.5
            "#,
        )
        .unwrap();

        assert_eq!(config.coordinator.roster, vec!["research", "content"]);
        assert_eq!(config.coordinator.poll_interval, Duration::from_millis(250));
        assert_eq!(config.hooks.defaults.timeout, Duration::from_secs(600));
        assert_eq!(config.hooks.for_type(HookType::CostThreshold).cost_threshold, 2.5);
        // non-overridden types fall back to defaults
        assert_eq!(config.hooks.for_type(HookType::BeforePublish).cost_threshold, 10.0);
        assert_eq!(config.memory, MemoryConfig::default());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = RuntimeConfig::default();
        config
            .apply_overrides(lookup(&[
                ("LOOPWRIGHT_COORDINATOR_ROSTER", "a, b ,,c"),
                ("LOOPWRIGHT_COORDINATOR_POLL_INTERVAL", "2s"),
                ("LOOPWRIGHT_HOOKS_AUTO_APPROVE", "yes"),
                ("LOOPWRIGHT_MEMORY_RECENT_WINDOW", "20"),
            ]))
            .unwrap();

        assert_eq!(config.coordinator.roster, vec!["a", "b", "c"]);
        assert_eq!(config.coordinator.poll_interval, Duration::from_secs(2));
        assert!(config.hooks.defaults.auto_approve);
        assert_eq!(config.memory.recent_window, 20);
    }

    #[test]
    fn invalid_env_values_are_reported() {
        let mut config = RuntimeConfig::default();
        let err = config
            .apply_overrides(lookup(&[("LOOPWRIGHT_HOOKS_ENABLED", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { ref key, .. } if key == "LOOPWRIGHT_HOOKS_ENABLED"));

        let err = config
            .apply_overrides(lookup(&[("LOOPWRIGHT_MEMORY_PATTERN_THRESHOLD", "1.5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loopwright.toml");
        std::fs::write(&path, "[memory]\nsimilar_limit = 7\n").unwrap();

        let config = RuntimeConfig::from_file(&path).unwrap();
        assert_eq!(config.memory.similar_limit, 7);

        let missing = RuntimeConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
