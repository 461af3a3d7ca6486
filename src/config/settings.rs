use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Phrases treated as unauthorized clinical advice.
pub const DEFAULT_PROHIBITED_PHRASES: &[&str] = &[
    "take this medication",
    "discontinue treatment",
    "contact your doctor immediately",
    "prescription",
    "diagnosis",
    "dosage",
    "cure for",
];

/// Main board configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    pub routing: RoutingConfig,
    pub execution: ExecutionConfig,
    pub store: StoreConfig,
    pub adapters: AdaptersConfig,
}

/// Thresholds and hard limits used by the router
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Minimum safety score (0.0-1.0) before a draft may leave drafting
    pub safety_threshold: f64,
    /// Minimum empathy score (0.0-1.0) before the critic lets go
    pub empathy_threshold: f64,
    /// Revision cycles allowed before the session is aborted
    pub max_iterations: u32,
    /// Adapter steps allowed before the session is aborted
    pub max_steps: u32,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            safety_threshold: 0.85,
            empathy_threshold: 0.70,
            max_iterations: 3,
            max_steps: 40,
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1 = after the first failure).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Per-call timeout for agent adapters
    pub adapter_timeout_secs: u64,
    /// Retry policy for failed or timed-out adapter calls
    pub capability_retry: RetryConfig,
    /// Retry policy for checkpoint reads and writes
    pub persistence_retry: RetryConfig,
    /// Capacity of the in-process session event channel
    pub event_buffer: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_secs: 120,
            capability_retry: RetryConfig::default(),
            persistence_retry: RetryConfig {
                max_attempts: 5,
                initial_backoff_ms: 100,
                max_backoff_ms: 2_000,
            },
            event_buffer: 256,
        }
    }
}

impl ExecutionConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_secs(self.adapter_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory for session checkpoints
    /// Defaults to ~/.local/share/review-board (platform data dir)
    pub root_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("review-board"),
        }
    }
}

/// Which implementation backs a stage
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AdapterSpec {
    /// Deterministic in-process reference adapter
    #[default]
    Builtin,
    /// External process: session state JSON on stdin, delta JSON on stdout
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    pub drafting: AdapterSpec,
    pub safety: AdapterSpec,
    pub critic: AdapterSpec,
    pub builtin: BuiltinAdaptersConfig,
}

impl Default for AdaptersConfig {
    fn default() -> Self {
        Self {
            drafting: AdapterSpec::Builtin,
            safety: AdapterSpec::Builtin,
            critic: AdapterSpec::Builtin,
            builtin: BuiltinAdaptersConfig::default(),
        }
    }
}

/// Parameters for the built-in adapters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuiltinAdaptersConfig {
    /// Phrases the safety reviewer flags (case-insensitive)
    pub prohibited_phrases: Vec<String>,
    /// Empathy score below which the critic posts warnings
    pub empathy_target: f64,
    /// Optional minijinja template overriding the default draft layout
    pub draft_template: Option<String>,
}

impl Default for BuiltinAdaptersConfig {
    fn default() -> Self {
        Self {
            prohibited_phrases: DEFAULT_PROHIBITED_PHRASES
                .iter()
                .map(|p| p.to_string())
                .collect(),
            empathy_target: 0.70,
            draft_template: None,
        }
    }
}

impl BoardConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &PathBuf) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BoardConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults if file doesn't exist
    pub fn load_or_default(path: Option<&PathBuf>) -> anyhow::Result<Self> {
        match path {
            Some(p) if p.exists() => Self::from_file(p),
            _ => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let config = BoardConfig::default();
        assert_eq!(config.routing.safety_threshold, 0.85);
        assert_eq!(config.routing.empathy_threshold, 0.70);
        assert_eq!(config.routing.max_iterations, 3);
        assert_eq!(config.adapters.safety, AdapterSpec::Builtin);
        assert!(
            config
                .adapters
                .builtin
                .prohibited_phrases
                .contains(&"dosage".to_string())
        );
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
routing:
  max_iterations: 5
adapters:
  safety:
    kind: command
    program: python3
    args: ["safety.py"]
"#;
        let config: BoardConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.routing.max_iterations, 5);
        assert_eq!(config.routing.safety_threshold, 0.85);
        assert_eq!(
            config.adapters.safety,
            AdapterSpec::Command {
                program: "python3".to_string(),
                args: vec!["safety.py".to_string()],
            }
        );
        assert_eq!(config.adapters.critic, AdapterSpec::Builtin);
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let retry = RetryConfig {
            max_attempts: 10,
            initial_backoff_ms: 100,
            max_backoff_ms: 1_000,
        };
        assert_eq!(retry.backoff(1), Duration::from_millis(100));
        assert_eq!(retry.backoff(2), Duration::from_millis(200));
        assert_eq!(retry.backoff(3), Duration::from_millis(400));
        assert_eq!(retry.backoff(8), Duration::from_millis(1_000));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let missing = PathBuf::from("/nonexistent/review-board.yaml");
        let config = BoardConfig::load_or_default(Some(&missing)).unwrap();
        assert_eq!(config.routing.max_steps, 40);
    }
}
