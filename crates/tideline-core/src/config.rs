//! tideline.toml configuration parser.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::{parse_duration, DurationError};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("{field}: {source}")]
    Duration {
        field: &'static str,
        #[source]
        source: DurationError,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TidelineConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    pub metrics: Option<MetricsConfig>,
    #[serde(default)]
    pub scale: ScaleConfig,
    #[serde(default)]
    pub workloads: Vec<WorkloadConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global evaluation tick (e.g., "15s").
    #[serde(default = "default_interval")]
    pub interval: String,
    /// Per-cycle deadline before the cycle is aborted as missed.
    #[serde(default = "default_cycle_deadline")]
    pub cycle_deadline: String,
    /// Maximum number of workload cycles running at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Sample retention, in evaluation periods.
    #[serde(default = "default_retention_periods")]
    pub retention_periods: u32,
    #[serde(default)]
    pub aggregation: AggregationPolicy,
}

/// How per-replica utilization is folded into one signal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum AggregationPolicy {
    #[default]
    Mean,
    /// Drop `fraction` of the replicas from each tail before averaging.
    TrimmedMean { fraction: f64 },
    /// Nearest-rank percentile (0–100) of per-replica utilization.
    Percentile { percentile: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Metrics API address (host:port).
    pub endpoint: String,
    #[serde(default = "default_request_timeout")]
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleConfig {
    /// Scale subresource API address (host:port). Absent means dry-run.
    pub endpoint: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub timeout: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay: String,
    #[serde(default = "default_max_delay")]
    pub max_delay: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub name: String,
    #[serde(default = "default_min_replicas")]
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub target_utilization_percent: f64,
    /// "cpu", "memory" or "custom:<name>".
    #[serde(default = "default_metric")]
    pub metric: String,
    pub tolerance: Option<f64>,
    pub scale_up: Option<ScalingRulesConfig>,
    pub scale_down: Option<ScalingRulesConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScalingRulesConfig {
    /// Stabilization window for this direction (e.g., "30s", "5m").
    pub window: Option<String>,
    /// Maximum change per cycle, as a percentage of current replicas.
    pub max_change_percent: Option<u32>,
}

fn default_interval() -> String {
    "15s".to_string()
}

fn default_cycle_deadline() -> String {
    "10s".to_string()
}

fn default_max_concurrency() -> usize {
    16
}

fn default_retention_periods() -> u32 {
    5
}

fn default_request_timeout() -> String {
    "5s".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> String {
    "200ms".to_string()
}

fn default_max_delay() -> String {
    "2s".to_string()
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_min_replicas() -> u32 {
    1
}

fn default_metric() -> String {
    "cpu".to_string()
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).map_err(|source| ConfigError::Duration { field, source })
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            cycle_deadline: default_cycle_deadline(),
            max_concurrency: default_max_concurrency(),
            retention_periods: default_retention_periods(),
            aggregation: AggregationPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn interval(&self) -> Result<Duration, ConfigError> {
        duration_field("engine.interval", &self.interval)
    }

    pub fn cycle_deadline(&self) -> Result<Duration, ConfigError> {
        duration_field("engine.cycle_deadline", &self.cycle_deadline)
    }

    /// Samples older than this are discarded.
    pub fn retention(&self) -> Result<Duration, ConfigError> {
        self.interval()?
            .checked_mul(self.retention_periods.max(1))
            .ok_or_else(|| {
                ConfigError::Invalid("engine.retention_periods: retention overflows".to_string())
            })
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval()?.is_zero() {
            return Err(ConfigError::Invalid("engine.interval must be positive".to_string()));
        }
        if self.cycle_deadline()?.is_zero() {
            return Err(ConfigError::Invalid(
                "engine.cycle_deadline must be positive".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_concurrency must be at least 1".to_string(),
            ));
        }
        self.retention()?;
        Ok(())
    }
}

impl MetricsConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("metrics.timeout", &self.timeout)
    }
}

impl Default for ScaleConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout: default_request_timeout(),
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
        }
    }
}

impl ScaleConfig {
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        duration_field("scale.timeout", &self.timeout)
    }

    pub fn base_delay(&self) -> Result<Duration, ConfigError> {
        duration_field("scale.base_delay", &self.base_delay)
    }

    pub fn max_delay(&self) -> Result<Duration, ConfigError> {
        duration_field("scale.max_delay", &self.max_delay)
    }
}

impl ScalingRulesConfig {
    /// Parsed stabilization window, if one was configured.
    pub fn window(&self) -> Result<Option<Duration>, ConfigError> {
        self.window
            .as_deref()
            .map(|w| duration_field("workloads.window", w))
            .transpose()
    }
}

impl TidelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        content.parse()
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config with one CPU-scaled workload.
    pub fn scaffold(namespace: &str, name: &str) -> Self {
        TidelineConfig {
            engine: EngineConfig::default(),
            metrics: None,
            scale: ScaleConfig::default(),
            workloads: vec![WorkloadConfig {
                namespace: namespace.to_string(),
                name: name.to_string(),
                min_replicas: 2,
                max_replicas: 10,
                target_utilization_percent: 70.0,
                metric: default_metric(),
                tolerance: Some(0.1),
                scale_up: Some(ScalingRulesConfig {
                    window: Some("30s".to_string()),
                    max_change_percent: Some(100),
                }),
                scale_down: Some(ScalingRulesConfig {
                    window: Some("5m".to_string()),
                    max_change_percent: Some(50),
                }),
            }],
        }
    }
}

impl std::str::FromStr for TidelineConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scaffold() {
        let config = TidelineConfig::scaffold("default", "api");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("api"));
        assert!(toml_str.contains("target_utilization_percent"));

        let reparsed: TidelineConfig = toml_str.parse().unwrap();
        assert_eq!(reparsed.workloads.len(), 1);
    }

    #[test]
    fn test_parse_empty_uses_defaults() {
        let config: TidelineConfig = "".parse().unwrap();
        assert_eq!(config.engine.interval().unwrap(), Duration::from_secs(15));
        assert_eq!(config.engine.cycle_deadline().unwrap(), Duration::from_secs(10));
        assert_eq!(config.engine.max_concurrency, 16);
        // Retention defaults to five evaluation periods.
        assert_eq!(config.engine.retention().unwrap(), Duration::from_secs(75));
        assert_eq!(config.engine.aggregation, AggregationPolicy::Mean);
        assert!(config.metrics.is_none());
        assert!(config.scale.endpoint.is_none());
        assert_eq!(config.scale.max_attempts, 3);
        assert_eq!(config.scale.base_delay().unwrap(), Duration::from_millis(200));
        assert!(config.workloads.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let toml_str = r#"
[engine]
interval = "30s"
aggregation = { policy = "trimmed_mean", fraction = 0.1 }

[metrics]
endpoint = "127.0.0.1:9100"

[scale]
endpoint = "127.0.0.1:9200"
max_attempts = 5

[[workloads]]
name = "api"
max_replicas = 10
target_utilization_percent = 70
metric = "memory"

[workloads.scale_down]
window = "10m"
"#;
        let config: TidelineConfig = toml_str.parse().unwrap();
        assert_eq!(config.engine.interval().unwrap(), Duration::from_secs(30));
        assert_eq!(
            config.engine.aggregation,
            AggregationPolicy::TrimmedMean { fraction: 0.1 }
        );
        assert_eq!(config.metrics.unwrap().endpoint, "127.0.0.1:9100");
        assert_eq!(config.scale.max_attempts, 5);

        let w = &config.workloads[0];
        assert_eq!(w.namespace, "default");
        assert_eq!(w.min_replicas, 1);
        assert_eq!(w.metric, "memory");
        assert!(w.scale_up.is_none());
        let down = w.scale_down.as_ref().unwrap();
        assert_eq!(down.window().unwrap(), Some(Duration::from_secs(600)));
        assert_eq!(down.max_change_percent, None);
    }

    #[test]
    fn test_bad_duration_names_field() {
        let config: TidelineConfig = "[engine]\ninterval = \"often\"\n".parse().unwrap();
        let err = config.engine.interval().unwrap_err();
        assert!(err.to_string().starts_with("engine.interval"));
    }

    #[test]
    fn test_engine_validate_rejects_zero_settings() {
        let config: TidelineConfig = "".parse().unwrap();
        assert!(config.engine.validate().is_ok());

        for engine in [
            "interval = \"0s\"",
            "cycle_deadline = \"0ms\"",
            "max_concurrency = 0",
        ] {
            let config: TidelineConfig = format!("[engine]\n{engine}\n").parse().unwrap();
            let err = config.engine.validate().unwrap_err();
            assert!(matches!(err, ConfigError::Invalid(_)), "{engine}: {err}");
        }
    }

    #[test]
    fn test_retention_overflow_is_an_error() {
        let config: TidelineConfig =
            "[engine]\ninterval = \"5000000000000000000s\"\nretention_periods = 5\n"
                .parse()
                .unwrap();
        assert!(matches!(config.engine.retention(), Err(ConfigError::Invalid(_))));
        assert!(config.engine.validate().is_err());
    }

    #[test]
    fn test_missing_required_workload_field() {
        let toml_str = r#"
[[workloads]]
name = "api"
target_utilization_percent = 70
"#;
        assert!(toml_str.parse::<TidelineConfig>().is_err());
    }
}
