//! Configuration for the lantern pipeline.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};

use crate::consumer::RetryPolicy;
use crate::topology::MAX_DLQ_RETRIES;
use lantern_core::error::{MissingValueSnafu, OutOfRangeSnafu, ReadFileSnafu, YamlParseSnafu};
pub use lantern_core::{ConfigError, MetricsConfig, interpolate};

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "lantern", version, about = "Staged ingestion of missing-person case leads")]
pub struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(short, long)]
    pub config: PathBuf,
}

/// Tuning for the stage consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsumerConfig {
    /// Workers per stage queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Retry schedule for failed handlers.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            retry: RetryConfig::default(),
        }
    }
}

fn default_concurrency() -> usize {
    3
}

/// Retry schedule for stage handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Attempts per delivery, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt, in seconds.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    /// Backoff multiplier applied to each subsequent delay.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Upper bound on any single delay, in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_secs(self.initial_delay_secs),
            multiplier: self.multiplier,
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_secs: default_initial_delay(),
            multiplier: default_multiplier(),
            max_delay_secs: default_max_delay(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    2
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_delay() -> u64 {
    10
}

/// Tuning for the dead-letter sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    /// Seconds between sweeps, measured end to start.
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
    /// Single-delivery receive timeout during a sweep, in seconds.
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_secs: u64,
    /// Sweep requeues a message at most this many times before
    /// dropping it permanently.
    #[serde(default = "default_max_retries")]
    pub max_retries: u64,
    /// Messages handled per sweep.
    #[serde(default = "default_sweep_limit")]
    pub sweep_limit: usize,
    /// Storage URL for the permanent-failure archive. Archiving is
    /// disabled when unset.
    #[serde(default)]
    pub archive_url: Option<String>,
    /// Storage options for the archive (credentials, region, etc.)
    #[serde(default)]
    pub archive_storage_options: HashMap<String, String>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_sweep_interval(),
            receive_timeout_secs: default_receive_timeout(),
            max_retries: default_max_retries(),
            sweep_limit: default_sweep_limit(),
            archive_url: None,
            archive_storage_options: HashMap::new(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    1800
}

fn default_receive_timeout() -> u64 {
    1
}

fn default_max_retries() -> u64 {
    MAX_DLQ_RETRIES
}

fn default_sweep_limit() -> usize {
    500
}

/// Outbound HTTP tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_http_timeout() -> u64 {
    10
}

/// Recognition service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OcrConfig {
    /// Recognition service endpoint.
    pub endpoint: String,
}

/// Storage destinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// URL of the image bucket (supports S3, local, memory).
    pub images_url: String,
    /// URL of the case-record bucket.
    pub cases_url: String,
    /// Storage options shared by both (credentials, region, etc.)
    #[serde(default)]
    pub storage_options: HashMap<String, String>,
}

/// One case reseeded on the schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedConfig {
    /// Case the crawl belongs to.
    pub case_id: i64,
    /// Post to crawl.
    pub blog_url: String,
}

/// Seed schedule. The seeder is skipped when no seeds are configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Seconds between seed rounds.
    #[serde(default = "default_seed_interval")]
    pub interval_secs: u64,
    /// Cases to reseed every round.
    #[serde(default)]
    pub seeds: Vec<SeedConfig>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_seed_interval(),
            seeds: Vec::new(),
        }
    }
}

fn default_seed_interval() -> u64 {
    3600
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Stage consumer tuning.
    #[serde(default)]
    pub consumer: ConsumerConfig,
    /// Dead-letter sweep tuning.
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Outbound HTTP tuning.
    #[serde(default)]
    pub http: HttpConfig,
    /// Recognition service.
    pub ocr: OcrConfig,
    /// Storage destinations.
    pub storage: StorageConfig,
    /// Seed schedule.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Metrics endpoint.
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Maximum random startup delay per worker, in seconds.
    #[serde(default)]
    pub start_jitter_secs: u64,
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).context(ReadFileSnafu)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let contents = interpolate(contents)?;
        let config: Config = serde_yaml::from_str(&contents).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(
            !self.ocr.endpoint.is_empty(),
            MissingValueSnafu {
                field: "ocr.endpoint",
            }
        );
        ensure!(
            !self.storage.images_url.is_empty(),
            MissingValueSnafu {
                field: "storage.images_url",
            }
        );
        ensure!(
            !self.storage.cases_url.is_empty(),
            MissingValueSnafu {
                field: "storage.cases_url",
            }
        );
        ensure!(
            (1..=10).contains(&self.consumer.concurrency),
            OutOfRangeSnafu {
                field: "consumer.concurrency",
                message: format!("{} is not between 1 and 10", self.consumer.concurrency),
            }
        );
        ensure!(
            self.consumer.retry.max_attempts >= 1,
            OutOfRangeSnafu {
                field: "consumer.retry.max_attempts",
                message: "at least one attempt is required".to_string(),
            }
        );
        ensure!(
            self.consumer.retry.multiplier >= 1.0,
            OutOfRangeSnafu {
                field: "consumer.retry.multiplier",
                message: format!("{} would shrink the backoff", self.consumer.retry.multiplier),
            }
        );
        for seed in &self.scheduler.seeds {
            ensure!(
                !seed.blog_url.is_empty(),
                MissingValueSnafu {
                    field: "scheduler.seeds.blog_url",
                }
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
ocr:
  endpoint: http://ocr.internal/recognize
storage:
  images_url: memory:///images
  cases_url: memory:///cases
"#;

    #[test]
    fn minimal_config_gets_the_documented_defaults() {
        let config = Config::parse(MINIMAL_YAML).unwrap();

        assert_eq!(config.consumer.concurrency, 3);
        assert_eq!(config.consumer.retry.max_attempts, 5);
        assert_eq!(config.consumer.retry.initial_delay_secs, 2);
        assert_eq!(config.consumer.retry.multiplier, 2.0);
        assert_eq!(config.consumer.retry.max_delay_secs, 10);

        assert_eq!(config.sweep.interval_secs, 1800);
        assert_eq!(config.sweep.receive_timeout_secs, 1);
        assert_eq!(config.sweep.max_retries, 3);
        assert_eq!(config.sweep.sweep_limit, 500);
        assert_eq!(config.sweep.archive_url, None);

        assert_eq!(config.http.timeout_secs, 10);
        assert_eq!(config.scheduler.interval_secs, 3600);
        assert!(config.scheduler.seeds.is_empty());
        assert_eq!(config.start_jitter_secs, 0);
    }

    #[test]
    fn full_config_parses() {
        let yaml = r#"
consumer:
  concurrency: 5
  retry:
    max_attempts: 3
    initial_delay_secs: 1
sweep:
  interval_secs: 600
  sweep_limit: 50
  archive_url: memory:///failures
http:
  timeout_secs: 30
ocr:
  endpoint: http://ocr.internal/recognize
storage:
  images_url: s3://lantern-images
  cases_url: s3://lantern-cases
scheduler:
  interval_secs: 900
  seeds:
    - case_id: 7
      blog_url: https://blog.example/post/1
metrics:
  address: 127.0.0.1:9100
start_jitter_secs: 5
"#;
        let config = Config::parse(yaml).unwrap();

        assert_eq!(config.consumer.concurrency, 5);
        assert_eq!(config.consumer.retry.max_attempts, 3);
        assert_eq!(config.consumer.retry.max_delay_secs, 10, "unset fields keep defaults");
        assert_eq!(config.sweep.archive_url.as_deref(), Some("memory:///failures"));
        assert_eq!(config.scheduler.seeds.len(), 1);
        assert_eq!(config.scheduler.seeds[0].case_id, 7);
        assert_eq!(config.metrics.address, "127.0.0.1:9100");
    }

    #[test]
    fn environment_variables_interpolate() {
        // SAFETY: test-local variable, no concurrent reader.
        unsafe { std::env::set_var("LANTERN_TEST_OCR", "http://ocr.test/recognize") };
        let yaml = r#"
ocr:
  endpoint: ${LANTERN_TEST_OCR}
storage:
  images_url: ${LANTERN_TEST_IMAGES:-memory:///images}
  cases_url: memory:///cases
"#;
        let config = Config::parse(yaml).unwrap();
        assert_eq!(config.ocr.endpoint, "http://ocr.test/recognize");
        assert_eq!(config.storage.images_url, "memory:///images");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let yaml = format!("{MINIMAL_YAML}\nbogus: true\n");
        assert!(matches!(
            Config::parse(&yaml),
            Err(ConfigError::YamlParse { .. })
        ));
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        let yaml = r#"
ocr:
  endpoint: ""
storage:
  images_url: memory:///images
  cases_url: memory:///cases
"#;
        assert!(matches!(
            Config::parse(yaml),
            Err(ConfigError::MissingValue {
                field: "ocr.endpoint"
            })
        ));
    }

    #[test]
    fn out_of_range_concurrency_is_rejected() {
        let yaml = format!("{MINIMAL_YAML}\nconsumer:\n  concurrency: 11\n");
        assert!(matches!(
            Config::parse(&yaml),
            Err(ConfigError::OutOfRange {
                field: "consumer.concurrency",
                ..
            })
        ));
    }

    #[test]
    fn retry_config_produces_the_runtime_policy() {
        let policy = RetryConfig::default().policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_delay, Duration::from_secs(2));
        assert_eq!(policy.max_delay, Duration::from_secs(10));
    }
}
