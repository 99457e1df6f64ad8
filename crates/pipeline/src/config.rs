use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use docshift_core::batch::{BatchLimits, DEFAULT_MAX_FILES_PER_JOB, DEFAULT_MAX_FILE_SIZE};
use docshift_core::retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};

/// Default conversion timeout (5 minutes).
const DEFAULT_CONVERSION_TIMEOUT_SECS: u64 = 300;

/// Pipeline configuration loaded from environment variables.
///
/// Every field has a default suitable for local development.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory of the local blob store (default: `./storage`).
    pub storage_root: PathBuf,
    /// Batch admission limits.
    pub limits: BatchLimits,
    /// Total attempts per task.
    pub retry: RetryPolicy,
    /// Hard wall-clock limit on one conversion call.
    pub conversion_timeout: Duration,
    /// Number of worker loops started by [`crate::JobOrchestrator::spawn`].
    pub worker_concurrency: usize,
    /// How often an idle worker polls the queue.
    pub poll_interval: Duration,
    /// How often the recovery sweep runs.
    pub sweep_interval: Duration,
    /// Age after which a `PENDING` task is republished.
    pub pending_grace: Duration,
    /// Age after which a `RUNNING` task is presumed abandoned.
    pub stall_grace: Duration,
    /// Visibility timeout of a received queue delivery.
    pub queue_lease: Duration,
    /// Target format extension (default: `pdf`).
    pub output_extension: String,
    /// LibreOffice executable (default: `libreoffice`).
    pub libreoffice_bin: String,
    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let timeout = Duration::from_secs(DEFAULT_CONVERSION_TIMEOUT_SECS);
        Self {
            storage_root: PathBuf::from("./storage"),
            limits: BatchLimits {
                max_files: DEFAULT_MAX_FILES_PER_JOB,
                max_file_size: DEFAULT_MAX_FILE_SIZE,
            },
            retry: RetryPolicy::new(DEFAULT_MAX_ATTEMPTS),
            conversion_timeout: timeout,
            worker_concurrency: 4,
            poll_interval: Duration::from_millis(500),
            sweep_interval: Duration::from_secs(60),
            pending_grace: Duration::from_secs(120),
            stall_grace: timeout * 2,
            queue_lease: timeout + Duration::from_secs(60),
            output_extension: "pdf".into(),
            libreoffice_bin: "libreoffice".into(),
            json_logs: false,
        }
    }
}

/// A configuration variable that could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{var} has invalid value '{value}': {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                         |
    /// |---------------------------|---------------------------------|
    /// | `STORAGE_ROOT`            | `./storage`                     |
    /// | `MAX_FILES_PER_JOB`       | `1000`                          |
    /// | `MAX_FILE_SIZE_BYTES`     | `52428800`                      |
    /// | `MAX_ATTEMPTS`            | `2`                             |
    /// | `CONVERSION_TIMEOUT_SECS` | `300`                           |
    /// | `WORKER_CONCURRENCY`      | `4`                             |
    /// | `POLL_INTERVAL_MS`        | `500`                           |
    /// | `SWEEP_INTERVAL_SECS`     | `60`                            |
    /// | `PENDING_GRACE_SECS`      | `120`                           |
    /// | `STALL_GRACE_SECS`        | `2 × CONVERSION_TIMEOUT_SECS`   |
    /// | `QUEUE_LEASE_SECS`        | `CONVERSION_TIMEOUT_SECS + 60`  |
    /// | `OUTPUT_EXTENSION`        | `pdf`                           |
    /// | `LIBREOFFICE_BIN`         | `libreoffice`                   |
    /// | `LOG_FORMAT`              | `text` (`json` for JSON lines)  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let timeout_secs: u64 =
            parse_var(&lookup, "CONVERSION_TIMEOUT_SECS", DEFAULT_CONVERSION_TIMEOUT_SECS)?;
        if timeout_secs == 0 {
            return Err(invalid("CONVERSION_TIMEOUT_SECS", "0", "must be positive"));
        }

        let max_files: usize = parse_var(&lookup, "MAX_FILES_PER_JOB", defaults.limits.max_files)?;
        if max_files == 0 {
            return Err(invalid("MAX_FILES_PER_JOB", "0", "must be positive"));
        }

        let max_attempts: i32 = parse_var(&lookup, "MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS)?;
        if max_attempts < 1 {
            return Err(invalid(
                "MAX_ATTEMPTS",
                &max_attempts.to_string(),
                "must be at least 1",
            ));
        }

        let worker_concurrency: usize =
            parse_var(&lookup, "WORKER_CONCURRENCY", defaults.worker_concurrency)?;
        if worker_concurrency == 0 {
            return Err(invalid("WORKER_CONCURRENCY", "0", "must be positive"));
        }

        let log_format = lookup("LOG_FORMAT").unwrap_or_else(|| "text".into());
        let json_logs = match log_format.trim().to_ascii_lowercase().as_str() {
            "json" => true,
            "text" | "" => false,
            _ => return Err(invalid("LOG_FORMAT", &log_format, "expected 'text' or 'json'")),
        };

        let output_extension = lookup("OUTPUT_EXTENSION")
            .map(|s| s.trim().trim_start_matches('.').to_ascii_lowercase())
            .unwrap_or(defaults.output_extension);
        if output_extension.is_empty() || !output_extension.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(invalid("OUTPUT_EXTENSION", &output_extension, "must be alphanumeric"));
        }

        Ok(Self {
            storage_root: lookup("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            limits: BatchLimits {
                max_files,
                max_file_size: parse_var(&lookup, "MAX_FILE_SIZE_BYTES", defaults.limits.max_file_size)?,
            },
            retry: RetryPolicy::new(max_attempts),
            conversion_timeout: Duration::from_secs(timeout_secs),
            worker_concurrency,
            poll_interval: Duration::from_millis(parse_var(&lookup, "POLL_INTERVAL_MS", 500)?),
            sweep_interval: Duration::from_secs(parse_var(&lookup, "SWEEP_INTERVAL_SECS", 60)?),
            pending_grace: Duration::from_secs(parse_var(&lookup, "PENDING_GRACE_SECS", 120)?),
            stall_grace: Duration::from_secs(parse_var(&lookup, "STALL_GRACE_SECS", timeout_secs * 2)?),
            queue_lease: Duration::from_secs(parse_var(&lookup, "QUEUE_LEASE_SECS", timeout_secs + 60)?),
            output_extension,
            libreoffice_bin: lookup("LIBREOFFICE_BIN").unwrap_or(defaults.libreoffice_bin),
            json_logs,
        })
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| invalid(var, &raw, &e.to_string())),
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
