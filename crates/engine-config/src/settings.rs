use crate::error::ConfigError;
use engine_core::retry::RetryPolicy;
use std::{collections::HashMap, fmt, path::PathBuf, str::FromStr, time::Duration};
use tracing::debug;

pub const ENV_PREFIX: &str = "FERRY_";

const DEFAULT_TIME_BUDGET: Duration = Duration::from_secs(20);
const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
const DEFAULT_SCAN_PAGE_SIZE: usize = 100;
const DEFAULT_DOWNLOAD_BUFFER_SIZE: usize = 64 * 1024;

const DEFAULT_CONTENT_TYPES: [&str; 4] = [
    "application/octet-stream",
    "application/zip",
    "application/x-tar",
    "application/gzip",
];

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let preset = RetryPolicy::for_database();
        Self {
            max_attempts: preset.max_attempts,
            base_delay: preset.base_delay,
            max_delay: preset.max_delay,
        }
    }
}

/// Key scratch files are masked with at rest. Its bytes are never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct ScratchKey(Vec<u8>);

impl ScratchKey {
    /// Returns `None` for an empty key.
    pub fn new(key: impl Into<Vec<u8>>) -> Option<Self> {
        let key = key.into();
        (!key.is_empty()).then_some(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ScratchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ScratchKey(..)")
    }
}

/// Runtime configuration of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Directory holding partial and assembled upload files.
    pub scratch_dir: PathBuf,
    /// Directory of the sled database with sessions, leases and tombstones.
    pub state_dir: PathBuf,
    /// Wall-clock budget of one batch invocation.
    pub time_budget: Duration,
    pub chunk_size: u64,
    pub scan_page_size: usize,
    pub download_buffer_size: usize,
    pub download_chunk_delay: Option<Duration>,
    pub accepted_content_types: Vec<String>,
    /// Masks upload bytes on disk when set.
    pub scratch_key: Option<ScratchKey>,
    pub retry: RetrySettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .map(|d| d.join("ferry"))
            .unwrap_or_else(|| PathBuf::from(".ferry"));

        Self {
            scratch_dir: base.join("scratch"),
            state_dir: base.join("state"),
            time_budget: DEFAULT_TIME_BUDGET,
            chunk_size: DEFAULT_CHUNK_SIZE,
            scan_page_size: DEFAULT_SCAN_PAGE_SIZE,
            download_buffer_size: DEFAULT_DOWNLOAD_BUFFER_SIZE,
            download_chunk_delay: None,
            accepted_content_types: DEFAULT_CONTENT_TYPES.iter().map(|s| s.to_string()).collect(),
            scratch_key: None,
            retry: RetrySettings::default(),
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by `FERRY_*` process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Defaults overridden by the `FERRY_*` entries of `vars`.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        let get = |name: &str| vars.get(&format!("{ENV_PREFIX}{name}")).map(|v| v.trim());

        if let Some(v) = get("SCRATCH_DIR") {
            settings.scratch_dir = PathBuf::from(v);
        }
        if let Some(v) = get("STATE_DIR") {
            settings.state_dir = PathBuf::from(v);
        }
        if let Some(v) = get("TIME_BUDGET") {
            settings.time_budget = parse_duration("TIME_BUDGET", v)?;
        }
        if let Some(v) = get("CHUNK_SIZE") {
            settings.chunk_size = parse_number("CHUNK_SIZE", v)?;
        }
        if let Some(v) = get("SCAN_PAGE_SIZE") {
            settings.scan_page_size = parse_number("SCAN_PAGE_SIZE", v)?;
        }
        if let Some(v) = get("DOWNLOAD_BUFFER_SIZE") {
            settings.download_buffer_size = parse_number("DOWNLOAD_BUFFER_SIZE", v)?;
        }
        if let Some(v) = get("DOWNLOAD_CHUNK_DELAY") {
            let delay = parse_duration("DOWNLOAD_CHUNK_DELAY", v)?;
            settings.download_chunk_delay = (!delay.is_zero()).then_some(delay);
        }
        if let Some(v) = get("ACCEPTED_CONTENT_TYPES") {
            settings.accepted_content_types = v
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = get("SCRATCH_KEY") {
            settings.scratch_key = ScratchKey::new(v);
        }
        if let Some(v) = get("RETRY_MAX_ATTEMPTS") {
            settings.retry.max_attempts = parse_number("RETRY_MAX_ATTEMPTS", v)?;
        }
        if let Some(v) = get("RETRY_BASE_DELAY") {
            settings.retry.base_delay = parse_duration("RETRY_BASE_DELAY", v)?;
        }
        if let Some(v) = get("RETRY_MAX_DELAY") {
            settings.retry.max_delay = parse_duration("RETRY_MAX_DELAY", v)?;
        }

        settings.validate()?;
        debug!(?settings, "Engine settings loaded");
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("CHUNK_SIZE", self.chunk_size == 0),
            ("SCAN_PAGE_SIZE", self.scan_page_size == 0),
            ("DOWNLOAD_BUFFER_SIZE", self.download_buffer_size == 0),
            ("RETRY_MAX_ATTEMPTS", self.retry.max_attempts == 0),
            ("TIME_BUDGET", self.time_budget.is_zero()),
        ];

        for (key, is_zero) in positive {
            if is_zero {
                return Err(ConfigError::InvalidValue {
                    key: format!("{ENV_PREFIX}{key}"),
                    value: "0".into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            self.retry.base_delay,
            self.retry.max_delay,
        )
    }

    /// Whether an upload declaring `content_type` may be accepted. Uploads
    /// that declare nothing are accepted.
    pub fn accepts_content_type(&self, content_type: Option<&str>) -> bool {
        content_type_accepted(&self.accepted_content_types, content_type)
    }
}

/// Matches the media type of `content_type`, ignoring parameters, against
/// `accepted`. A missing content type is accepted.
pub fn content_type_accepted(accepted: &[String], content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let essence = ct.split(';').next().unwrap_or_default().trim();
            accepted.iter().any(|a| a.eq_ignore_ascii_case(essence))
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{key}"),
        value: value.to_string(),
        reason: "expected a non-negative integer".into(),
    })
}

/// Parses `250ms`, `20s`, `2m` or a bare number of seconds.
pub fn parse_duration(key: &str, value: &str) -> Result<Duration, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: format!("{ENV_PREFIX}{key}"),
        value: value.to_string(),
        reason: "expected a duration such as 500ms, 20s or 2m".into(),
    };

    let value = value.trim();
    let (digits, unit) = match value.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => value.split_at(idx),
        None => (value, "s"),
    };
    let amount: u64 = digits.parse().map_err(|_| invalid())?;

    match unit.trim() {
        "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => Ok(Duration::from_secs(amount.saturating_mul(60))),
        _ => Err(invalid()),
    }
}
