//! # Stack Configuration
//!
//! Plain `key value` text, one setting per line:
//!
//! ```text
//! # LDM
//! LdmSize          = 64
//! LdmGbTime        = 3     # seconds between eviction passes
//! enableAsync      true
//! asyncWindowSize  2048
//! ```
//!
//! - `#` starts a comment.
//! - The key ends at the first space, tab, `=` or `#`. The value is the next
//!   token after any run of spaces, tabs and `=`.
//! - Unknown keys are warned about and ignored.
//! - A repeated key keeps its first value.
//!
//! Every section defaults to the values in the table of
//! [`StackConfig::default`].

use its_01_ldm::LdmConfig;
use its_02_flow_filter::FloodDetectionConfig;
use its_03_verification::{PipelineConfig, VerificationMode};
use its_04_congestion_gate::{GateConfig, IdentityChangePolicy};
use shared_types::entities::L2Address;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "ITS_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: invalid value {value:?} for {key}")]
    Parse {
        line: usize,
        key: String,
        value: String,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Verification path selection.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationSettings {
    pub mode: VerificationMode,
    pub pipeline: PipelineConfig,
}

impl Default for VerificationSettings {
    fn default() -> Self {
        Self {
            mode: VerificationMode::Async,
            pipeline: PipelineConfig::default(),
        }
    }
}

/// One latency audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogSetting {
    pub enabled: bool,
    pub path: PathBuf,
}

impl AuditLogSetting {
    fn off(path: &str) -> Self {
        Self {
            enabled: false,
            path: PathBuf::from(path),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSettings {
    pub verify: AuditLogSetting,
    pub sign: AuditLogSetting,
    pub misbehavior: AuditLogSetting,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            verify: AuditLogSetting::off("/tmp/verif_stats.log"),
            sign: AuditLogSetting::off("/tmp/sign_stats.log"),
            misbehavior: AuditLogSetting::off("/tmp/misbehavior_stats.log"),
        }
    }
}

/// UDP stand-in for the sidelink radio.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RadioSettings {
    /// Local receive port; 0 binds an ephemeral port.
    pub rx_port: u16,
    /// Destination of outgoing frames. Without one, nothing is transmitted.
    pub tx_address: Option<SocketAddr>,
    /// Link-layer source address stamped on outgoing frames; 0 picks a
    /// random one at start-up.
    pub l2_address: L2Address,
}

/// Behavior of the simulated security service.
#[derive(Debug, Clone, PartialEq)]
pub struct SecuritySettings {
    /// Time spent on one simulated verification.
    pub verify_latency: Duration,
    /// Verifications the service can run at once.
    pub workers: usize,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            verify_latency: Duration::from_micros(500),
            workers: 4,
        }
    }
}

/// Complete stack configuration.
///
/// | Key | Default | Meaning |
/// |-----|---------|---------|
/// | `LdmSize` | 1 | initial slot count |
/// | `LdmMaxSize` | 0 | hard cap on slots, 0 for none |
/// | `LdmGbTime` | 3 | eviction period (s), 0 disables |
/// | `LdmGbTimeThreshold` | 5 | eviction age (s) |
/// | `enableAsync` | true | async verification window |
/// | `asyncWindowSize` | 2048 | window slots |
/// | `asyncLowWatermark` | 0 | cursor wrap point |
/// | `completionLogSize` | 4096 | completion log capacity |
/// | `enableMbd` | false | misbehavior checks |
/// | `enableL2FloodingDetect` | false | flood evaluation |
/// | `floodAttackThreshSingle` | 100 | per-sender msg/s |
/// | `mvmUtilThreshold` | 0.5 | utilization threshold |
/// | `mvmCapacityOverride`, `mvmCapacity` | false, 20 | fixed verifications/s |
/// | `filterInterval` | 1000 | evaluation period (ms) |
/// | `l2SrcIdTimeThresholdSec` | 5 | flow-record staleness (s) |
/// | `l2SrcFilteringTime` | 1000 | relevance-filter duration (ms) |
/// | `enableCongCtrl` | false | permit-gated periodic sends |
/// | `transmitInterval` | 100 | transmit period (ms) |
/// | `idChangeInterval` | 0 | min ms between pseudonym changes, 0 disables |
/// | `idChangeDistance` | 0 | min metres between pseudonym changes |
/// | `enable{Verif,Sign,Mbd}StatLog`, `{verif,sign,mbd}StatLogFile` | false | audit logs |
/// | `rxPort`, `txAddress`, `l2Address` | 0, none, 0 | UDP radio |
/// | `simVerifyLatencyUs`, `simVerifyWorkers` | 500, 4 | simulated security |
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StackConfig {
    pub ldm: LdmConfig,
    pub verification: VerificationSettings,
    pub flood: FloodDetectionConfig,
    pub gate: GateConfig,
    pub audit: AuditSettings,
    pub radio: RadioSettings,
    pub security: SecuritySettings,
}

/// Verification capacity assumed by `mvmCapacity` when not set.
const DEFAULT_CAPACITY: f64 = 20.0;

/// Values that only make sense together, collected while parsing.
#[derive(Debug)]
struct Pending {
    capacity_override: bool,
    capacity: f64,
    id_change_interval_ms: u64,
    id_change_distance_m: f64,
}

impl Default for Pending {
    fn default() -> Self {
        Self {
            capacity_override: false,
            capacity: DEFAULT_CAPACITY,
            id_change_interval_ms: 0,
            id_change_distance_m: 0.0,
        }
    }
}

impl StackConfig {
    /// Reads and parses `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loading stack configuration");
        Self::parse_str(&text)
    }

    /// Loads the file named by `ITS_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn parse_str(text: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut pending = Pending::default();
        let mut seen = HashSet::new();

        for (index, raw) in text.lines().enumerate() {
            let line = index + 1;
            let Some((key, value)) = split_setting(raw) else {
                continue;
            };
            if !seen.insert(key.to_string()) {
                warn!(line, key, "Repeated configuration key ignored");
                continue;
            }
            config.apply(&mut pending, line, key, value)?;
        }

        config.flood.capacity_override = pending.capacity_override.then_some(pending.capacity);
        config.gate.identity_change = IdentityChangePolicy::from_settings(
            pending.id_change_interval_ms,
            pending.id_change_distance_m,
        );
        config.validate()?;
        Ok(config)
    }

    fn apply(
        &mut self,
        pending: &mut Pending,
        line: usize,
        key: &str,
        value: &str,
    ) -> Result<(), ConfigError> {
        let setting = Setting { line, key, value };
        match key {
            "LdmSize" => self.ldm.initial_size = setting.number()?,
            "LdmMaxSize" => {
                let max: usize = setting.number()?;
                self.ldm.max_size = (max > 0).then_some(max);
            }
            "LdmGbTime" => self.ldm.eviction_period = Duration::from_secs(setting.number()?),
            "LdmGbTimeThreshold" => {
                self.ldm.age_threshold = Duration::from_secs(setting.number()?);
            }

            "enableAsync" => {
                self.verification.mode = if setting.flag()? {
                    VerificationMode::Async
                } else {
                    VerificationMode::Sync
                };
            }
            "asyncWindowSize" => self.verification.pipeline.window_size = setting.number()?,
            "asyncLowWatermark" => {
                self.verification.pipeline.low_watermark = setting.number()?;
            }
            "completionLogSize" => {
                self.verification.pipeline.completion_log_size = setting.number()?;
            }
            "enableMbd" => self.verification.pipeline.misbehavior_detection = setting.flag()?,

            "enableL2FloodingDetect" => self.flood.enabled = setting.flag()?,
            "floodAttackThreshSingle" => self.flood.rate_threshold = setting.number()?,
            "mvmUtilThreshold" => self.flood.utilization_threshold = setting.number()?,
            "mvmCapacityOverride" => pending.capacity_override = setting.flag()?,
            "mvmCapacity" => pending.capacity = setting.number()?,
            "filterInterval" => {
                self.flood.evaluation_period = Duration::from_millis(setting.number()?);
            }
            "l2SrcIdTimeThresholdSec" => {
                self.flood.staleness = Duration::from_secs(setting.number()?);
            }
            "l2SrcFilteringTime" => self.flood.relevance_filter_duration_ms = setting.number()?,

            "enableCongCtrl" => self.gate.congestion_control = setting.flag()?,
            "transmitInterval" => {
                self.gate.transmit_interval = Duration::from_millis(setting.number()?);
            }
            "idChangeInterval" => pending.id_change_interval_ms = setting.number()?,
            "idChangeDistance" => pending.id_change_distance_m = setting.number()?,

            "enableVerifStatLog" => self.audit.verify.enabled = setting.flag()?,
            "verifStatLogFile" => self.audit.verify.path = PathBuf::from(value),
            "enableSignStatLog" => self.audit.sign.enabled = setting.flag()?,
            "signStatLogFile" => self.audit.sign.path = PathBuf::from(value),
            "enableMbdStatLog" => self.audit.misbehavior.enabled = setting.flag()?,
            "mbdStatLogFile" => self.audit.misbehavior.path = PathBuf::from(value),

            "rxPort" => self.radio.rx_port = setting.number()?,
            "txAddress" => self.radio.tx_address = Some(setting.number()?),
            "l2Address" => self.radio.l2_address = setting.number()?,

            "simVerifyLatencyUs" => {
                self.security.verify_latency = Duration::from_micros(setting.number()?);
            }
            "simVerifyWorkers" => self.security.workers = setting.number()?,

            _ => warn!(line, key, "Unknown configuration key ignored"),
        }
        Ok(())
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ldm.initial_size == 0 {
            return Err(ConfigError::Invalid("LdmSize must be at least 1".into()));
        }
        if let Some(max) = self.ldm.max_size {
            if max < self.ldm.initial_size {
                return Err(ConfigError::Invalid(format!(
                    "LdmMaxSize {max} is below LdmSize {}",
                    self.ldm.initial_size
                )));
            }
        }
        self.verification
            .pipeline
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if !(0.0..=1.0).contains(&self.flood.utilization_threshold) {
            return Err(ConfigError::Invalid(
                "mvmUtilThreshold must be within 0..=1".into(),
            ));
        }
        if self.flood.evaluation_period.is_zero() {
            return Err(ConfigError::Invalid("filterInterval must be positive".into()));
        }
        if self.gate.transmit_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "transmitInterval must be positive".into(),
            ));
        }
        if self.security.workers == 0 {
            return Err(ConfigError::Invalid(
                "simVerifyWorkers must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Splits one line into key and value. Blank and comment lines yield `None`.
fn split_setting(raw: &str) -> Option<(&str, &str)> {
    const DELIMITERS: [char; 4] = [' ', '\t', '=', '#'];

    let line = raw.trim_start_matches([' ', '\t']);
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let key_end = line.find(DELIMITERS).unwrap_or(line.len());
    let (key, rest) = line.split_at(key_end);
    if key.is_empty() {
        return None;
    }
    let rest = rest.trim_start_matches([' ', '\t', '=']);
    let value_end = rest.find(DELIMITERS).unwrap_or(rest.len());
    Some((key, &rest[..value_end]))
}

struct Setting<'a> {
    line: usize,
    key: &'a str,
    value: &'a str,
}

impl Setting<'_> {
    fn error(&self) -> ConfigError {
        ConfigError::Parse {
            line: self.line,
            key: self.key.to_string(),
            value: self.value.to_string(),
        }
    }

    fn number<T: FromStr>(&self) -> Result<T, ConfigError> {
        self.value.parse().map_err(|_| self.error())
    }

    fn flag(&self) -> Result<bool, ConfigError> {
        match self.value.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(self.error()),
        }
    }
}
