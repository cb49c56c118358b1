//! Cache Configuration
//!
//! `CacheConfig` is loaded from YAML or JSON. Durations are written as
//! `"250ms"`, `"30s"`, `"5m"`, `"1h"`, `"1d"` (units may be combined, e.g.
//! `"1h30m"`) or as an integer number of milliseconds.
//!
//! ```yaml
//! l1_max_entries: 4096
//! l2_enabled: true
//! l3_directory: /var/cache/app
//! default_ttl: 1h
//! compute_timeout_default: 30s
//! enabled_tiers: [L1, L2, L3]
//! storage_timeout: 250ms
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::compression::{DEFAULT_COMPRESSION_MIN_BYTES, DEFAULT_MAX_DECOMPRESSED_BYTES};
use crate::cache::{
    CacheTier, DEFAULT_COMPUTE_TIMEOUT, DEFAULT_L1_MAX_ENTRIES, DEFAULT_STORAGE_TIMEOUT,
    DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL,
};
use crate::error::{CacheError, Result};

/// Orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Maximum number of entries in the memory tier
    pub l1_max_entries: usize,

    /// Allow session tiers to be attached
    pub l2_enabled: bool,

    /// Directory of the persistent tier
    pub l3_directory: Option<PathBuf>,

    /// TTL applied when a caller does not pick one; `null` = never expire
    #[serde(with = "duration_serde::option")]
    pub default_ttl: Option<Duration>,

    /// How long a caller waits for a computation when it sets no timeout
    #[serde(with = "duration_serde")]
    pub compute_timeout_default: Duration,

    /// Tiers taking part in the cascade
    pub enabled_tiers: Vec<CacheTier>,

    /// Upper bound for one L2 or L3 backend call
    #[serde(with = "duration_serde")]
    pub storage_timeout: Duration,

    /// LZ4-compress large L3 payloads
    pub compress_l3: bool,

    /// Smallest payload worth compressing
    pub compression_min_bytes: usize,

    /// Records inflating beyond this many bytes are treated as corrupt
    pub max_payload_bytes: usize,

    /// Period of the background expiry sweep; `null` disables it
    #[serde(with = "duration_serde::option")]
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: DEFAULT_L1_MAX_ENTRIES,
            l2_enabled: true,
            l3_directory: None,
            default_ttl: Some(DEFAULT_TTL),
            compute_timeout_default: DEFAULT_COMPUTE_TIMEOUT,
            enabled_tiers: vec![CacheTier::L1, CacheTier::L2],
            storage_timeout: DEFAULT_STORAGE_TIMEOUT,
            compress_l3: true,
            compression_min_bytes: DEFAULT_COMPRESSION_MIN_BYTES,
            max_payload_bytes: DEFAULT_MAX_DECOMPRESSED_BYTES,
            sweep_interval: Some(DEFAULT_SWEEP_INTERVAL),
        }
    }
}

impl CacheConfig {
    /// Parse a YAML document
    pub fn from_yaml_str(s: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(s)
            .map_err(|e| CacheError::Config(format!("invalid YAML configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a JSON document
    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| CacheError::Config(format!("invalid JSON configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| CacheError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    /// Enable the persistent tier in `dir`
    pub fn with_l3(mut self, dir: impl Into<PathBuf>) -> Self {
        self.l3_directory = Some(dir.into());
        if !self.enabled_tiers.contains(&CacheTier::L3) {
            self.enabled_tiers.push(CacheTier::L3);
        }
        self
    }

    pub fn with_l1_max_entries(mut self, max_entries: usize) -> Self {
        self.l1_max_entries = max_entries;
        self
    }

    pub fn with_default_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_compute_timeout(mut self, timeout: Duration) -> Self {
        self.compute_timeout_default = timeout;
        self
    }

    pub fn with_storage_timeout(mut self, timeout: Duration) -> Self {
        self.storage_timeout = timeout;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Option<Duration>) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Restrict the cascade to `tiers`
    pub fn with_tiers(mut self, tiers: &[CacheTier]) -> Self {
        self.enabled_tiers = tiers.to_vec();
        self
    }

    /// Whether `tier` takes part in the cascade
    pub fn tier_enabled(&self, tier: CacheTier) -> bool {
        if !self.enabled_tiers.contains(&tier) {
            return false;
        }
        match tier {
            CacheTier::L1 => true,
            CacheTier::L2 => self.l2_enabled,
            CacheTier::L3 => self.l3_directory.is_some(),
        }
    }

    /// Reject configurations the orchestrator cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.enabled_tiers.contains(&CacheTier::L1) && self.l1_max_entries == 0 {
            return Err(CacheError::Config(
                "l1_max_entries must be at least 1 when L1 is enabled".into(),
            ));
        }
        if self.enabled_tiers.contains(&CacheTier::L3) && self.l3_directory.is_none() {
            return Err(CacheError::Config(
                "l3_directory is required when L3 is enabled".into(),
            ));
        }
        if self.compute_timeout_default.is_zero() {
            return Err(CacheError::Config(
                "compute_timeout_default must be greater than zero".into(),
            ));
        }
        if self.storage_timeout.is_zero() {
            return Err(CacheError::Config(
                "storage_timeout must be greater than zero".into(),
            ));
        }
        if self.max_payload_bytes == 0 {
            return Err(CacheError::Config(
                "max_payload_bytes must be greater than zero".into(),
            ));
        }
        if self.sweep_interval.is_some_and(|i| i.is_zero()) {
            return Err(CacheError::Config(
                "sweep_interval must be greater than zero (or null to disable)".into(),
            ));
        }
        Ok(())
    }
}

/// Parse a duration like `"250ms"`, `"30s"`, `"1h30m"`; a bare number is
/// milliseconds
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(CacheError::Config("empty duration string".to_string()));
    }

    let mut total_ms: u64 = 0;
    let mut chars = s.chars().peekable();

    while chars.peek().is_some() {
        let mut num_buf = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_digit) {
            num_buf.push(c);
            chars.next();
        }
        let mut unit = String::new();
        while let Some(c) = chars.peek().copied().filter(char::is_ascii_alphabetic) {
            unit.push(c.to_ascii_lowercase());
            chars.next();
        }

        let num: u64 = num_buf
            .parse()
            .map_err(|_| CacheError::Config(format!("invalid number in duration: {}", s)))?;

        let multiplier = match unit.as_str() {
            "" | "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            "d" => 86_400_000,
            other => {
                return Err(CacheError::Config(format!(
                    "unknown duration unit '{}' in {}",
                    other, s
                )))
            }
        };

        total_ms = num
            .checked_mul(multiplier)
            .and_then(|ms| total_ms.checked_add(ms))
            .ok_or_else(|| CacheError::Config(format!("duration out of range: {}", s)))?;
    }

    Ok(Duration::from_millis(total_ms))
}

/// Render a duration the way [`parse_duration`] reads it
pub fn format_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        return "0ms".to_string();
    }
    for (unit, size) in [("d", 86_400_000u128), ("h", 3_600_000), ("m", 60_000), ("s", 1_000)] {
        if ms % size == 0 {
            return format!("{}{}", ms / size, unit);
        }
    }
    format!("{}ms", ms)
}

/// Serde adapter for durations in the configuration format
mod duration_serde {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    fn from_raw<E: de::Error>(raw: Raw) -> Result<Duration, E> {
        match raw {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(text) => super::parse_duration(&text).map_err(E::custom),
        }
    }

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        from_raw(Raw::deserialize(deserializer)?)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            d: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match d {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<Raw>::deserialize(deserializer)?
                .map(from_raw)
                .transpose()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("1500").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration(" 2S ").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10w").is_err());
        assert!(parse_duration("99999999999999999999d").is_err());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(90)), "90s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::ZERO), "0ms");
    }

    #[test]
    fn test_default_is_valid() {
        let config = CacheConfig::default();
        config.validate().unwrap();
        assert!(config.tier_enabled(CacheTier::L1));
        assert!(config.tier_enabled(CacheTier::L2));
        assert!(!config.tier_enabled(CacheTier::L3));
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
l1_max_entries: 2
l3_directory: /tmp/cascache
default_ttl: null
compute_timeout_default: 5s
enabled_tiers: [L1, L3]
storage_timeout: 100
"#;
        let config = CacheConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.l1_max_entries, 2);
        assert_eq!(config.default_ttl, None);
        assert_eq!(config.compute_timeout_default, Duration::from_secs(5));
        assert_eq!(config.storage_timeout, Duration::from_millis(100));
        assert!(config.tier_enabled(CacheTier::L3));
        assert!(!config.tier_enabled(CacheTier::L2));
        assert!(config.compress_l3);
    }

    #[test]
    fn test_from_json() {
        let json = r#"{"l1_max_entries": 8, "default_ttl": "10m", "l2_enabled": false}"#;
        let config = CacheConfig::from_json_str(json).unwrap();
        assert_eq!(config.default_ttl, Some(Duration::from_secs(600)));
        assert!(!config.tier_enabled(CacheTier::L2));
    }

    #[test]
    fn test_unknown_field_rejected() {
        assert_matches!(
            CacheConfig::from_yaml_str("l1_max_entrys: 3"),
            Err(CacheError::Config(_))
        );
    }

    #[test]
    fn test_validation() {
        let zero_l1 = CacheConfig::default().with_l1_max_entries(0);
        assert_matches!(zero_l1.validate(), Err(CacheError::Config(_)));

        let l3_without_dir = CacheConfig::default().with_tiers(&[CacheTier::L1, CacheTier::L3]);
        assert_matches!(l3_without_dir.validate(), Err(CacheError::Config(msg)) if msg.contains("l3_directory"));

        let zero_timeout = CacheConfig::default().with_compute_timeout(Duration::ZERO);
        assert_matches!(zero_timeout.validate(), Err(CacheError::Config(_)));

        let zero_storage = CacheConfig::default().with_storage_timeout(Duration::ZERO);
        assert_matches!(zero_storage.validate(), Err(CacheError::Config(_)));

        let l3_only = CacheConfig::default()
            .with_l1_max_entries(0)
            .with_tiers(&[CacheTier::L3])
            .with_l3("/tmp/x");
        l3_only.validate().unwrap();
    }

    #[test]
    fn test_yaml_roundtrip_keeps_durations_readable() {
        let config = CacheConfig::default().with_l3("/data/cache");
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("1h"));
        let back = CacheConfig::from_yaml_str(&yaml).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, r#"{"sweep_interval": null}"#).unwrap();
        let config = CacheConfig::from_file(&path).unwrap();
        assert_eq!(config.sweep_interval, None);

        assert_matches!(
            CacheConfig::from_file(dir.path().join("missing.yaml")),
            Err(CacheError::Config(_))
        );
    }
}
