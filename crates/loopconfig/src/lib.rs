use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Monitor value that selects the last output the compositor reports.
pub const ANY_MONITOR: &str = "*";

pub const DEFAULT_FPS: u32 = 60;
pub const DEFAULT_CACHE_QUALITY: u32 = 75;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// On-disk settings. Every field is optional so command-line flags can
/// override any subset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub shader: Option<PathBuf>,
    #[serde(default)]
    pub monitor: Option<String>,
    #[serde(default)]
    pub fps: Option<u32>,
    /// Convert Shadertoy sources before compiling them.
    #[serde(default)]
    pub runtime_convert: bool,
    /// Poll the compositor for the pointer position.
    #[serde(default)]
    pub cursor: Option<bool>,
    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    /// Length of the recorded loop. Zero or absent disables caching.
    #[serde(default, deserialize_with = "deserialize_duration_opt")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub quality: Option<u32>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            version: default_version(),
            shader: None,
            monitor: None,
            fps: None,
            runtime_convert: false,
            cursor: None,
            cache: CacheSettings::default(),
        }
    }
}

fn default_version() -> u32 {
    1
}

fn deserialize_duration_opt<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    struct Visitor;
    impl<'de> de::Visitor<'de> for Visitor {
        type Value = Option<Duration>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a duration as number of seconds or human-readable string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            humantime::parse_duration(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration '{v}': {err}")))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(Duration::from_secs(v)))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v < 0 {
                return Err(E::custom("duration must be non-negative"));
            }
            Ok(Some(Duration::from_secs(v as u64)))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            if v.is_nan() || v.is_sign_negative() {
                return Err(E::custom("duration must be non-negative"));
            }
            Duration::try_from_secs_f64(v)
                .map(Some)
                .map_err(|err| E::custom(format!("invalid duration {v}: {err}")))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }
    }

    deserializer.deserialize_any(Visitor)
}

impl LoopConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: LoopConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Output name to look for, or `None` to take the last one enumerated.
    pub fn monitor_target(&self) -> Option<&str> {
        self.monitor
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != ANY_MONITOR)
    }

    pub fn fps(&self) -> u32 {
        self.fps.unwrap_or(DEFAULT_FPS)
    }

    pub fn cache_quality(&self) -> u32 {
        self.cache.quality.unwrap_or(DEFAULT_CACHE_QUALITY)
    }

    pub fn cursor_enabled(&self) -> bool {
        self.cursor.unwrap_or(true)
    }

    /// Length of the cached loop in whole seconds; zero means disabled.
    pub fn cache_seconds(&self) -> Result<u32, ConfigError> {
        match self.cache.duration {
            None => Ok(0),
            Some(duration) => whole_seconds(duration),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != 1 {
            return Err(ConfigError::Invalid(format!(
                "unsupported config version {}; expected 1",
                self.version
            )));
        }

        validate_fps(self.fps())?;
        validate_quality(self.cache_quality())?;
        self.cache_seconds()?;

        if let Some(shader) = &self.shader {
            if shader.as_os_str().is_empty() {
                return Err(ConfigError::Invalid("shader path may not be empty".into()));
            }
        }

        Ok(())
    }
}

pub fn validate_fps(fps: u32) -> Result<(), ConfigError> {
    if fps <= 1 {
        return Err(ConfigError::Invalid(format!(
            "fps must be greater than 1 (got {fps})"
        )));
    }
    Ok(())
}

pub fn validate_quality(quality: u32) -> Result<(), ConfigError> {
    if !(1..=100).contains(&quality) {
        return Err(ConfigError::Invalid(format!(
            "cache quality must be between 1 and 100 (got {quality})"
        )));
    }
    Ok(())
}

fn whole_seconds(duration: Duration) -> Result<u32, ConfigError> {
    if duration.subsec_nanos() != 0 {
        return Err(ConfigError::Invalid(format!(
            "cache duration must be a whole number of seconds (got {})",
            humantime::format_duration(duration)
        )));
    }
    u32::try_from(duration.as_secs()).map_err(|_| {
        ConfigError::Invalid(format!(
            "cache duration of {}s is too long",
            duration.as_secs()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version = 1
shader = "~/.config/loopaper/plasma.frag"
monitor = "DP-1"
fps = 30
runtime_convert = true

[cache]
duration = "10s"
quality = 60
"#;

    #[test]
    fn parses_sample_config() {
        let config = LoopConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.monitor_target(), Some("DP-1"));
        assert_eq!(config.fps(), 30);
        assert_eq!(config.cache_seconds().unwrap(), 10);
        assert_eq!(config.cache_quality(), 60);
        assert!(config.runtime_convert);
        assert!(config.cursor_enabled());
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = LoopConfig::from_toml_str("").unwrap();
        assert_eq!(config.version, 1);
        assert_eq!(config.fps(), DEFAULT_FPS);
        assert_eq!(config.cache_quality(), DEFAULT_CACHE_QUALITY);
        assert_eq!(config.cache_seconds().unwrap(), 0);
        assert_eq!(config.monitor_target(), None);
    }

    #[test]
    fn wildcard_monitor_means_last() {
        let config = LoopConfig::from_toml_str("monitor = \"*\"").unwrap();
        assert_eq!(config.monitor_target(), None);
    }

    #[test]
    fn integer_cache_duration_is_seconds() {
        let config = LoopConfig::from_toml_str("[cache]\nduration = 4").unwrap();
        assert_eq!(config.cache_seconds().unwrap(), 4);
    }

    #[test]
    fn rejects_fps_of_one() {
        let err = LoopConfig::from_toml_str("fps = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("fps")));
    }

    #[test]
    fn rejects_quality_out_of_range() {
        for quality in [0, 101] {
            let input = format!("[cache]\nquality = {quality}");
            assert!(matches!(
                LoopConfig::from_toml_str(&input),
                Err(ConfigError::Invalid(_))
            ));
        }
    }

    #[test]
    fn rejects_fractional_cache_duration() {
        let err = LoopConfig::from_toml_str("[cache]\nduration = \"1500ms\"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("whole")));
    }

    #[test]
    fn rejects_unrepresentable_cache_duration() {
        let err = LoopConfig::from_toml_str("[cache]\nduration = 1e30").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        let err = LoopConfig::from_toml_str("[cache]\nduration = inf").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_unknown_keys() {
        let err = LoopConfig::from_toml_str("frames_per_second = 30").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = LoopConfig::load(Path::new("/nonexistent/loopaper/config.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
