use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Frame width × height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(400, 400)
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Which device backs the stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// USB webcam, opened by index (`0` is the default camera).
    Webcam { index: u32 },
    /// Board camera module with continuous capture.
    CameraModule,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Webcam { index: 0 }
    }
}

/// Format requested from a driver when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFormat {
    pub resolution: Resolution,
    pub framerate: u32,
}

/// Stream configuration. Immutable once a stream is opened.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub source: SourceConfig,
    pub resolution: Resolution,
    /// Target frames per second.
    pub framerate: u32,
    /// Sleep after a failed capture before retrying.
    pub failure_backoff_ms: u64,
    /// Consecutive capture failures before the loop gives up (0 = never).
    pub max_consecutive_failures: u32,
    /// Default bound for waiting on the acquisition thread after `stop()`.
    pub stop_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            resolution: Resolution::default(),
            framerate: 32,
            failure_backoff_ms: 10,
            max_consecutive_failures: 30,
            stop_timeout_ms: 2_000,
        }
    }
}

impl StreamConfig {
    /// Build a config from the flag-style selector: `use_pi_camera` picks the
    /// camera module, otherwise the webcam at `src`.
    pub fn from_flag(
        use_pi_camera: bool,
        src: u32,
        framerate: u32,
        resolution: Resolution,
    ) -> Self {
        let source = if use_pi_camera {
            SourceConfig::CameraModule
        } else {
            SourceConfig::Webcam { index: src }
        };
        Self {
            source,
            resolution,
            framerate,
            ..Self::default()
        }
    }

    /// Parse a TOML document. Missing keys fall back to defaults.
    pub fn from_toml(src: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(src)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional TOML file, then apply `FRAMESTREAM_*` overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                toml::from_str(&src)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup. Unparseable values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let index = parse::<u32>(&lookup, "FRAMESTREAM_INDEX");
        match lookup("FRAMESTREAM_SOURCE").as_deref() {
            Some("camera_module") | Some("pi") => self.source = SourceConfig::CameraModule,
            Some("webcam") => {
                self.source = SourceConfig::Webcam {
                    index: index.unwrap_or(0),
                }
            }
            Some(other) => tracing::warn!(value = other, "ignoring unknown FRAMESTREAM_SOURCE"),
            None => {}
        }
        if let (Some(i), SourceConfig::Webcam { index }) = (index, &mut self.source) {
            *index = i;
        }

        self.resolution.width =
            parse(&lookup, "FRAMESTREAM_WIDTH").unwrap_or(self.resolution.width);
        self.resolution.height =
            parse(&lookup, "FRAMESTREAM_HEIGHT").unwrap_or(self.resolution.height);
        self.framerate = parse(&lookup, "FRAMESTREAM_FPS").unwrap_or(self.framerate);
        self.failure_backoff_ms =
            parse(&lookup, "FRAMESTREAM_FAILURE_BACKOFF_MS").unwrap_or(self.failure_backoff_ms);
        self.max_consecutive_failures =
            parse(&lookup, "FRAMESTREAM_MAX_FAILURES").unwrap_or(self.max_consecutive_failures);
        self.stop_timeout_ms =
            parse(&lookup, "FRAMESTREAM_STOP_TIMEOUT_MS").unwrap_or(self.stop_timeout_ms);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolution.width == 0 || self.resolution.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "resolution must be non-zero, got {}",
                self.resolution
            )));
        }
        if self.framerate == 0 {
            return Err(ConfigError::Invalid("framerate must be non-zero".into()));
        }
        Ok(())
    }

    pub fn capture_format(&self) -> CaptureFormat {
        CaptureFormat {
            resolution: self.resolution,
            framerate: self.framerate,
        }
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StreamConfig::default();
        assert_eq!(config.source, SourceConfig::Webcam { index: 0 });
        assert_eq!(config.resolution, Resolution::new(400, 400));
        assert_eq!(config.framerate, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_flag() {
        let pi = StreamConfig::from_flag(true, 3, 15, Resolution::new(640, 480));
        assert_eq!(pi.source, SourceConfig::CameraModule);
        assert_eq!(pi.framerate, 15);

        let usb = StreamConfig::from_flag(false, 3, 15, Resolution::new(640, 480));
        assert_eq!(usb.source, SourceConfig::Webcam { index: 3 });
        assert_eq!(usb.resolution, Resolution::new(640, 480));
    }

    #[test]
    fn test_parse_toml() {
        let config = StreamConfig::from_toml(
            r#"
            framerate = 30
            resolution = { width = 1280, height = 720 }

            [source]
            kind = "camera_module"
            "#,
        )
        .unwrap();
        assert_eq!(config.source, SourceConfig::CameraModule);
        assert_eq!(config.resolution, Resolution::new(1280, 720));
        assert_eq!(config.framerate, 30);
        assert_eq!(config.stop_timeout_ms, 2_000);
    }

    #[test]
    fn test_parse_toml_webcam_index() {
        let config = StreamConfig::from_toml(
            r#"
            [source]
            kind = "webcam"
            index = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.source, SourceConfig::Webcam { index: 2 });
    }

    #[test]
    fn test_zero_framerate_rejected() {
        let err = StreamConfig::from_toml("framerate = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_unknown_source_kind_rejected() {
        let err = StreamConfig::from_toml("[source]\nkind = \"drone\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = StreamConfig::default();
        config.apply_env(env(&[
            ("FRAMESTREAM_INDEX", "4"),
            ("FRAMESTREAM_WIDTH", "320"),
            ("FRAMESTREAM_FPS", "not-a-number"),
            ("FRAMESTREAM_MAX_FAILURES", "0"),
        ]));
        assert_eq!(config.source, SourceConfig::Webcam { index: 4 });
        assert_eq!(config.resolution, Resolution::new(320, 400));
        assert_eq!(config.framerate, 32);
        assert_eq!(config.max_consecutive_failures, 0);
    }

    #[test]
    fn test_env_selects_camera_module() {
        let mut config = StreamConfig::default();
        config.apply_env(env(&[("FRAMESTREAM_SOURCE", "camera_module")]));
        assert_eq!(config.source, SourceConfig::CameraModule);
    }
}
