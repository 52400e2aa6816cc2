use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Camera liveview URL. Optional so the viewer can be started idle and
    /// pointed at a camera through the control API.
    #[serde(default)]
    pub url: Option<String>,
    /// Multipart boundary used when the response does not announce one.
    #[serde(default = "default_boundary")]
    pub boundary: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub autostart: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_surface_width")]
    pub surface_width: u32,
    #[serde(default = "default_surface_height")]
    pub surface_height: u32,
    /// Decode downscale factor; 1 decodes at full size.
    #[serde(default = "default_sample_size")]
    pub sample_size: u32,
    /// Reuse the previous frame's pixel buffer when decoding.
    #[serde(default = "default_reuse_buffers")]
    pub reuse_buffers: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            surface_width: default_surface_width(),
            surface_height: default_surface_height(),
            sample_size: default_sample_size(),
            reuse_buffers: default_reuse_buffers(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            boundary: default_boundary(),
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            queue_capacity: default_queue_capacity(),
            autostart: false,
        }
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.render.sample_size == 0 {
            return Err(ConfigError::Invalid("render.sample_size must be at least 1".into()));
        }
        if self.render.surface_width == 0 || self.render.surface_height == 0 {
            return Err(ConfigError::Invalid("render surface must not be empty".into()));
        }
        if self.stream.boundary.trim().is_empty() {
            return Err(ConfigError::Invalid("stream.boundary must not be blank".into()));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_boundary() -> String {
    "frame".into()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_read_timeout() -> u64 {
    5
}
fn default_queue_capacity() -> usize {
    crate::queue::DEFAULT_CAPACITY
}
fn default_surface_width() -> u32 {
    640
}
fn default_surface_height() -> u32 {
    480
}
fn default_sample_size() -> u32 {
    1
}
fn default_reuse_buffers() -> bool {
    true
}
fn default_api_port() -> u16 {
    8090
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config = Config::parse("[stream]\nurl = \"http://192.168.122.1:8080/liveview\"\n")
            .unwrap();
        assert_eq!(
            config.stream.url.as_deref(),
            Some("http://192.168.122.1:8080/liveview")
        );
        assert_eq!(config.stream.boundary, "frame");
        assert_eq!(config.stream.queue_capacity, 2);
        assert_eq!(config.stream.read_timeout(), Duration::from_secs(5));
        assert!(!config.stream.autostart);
        assert_eq!(config.render.sample_size, 1);
        assert!(config.render.reuse_buffers);
        assert_eq!(config.api.port, 8090);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn stream_url_is_optional() {
        let config = Config::parse("[stream]\n").unwrap();
        assert!(config.stream.url.is_none());
    }

    #[test]
    fn zero_sample_size_rejected() {
        let err = Config::parse("[stream]\n[render]\nsample_size = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_stream_section_is_parse_error() {
        let err = Config::parse("[logging]\nlevel = \"debug\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
