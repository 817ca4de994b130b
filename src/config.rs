use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;

use crate::audio::{ClosingSilence, FramerConfig};
use crate::engine::EngineConfig;
use crate::session::SessionConfig;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub transport: TransportConfig,
    pub audio: AudioConfig,
    pub session: SessionConfig,
    pub recordings: RecordingsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "talkie".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket endpoint of the voice server
    pub url: String,
    /// Sent as a bearer token when set
    pub api_key: Option<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/api".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_duration_ms: u64,
    pub closing_silence: ClosingSilence,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            frame_duration_ms: 100,
            closing_silence: ClosingSilence::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecordingsConfig {
    pub enabled: bool,
    pub output_dir: String,
}

impl Default for RecordingsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output_dir: "~/.talkie/recordings".to_string(),
        }
    }
}

impl RecordingsConfig {
    /// Output directory with `~` expanded
    pub fn output_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.output_dir).into_owned())
    }
}

impl Config {
    /// Load `path` (any format the config crate knows, extension optional)
    /// with `TALKIE__SECTION__KEY` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix("TALKIE").separator("__"))
            .build()
            .with_context(|| format!("Failed to read config {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            framer: FramerConfig {
                sample_rate: self.audio.sample_rate,
                frame_duration_ms: self.audio.frame_duration_ms,
            },
            closing_silence: self.audio.closing_silence,
            session: self.session.clone(),
            recordings_dir: self
                .recordings
                .enabled
                .then(|| self.recordings.output_path()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_toml_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[transport]
url = "ws://voice.example:9000/api"

[audio]
closing_silence = "after_speech"

[session]
shutdown_timeout_ms = 2000
enable_tool_call = true
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap();
        let config = Config::load(path).unwrap();

        assert_eq!(config.transport.url, "ws://voice.example:9000/api");
        assert_eq!(config.audio.closing_silence, ClosingSilence::AfterSpeech);
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.session.shutdown_timeout_ms, 2000);
        assert!(config.session.enable_tool_call);
        assert_eq!(config.service.http.port, 8765);

        let engine = config.engine_config();
        assert_eq!(engine.framer.frame_duration_ms, 100);
        assert!(engine.recordings_dir.is_none());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/talkie-config").unwrap();
        assert_eq!(config.service.name, "talkie");
        assert_eq!(config.session.shutdown_timeout_ms, 5000);
    }

    #[test]
    fn test_recordings_path_expands_home() {
        let recordings = RecordingsConfig {
            enabled: true,
            output_dir: "~/rec".to_string(),
        };
        assert!(!recordings.output_path().starts_with("~"));
    }
}
