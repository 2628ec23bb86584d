use crate::matcher::DEFAULT_MATCH_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Settings shared by the HTTP service and the CLI.
///
/// Resolution order: built-in defaults, then the TOML file named by
/// `FACEGATE_CONFIG` (if set), then `FACEGATE_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing `det_10g.onnx` and `w600k_r50.onnx`.
    pub model_dir: PathBuf,
    /// Directory holding `faces.json` and `profiles.json`.
    pub data_dir: PathBuf,
    /// HTTP listen address.
    pub bind: String,
    /// Maximum Euclidean distance accepted as a match.
    pub match_threshold: f32,
    /// V4L2 device for the interactive loop.
    pub camera_device: String,
    /// Minimum seconds between repeated recognition announcements.
    pub cooldown_secs: u64,
    /// Frames discarded after opening the camera (AGC/AE settling).
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            data_dir: default_data_dir(),
            bind: "0.0.0.0:8000".to_string(),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            camera_device: "/dev/video0".to_string(),
            cooldown_secs: 3,
            warmup_frames: 4,
        }
    }
}

impl Config {
    /// Load configuration from the optional file and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("FACEGATE_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Override fields from `FACEGATE_*` variables. Unparseable numbers are ignored.
    fn apply_env(&mut self, get: impl Fn(&str) -> Option<String>) {
        if let Some(v) = get("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("FACEGATE_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = get("FACEGATE_BIND") {
            self.bind = v;
        }
        if let Some(v) = get("FACEGATE_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        override_parsed(&mut self.match_threshold, get("FACEGATE_MATCH_THRESHOLD"));
        override_parsed(&mut self.cooldown_secs, get("FACEGATE_COOLDOWN_SECS"));
        override_parsed(&mut self.warmup_frames, get("FACEGATE_WARMUP_FRAMES"));
    }
}

fn override_parsed<T: std::str::FromStr>(slot: &mut T, raw: Option<String>) {
    if let Some(v) = raw.and_then(|v| v.parse().ok()) {
        *slot = v;
    }
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.match_threshold, 0.6);
        assert_eq!(c.bind, "0.0.0.0:8000");
        assert_eq!(c.cooldown_secs, 3);
        assert!(c.data_dir.ends_with("facegate"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let c = Config::from_toml("match_threshold = 0.5\nbind = \"127.0.0.1:9000\"\n").unwrap();
        assert_eq!(c.match_threshold, 0.5);
        assert_eq!(c.bind, "127.0.0.1:9000");
        assert_eq!(c.camera_device, "/dev/video0");
    }

    #[test]
    fn test_unknown_type_rejected() {
        assert!(Config::from_toml("cooldown_secs = \"soon\"").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FACEGATE_DATA_DIR", "/var/lib/facegate"),
            ("FACEGATE_MATCH_THRESHOLD", "0.45"),
            ("FACEGATE_COOLDOWN_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut c = Config::default();
        c.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.data_dir, PathBuf::from("/var/lib/facegate"));
        assert_eq!(c.match_threshold, 0.45);
        assert_eq!(c.cooldown_secs, 3);
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file(Path::new("/nonexistent/facegate.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
