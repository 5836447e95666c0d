use crate::error::{Result, SubsearchError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool size; 0 means one worker per CPU.
    pub workers: usize,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub probe_timeout_secs: u64,
    pub extract_timeout_secs: u64,
    /// Detector confidence below which the fallback encoding list is tried.
    pub encoding_confidence_threshold: f32,
    /// Frame rate for MicroDVD files that do not declare one.
    pub microdvd_fps: f64,
    /// Populate the cache in the background right after a scan.
    pub warm_after_scan: bool,
    /// Where extracted container tracks are written (system temp dir if unset).
    pub temp_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 0,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            probe_timeout_secs: 60,
            extract_timeout_secs: 120,
            encoding_confidence_threshold: 0.8,
            microdvd_fps: 23.976,
            warm_after_scan: true,
            temp_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        // Load from config file if it exists
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents).map_err(|e| {
                    SubsearchError::Config(format!("{}: {e}", config_path.display()))
                })?;
            }
        }

        // Override with environment variables
        if let Ok(workers) = std::env::var("SUBSEARCH_WORKERS") {
            if let Ok(w) = workers.parse() {
                config.workers = w;
            }
        }
        if let Ok(path) = std::env::var("SUBSEARCH_FFMPEG") {
            config.ffmpeg_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("SUBSEARCH_FFPROBE") {
            config.ffprobe_path = PathBuf::from(path);
        }
        if let Ok(timeout) = std::env::var("SUBSEARCH_EXTRACT_TIMEOUT") {
            if let Ok(t) = timeout.parse() {
                config.extract_timeout_secs = t;
            }
        }
        if let Ok(threshold) = std::env::var("SUBSEARCH_ENCODING_THRESHOLD") {
            if let Ok(t) = threshold.parse() {
                config.encoding_confidence_threshold = t;
            }
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_timeout_secs == 0 || self.extract_timeout_secs == 0 {
            return Err(SubsearchError::Config(
                "Tool timeouts must be greater than 0".to_string(),
            ));
        }

        if !(self.encoding_confidence_threshold > 0.0 && self.encoding_confidence_threshold <= 1.0)
        {
            return Err(SubsearchError::Config(format!(
                "Encoding confidence threshold must be in (0, 1], got {}",
                self.encoding_confidence_threshold
            )));
        }

        if !(self.microdvd_fps > 0.0) {
            return Err(SubsearchError::Config(format!(
                "MicroDVD frame rate must be positive, got {}",
                self.microdvd_fps
            )));
        }

        Ok(())
    }

    /// Effective worker count.
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.workers
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn extract_timeout(&self) -> Duration {
        Duration::from_secs(self.extract_timeout_secs)
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("subsearch").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.workers, 0);
        assert_eq!(config.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.extract_timeout(), Duration::from_secs(120));
        assert!(config.warm_after_scan);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_worker_count_defaults_to_cpus() {
        let mut config = Config::default();
        assert!(config.worker_count() >= 1);

        config.workers = 3;
        assert_eq!(config.worker_count(), 3);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.encoding_confidence_threshold = 0.0;
        assert!(config.validate().is_err());

        config.encoding_confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        config.encoding_confidence_threshold = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let mut config = Config::default();
        config.extract_timeout_secs = 0;
        assert!(matches!(config.validate(), Err(SubsearchError::Config(_))));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str("workers = 2\nmicrodvd_fps = 25.0\n").unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.microdvd_fps, 25.0);
        assert_eq!(config.probe_timeout_secs, 60);
    }
}
