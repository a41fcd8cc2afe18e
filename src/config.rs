use serde::{Deserialize, Serialize};
use std::{fs, io::ErrorKind, path::Path, time::Duration};
use anyhow::{ensure, Context, Result};

pub const MAX_KEYPOINT_RADIUS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera_id: i32,
    pub model_path: String,
    /// Time between two frame samples.
    pub sample_period_ms: u64,
    /// Eye-line to shoulder-line distance (frame pixels) below which posture is poor.
    /// Absolute value tuned for one camera setup; not normalized by frame size.
    pub posture_threshold_px: f32,
    pub min_keypoint_score: f32,
    /// Consecutive misses before the status falls back to unknown.
    pub miss_limit: u32,
    pub keypoint_radius: u32,
    pub presence_threshold: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_id: 0,
            model_path: "models/blazepose.onnx".to_string(),
            sample_period_ms: 1000,
            posture_threshold_px: 39.0,
            min_keypoint_score: 0.5,
            miss_limit: 3,
            keypoint_radius: 5,
            presence_threshold: 0.5,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("writing config {}", path.as_ref().display()))?;
        Ok(())
    }

    /// Loads `path`, writing the defaults there first if the file does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::metadata(path) {
            Ok(_) => Self::load(path),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let config = Self::default();
                config.save(path)?;
                tracing::info!(path = %path.display(), "wrote default config");
                Ok(config)
            }
            Err(err) => Err(err).with_context(|| format!("reading config {}", path.display())),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.sample_period_ms > 0, "sample_period_ms must be positive");
        ensure!(
            self.posture_threshold_px.is_finite() && self.posture_threshold_px > 0.0,
            "posture_threshold_px must be a positive number, got {}",
            self.posture_threshold_px
        );
        ensure!(
            (0.0..=1.0).contains(&self.min_keypoint_score),
            "min_keypoint_score must be within [0, 1], got {}",
            self.min_keypoint_score
        );
        ensure!(
            (0.0..=1.0).contains(&self.presence_threshold),
            "presence_threshold must be within [0, 1], got {}",
            self.presence_threshold
        );
        ensure!(self.miss_limit > 0, "miss_limit must be at least 1");
        ensure!(
            (1..=MAX_KEYPOINT_RADIUS).contains(&self.keypoint_radius),
            "keypoint_radius must be within [1, {MAX_KEYPOINT_RADIUS}], got {}",
            self.keypoint_radius
        );
        Ok(())
    }

    pub fn sample_period(&self) -> Duration {
        Duration::from_millis(self.sample_period_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let config: Config = toml::from_str("camera_id = 2\nposture_threshold_px = 45.5\n").unwrap();
        assert_eq!(config.camera_id, 2);
        assert_eq!(config.posture_threshold_px, 45.5);
        assert_eq!(config.sample_period_ms, 1000);
        assert_eq!(config.miss_limit, 3);
        assert_eq!(config.min_keypoint_score, 0.5);
    }

    #[test]
    fn rejects_bad_values() {
        let config = Config { sample_period_ms: 0, ..Config::default() };
        assert!(config.validate().is_err());

        let config = Config { posture_threshold_px: -1.0, ..Config::default() };
        assert!(config.validate().is_err());

        let config = Config { min_keypoint_score: 1.5, ..Config::default() };
        assert!(config.validate().is_err());

        let config = Config { miss_limit: 0, ..Config::default() };
        assert!(config.validate().is_err());

        let config = Config { keypoint_radius: u32::MAX, ..Config::default() };
        assert!(config.validate().is_err());

        let config = Config { keypoint_radius: 0, ..Config::default() };
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn save_then_load_keeps_values() {
        let dir = std::env::temp_dir().join(format!("posture-sentinel-config-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let config = Config {
            camera_id: 1,
            sample_period_ms: 500,
            posture_threshold_px: 42.0,
            ..Config::default()
        };
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn load_or_create_writes_defaults() {
        let dir = std::env::temp_dir().join(format!("posture-sentinel-create-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let config = Config::load_or_create(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
        assert_eq!(Config::load(&path).unwrap(), Config::default());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn sample_period_is_in_millis() {
        assert_eq!(Config::default().sample_period(), Duration::from_secs(1));
    }
}
