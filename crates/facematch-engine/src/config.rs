use facematch_core::comparator::{DEFAULT_ADAPTIVE_BASE_THRESHOLD, DEFAULT_DISTANCE_THRESHOLD};
use facematch_core::detector::DEFAULT_MAX_FACES_PER_IMAGE;
use facematch_core::{DetectionStrategy, MatchStrategy, QualityThresholds};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::EngineError;

/// Engine configuration: TOML file (optional) overridden by `FACEMATCH_*` variables.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub quality: QualityThresholds,
    pub matcher: MatcherConfig,
    pub detector: DetectorConfig,
    pub loader: LoaderConfig,
    pub batch: BatchConfig,
    /// SQLite file for persisted profile metadata.
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    pub strategy: MatchStrategy,
    /// Euclidean cutoff for the distance matcher.
    pub distance_threshold: f32,
    /// Base threshold for the adaptive matcher before scaling.
    pub adaptive_base_threshold: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            strategy: MatchStrategy::Distance,
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
            adaptive_base_threshold: DEFAULT_ADAPTIVE_BASE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub max_faces_per_image: usize,
    /// Fallback order, most accurate first.
    pub strategies: Vec<DetectionStrategy>,
    /// Pending requests the worker queue holds before callers wait.
    pub queue_depth: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_faces_per_image: DEFAULT_MAX_FACES_PER_IMAGE,
            strategies: DetectionStrategy::ALL.to_vec(),
            queue_depth: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { max_attempts: 3, retry_delay_ms: 50 }
    }
}

impl LoaderConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Sleep after every N photos; yield between the others.
    pub yield_every: usize,
    pub yield_delay_ms: u64,
    /// Also return per-photo results that did not match.
    pub include_non_matches: bool,
    /// Capacity of the progress channel handed out by callers.
    pub progress_buffer: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            yield_every: 3,
            yield_delay_ms: 10,
            include_non_matches: false,
            progress_buffer: 64,
        }
    }
}

impl BatchConfig {
    pub fn yield_delay(&self) -> Duration {
        Duration::from_millis(self.yield_delay_ms)
    }
}

impl EngineConfig {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Read a TOML file, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("reading {}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&text)
            .map_err(|e| EngineError::Config(format!("parsing {}: {e}", path.display())))?;
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        self.matcher.distance_threshold =
            env_parse("FACEMATCH_MATCH_THRESHOLD", self.matcher.distance_threshold);
        self.matcher.adaptive_base_threshold =
            env_parse("FACEMATCH_ADAPTIVE_THRESHOLD", self.matcher.adaptive_base_threshold);
        self.quality.min_quality = env_parse("FACEMATCH_MIN_QUALITY", self.quality.min_quality);
        self.quality.min_face_size = env_parse("FACEMATCH_MIN_FACE_SIZE", self.quality.min_face_size);
        self.detector.max_faces_per_image =
            env_parse("FACEMATCH_MAX_FACES", self.detector.max_faces_per_image);
        self.loader.max_attempts = env_parse("FACEMATCH_LOAD_ATTEMPTS", self.loader.max_attempts);
        self.batch.yield_every = env_parse("FACEMATCH_YIELD_EVERY", self.batch.yield_every);

        if let Ok(v) = std::env::var("FACEMATCH_STRATEGY") {
            match v.as_str() {
                "distance" => self.matcher.strategy = MatchStrategy::Distance,
                "adaptive" => self.matcher.strategy = MatchStrategy::Adaptive,
                other => tracing::warn!(value = other, "ignoring unknown FACEMATCH_STRATEGY"),
            }
        }
        if let Ok(v) = std::env::var("FACEMATCH_DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
    }

    /// Configured database path, or `$XDG_DATA_HOME/facematch/profiles.db`.
    pub fn db_path(&self) -> PathBuf {
        if let Some(p) = &self.db_path {
            return p.clone();
        }
        std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facematch")
            .join("profiles.db")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = EngineConfig::default();
        assert_eq!(c.matcher.strategy, MatchStrategy::Distance);
        assert!((c.matcher.distance_threshold - 0.5).abs() < 1e-6);
        assert!((c.matcher.adaptive_base_threshold - 0.68).abs() < 1e-6);
        assert_eq!(c.detector.max_faces_per_image, 15);
        assert_eq!(c.loader.max_attempts, 3);
        assert!((c.quality.min_quality - 0.4).abs() < 1e-6);
        assert!((c.quality.min_face_size - 60.0).abs() < 1e-6);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facematch.toml");
        std::fs::write(
            &path,
            r#"
            [matcher]
            strategy = "adaptive"

            [detector]
            strategies = ["tiny_large", "tiny_fast"]

            [batch]
            include_non_matches = true
            "#,
        )
        .unwrap();

        let c = EngineConfig::load(&path).unwrap();
        assert_eq!(c.matcher.strategy, MatchStrategy::Adaptive);
        assert_eq!(
            c.detector.strategies,
            vec![DetectionStrategy::TinyLarge, DetectionStrategy::TinyFast]
        );
        assert!(c.batch.include_non_matches);
        assert_eq!(c.batch.yield_every, 3);
        assert_eq!(c.detector.max_faces_per_image, 15);
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[matcher\nstrategy =").unwrap();
        assert!(matches!(EngineConfig::load(&path), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_explicit_db_path_wins() {
        let c = EngineConfig { db_path: Some(PathBuf::from("/var/lib/fm.db")), ..Default::default() };
        assert_eq!(c.db_path(), PathBuf::from("/var/lib/fm.db"));
    }
}
