use anyhow::Context;
use facematch_core::PipelineConfig;
use std::path::{Path, PathBuf};

/// Daemon configuration, loaded from environment variables and an optional TOML file.
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the JSON enrollment snapshot.
    pub store_path: PathBuf,
    /// Whether to run the anti-spoof model on recognized faces.
    pub liveness_enabled: bool,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    ///
    /// `FACEMATCH_CONFIG` names a TOML file holding the pipeline section;
    /// `FACEMATCH_SIMILARITY_THRESHOLD` overrides the file's threshold.
    pub fn load() -> anyhow::Result<Self> {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facematch");

        let model_dir = std::env::var("FACEMATCH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models"));

        let store_path = std::env::var("FACEMATCH_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("faces.json"));

        let mut pipeline = match std::env::var("FACEMATCH_CONFIG") {
            Ok(path) => load_pipeline_file(Path::new(&path))?,
            Err(_) => PipelineConfig::default(),
        };
        if let Some(threshold) = env_parse("FACEMATCH_SIMILARITY_THRESHOLD") {
            pipeline.similarity_threshold = threshold;
        }

        Ok(Self {
            model_dir,
            store_path,
            liveness_enabled: std::env::var("FACEMATCH_LIVENESS_ENABLED")
                .map(|v| v != "0")
                .unwrap_or(true),
            pipeline,
        })
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_path("det_10g.onnx")
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_path("w600k_r50.onnx")
    }

    /// Path to the anti-spoof classifier.
    pub fn liveness_model_path(&self) -> String {
        self.model_path("MiniFASNetV2.onnx")
    }

    fn model_path(&self, file: &str) -> String {
        self.model_dir.join(file).to_string_lossy().into_owned()
    }
}

fn load_pipeline_file(path: &Path) -> anyhow::Result<PipelineConfig> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    parse_pipeline(&text).with_context(|| format!("parsing {}", path.display()))
}

fn parse_pipeline(text: &str) -> Result<PipelineConfig, toml::de::Error> {
    toml::from_str(text)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_pipeline_keeps_defaults() {
        let cfg = parse_pipeline(
            r#"
            similarity_threshold = 0.45

            [quality]
            min_width = 64.0

            [timeouts]
            embed_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(cfg.similarity_threshold, 0.45);
        assert_eq!(cfg.quality.min_width, 64.0);
        assert_eq!(cfg.quality.min_area_ratio, PipelineConfig::default().quality.min_area_ratio);
        assert_eq!(cfg.timeouts.embed_ms, Some(250));
        assert_eq!(cfg.timeouts.detect_ms, None);
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(parse_pipeline("").unwrap(), PipelineConfig::default());
    }

    #[test]
    fn test_load_pipeline_file_reports_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facematch.toml");
        std::fs::write(&path, "similarity_threshold = \"high\"").unwrap();
        assert!(load_pipeline_file(&path).is_err());
    }
}
