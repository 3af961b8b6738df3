use std::path::{Path, PathBuf};

pub const TRAINING_DIR_VAR: &str = "CAT_CLASSIFIER_TRAINING_DIR";
pub const EXPORT_DIR_VAR: &str = "CAT_CLASSIFIER_EXPORT_DIR";
pub const TEST_IMAGE_VAR: &str = "CAT_CLASSIFIER_TEST_IMAGE";
pub const BACKBONE_WEIGHTS_VAR: &str = "CAT_CLASSIFIER_BACKBONE_WEIGHTS";

pub const MODEL_FILE: &str = "model";
pub const CONFIG_FILE: &str = "config.json";
pub const LABELS_FILE: &str = "labels.csv";
pub const SERVING_MODEL_FILE: &str = "model.bin";
pub const INFERENCE_EXPORT_FILE: &str = "out.bin";

/// Filesystem locations used by the learn and predict pipelines.
#[derive(Debug, Clone)]
pub struct Paths {
    pub training_dir: PathBuf,
    pub export_dir: PathBuf,
    pub test_image: PathBuf,
    pub backbone_weights: Option<PathBuf>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            training_dir: PathBuf::from("training-images"),
            export_dir: PathBuf::from("exported-model"),
            test_image: PathBuf::from("test-images/cats/cat.11446.jpg"),
            backbone_weights: None,
        }
    }
}

impl Paths {
    /// Reads overrides from the environment (and `.env`), falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            training_dir: dotenvy::var(TRAINING_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.training_dir),
            export_dir: dotenvy::var(EXPORT_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.export_dir),
            test_image: dotenvy::var(TEST_IMAGE_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.test_image),
            backbone_weights: dotenvy::var(BACKBONE_WEIGHTS_VAR).ok().map(PathBuf::from),
        }
    }

    pub fn new(training_dir: impl AsRef<Path>, export_dir: impl AsRef<Path>) -> Self {
        Self {
            training_dir: training_dir.as_ref().to_path_buf(),
            export_dir: export_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_test_image(mut self, test_image: impl AsRef<Path>) -> Self {
        self.test_image = test_image.as_ref().to_path_buf();
        self
    }

    /// Record path without extension; the recorder appends its own.
    pub fn model_path(&self) -> PathBuf {
        self.export_dir.join(MODEL_FILE)
    }

    pub fn config_path(&self) -> PathBuf {
        self.export_dir.join(CONFIG_FILE)
    }

    pub fn labels_path(&self) -> PathBuf {
        self.export_dir.join(LABELS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifacts_live_in_export_dir() {
        let paths = Paths::new("data/train", "out");

        assert_eq!(paths.training_dir, PathBuf::from("data/train"));
        assert_eq!(paths.model_path(), PathBuf::from("out/model"));
        assert_eq!(paths.config_path(), PathBuf::from("out/config.json"));
        assert_eq!(paths.labels_path(), PathBuf::from("out/labels.csv"));
        assert_eq!(paths.test_image, Paths::default().test_image);
        assert!(paths.backbone_weights.is_none());
    }

    #[test]
    fn test_image_override() {
        let paths = Paths::default().with_test_image("lion.jpeg");
        assert_eq!(paths.test_image, PathBuf::from("lion.jpeg"));
    }
}
