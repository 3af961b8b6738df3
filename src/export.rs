use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    module::Module,
    prelude::Backend,
    record::{BinFileRecorder, FullPrecisionSettings},
};
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    dataset::IMAGENET_MEAN,
    error::{Error, Result},
    model::Classifier,
};

const RECORD_EXTENSION: &str = "bin";

/// Converts a trained classifier into a serving artifact.
///
/// Implementations write at least one file under `export_dir` derived from
/// `file_name` and return its path.
pub trait Exporter<B: Backend> {
    fn export(
        &self,
        model: &Classifier<B>,
        output_names: &[String],
        export_dir: &Path,
        file_name: &str,
    ) -> Result<PathBuf>;
}

/// Describes how to feed and read a serving record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingManifest {
    pub record: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub input_shape: [usize; 4],
    pub channel_mean: [f32; 3],
    pub num_classes: usize,
}

impl ServingManifest {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Writes the weights as a full-precision binary record plus a JSON manifest
/// with the same file stem.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServingExporter;

impl<B: Backend> Exporter<B> for ServingExporter {
    fn export(
        &self,
        model: &Classifier<B>,
        output_names: &[String],
        export_dir: &Path,
        file_name: &str,
    ) -> Result<PathBuf> {
        if output_names.is_empty() {
            return Err(Error::Export("no output tensors to export".to_string()));
        }
        fs::create_dir_all(export_dir)?;

        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        // The recorder replaces whatever extension the caller asked for.
        let record_path = export_dir.join(file_name).with_extension(RECORD_EXTENSION);

        model
            .clone()
            .save_file(record_path.clone(), &recorder)
            .map_err(|err| {
                Error::Export(format!("could not write {}: {err:?}", record_path.display()))
            })?;

        let manifest = ServingManifest {
            record: record_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            inputs: model.input_names(),
            outputs: output_names.to_vec(),
            input_shape: model.input_shape(),
            channel_mean: IMAGENET_MEAN,
            num_classes: model.num_classes(),
        };
        let manifest_path = record_path.with_extension("json");
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;

        info!(
            "exported {} with outputs {:?} to {}",
            manifest.record,
            manifest.outputs,
            export_dir.display()
        );
        Ok(record_path)
    }
}

#[cfg(test)]
mod tests {
    use burn::backend::NdArray;

    use super::*;
    use crate::{backbone::BackboneConfig, model::ClassifierConfig};

    type TestBackend = NdArray<f32>;

    fn model() -> Classifier<TestBackend> {
        ClassifierConfig::new()
            .with_input_size(32)
            .with_dense1_size(8)
            .with_dense2_size(4)
            .with_backbone(BackboneConfig::new().with_width_divisor(32))
            .init(&Default::default())
    }

    #[test]
    fn writes_record_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let export_dir = dir.path().join("exported-model");
        let model = model();

        let path = ServingExporter
            .export(&model, &model.output_names(), &export_dir, "model.bin")
            .unwrap();

        assert_eq!(path, export_dir.join("model.bin"));
        assert!(path.is_file());

        let manifest = ServingManifest::load(export_dir.join("model.json")).unwrap();
        assert_eq!(manifest.record, "model.bin");
        assert_eq!(manifest.inputs, vec!["image".to_string()]);
        assert_eq!(manifest.outputs, vec!["probabilities".to_string()]);
        assert_eq!(manifest.input_shape, [1, 32, 32, 3]);
        assert_eq!(manifest.channel_mean, IMAGENET_MEAN);
        assert_eq!(manifest.num_classes, 2);
    }

    #[test]
    fn serving_record_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let model = model();
        let device = Default::default();

        let path = ServingExporter
            .export(&model, &model.output_names(), dir.path(), "out.pb")
            .unwrap();
        assert_eq!(path, dir.path().join("out.bin"));

        let loaded = model
            .clone()
            .load_file(path, &BinFileRecorder::<FullPrecisionSettings>::new(), &device)
            .unwrap();
        model
            .output_bias()
            .unwrap()
            .into_data()
            .assert_eq(&loaded.output_bias().unwrap().into_data(), true);
    }

    #[test]
    fn empty_outputs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let result = ServingExporter.export(&model(), &[], dir.path(), "model.bin");

        assert!(matches!(result, Err(Error::Export(_))));
    }
}
