use std::{fmt, path::Path};

use burn::{
    config::Config,
    module::Module,
    prelude::Backend,
    record::{CompactRecorder, Recorder},
};
use log::info;

use crate::{
    config::{Paths, INFERENCE_EXPORT_FILE},
    dataset::preprocess,
    error::{Error, Result},
    export::Exporter,
    labels::LabelMap,
    model::{Classifier, Mode},
    TrainingConfig,
};

/// Class probabilities for a single image, in label-index order.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Index and probability of the most likely class.
    pub fn best(&self) -> Option<(usize, f32)> {
        self.probabilities
            .iter()
            .copied()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
    }

    pub fn best_label<'a>(&self, labels: &'a LabelMap) -> Option<(&'a str, f32)> {
        let (index, probability) = self.best()?;
        labels.name(index).map(|name| (name, probability))
    }
}

/// Formats as `[0.93][0.07]`.
impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for probability in &self.probabilities {
            write!(f, "[{probability:.2}]")?;
        }
        Ok(())
    }
}

/// Rebuilds the classifier saved by training from its config and weights.
pub fn load_model<B: Backend>(paths: &Paths, device: &B::Device) -> Result<Classifier<B>> {
    let config = TrainingConfig::load(paths.config_path())
        .map_err(|err| Error::Config(format!("could not read training config: {err:?}")))?;
    let record = CompactRecorder::new()
        .load(paths.model_path(), device)
        .map_err(|err| Error::Recorder(format!("could not read trained model: {err:?}")))?;

    Ok(config.model.init(device).load_record(record))
}

pub fn predict<B: Backend>(
    model: &Classifier<B>,
    image_path: &Path,
    device: &B::Device,
) -> Result<Prediction> {
    let image = preprocess::<B>(image_path, model.input_size(), false, device)?;
    let output = model.forward(image, Mode::Inference);

    let probabilities = output
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| Error::Tensor(format!("{err:?}")))?;

    Ok(Prediction { probabilities })
}

/// Loads the exported model, classifies `paths.test_image` and re-exports the
/// model next to the training artifacts.
pub fn run<B: Backend>(
    paths: &Paths,
    exporter: &impl Exporter<B>,
    device: B::Device,
) -> Result<Prediction> {
    let model = load_model::<B>(paths, &device)?;

    println!("### Inputs ###");
    println!("{:?}", model.input_names());
    println!("### Outputs ###");
    println!("{:?}", model.output_names());
    println!("{model}");

    let prediction = predict(&model, &paths.test_image, &device)?;
    println!("{prediction}");

    let labels_path = paths.labels_path();
    if labels_path.is_file() {
        let labels = LabelMap::load(&labels_path)?;
        if let Some((name, probability)) = prediction.best_label(&labels) {
            info!(
                "{} predicted as '{name}' with probability {probability:.4}",
                paths.test_image.display()
            );
        }
    }

    let output_names = model.output_names();
    println!("{output_names:?}");
    exporter.export(&model, &output_names, &paths.export_dir, INFERENCE_EXPORT_FILE)?;

    Ok(prediction)
}
