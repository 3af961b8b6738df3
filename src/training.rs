use std::path::{Path, PathBuf};

use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{momentum::MomentumConfig, SgdConfig},
    prelude::*,
    record::CompactRecorder,
    tensor::{backend::AutodiffBackend, ElementConversion},
    train::{
        metric::{AccuracyMetric, LossMetric},
        LearnerBuilder,
    },
};
use log::{info, warn};

use crate::{
    backbone::DOWNSAMPLE_FACTOR,
    config::{Paths, SERVING_MODEL_FILE},
    dataset::{ClassificationBatch, ClassificationBatcher, ImageFolder, Subset},
    error::Error,
    export::Exporter,
    labels::LabelMap,
    model::{Classifier, ClassifierConfig, Mode},
    progress::LogRenderer,
};

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ClassifierConfig,
    pub optimizer: SgdConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 1)]
    pub num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1.0e-3)]
    pub learning_rate: f64,
    #[config(default = 0.2)]
    pub validation_split: f64,
    #[config(default = true)]
    pub tolerate_truncated: bool,
}

/// SGD with classical (undampened) momentum.
pub fn sgd_with_momentum(momentum: f64) -> SgdConfig {
    SgdConfig::new().with_momentum(Some(
        MomentumConfig::new()
            .with_momentum(momentum)
            .with_dampening(0.0),
    ))
}

impl TrainingConfig {
    /// VGG16 backbone, two-class head, SGD(lr 0.001, momentum 0.9).
    pub fn cat_classifier() -> Self {
        Self::new(ClassifierConfig::new(), sgd_with_momentum(0.9))
    }
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Accuracy over the training subset after fitting, in percent.
    pub accuracy: f64,
    pub labels: LabelMap,
    pub serving_path: PathBuf,
}

/// Fits the head on `paths.training_dir`, then writes the model, its config,
/// the label map and a serving export into `paths.export_dir`.
pub fn train<B: AutodiffBackend>(
    paths: &Paths,
    mut config: TrainingConfig,
    exporter: &impl Exporter<B::InnerBackend>,
    device: B::Device,
) -> crate::error::Result<TrainingReport> {
    if let Some(weights) = &paths.backbone_weights {
        config.model.backbone.weights = Some(weights.to_string_lossy().into_owned());
    }

    let folder = ImageFolder::new(&paths.training_dir)?;
    let labels = folder.labels().clone();
    if labels.len() != config.model.num_classes {
        return Err(Error::Dataset(format!(
            "model has {} outputs but {} classes were found",
            config.model.num_classes,
            labels.len()
        )));
    }

    if config.model.input_size == 0 || config.model.input_size % DOWNSAMPLE_FACTOR != 0 {
        return Err(Error::Config(format!(
            "input size {} must be a positive multiple of {DOWNSAMPLE_FACTOR}",
            config.model.input_size
        )));
    }

    let training_set = folder.subset(Subset::Training, config.validation_split)?;
    let validation_set = folder.subset(Subset::Validation, config.validation_split)?;
    if training_set.is_empty() {
        return Err(Error::Dataset("training subset is empty".to_string()));
    }
    info!(
        "{} training and {} validation images",
        training_set.len(),
        validation_set.len()
    );

    let artifact_dir = paths.export_dir.as_path();
    check_inputs_outside(artifact_dir, paths)?;
    create_artifact_dir(artifact_dir)?;
    config
        .save(paths.config_path())
        .map_err(|err| Error::Config(format!("could not save training config: {err}")))?;

    B::seed(config.seed);

    let num_classes = labels.len();
    let image_size = config.model.input_size;

    let batcher_train = ClassificationBatcher::<B>::new(
        device.clone(),
        num_classes,
        image_size,
        config.tolerate_truncated,
    );
    let batcher_valid = ClassificationBatcher::<B::InnerBackend>::new(
        device.clone(),
        num_classes,
        image_size,
        config.tolerate_truncated,
    );

    let dataloader_train = DataLoaderBuilder::new(batcher_train)
        .batch_size(config.batch_size)
        .shuffle(config.seed)
        .num_workers(config.num_workers)
        .build(training_set.clone());

    let dataloader_valid = DataLoaderBuilder::new(batcher_valid.clone())
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(validation_set);

    let mut model = config.model.init::<B>(&device);
    match &config.model.backbone.weights {
        Some(weights) => {
            info!("loading backbone weights from {weights}");
            model = model.with_backbone_weights(weights, &device)?;
        }
        None => warn!("no pretrained backbone weights configured, features are random"),
    }

    let learner = LearnerBuilder::new(artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .renderer(LogRenderer::new())
        .devices(vec![device.clone()])
        .num_epochs(config.num_epochs)
        .summary()
        .build(model, config.optimizer.init(), config.learning_rate);

    let model_trained = learner.fit(dataloader_train, dataloader_valid).valid();

    let dataloader_eval = DataLoaderBuilder::new(batcher_valid)
        .batch_size(config.batch_size)
        .num_workers(config.num_workers)
        .build(training_set);
    let accuracy = evaluate(&model_trained, dataloader_eval.as_ref());
    println!("Accuracy > {accuracy:.3}");

    model_trained
        .clone()
        .save_file(paths.model_path(), &CompactRecorder::new())
        .map_err(|err| Error::Recorder(format!("could not save model: {err:?}")))?;

    labels.save(paths.labels_path())?;

    let serving_path = exporter.export(
        &model_trained,
        &model_trained.output_names(),
        artifact_dir,
        SERVING_MODEL_FILE,
    )?;

    Ok(TrainingReport {
        accuracy,
        labels,
        serving_path,
    })
}

/// Percentage of samples whose most probable class matches the target.
pub fn evaluate<B: Backend>(
    model: &Classifier<B>,
    dataloader: &dyn DataLoader<ClassificationBatch<B>>,
) -> f64 {
    let mut correct = 0usize;
    let mut total = 0usize;

    for batch in dataloader.iter() {
        let batch_size = batch.targets.dims()[0];
        let predictions = model
            .forward(batch.images, Mode::Inference)
            .argmax(1)
            .flatten::<1>(0, 1);

        let batch_correct: i64 = predictions
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();

        correct += batch_correct as usize;
        total += batch_size;
    }

    if total == 0 {
        0.0
    } else {
        100.0 * correct as f64 / total as f64
    }
}

/// Refuses an export directory that holds any of the pipeline inputs, since it
/// is cleared before training.
fn check_inputs_outside(artifact_dir: &Path, paths: &Paths) -> crate::error::Result<()> {
    if !artifact_dir.exists() {
        return Ok(());
    }
    let artifact_dir = artifact_dir.canonicalize()?;

    let inputs = [&paths.training_dir, &paths.test_image]
        .into_iter()
        .chain(&paths.backbone_weights)
        .filter(|input| input.exists());
    for input in inputs {
        if input.canonicalize()?.starts_with(&artifact_dir) {
            return Err(Error::Config(format!(
                "export directory {} contains {}, refusing to clear it",
                paths.export_dir.display(),
                input.display()
            )));
        }
    }
    Ok(())
}

fn create_artifact_dir(artifact_dir: &Path) -> crate::error::Result<()> {
    // Stale checkpoints and event logs would leak into the learner summary.
    if artifact_dir.exists() {
        std::fs::remove_dir_all(artifact_dir)?;
    }
    std::fs::create_dir_all(artifact_dir)?;
    Ok(())
}
