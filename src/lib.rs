mod backbone;
pub mod config;
pub mod dataset;
mod error;
pub mod export;
mod inference;
mod labels;
mod model;
mod progress;
mod training;

pub use backbone::{BackboneConfig, Vgg16Features};
pub use config::Paths;
pub use error::{Error, Result};
pub use export::{Exporter, ServingExporter, ServingManifest};
pub use inference::{load_model, predict, run as run_inference, Prediction};
pub use labels::LabelMap;
pub use model::{Classifier, ClassifierConfig, Mode};
pub use progress::LogRenderer;
pub use training::{evaluate, sgd_with_momentum, train, TrainingConfig, TrainingReport};
