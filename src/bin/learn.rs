use burn::backend::{wgpu::WgpuDevice, Autodiff};
use cat_classifier::{Paths, ServingExporter, TrainingConfig};

fn main() -> Result<(), cat_classifier::Error> {
    env_logger::init();

    type MyBackend = burn::backend::Wgpu<f32, i32>;
    type MyAutodiffBackend = Autodiff<MyBackend>;

    let device = WgpuDevice::default();
    let paths = Paths::from_env();

    let report = cat_classifier::train::<MyAutodiffBackend>(
        &paths,
        TrainingConfig::cat_classifier(),
        &ServingExporter,
        device,
    )?;

    log::info!(
        "trained on {} classes, serving export at {}",
        report.labels.len(),
        report.serving_path.display()
    );
    Ok(())
}
