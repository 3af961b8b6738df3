use burn::backend::wgpu::WgpuDevice;
use cat_classifier::{Paths, ServingExporter};

fn main() -> Result<(), cat_classifier::Error> {
    env_logger::init();

    type MyBackend = burn::backend::Wgpu<f32, i32>;

    let device = WgpuDevice::default();
    let paths = Paths::from_env();

    cat_classifier::run_inference::<MyBackend>(&paths, &ServingExporter, device)?;
    Ok(())
}
