use std::path::Path;

use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
};
use nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    PaddingConfig2d, Relu,
};

use crate::error::Error;

/// (convolutions, output channels) for each of the five VGG16 blocks.
const VGG16_BLOCKS: [(usize, usize); 5] = [(2, 64), (2, 128), (3, 256), (3, 512), (3, 512)];

/// Each block halves the spatial resolution.
pub const DOWNSAMPLE_FACTOR: usize = 32;

#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// Divides every block's channel count; 1 is the full VGG16 layout.
    #[config(default = "1")]
    pub width_divisor: usize,
    /// Pretrained weights stored as a full-precision named MessagePack record.
    pub weights: Option<String>,
}

impl BackboneConfig {
    pub fn out_channels(&self) -> usize {
        channels(VGG16_BLOCKS[VGG16_BLOCKS.len() - 1].1, self.width_divisor)
    }

    /// Builds the feature extractor with every parameter excluded from gradient tracking.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Vgg16Features<B> {
        let mut in_channels = 3;
        let mut blocks = Vec::with_capacity(VGG16_BLOCKS.len());
        for (num_convs, width) in VGG16_BLOCKS {
            let out_channels = channels(width, self.width_divisor);
            blocks.push(VggBlock::new(in_channels, out_channels, num_convs, device));
            in_channels = out_channels;
        }

        Vgg16Features { blocks }.no_grad()
    }
}

fn channels(width: usize, divisor: usize) -> usize {
    (width / divisor.max(1)).max(1)
}

#[derive(Module, Debug)]
pub struct VggBlock<B: Backend> {
    convs: Vec<Conv2d<B>>,
    pool: MaxPool2d,
    activation: Relu,
}

impl<B: Backend> VggBlock<B> {
    fn new(in_channels: usize, out_channels: usize, num_convs: usize, device: &B::Device) -> Self {
        let convs = (0..num_convs)
            .map(|i| {
                let input = if i == 0 { in_channels } else { out_channels };
                Conv2dConfig::new([input, out_channels], [3, 3])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device)
            })
            .collect();

        Self {
            convs,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            activation: Relu::new(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self
            .convs
            .iter()
            .fold(x, |x, conv| self.activation.forward(conv.forward(x)));
        self.pool.forward(x)
    }
}

/// The convolutional part of VGG16, without its classifier.
#[derive(Module, Debug)]
pub struct Vgg16Features<B: Backend> {
    blocks: Vec<VggBlock<B>>,
}

impl<B: Backend> Vgg16Features<B> {
    /// # Shapes
    ///   - input `[batch_size, 3, height, width]`
    ///   - output `[batch_size, channels, height / 32, width / 32]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(images, |x, block| block.forward(x))
    }

    /// Replaces the random initialization with pretrained weights, keeping them frozen.
    pub fn load_pretrained(
        self,
        path: impl AsRef<Path>,
        device: &B::Device,
    ) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
        let features = self
            .load_file(path.to_path_buf(), &recorder, device)
            .map_err(|err| {
                Error::Recorder(format!(
                    "could not load backbone weights from {}: {err:?}",
                    path.display()
                ))
            })?;

        Ok(features.no_grad())
    }

    pub fn first_conv_weight(&self) -> Tensor<B, 4> {
        self.blocks[0].convs[0].weight.val()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn::backend::NdArray<f32>;

    #[test]
    fn output_is_downsampled_by_32() {
        let device = Default::default();
        let features = BackboneConfig::new()
            .with_width_divisor(16)
            .init::<TestBackend>(&device);

        let images = Tensor::<TestBackend, 4>::zeros([2, 3, 64, 64], &device);
        let output = features.forward(images);

        assert_eq!(output.dims(), [2, 32, 2, 2]);
    }

    #[test]
    fn full_width_matches_vgg16() {
        let config = BackboneConfig::new();
        assert_eq!(config.out_channels(), 512);
        assert_eq!(config.with_width_divisor(1024).out_channels(), 1);
    }

    #[test]
    fn pretrained_weights_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vgg16");
        let device = Default::default();
        let config = BackboneConfig::new().with_width_divisor(32);

        let source = config.init::<TestBackend>(&device);
        source
            .clone()
            .save_file(path.clone(), &NamedMpkFileRecorder::<FullPrecisionSettings>::new())
            .unwrap();

        let loaded = config
            .init::<TestBackend>(&device)
            .load_pretrained(&path, &device)
            .unwrap();

        source
            .first_conv_weight()
            .into_data()
            .assert_eq(&loaded.first_conv_weight().into_data(), true);
    }

    #[test]
    fn missing_weights_file_is_an_error() {
        let device = Default::default();
        let result = BackboneConfig::new()
            .with_width_divisor(32)
            .init::<TestBackend>(&device)
            .load_pretrained("/no/such/vgg16", &device);

        assert!(matches!(result, Err(Error::Recorder(_))));
    }
}
