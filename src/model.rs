use std::path::Path;

use burn::{
    module::Param,
    prelude::*,
    tensor::{activation::softmax, backend::AutodiffBackend},
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};
use nn::{Dropout, DropoutConfig, Initializer, Linear, LinearConfig, Relu};

use crate::{
    backbone::{BackboneConfig, Vgg16Features, DOWNSAMPLE_FACTOR},
    dataset::{ClassificationBatch, CHANNELS},
};

pub const INPUT_NAME: &str = "image";
pub const OUTPUT_NAME: &str = "probabilities";

/// Clamp applied to probabilities before taking logs in the loss.
const EPSILON: f32 = 1e-7;

/// Selects behaviour that differs between fitting and serving, such as dropout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Training,
    Inference,
}

#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    backbone: Vgg16Features<B>,
    dense1: Linear<B>,
    dropout: Dropout,
    dense2: Linear<B>,
    output: Linear<B>,
    activation: Relu,
    input_size: usize,
    num_classes: usize,
}

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    #[config(default = "2")]
    pub num_classes: usize,
    /// Square input resolution; must be a multiple of 32.
    #[config(default = "256")]
    pub input_size: usize,
    #[config(default = "256")]
    pub dense1_size: usize,
    #[config(default = "128")]
    pub dense2_size: usize,
    #[config(default = "0.2")]
    pub dropout: f64,
    #[config(default = "BackboneConfig::new()")]
    pub backbone: BackboneConfig,
}

impl ClassifierConfig {
    pub fn features(&self) -> usize {
        let spatial = self.input_size / DOWNSAMPLE_FACTOR;
        self.backbone.out_channels() * spatial * spatial
    }

    /// Returns a model whose backbone is frozen and whose head is freshly initialized.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        // He uniform: limit = sqrt(6 / fan_in)
        let he_uniform = Initializer::KaimingUniform {
            gain: 2.0f64.sqrt(),
            fan_out_only: false,
        };

        let glorot_uniform = Initializer::XavierUniform { gain: 1.0 };

        Classifier {
            backbone: self.backbone.init(device),
            dense1: dense(self.features(), self.dense1_size, he_uniform.clone(), device),
            dropout: DropoutConfig::new(self.dropout).init(),
            dense2: dense(self.dense1_size, self.dense2_size, he_uniform, device),
            output: dense(self.dense2_size, self.num_classes, glorot_uniform, device),
            activation: Relu::new(),
            input_size: self.input_size,
            num_classes: self.num_classes,
        }
    }
}

/// Linear layer with `initializer` weights and zero biases.
fn dense<B: Backend>(
    d_input: usize,
    d_output: usize,
    initializer: Initializer,
    device: &B::Device,
) -> Linear<B> {
    let mut linear = LinearConfig::new(d_input, d_output)
        .with_initializer(initializer)
        .init(device);
    linear.bias = Some(Param::from_tensor(Tensor::zeros([d_output], device)));
    linear
}

impl<B: Backend> Classifier<B> {
    /// # Shapes
    ///   - images `[batch_size, height, width, 3]`, channels last and mean-centered
    ///   - output `[batch_size, num_classes]`, each row a probability distribution
    pub fn forward(&self, images: Tensor<B, 4>, mode: Mode) -> Tensor<B, 2> {
        let x = images.permute([0, 3, 1, 2]);
        let x = self.backbone.forward(x);
        let x = x.flatten::<2>(1, 3);

        let x = self.activation.forward(self.dense1.forward(x));
        let x = match mode {
            Mode::Training => self.dropout.forward(x),
            Mode::Inference => x,
        };
        let x = self.activation.forward(self.dense2.forward(x));

        softmax(self.output.forward(x), 1)
    }

    pub fn forward_classification(
        &self,
        batch: ClassificationBatch<B>,
        mode: Mode,
    ) -> ClassificationOutput<B> {
        let output = self.forward(batch.images, mode);
        let loss = binary_cross_entropy(output.clone(), batch.one_hot);

        ClassificationOutput::new(loss, output, batch.targets)
    }

    pub fn with_backbone_weights(
        mut self,
        path: impl AsRef<Path>,
        device: &B::Device,
    ) -> crate::error::Result<Self> {
        self.backbone = self.backbone.load_pretrained(path, device)?;
        Ok(self)
    }

    pub fn backbone(&self) -> &Vgg16Features<B> {
        &self.backbone
    }

    pub fn output_bias(&self) -> Option<Tensor<B, 1>> {
        self.output.bias.as_ref().map(|bias| bias.val())
    }

    pub fn input_names(&self) -> Vec<String> {
        vec![INPUT_NAME.to_string()]
    }

    pub fn output_names(&self) -> Vec<String> {
        vec![OUTPUT_NAME.to_string()]
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.input_size, self.input_size, CHANNELS]
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Mean binary cross-entropy between predicted probabilities and one-hot targets.
pub fn binary_cross_entropy<B: Backend>(
    probabilities: Tensor<B, 2>,
    targets: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let probabilities = probabilities.clamp(EPSILON, 1.0 - EPSILON);
    let positive = targets.clone() * probabilities.clone().log();
    let negative = targets.neg().add_scalar(1.0) * probabilities.neg().add_scalar(1.0).log();

    (positive + negative).mean().neg()
}

impl<B: AutodiffBackend> TrainStep<ClassificationBatch<B>, ClassificationOutput<B>>
    for Classifier<B>
{
    fn step(&self, batch: ClassificationBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch, Mode::Training);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<ClassificationBatch<B>, ClassificationOutput<B>> for Classifier<B> {
    fn step(&self, batch: ClassificationBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch, Mode::Inference)
    }
}
