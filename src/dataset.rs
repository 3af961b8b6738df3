use std::path::{Path, PathBuf};

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::Backend,
    tensor::{Device, Int, Tensor, TensorData},
};
use image::{imageops::FilterType, ImageError, Rgb, RgbImage};
use log::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    error::{Error, Result},
    labels::LabelMap,
};

pub const IMAGE_SIZE: usize = 256;

pub const CHANNELS: usize = 3;

/// Per-channel ImageNet means (RGB) the backbone was pretrained with.
pub const IMAGENET_MEAN: [f32; 3] = [123.68, 116.779, 103.939];

const IMAGE_EXTENSIONS: [&str; 7] = ["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// Which side of the validation split a dataset is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subset {
    Training,
    Validation,
}

/// A labelled directory tree: `root/<class name>/<image file>`.
///
/// Classes are the immediate subdirectories sorted by name, which also fixes
/// their label indices. Image files are collected recursively per class and
/// sorted by path so the validation split is deterministic.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    labels: LabelMap,
    files: Vec<Vec<PathBuf>>,
}

impl ImageFolder {
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::Dataset(format!(
                "image directory {} does not exist",
                root.display()
            )));
        }

        let mut classes = Vec::new();
        for entry in std::fs::read_dir(&root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                classes.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        classes.sort();

        if classes.is_empty() {
            return Err(Error::Dataset(format!(
                "no class directories found in {}",
                root.display()
            )));
        }

        let mut files = Vec::with_capacity(classes.len());
        for class in &classes {
            let class_files: Vec<PathBuf> = WalkDir::new(root.join(class))
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| is_image_file(path))
                .collect();
            debug!("class '{class}': {} images", class_files.len());
            files.push(class_files);
        }

        let folder = Self {
            root,
            labels: LabelMap::new(classes),
            files,
        };
        info!(
            "found {} images belonging to {} classes in {}",
            folder.len(),
            folder.labels.len(),
            folder.root.display()
        );
        Ok(folder)
    }

    pub fn labels(&self) -> &LabelMap {
        &self.labels
    }

    pub fn len(&self) -> usize {
        self.files.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Splits every class the same way: the first `floor(split * n)` files go
    /// to validation and the remainder to training.
    pub fn subset(&self, subset: Subset, validation_split: f64) -> Result<ImageDataset> {
        if !(0.0..1.0).contains(&validation_split) {
            return Err(Error::Config(format!(
                "validation split must be in [0, 1), got {validation_split}"
            )));
        }

        let mut items = Vec::new();
        for (label, files) in self.files.iter().enumerate() {
            let split_at = (validation_split * files.len() as f64) as usize;
            let (validation, training) = files.split_at(split_at);
            let selected = match subset {
                Subset::Training => training,
                Subset::Validation => validation,
            };
            items.extend(selected.iter().map(|path| ImageItem {
                path: path.clone(),
                label,
            }));
        }

        debug!("{subset:?} subset: {} images", items.len());
        Ok(ImageDataset { items })
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageItem {
    pub path: PathBuf,
    pub label: usize,
}

#[derive(Debug, Clone)]
pub struct ImageDataset {
    items: Vec<ImageItem>,
}

impl ImageDataset {
    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Decodes an image as RGB and resizes it to `size`x`size` (nearest neighbour).
///
/// With `tolerate_truncated`, a file whose header identifies a known format but
/// whose data ends early or is corrupt is replaced by a mean-coloured image.
/// Files that are not recognisable images are always an error.
pub fn load_image(path: &Path, size: usize, tolerate_truncated: bool) -> Result<RgbImage> {
    let size = size as u32;
    let bytes = std::fs::read(path).map_err(|err| Error::Image(path.to_path_buf(), err.into()))?;
    let format =
        image::guess_format(&bytes).map_err(|err| Error::Image(path.to_path_buf(), err))?;

    match image::load_from_memory_with_format(&bytes, format) {
        Ok(image) => Ok(image.resize_exact(size, size, FilterType::Nearest).to_rgb8()),
        Err(err) if tolerate_truncated && is_truncation(&err) => {
            warn!(
                "{} could not be fully decoded ({err}), substituting a blank image",
                path.display()
            );
            Ok(RgbImage::from_pixel(size, size, mean_pixel()))
        }
        Err(err) => Err(Error::Image(path.to_path_buf(), err)),
    }
}

fn is_truncation(err: &ImageError) -> bool {
    match err {
        ImageError::Decoding(_) => true,
        ImageError::IoError(err) => err.kind() == std::io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}

fn mean_pixel() -> Rgb<u8> {
    Rgb(IMAGENET_MEAN.map(|mean| mean.round() as u8))
}

fn pixels(image: RgbImage) -> impl Iterator<Item = f32> {
    image.into_raw().into_iter().map(f32::from)
}

/// Subtracts the fixed channel means from channels-last image batches.
#[derive(Clone, Debug)]
pub struct Normalizer<B: Backend> {
    pub mean: Tensor<B, 4>,
}

impl<B: Backend> Normalizer<B> {
    pub fn new(device: &Device<B>) -> Self {
        let mean =
            Tensor::<B, 1>::from_floats(IMAGENET_MEAN, device).reshape([1, 1, 1, CHANNELS]);
        Self { mean }
    }

    pub fn normalize(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        input - self.mean.clone()
    }
}

/// Turns one decoded image into a centered `[1, height, width, 3]` tensor.
pub fn image_tensor<B: Backend>(
    image: RgbImage,
    normalizer: &Normalizer<B>,
    device: &B::Device,
) -> Tensor<B, 4> {
    let (width, height) = image.dimensions();
    let data = TensorData::new(
        pixels(image).collect::<Vec<f32>>(),
        [1, height as usize, width as usize, CHANNELS],
    )
    .convert::<B::FloatElem>();

    normalizer.normalize(Tensor::<B, 4>::from_data(data, device))
}

/// Loads, resizes and centers a single image file for inference.
pub fn preprocess<B: Backend>(
    path: &Path,
    image_size: usize,
    tolerate_truncated: bool,
    device: &B::Device,
) -> Result<Tensor<B, 4>> {
    let image = load_image(path, image_size, tolerate_truncated)?;
    Ok(image_tensor(image, &Normalizer::new(device), device))
}

#[derive(Clone, Debug)]
pub struct ClassificationBatcher<B: Backend> {
    normalizer: Normalizer<B>,
    num_classes: usize,
    image_size: usize,
    tolerate_truncated: bool,
    device: B::Device,
}

#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    /// `[batch_size, height, width, 3]`, centered.
    pub images: Tensor<B, 4>,
    /// `[batch_size, num_classes]`
    pub one_hot: Tensor<B, 2>,
    /// `[batch_size]` class indices.
    pub targets: Tensor<B, 1, Int>,
}

impl<B: Backend> ClassificationBatcher<B> {
    pub fn new(
        device: B::Device,
        num_classes: usize,
        image_size: usize,
        tolerate_truncated: bool,
    ) -> Self {
        Self {
            normalizer: Normalizer::<B>::new(&device),
            num_classes,
            image_size,
            tolerate_truncated,
            device,
        }
    }
}

impl<B: Backend> Batcher<ImageItem, ClassificationBatch<B>> for ClassificationBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ClassificationBatch<B> {
        let batch_size = items.len();
        let mut images =
            Vec::with_capacity(batch_size * self.image_size * self.image_size * CHANNELS);
        let mut one_hot = vec![0.0f32; batch_size * self.num_classes];
        let mut targets = Vec::with_capacity(batch_size);

        for (row, item) in items.iter().enumerate() {
            // Batcher cannot return errors; a file we refuse to tolerate aborts the run.
            let image = load_image(&item.path, self.image_size, self.tolerate_truncated)
                .unwrap_or_else(|err| panic!("{err}"));
            images.extend(pixels(image));
            one_hot[row * self.num_classes + item.label] = 1.0;
            targets.push(item.label as i64);
        }

        let images = TensorData::new(
            images,
            [batch_size, self.image_size, self.image_size, CHANNELS],
        )
        .convert::<B::FloatElem>();
        let images = self
            .normalizer
            .normalize(Tensor::<B, 4>::from_data(images, &self.device));

        let one_hot = TensorData::new(one_hot, [batch_size, self.num_classes])
            .convert::<B::FloatElem>();
        let one_hot = Tensor::<B, 2>::from_data(one_hot, &self.device);

        let targets = TensorData::new(targets, [batch_size]).convert::<B::IntElem>();
        let targets = Tensor::<B, 1, Int>::from_data(targets, &self.device);

        ClassificationBatch {
            images,
            one_hot,
            targets,
        }
    }
}
