use std::{fs, path::Path};

use itertools::Itertools;
use ndarray::Array2;
use rand::{Rng, seq::index};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    color::to_color,
    constants::{CHANNELS, CIFAR_RECORD_LEN, CIFAR_TEST_BATCHES, CIFAR_TRAIN_BATCHES, IMAGE_SIDE},
    error::{Error, Result},
    image::Image,
};

/// An image with its class label
pub type LabeledImage = (Image, u8);

/// Indexable collection of labeled images
pub trait ImageSource {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<LabeledImage>;
}

impl<S: ImageSource + ?Sized> ImageSource for &S {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn get(&self, index: usize) -> Result<LabeledImage> {
        (**self).get(index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Split {
    Train,
    Test,
}

/// Images held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    pub items: Vec<LabeledImage>,
}

impl InMemoryDataset {
    pub fn new(items: Vec<LabeledImage>) -> Self {
        Self { items }
    }
}

impl ImageSource for InMemoryDataset {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Result<LabeledImage> {
        self.items.get(index).cloned().ok_or(Error::IndexOutOfRange {
            index,
            len: self.items.len(),
        })
    }
}

/// CIFAR-10 read from the binary distribution (`cifar-10-batches-bin`).
///
/// Every record is one label byte followed by the 32x32 red, green and blue planes.
#[derive(Debug, Clone)]
pub struct Cifar10 {
    pub split: Split,
    images: InMemoryDataset,
}

impl Cifar10 {
    pub fn load(dir: impl AsRef<Path>, split: Split) -> Result<Self> {
        let dir = dir.as_ref();
        let batches: &[&str] = match split {
            Split::Train => &CIFAR_TRAIN_BATCHES,
            Split::Test => &CIFAR_TEST_BATCHES,
        };

        let mut items = Vec::new();
        for batch in batches {
            let path = dir.join(batch);
            let bytes = fs::read(&path)?;
            let records = parse_records(&bytes)
                .map_err(|e| Error::MalformedDataset(format!("{}: {}", path.display(), e)))?;
            debug!("read {} records from '{}'", records.len(), path.display());
            items.extend(records);
        }

        info!("loaded {:?} split from '{}': images={}", split, dir.display(), items.len());

        Ok(Self {
            split,
            images: InMemoryDataset::new(items),
        })
    }
}

impl ImageSource for Cifar10 {
    fn len(&self) -> usize {
        self.images.len()
    }

    fn get(&self, index: usize) -> Result<LabeledImage> {
        self.images.get(index)
    }
}

/// Decodes a buffer of concatenated CIFAR-10 binary records.
pub fn parse_records(bytes: &[u8]) -> std::result::Result<Vec<LabeledImage>, String> {
    if bytes.len() % CIFAR_RECORD_LEN != 0 {
        return Err(format!(
            "length {} is not a multiple of the record length {}",
            bytes.len(),
            CIFAR_RECORD_LEN
        ));
    }

    bytes
        .chunks_exact(CIFAR_RECORD_LEN)
        .map(|record| {
            let label = record[0];
            Image::from_planar(IMAGE_SIDE, IMAGE_SIDE, &record[1..])
                .map(|image| (image, label))
                .map_err(|e| e.to_string())
        })
        .collect()
}

/// The first `limit` items of a source
#[derive(Debug, Clone)]
pub struct Truncated<S> {
    source: S,
    limit: usize,
}

impl<S: ImageSource> Truncated<S> {
    pub fn new(source: S, limit: Option<usize>) -> Self {
        let len = source.len();
        Self {
            source,
            limit: limit.map_or(len, |l| l.min(len)),
        }
    }
}

impl<S: ImageSource> ImageSource for Truncated<S> {
    fn len(&self) -> usize {
        self.limit
    }

    fn get(&self, index: usize) -> Result<LabeledImage> {
        if index >= self.limit {
            return Err(Error::IndexOutOfRange { index, len: self.limit });
        }
        self.source.get(index)
    }
}

/// Plucks `per_image` distinct random pixels from every image and stacks their colors into
/// an `N x 3` matrix.
pub fn sample_pixels<S: ImageSource>(source: &S, per_image: usize, rng: &mut impl Rng) -> Result<Array2<f32>> {
    let mut colors = Vec::with_capacity(source.len() * per_image * CHANNELS);

    for i in 0..source.len() {
        let (image, _) = source.get(i)?;
        let n = image.n_pixels();
        if per_image > n {
            return Err(Error::InvalidArgument(format!(
                "cannot pluck {per_image} pixels from an image with {n} pixels"
            )));
        }

        let pixels = image.pixels();
        for idx in index::sample(rng, n, per_image).into_vec() {
            colors.extend(to_color(pixels[idx]));
        }
    }

    let n_rows = colors.len() / CHANNELS;
    Array2::from_shape_vec((n_rows, CHANNELS), colors).map_err(|e| Error::InvalidArgument(e.to_string()))
}

/// Class label histogram, mostly for logging
pub fn label_counts<S: ImageSource>(source: &S) -> Result<Vec<(u8, usize)>> {
    let labels = (0..source.len())
        .map(|i| source.get(i).map(|(_, label)| label))
        .collect::<Result<Vec<_>>>()?;

    Ok(labels.into_iter().counts().into_iter().sorted().collect())
}
