use std::borrow::Cow;

use crate::{
    codebook::Codebook,
    constants::N_PIXELS,
    dataset::ImageSource,
    error::{Error, Result},
    image::Image,
    permutation::Permutation,
};

/// An `(input, target)` pair for next-index prediction
pub type SequencePair = (Vec<usize>, Vec<usize>);

/// Dataset of token sequences used by the trainer and the sampler
pub trait TokenDataset: Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Result<SequencePair>;
}

/// Wraps an image source and turns every image into a sequence of codebook indices.
///
/// Pixels are flattened in raster order, reordered by the permutation and mapped to their
/// nearest codebook entry. Every image with `n` pixels yields `seq[..n-1]` as input and
/// `seq[1..]` as target.
pub struct SequenceDataset<'a, S> {
    source: S,
    codebook: &'a Codebook,
    permutation: Cow<'a, Permutation>,
}

impl<'a, S: ImageSource> SequenceDataset<'a, S> {
    /// Without a permutation the pixels keep raster order. The pixel count is taken from the
    /// first image in that case, or is `N_PIXELS` for an empty source.
    pub fn new(source: S, codebook: &'a Codebook, permutation: Option<&'a Permutation>) -> Result<Self> {
        let permutation = match permutation {
            Some(perm) => Cow::Borrowed(perm),
            None if source.is_empty() => Cow::Owned(Permutation::identity(N_PIXELS)),
            None => {
                let (image, _) = source.get(0)?;
                Cow::Owned(Permutation::identity(image.n_pixels()))
            }
        };

        Ok(Self {
            source,
            codebook,
            permutation,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.source.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Number of distinct tokens
    #[inline]
    pub fn vocab_size(&self) -> usize {
        self.codebook.len()
    }

    /// Length of the input and target sequences
    #[inline]
    pub fn block_size(&self) -> usize {
        self.permutation.len().saturating_sub(1)
    }

    #[inline]
    pub fn codebook(&self) -> &Codebook {
        self.codebook
    }

    #[inline]
    pub fn permutation(&self) -> &Permutation {
        &self.permutation
    }

    /// Full permuted index sequence of image `index`.
    pub fn sequence(&self, index: usize) -> Result<Vec<usize>> {
        let (image, _) = self.source.get(index)?;
        let colors = self.permutation.apply(&image.colors())?;
        Ok(colors.iter().map(|c| self.codebook.nearest(c)).collect())
    }

    pub fn get(&self, index: usize) -> Result<SequencePair> {
        let seq = self.sequence(index)?;
        if seq.len() < 2 {
            return Err(Error::ShapeMismatch {
                expected: 2,
                found: seq.len(),
            });
        }
        Ok((seq[..seq.len() - 1].to_vec(), seq[1..].to_vec()))
    }
}

impl<S: ImageSource + Sync> TokenDataset for SequenceDataset<'_, S> {
    fn len(&self) -> usize {
        SequenceDataset::len(self)
    }

    fn get(&self, index: usize) -> Result<SequencePair> {
        SequenceDataset::get(self, index)
    }
}

/// Maps a permuted index sequence back to an image in raster order.
pub fn decode_sequence(
    seq: &[usize],
    codebook: &Codebook,
    permutation: &Permutation,
    width: usize,
    height: usize,
) -> Result<Image> {
    let raster = permutation.unapply(seq)?;
    codebook.decode(&raster, width, height)
}

/// Pre-tokenized sequences held in memory
#[derive(Debug, Clone, Default)]
pub struct TokenSequences {
    pub sequences: Vec<Vec<usize>>,
}

impl TokenDataset for TokenSequences {
    fn len(&self) -> usize {
        self.sequences.len()
    }

    fn get(&self, index: usize) -> Result<SequencePair> {
        let seq = self.sequences.get(index).ok_or(Error::IndexOutOfRange {
            index,
            len: self.sequences.len(),
        })?;
        Ok((seq[..seq.len().saturating_sub(1)].to_vec(), seq.get(1..).unwrap_or_default().to_vec()))
    }
}
