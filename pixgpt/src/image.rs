use std::ops::Index;

use serde::{Deserialize, Serialize};

use crate::{
    color::{Color, to_color},
    constants::CHANNELS,
    error::{Error, Result},
};

/// RGB image stored row-major, one `[u8; 3]` per pixel
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Image {
    data: Vec<[u8; CHANNELS]>,
    width: usize,
    height: usize,
}

impl Image {
    /// Builds an image from row-major pixels.
    pub fn from_pixels(width: usize, height: usize, data: Vec<[u8; CHANNELS]>) -> Result<Self> {
        if data.len() != width * height {
            return Err(Error::ShapeMismatch {
                expected: width * height,
                found: data.len(),
            });
        }

        Ok(Self { data, width, height })
    }

    /// Builds an image from interleaved `RGBRGB...` bytes.
    pub fn from_interleaved(width: usize, height: usize, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != width * height * CHANNELS {
            return Err(Error::ShapeMismatch {
                expected: width * height * CHANNELS,
                found: bytes.len(),
            });
        }

        let data = bytes.chunks_exact(CHANNELS).map(|px| [px[0], px[1], px[2]]).collect();
        Ok(Self { data, width, height })
    }

    /// Builds an image from channel planes: all red bytes, then all green, then all blue.
    pub fn from_planar(width: usize, height: usize, bytes: &[u8]) -> Result<Self> {
        let n = width * height;
        if bytes.len() != n * CHANNELS {
            return Err(Error::ShapeMismatch {
                expected: n * CHANNELS,
                found: bytes.len(),
            });
        }

        let (r, rest) = bytes.split_at(n);
        let (g, b) = rest.split_at(n);
        let data = (0..n).map(|i| [r[i], g[i], b[i]]).collect();
        Ok(Self { data, width, height })
    }

    /// Image of a single color
    pub fn filled(width: usize, height: usize, color: [u8; CHANNELS]) -> Self {
        Self {
            data: vec![color; width * height],
            width,
            height,
        }
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn n_pixels(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn pixels(&self) -> &[[u8; CHANNELS]] {
        &self.data
    }

    /// Flattened pixel colors as floats, in raster order
    pub fn colors(&self) -> Vec<Color> {
        self.data.iter().copied().map(to_color).collect()
    }
}

impl Index<(usize, usize)> for Image {
    type Output = [u8; CHANNELS];

    fn index(&self, index: (usize, usize)) -> &Self::Output {
        &self.data[index.0 * self.width + index.1]
    }
}
