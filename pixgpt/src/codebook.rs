use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::{
    color::{nearest_index, to_rgb},
    constants::CHANNELS,
    error::{Error, Result},
    image::Image,
};

/// Fixed set of representative colors, one row per entry.
///
/// Built once by [`crate::kmeans::kmeans`] and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Array2<f32>", into = "Array2<f32>")]
pub struct Codebook {
    centers: Array2<f32>,
}

impl TryFrom<Array2<f32>> for Codebook {
    type Error = Error;

    fn try_from(centers: Array2<f32>) -> Result<Self> {
        Self::new(centers)
    }
}

impl From<Codebook> for Array2<f32> {
    fn from(codebook: Codebook) -> Self {
        codebook.centers
    }
}

impl Codebook {
    pub fn new(centers: Array2<f32>) -> Result<Self> {
        if centers.nrows() == 0 {
            return Err(Error::InvalidArgument("codebook must have at least one entry".into()));
        }
        if centers.ncols() != CHANNELS {
            return Err(Error::ShapeMismatch {
                expected: CHANNELS,
                found: centers.ncols(),
            });
        }
        if centers.iter().any(|v| v.is_nan()) {
            return Err(Error::InvalidArgument("codebook entries must not be NaN".into()));
        }
        Ok(Self { centers })
    }

    /// Number of entries, i.e. the vocabulary size
    #[inline]
    pub fn len(&self) -> usize {
        self.centers.nrows()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.centers.nrows() == 0
    }

    #[inline]
    pub fn centers(&self) -> ArrayView2<'_, f32> {
        self.centers.view()
    }


    #[inline]
    pub fn nearest(&self, color: &[f32]) -> usize {
        nearest_index(self.centers.view(), ArrayView1::from(color))
    }

    /// Codebook index of every pixel, in raster order.
    pub fn encode(&self, image: &Image) -> Vec<usize> {
        image.colors().iter().map(|c| self.nearest(c)).collect()
    }

    /// Renders raster-ordered codebook indices as an image.
    pub fn decode(&self, indices: &[usize], width: usize, height: usize) -> Result<Image> {
        let pixels = indices
            .iter()
            .map(|&i| {
                if i >= self.len() {
                    return Err(Error::IndexOutOfRange {
                        index: i,
                        len: self.len(),
                    });
                }
                let row = self.centers.row(i);
                Ok(to_rgb(&[row[0], row[1], row[2]]))
            })
            .collect::<Result<Vec<_>>>()?;

        Image::from_pixels(width, height, pixels)
    }

    /// Quantizes `image` to the nearest codebook colors.
    pub fn reconstruct(&self, image: &Image) -> Result<Image> {
        self.decode(&self.encode(image), image.width(), image.height())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_colors() -> Codebook {
        Codebook::new(array![[0.0, 0.0, 0.0], [200.0, 100.0, 50.5]]).unwrap()
    }

    #[test]
    fn encode_then_decode_quantizes() {
        let codebook = two_colors();
        let image = Image::from_pixels(2, 1, vec![[10, 5, 0], [190, 90, 60]]).unwrap();

        let indices = codebook.encode(&image);
        assert_eq!(indices, vec![0, 1]);

        let decoded = codebook.reconstruct(&image).unwrap();
        assert_eq!(decoded.pixels(), &[[0, 0, 0], [200, 100, 50]]);
    }

    #[test]
    fn decode_rejects_out_of_range_indices() {
        let codebook = two_colors();
        assert!(matches!(
            codebook.decode(&[0, 2], 2, 1),
            Err(Error::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn rejects_nan_and_wrong_width() {
        assert!(Codebook::new(array![[f32::NAN, 0.0, 0.0]]).is_err());
        assert!(Codebook::new(array![[0.0, 0.0]]).is_err());
        assert!(Codebook::new(Array2::zeros((0, 3))).is_err());
    }

    #[test]
    fn deserializing_validates_the_centers() {
        let codebook = two_colors();
        let json = serde_json::to_string(&codebook).unwrap();
        assert_eq!(serde_json::from_str::<Codebook>(&json).unwrap(), codebook);

        let two_wide = r#"{"v":1,"dim":[1,2],"data":[0.0,0.0]}"#;
        assert!(serde_json::from_str::<Codebook>(two_wide).is_err());
        let empty = r#"{"v":1,"dim":[0,3],"data":[]}"#;
        assert!(serde_json::from_str::<Codebook>(empty).is_err());
    }
}
