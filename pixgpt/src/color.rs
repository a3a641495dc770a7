use ndarray::{ArrayView1, ArrayView2};

use crate::constants::CHANNELS;

/// A pixel color as floats, one value per channel
pub type Color = [f32; CHANNELS];

#[inline]
pub fn to_color(rgb: [u8; CHANNELS]) -> Color {
    [rgb[0] as f32, rgb[1] as f32, rgb[2] as f32]
}

/// Converts a float color back to bytes. Values are clamped to [0, 255] and truncated.
#[inline]
pub fn to_rgb(color: &[f32]) -> [u8; CHANNELS] {
    let mut out = [0u8; CHANNELS];
    for (o, v) in out.iter_mut().zip(color) {
        *o = v.clamp(0.0, 255.0) as u8;
    }
    out
}

#[inline]
pub fn squared_distance(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// Index of the row of `centers` closest to `point` by squared Euclidean distance.
/// Ties go to the lowest index.
#[inline]
pub fn nearest_index(centers: ArrayView2<f32>, point: ArrayView1<f32>) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f32::INFINITY;
    for (i, center) in centers.outer_iter().enumerate() {
        let dist = squared_distance(center, point);
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    best_idx
}
