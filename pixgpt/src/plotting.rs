use crate::{codebook::Codebook, image::Image, metrics::TrainMetrics, permutation::Permutation};
use ndarray::{Array1, ArrayView2};
use ndarray_stats::QuantileExt;
use plotters::prelude::*;
use std::{error::Error, fs, path::Path};
use tracing::debug;

/// Screen pixels per image pixel
const CELL: i32 = 4;
/// Gap between grid cells
const PAD: i32 = 2;

fn ensure_parent(path: &Path) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Lays out `n` tiles of `width x height` cells in rows of `ncol` and fills cell `(y, x)` of
/// tile `i` with `paint(i, y, x)`. Nothing is written when `n` is zero.
fn draw_tiles(
    path: &Path,
    n: usize,
    ncol: usize,
    width: usize,
    height: usize,
    paint: impl Fn(usize, usize, usize) -> RGBAColor,
) -> Result<(), Box<dyn Error>> {
    if n == 0 {
        debug!("nothing to draw, skipping {}", path.display());
        return Ok(());
    }
    if ncol == 0 {
        return Err(format!("cannot lay out {n} tiles in 0 columns").into());
    }
    ensure_parent(path)?;

    let ncol = ncol.min(n);
    let nrow = n.div_ceil(ncol);
    let tile_w = width as i32 * CELL;
    let tile_h = height as i32 * CELL;
    let canvas = (
        (ncol as i32 * (tile_w + PAD) + PAD) as u32,
        (nrow as i32 * (tile_h + PAD) + PAD) as u32,
    );

    let root = BitMapBackend::new(path, canvas).into_drawing_area();
    root.fill(&WHITE)?;

    for i in 0..n {
        let x0 = PAD + (i % ncol) as i32 * (tile_w + PAD);
        let y0 = PAD + (i / ncol) as i32 * (tile_h + PAD);
        for yi in 0..height {
            for xi in 0..width {
                let cell_x = x0 + xi as i32 * CELL;
                let cell_y = y0 + yi as i32 * CELL;
                root.draw(&Rectangle::new(
                    [(cell_x, cell_y), (cell_x + CELL, cell_y + CELL)],
                    paint(i, yi, xi).filled(),
                ))?;
            }
        }
    }

    root.present()?;
    Ok(())
}

/// Renders `images` in rows of `ncol`. All images must share the shape of the first one.
pub fn plot_image_grid(images: &[Image], ncol: usize, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    let Some(first) = images.first() else {
        debug!("no images, skipping {}", path.as_ref().display());
        return Ok(());
    };
    let (height, width) = first.shape();
    if let Some(other) = images.iter().find(|im| im.shape() != (height, width)) {
        return Err(format!("image shape {:?} differs from {:?}", other.shape(), (height, width)).into());
    }

    draw_tiles(path.as_ref(), images.len(), ncol, width, height, |i, y, x| {
        let [r, g, b] = images[i][(y, x)];
        RGBColor(r, g, b).to_rgba()
    })
}

/// Alternates rows of originals with rows of their codebook reconstructions.
pub fn plot_reconstructions(
    images: &[Image],
    codebook: &Codebook,
    ncol: usize,
    path: impl AsRef<Path>,
) -> Result<(), Box<dyn Error>> {
    let ncol = ncol.max(1);
    let mut tiles = Vec::with_capacity(2 * images.len());
    for chunk in images.chunks(ncol) {
        tiles.extend(chunk.iter().cloned());
        // Pad short rows so reconstructions stay under their originals
        let blank = Image::filled(chunk[0].width(), chunk[0].height(), [255, 255, 255]);
        tiles.extend(std::iter::repeat_n(blank.clone(), ncol - chunk.len()));
        for image in chunk {
            tiles.push(codebook.reconstruct(image)?);
        }
        tiles.extend(std::iter::repeat_n(blank, ncol - chunk.len()));
    }

    plot_image_grid(&tiles, ncol, path)
}

pub fn plot_samples(samples: &[Image], ncol: usize, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    plot_image_grid(samples, ncol, path)
}

/// Heatmaps of the first `n` positional embedding channels in image layout.
///
/// The first pixel has no embedding and is drawn as zero. Positions are mapped back to raster
/// order with `permutation`, and every channel is min-max normalized on its own.
pub fn plot_positional_embeddings(
    pos_emb: ArrayView2<f32>,
    permutation: &Permutation,
    width: usize,
    height: usize,
    n: usize,
    ncol: usize,
    path: impl AsRef<Path>,
) -> Result<(), Box<dyn Error>> {
    let n = n.min(pos_emb.ncols());
    let mut channels = Vec::with_capacity(n);

    for c in 0..n {
        let mut values = Vec::with_capacity(pos_emb.nrows() + 1);
        values.push(0.0f32);
        values.extend(pos_emb.column(c).iter());

        let raster = Array1::from(permutation.unapply(&values)?);
        if raster.len() != width * height {
            return Err(format!("{} positions do not fill a {width}x{height} image", raster.len()).into());
        }

        let lo = *raster.min_skipnan();
        let hi = *raster.max_skipnan();
        let span = (hi - lo).max(f32::EPSILON);
        channels.push(raster.mapv(|v| (v - lo) / span));
    }

    draw_tiles(path.as_ref(), n, ncol, width, height, |i, y, x| heat(channels[i][y * width + x]))
}

/// Blue for 0 through red for 1
fn heat(v: f32) -> RGBAColor {
    let v = if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
    HSLColor(0.66 * (1.0 - v as f64), 0.8, 0.5).to_rgba()
}

/// Train and test loss per epoch.
pub fn plot_metrics(metrics: &TrainMetrics, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    let path = path.as_ref();
    if metrics.epoch_metrics.is_empty() {
        return Ok(());
    }
    ensure_parent(path)?;

    let train: Vec<(usize, f32)> = metrics
        .epoch_metrics
        .iter()
        .filter(|m| m.train_loss.is_finite())
        .map(|m| (m.epoch, m.train_loss))
        .collect();
    let test: Vec<(usize, f32)> = metrics
        .epoch_metrics
        .iter()
        .filter_map(|m| m.test_loss.map(|l| (m.epoch, l)))
        .collect();

    let mut min_loss = f32::MAX;
    let mut max_loss = f32::MIN;
    for &(_, l) in train.iter().chain(&test) {
        min_loss = min_loss.min(l);
        max_loss = max_loss.max(l);
    }
    if min_loss > max_loss {
        return Ok(());
    }

    let max_epoch = metrics.epoch_metrics.iter().map(|m| m.epoch).max().unwrap_or(0);
    // Ensure max_epoch is at least 1 for plot range
    let x_max = max_epoch.max(1);

    let root = BitMapBackend::new(path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE)?;

    // Add some margin to the Y-axis range
    let y_margin = ((max_loss - min_loss).abs() * 0.05).max(1e-3);
    let y_range = (min_loss - y_margin)..(max_loss + y_margin);

    let mut chart = ChartBuilder::on(&root)
        .caption("Loss", ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0..x_max, y_range)?;

    chart.configure_mesh().x_desc("Epoch").y_desc("Loss").draw()?;

    for (label, series, hue) in [("train", train, 0.6), ("test", test, 0.0)] {
        if series.is_empty() {
            continue;
        }
        let color = HSLColor(hue, 0.7, 0.5).to_rgba();
        chart
            .draw_series(LineSeries::new(series, &color))?
            .label(label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }

    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()?;

    root.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, array};

    fn checker(w: usize, h: usize) -> Image {
        let pixels = (0..w * h)
            .map(|i| if i % 2 == 0 { [255, 0, 0] } else { [0, 0, 255] })
            .collect();
        Image::from_pixels(w, h, pixels).unwrap()
    }

    #[test]
    fn writes_image_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plots/grid.png");

        plot_image_grid(&vec![checker(4, 3); 5], 2, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn rejects_mixed_shapes_and_zero_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grid.png");

        assert!(plot_image_grid(&[checker(2, 2), checker(3, 2)], 2, &path).is_err());
        assert!(plot_image_grid(&[checker(2, 2)], 0, &path).is_err());
    }

    #[test]
    fn empty_grids_draw_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let codebook = Codebook::new(array![[0.0, 0.0, 0.0]]).unwrap();
        let pos_emb = Array2::<f32>::zeros((15, 3));
        let perm = Permutation::identity(16);

        plot_samples(&[], 4, dir.path().join("samples.png")).unwrap();
        plot_reconstructions(&[], &codebook, 4, dir.path().join("reconstruction.png")).unwrap();
        plot_positional_embeddings(pos_emb.view(), &perm, 4, 4, 0, 8, dir.path().join("pos.png")).unwrap();

        for file in ["samples.png", "reconstruction.png", "pos.png"] {
            assert!(!dir.path().join(file).exists(), "{file} was written");
        }
    }

    #[test]
    fn writes_reconstructions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconstruction.png");
        let codebook = Codebook::new(array![[250.0, 0.0, 0.0], [0.0, 0.0, 250.0]]).unwrap();

        plot_reconstructions(&vec![checker(4, 4); 3], &codebook, 2, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn writes_positional_embeddings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pos.png");
        let pos_emb = Array2::from_shape_fn((15, 3), |(p, c)| (p * (c + 1)) as f32);
        let perm = Permutation::from_vec((0..16).rev().collect()).unwrap();

        plot_positional_embeddings(pos_emb.view(), &perm, 4, 4, 8, 2, &path).unwrap();
        assert!(path.exists());

        // 15 positions plus the leading zero do not fill a 5x5 image
        assert!(plot_positional_embeddings(pos_emb.view(), &perm, 5, 5, 1, 1, &path).is_err());
    }

    #[test]
    fn empty_metrics_draw_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loss.png");

        plot_metrics(&TrainMetrics::default(), &path).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn heat_clamps() {
        assert_eq!(heat(-1.0).rgb(), heat(0.0).rgb());
        assert_eq!(heat(2.0).rgb(), heat(1.0).rgb());
        assert_eq!(heat(f32::NAN).rgb(), heat(0.0).rgb());
        assert_ne!(heat(0.0).rgb(), heat(1.0).rgb());
    }
}
