/*! End-to-end run: fit the codebook, train the model, sample and write every artifact.
 *
 * Each stage is a plain function so the binaries and the tests can call them one at a time.
 */

use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use rand::{Rng, SeedableRng, seq::index};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::{
    codebook::Codebook,
    config::Config,
    dataset::{ImageSource, Truncated, label_counts, sample_pixels},
    error::{Error, Result},
    image::Image,
    kmeans::kmeans,
    metrics::RunSummary,
    model::{ModelConfig, PixelModel, SequenceModel},
    permutation::Permutation,
    plotting::{plot_metrics, plot_positional_embeddings, plot_reconstructions, plot_samples},
    sampling::{SampleOptions, StartDistribution, first_token_distribution, sample},
    sequence::{SequenceDataset, decode_sequence},
    serde_utils::JSONReadWrite,
    trainer::Trainer,
};

pub const MODEL_FILE: &str = "model.json";
pub const CODEBOOK_FILE: &str = "codebook.json";
pub const PERMUTATION_FILE: &str = "permutation.json";
pub const START_DISTRIBUTION_FILE: &str = "start_distribution.json";
pub const CONFIG_FILE: &str = "config.json";
pub const METRICS_FILE: &str = "metrics.json";
pub const SUMMARY_FILE: &str = "summary.json";

fn plot_error(e: Box<dyn std::error::Error>) -> Error {
    Error::Plot(e.to_string())
}

/// Codebook fitted to a random pixel sample of `source`, with the number of pixels sampled.
pub fn fit_codebook<S: ImageSource>(source: &S, config: &Config, rng: &mut impl Rng) -> Result<(Codebook, usize)> {
    let px = sample_pixels(source, config.pixels_per_image, rng)?;
    info!("sampled {} pixels from {} images", px.nrows(), source.len());

    let centers = kmeans(px.view(), config.ncluster, config.niter, rng)?;
    Ok((Codebook::new(centers)?, px.nrows()))
}

/// Raster order, or one random shuffle shared by every split.
pub fn build_permutation(n_pixels: usize, permute: bool, rng: &mut impl Rng) -> Permutation {
    if permute {
        Permutation::random(n_pixels, rng)
    } else {
        Permutation::identity(n_pixels)
    }
}

/// `n` distinct random images of `source`.
pub fn random_images<S: ImageSource>(source: &S, n: usize, rng: &mut impl Rng) -> Result<Vec<Image>> {
    index::sample(rng, source.len(), n.min(source.len()))
        .into_iter()
        .map(|i| source.get(i).map(|(image, _)| image))
        .collect()
}

/// Generates `n` images, each grown from a start token drawn from `start`.
#[allow(clippy::too_many_arguments)]
pub fn generate<M: SequenceModel>(
    model: &M,
    start: &StartDistribution,
    codebook: &Codebook,
    permutation: &Permutation,
    width: usize,
    height: usize,
    n: usize,
    options: &SampleOptions,
    rng: &mut impl Rng,
) -> Result<Vec<Image>> {
    let steps = (width * height).saturating_sub(1);
    start
        .sample_n(n, &mut *rng)?
        .into_iter()
        .map(|token| {
            let seq = sample(model, &[token], steps, options, &mut *rng)?;
            decode_sequence(&seq, codebook, permutation, width, height)
        })
        .collect()
}

/// Runs every stage on `train` and `test` and writes the results to `out_dir`.
pub fn run<S: ImageSource + Sync>(config: &Config, train: &S, test: &S, out_dir: &Path, seed: u64) -> Result<RunSummary> {
    let start_time = Instant::now();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let train = Truncated::new(train, config.max_train_images);
    let test = Truncated::new(test, config.max_test_images);
    if train.is_empty() {
        return Err(Error::InvalidArgument("the train split has no images".into()));
    }
    info!("train images={}, test images={}", train.len(), test.len());
    debug!("train labels: {:?}", label_counts(&train)?);

    let plot_dir = out_dir.join("plots");
    fs::create_dir_all(&plot_dir)?;

    let (codebook, n_pixels_sampled) = fit_codebook(&train, config, &mut rng)?;
    codebook.write_json(out_dir.join(CODEBOOK_FILE))?;

    let preview = random_images(&train, config.n_preview, &mut rng)?;
    plot_reconstructions(&preview, &codebook, config.preview_cols, plot_dir.join("reconstruction.png"))
        .map_err(plot_error)?;

    let (first, _) = train.get(0)?;
    let (width, height) = (first.width(), first.height());

    let permutation = build_permutation(width * height, config.permute_pixels, &mut rng);
    permutation.write_json(out_dir.join(PERMUTATION_FILE))?;

    let train_dataset = SequenceDataset::new(&train, &codebook, Some(&permutation))?;
    let test_dataset = SequenceDataset::new(&test, &codebook, Some(&permutation))?;

    let model = PixelModel::new(
        ModelConfig {
            vocab_size: train_dataset.vocab_size(),
            block_size: train_dataset.block_size(),
            n_embd: config.n_embd,
        },
        &mut rng,
    )?;
    info!("model parameters: {}", model.n_params());

    let ckpt_path: PathBuf = out_dir.join(MODEL_FILE);
    let mut trainer_config = config.trainer.clone();
    trainer_config.ckpt_path = Some(ckpt_path.clone());

    let test_split = (!test_dataset.is_empty()).then_some(&test_dataset);
    let mut trainer = Trainer::new(model, &train_dataset, test_split, trainer_config);
    let output = trainer.train(&mut rng)?;

    // Continue from the best checkpoint rather than the last epoch
    let model = if ckpt_path.exists() {
        PixelModel::read_json(&ckpt_path)?
    } else {
        trainer.model.write_json(&ckpt_path)?;
        trainer.model
    };

    let start = first_token_distribution(
        &train_dataset,
        model.vocab_size(),
        config.n_first_token_estimates,
        &mut rng,
    )?;
    start.write_json(out_dir.join(START_DISTRIBUTION_FILE))?;

    let samples = generate(
        &model,
        &start,
        &codebook,
        &permutation,
        width,
        height,
        config.n_samples,
        &config.sampling,
        &mut rng,
    )?;
    plot_samples(&samples, config.sample_cols, plot_dir.join("samples.png")).map_err(plot_error)?;

    plot_positional_embeddings(
        model.positional_embedding(),
        &permutation,
        width,
        height,
        config.n_pos_emb_plots,
        8,
        plot_dir.join("positional_embeddings.png"),
    )
    .map_err(plot_error)?;

    if let Err(e) = plot_metrics(&output.metrics, plot_dir.join("loss.png")) {
        warn!("failed to plot metrics: {}", e);
    }

    output.metrics.write_json(out_dir.join(METRICS_FILE))?;
    config.write_json(out_dir.join(CONFIG_FILE))?;

    let summary = RunSummary {
        n_train_images: train.len(),
        n_test_images: test.len(),
        ncluster: codebook.len(),
        n_pixels_sampled,
        image_width: width,
        image_height: height,
        n_params: model.n_params(),
        best_test_loss: output.best_loss,
        final_train_loss: output.metrics.final_train_loss(),
        elapsed_ms: start_time.elapsed().as_millis(),
        seed,
    };
    summary.write_json(out_dir.join(SUMMARY_FILE))?;

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::InMemoryDataset;
    use ndarray::array;

    #[test]
    fn identity_unless_permuting() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(build_permutation(16, false, &mut rng), Permutation::identity(16));

        let shuffled = build_permutation(16, true, &mut rng);
        assert_eq!(shuffled.len(), 16);
        assert_ne!(shuffled, Permutation::identity(16));
    }

    #[test]
    fn random_images_are_capped_by_the_source() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let data = InMemoryDataset::new(
            (0..3)
                .map(|i| (Image::filled(2, 2, [i, i, i]), i))
                .collect(),
        );

        let picked = random_images(&data, 10, &mut rng).unwrap();
        assert_eq!(picked.len(), 3);
        let mut firsts: Vec<u8> = picked.iter().map(|im| im[(0, 0)][0]).collect();
        firsts.sort();
        assert_eq!(firsts, vec![0, 1, 2]);
    }

    #[test]
    fn fits_a_codebook_to_two_colors() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let data = InMemoryDataset::new(vec![
            (Image::filled(4, 4, [255, 0, 0]), 0),
            (Image::filled(4, 4, [0, 0, 255]), 1),
        ]);
        let config = Config {
            ncluster: 2,
            niter: 3,
            pixels_per_image: 4,
            ..Default::default()
        };

        let (codebook, n) = fit_codebook(&data, &config, &mut rng).unwrap();
        assert_eq!(n, 8);
        assert_eq!(codebook.len(), 2);
        assert_ne!(codebook.nearest(&[255.0, 0.0, 0.0]), codebook.nearest(&[0.0, 0.0, 255.0]));
    }

    /// Always predicts the token after the last one
    struct Next(usize);

    impl SequenceModel for Next {
        fn vocab_size(&self) -> usize {
            self.0
        }

        fn block_size(&self) -> usize {
            8
        }

        fn next_logits(&self, context: &[usize]) -> Result<ndarray::Array1<f32>> {
            let mut logits = ndarray::Array1::zeros(self.0);
            logits[(context[context.len() - 1] + 1) % self.0] = 10.0;
            Ok(logits)
        }
    }

    #[test]
    fn generated_sequences_are_decoded_in_raster_order() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let codebook = Codebook::new(array![[0.0, 0.0, 0.0], [100.0, 100.0, 100.0], [200.0, 200.0, 200.0]]).unwrap();
        let perm = Permutation::from_vec(vec![3, 2, 1, 0]).unwrap();
        let start = StartDistribution {
            probs: vec![1.0, 0.0, 0.0],
        };
        let options = SampleOptions {
            sample: false,
            ..Default::default()
        };

        let images = generate(&Next(3), &start, &codebook, &perm, 2, 2, 2, &options, &mut rng).unwrap();

        // Sequence 0, 1, 2, 0 written back to positions 3, 2, 1, 0
        let expected = Image::from_pixels(2, 2, vec![[0; 3], [200; 3], [100; 3], [0; 3]]).unwrap();
        assert_eq!(images, vec![expected.clone(), expected]);
    }
}
