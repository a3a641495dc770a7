use std::path::PathBuf;

use clap::Parser;
use pixgpt::codebook::Codebook;
use pixgpt::config::Config;
use pixgpt::metrics::RunSummary;
use pixgpt::model::PixelModel;
use pixgpt::permutation::Permutation;
use pixgpt::pipeline::{
    CODEBOOK_FILE, CONFIG_FILE, MODEL_FILE, PERMUTATION_FILE, START_DISTRIBUTION_FILE, SUMMARY_FILE, generate,
};
use pixgpt::plotting::plot_samples;
use pixgpt::sampling::{SampleOptions, StartDistribution};
use pixgpt::serde_utils::JSONReadWrite;
use pixgpt::utils::init_logging;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

/// Draws fresh samples from a finished training run
#[derive(Parser, Debug)]
struct Args {
    /// Run directory written by `train`
    #[arg(short = 'r', long)]
    run_dir: PathBuf,
    /// Output image. Defaults to plots/samples_<seed>.png in the run directory
    #[arg(short = 'o', long)]
    out_path: Option<PathBuf>,
    #[arg(short = 'n', long)]
    n_samples: Option<usize>,
    #[arg(short = 't', long)]
    temperature: Option<f32>,
    /// 0 disables top-k filtering
    #[arg(short = 'k', long)]
    top_k: Option<usize>,
    /// Take the most likely index at every step
    #[arg(long)]
    greedy: bool,
    /// Seed for reproducibility
    #[arg(short = 's', long)]
    seed: Option<u64>,
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let run_dir = &args.run_dir;
    let config = Config::read_json(run_dir.join(CONFIG_FILE))?;
    let summary = RunSummary::read_json(run_dir.join(SUMMARY_FILE))?;
    let model = PixelModel::read_json(run_dir.join(MODEL_FILE))?;
    let codebook = Codebook::read_json(run_dir.join(CODEBOOK_FILE))?;
    let permutation = Permutation::read_json(run_dir.join(PERMUTATION_FILE))?;
    let start = StartDistribution::read_json(run_dir.join(START_DISTRIBUTION_FILE))?;
    info!(
        "restored run '{}': ncluster={}, pixels={}",
        run_dir.display(),
        codebook.len(),
        permutation.len()
    );

    let options = SampleOptions {
        temperature: args.temperature.unwrap_or(config.sampling.temperature),
        top_k: match args.top_k {
            Some(0) => None,
            Some(k) => Some(k),
            None => config.sampling.top_k,
        },
        sample: config.sampling.sample && !args.greedy,
    };

    let seed = if let Some(seed) = args.seed {
        seed
    } else {
        rand::random()
    };
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let samples = generate(
        &model,
        &start,
        &codebook,
        &permutation,
        summary.image_width,
        summary.image_height,
        args.n_samples.unwrap_or(config.n_samples),
        &options,
        &mut rng,
    )?;

    let out_path = args
        .out_path
        .unwrap_or_else(|| run_dir.join("plots").join(format!("samples_{seed}.png")));
    plot_samples(&samples, config.sample_cols, &out_path)?;

    println!("Wrote {} samples -> {}", samples.len(), out_path.display());
    Ok(())
}
