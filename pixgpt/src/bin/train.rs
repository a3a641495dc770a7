use std::fs;
use std::path::PathBuf;

use clap::Parser;
use pixgpt::config::Config;
use pixgpt::dataset::{Cifar10, ImageSource, Split};
use pixgpt::pipeline::{SUMMARY_FILE, run};
use pixgpt::serde_utils::JSONReadWrite;
use pixgpt::utils::{init_logging, timestamp_for_dir};

#[derive(Parser, Debug)]
struct Args {
    /// Directory holding the CIFAR-10 binary batches
    #[arg(short = 'd', long)]
    data_dir: PathBuf,
    /// Run output directory. Defaults to a timestamped directory in runs/
    #[arg(short = 'r', long)]
    out_dir: Option<PathBuf>,
    /// Seed for reproducibility
    #[arg(short = 's', long)]
    seed: Option<u64>,
    /// Config file path
    #[arg(short = 'c', long)]
    config_path: Option<PathBuf>,
    /// trace, debug, info, warn or error
    #[arg(short = 'l', long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args.log_level)?;

    let config = if let Some(config_path) = &args.config_path {
        Config::read_json(config_path)
            .map_err(|e| format!("Failed to read config file '{}': {}", config_path.display(), e))?
    } else {
        Config::default()
    };

    let seed = if let Some(seed) = args.seed {
        seed
    } else {
        rand::random()
    };

    let train = Cifar10::load(&args.data_dir, Split::Train)?;
    let test = Cifar10::load(&args.data_dir, Split::Test)?;
    println!(
        "Loaded CIFAR-10 from '{}': train={}, test={}",
        args.data_dir.display(),
        train.len(),
        test.len()
    );

    let out_dir = if let Some(out_dir) = args.out_dir {
        out_dir
    } else {
        let timestamp = timestamp_for_dir();
        PathBuf::from(format!("runs/{timestamp}"))
    };
    fs::create_dir_all(&out_dir)
        .map_err(|e| format!("Failed to create out_dir '{}': {}", out_dir.display(), e))?;

    let summary = run(&config, &train, &test, &out_dir, seed)?;

    println!("==== Overall Summary ====");
    println!("train_images={}, test_images={}", summary.n_train_images, summary.n_test_images);
    println!("ncluster={}, pixels_sampled={}", summary.ncluster, summary.n_pixels_sampled);
    println!("params={}", summary.n_params);
    if let Some(loss) = summary.final_train_loss {
        println!("final_train_loss={:.5}", loss);
    }
    if let Some(loss) = summary.best_test_loss {
        println!("best_test_loss={:.5}", loss);
    }
    println!("seed={}", summary.seed);
    println!("elapsed_ms={}", summary.elapsed_ms);
    println!("Metrics summary -> {}", out_dir.join(SUMMARY_FILE).display());

    Ok(())
}
