use chrono::Local;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[inline]
pub fn timestamp_for_dir() -> String {
    Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

pub fn mean(xs: &[f32]) -> f32 {
    if xs.is_empty() {
        panic!("Cannot compute mean of an empty array.")
    }

    xs.iter().sum::<f32>() / xs.len() as f32
}

/// Unknown names fall back to `INFO`.
pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

pub fn init_logging(level: &str) -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(parse_level(level))
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
