use std::{path::PathBuf, sync::Arc};

use clap::Parser;
use essi_webm::{ConvertOutcome, Settings, WebmService};
use tracing_subscriber::EnvFilter;

/// Convert a video into a VP9 WebM that keeps its alpha channel
#[derive(Parser)]
struct Args {
    input: PathBuf,

    /// Defaults to the input's folder
    #[arg(short, long, default_value = "")]
    output_folder: PathBuf,

    /// CRF between 0 (best) and 63
    #[arg(short, long, default_value_t = 24)]
    quality: i64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let service = Arc::new(WebmService::new(Settings::from_env()));

    service.ensure_ready(|status, percent| println!("{status} {percent:.0}%")).await?;

    let info = service.media_info(&args.input).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);

    // Ctrl+C cancels the conversion and removes the partial file
    tokio::spawn({
        let service = service.clone();

        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                service.cancel();
            }
        }
    });

    let outcome = service.convert(&args.input, &args.output_folder, args.quality, |percent| {
        println!("{percent:.1}%");
    }).await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);

    if !matches!(outcome, ConvertOutcome::Success { .. }) {
        std::process::exit(1);
    }

    Ok(())
}
