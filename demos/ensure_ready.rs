use std::env::current_dir;

use essi_webm::{Settings, WebmService};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Install into the current working directory instead of next to the executable
    let settings = Settings::from_env().with_base_dir(current_dir()?);
    let service = WebmService::new(settings);

    let paths = service.ensure_ready(|status, percent| println!("{status} {percent:.0}%")).await?;

    println!("ffmpeg:  {}", paths.ffmpeg.display());
    println!("ffprobe: {}", paths.ffprobe.display());

    Ok(())
}
