use rand::{distributions::Alphanumeric, Rng};

pub mod command;
pub mod config;
pub mod error;
pub mod install;
pub mod platform;
pub mod probe;
pub mod ready;
pub mod resolver;
pub mod service;
pub mod transcode;

pub use config::Settings;
pub use error::{Error, Result};
pub use install::{DownloadProgress, Installer};
pub use platform::{Platform, PlatformArtifact, Tool};
pub use probe::{MediaInfo, Prober};
pub use ready::ensure_ready;
pub use resolver::{Resolver, ToolPaths};
pub use service::{ConvertOutcome, ToolStatus, WebmService};
pub use transcode::{ConversionRequest, Transcoder};

fn random_string() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(10)
        .map(char::from)
        .collect()
}
