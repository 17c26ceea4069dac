use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::warn;

use crate::{
    config::Settings,
    error::{Error, Result},
    install::Installer,
    platform::PlatformArtifact,
    probe::{MediaInfo, Prober},
    ready::{ensure_ready, self_test},
    resolver::{Resolver, ToolPaths},
    transcode::{ConversionRequest, Transcoder},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolStatus {
    pub installed: bool,
    pub path: PathBuf,
}

/// What a front end shows after a conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ConvertOutcome {
    Success { message: String, output_path: PathBuf },
    Failed { message: String },
    Cancelled { message: String },
}

impl ConvertOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConvertOutcome::Success { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            ConvertOutcome::Success { message, .. }
            | ConvertOutcome::Failed { message }
            | ConvertOutcome::Cancelled { message } => message,
        }
    }
}

impl From<Result<PathBuf>> for ConvertOutcome {
    fn from(result: Result<PathBuf>) -> Self {
        match result {
            Ok(output_path) => ConvertOutcome::Success {
                message: "Conversion finished".to_string(),
                output_path,
            },
            Err(err @ Error::Cancelled) => ConvertOutcome::Cancelled { message: err.to_string() },
            Err(err) => ConvertOutcome::Failed { message: format!("Conversion failed: {err}") },
        }
    }
}

/// Everything a desktop front end needs: tool provisioning, probing and one conversion at a time
pub struct WebmService {
    resolver: Resolver,
    installer: Installer,
    paths: RwLock<ToolPaths>,
    transcoder: Transcoder,
}

impl WebmService {
    pub fn new(settings: Settings) -> Self {
        let resolver = Resolver::new(settings);
        let paths = resolver.resolve();

        Self {
            resolver,
            installer: Installer::new(),
            paths: RwLock::new(paths),
            transcoder: Transcoder::new(),
        }
    }

    pub fn with_installer(mut self, installer: Installer) -> Self {
        self.installer = installer;

        self
    }

    pub fn paths(&self) -> ToolPaths {
        self.paths.read().clone()
    }

    pub async fn status(&self) -> ToolStatus {
        let path = self.paths().ffmpeg;

        ToolStatus { installed: self_test(&path).await, path }
    }

    /// Download FFmpeg if needed, then use the freshly resolved paths from here on
    ///
    /// Meant to run once, in the background, when the app starts
    pub async fn ensure_ready<F>(&self, on_progress: F) -> Result<ToolPaths>
    where
        F: FnMut(&str, f64),
    {
        let artifact = PlatformArtifact::current(&self.resolver.settings().mirror_url);

        let paths =
            ensure_ready(&self.resolver, &self.installer, artifact.as_ref(), on_progress).await?;
        *self.paths.write() = paths.clone();

        Ok(paths)
    }

    pub async fn media_info(&self, input: &Path) -> Result<MediaInfo> {
        Prober::new(self.paths().ffprobe).probe_info(input).await
    }

    /// An empty `output_folder` writes next to the input
    pub async fn convert<F>(
        &self,
        input: &Path,
        output_folder: &Path,
        quality: i64,
        on_progress: F,
    ) -> ConvertOutcome
    where
        F: FnMut(f64),
    {
        if input.as_os_str().is_empty() {
            return ConvertOutcome::Failed { message: "No input file selected".to_string() };
        }

        let request = ConversionRequest::new(input, output_folder, quality);
        let result = self.transcoder.convert(&self.paths(), &request, on_progress).await;

        if let Err(err) = &result {
            if !err.is_cancelled() {
                warn!(input = %input.display(), "{err}");
            }
        }

        result.into()
    }

    pub fn is_converting(&self) -> bool {
        self.transcoder.is_running()
    }

    /// True if a running conversion was told to stop
    pub fn cancel(&self) -> bool {
        self.transcoder.cancel()
    }
}
