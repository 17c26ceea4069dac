use std::path::Path;

use tracing::{debug, info};

use crate::{
    command::ToolCommand,
    error::{Error, Result},
    install::Installer,
    platform::{platform_dir, PlatformArtifact, Tool},
    resolver::{Resolver, ToolPaths},
};

pub const READY_LABEL: &str = "FFmpeg is ready";
pub const VERIFY_LABEL: &str = "Verifying FFmpeg";

/// Slice of the overall percentage each tool's download is mapped onto
fn download_range(tool: Tool) -> (&'static str, f64, f64) {
    match tool {
        Tool::Ffmpeg => ("Downloading ffmpeg...", 10.0, 50.0),
        Tool::Ffprobe => ("Downloading ffprobe...", 55.0, 95.0),
    }
}

/// Runs `<program> -version`, true if it exits successfully
pub async fn self_test(program: &Path) -> bool {
    match ToolCommand::new(program).arg("-version").build().output().await {
        Ok(output) => output.status.success(),
        Err(err) => {
            debug!(program = %program.display(), "self-test failed: {err}");

            false
        }
    }
}

async fn all_pass(paths: &ToolPaths) -> bool {
    for tool in Tool::ALL {
        if !self_test(paths.get(tool)).await {
            return false;
        }
    }

    true
}

/// Make sure both tools can be run, downloading them when they can't
///
/// Doesn't touch the network when both already pass their self-test. `artifact` is `None` on
/// platforms without a published build. Returns the freshly resolved paths
pub async fn ensure_ready<F>(
    resolver: &Resolver,
    installer: &Installer,
    artifact: Option<&PlatformArtifact>,
    mut on_progress: F,
) -> Result<ToolPaths>
where
    F: FnMut(&str, f64),
{
    let paths = resolver.resolve();

    if all_pass(&paths).await {
        info!(ffmpeg = %paths.ffmpeg.display(), "FFmpeg already available");
        on_progress(READY_LABEL, 100.0);

        return Ok(paths);
    }

    let artifact = artifact.ok_or_else(|| Error::UnsupportedPlatform(platform_dir()))?;
    let target_dir = resolver.settings().install_dir();

    info!(
        target = %target_dir.display(),
        platform = ?artifact.platform,
        "FFmpeg not available, installing"
    );

    let mut current = None;

    installer
        .install(artifact, &target_dir, |tool, percent| {
            let (label, start, end) = download_range(tool);

            if current != Some(tool) {
                current = Some(tool);
                on_progress(label, start);
            }

            on_progress(label, start + percent / 100.0 * (end - start));
        })
        .await?;

    on_progress(VERIFY_LABEL, 95.0);

    let paths = resolver.resolve();

    for tool in Tool::ALL {
        let path = paths.get(tool);

        if !self_test(path).await {
            return Err(Error::SelfTest { path: path.to_path_buf() });
        }
    }

    info!(ffmpeg = %paths.ffmpeg.display(), ffprobe = %paths.ffprobe.display(), "FFmpeg installed");
    on_progress(READY_LABEL, 100.0);

    Ok(paths)
}
