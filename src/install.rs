use std::{
    fs::File,
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use futures::TryStreamExt;
use reqwest::StatusCode;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    platform::{PlatformArtifact, Tool},
    random_string,
};

/// Decompressed bytes copied per step
pub const CHUNK_SIZE: usize = 32 * 1024;

/// The static builds inflate to roughly three times their gzip size
const EXPANSION_FACTOR: u64 = 3;

/// Estimates stay below this until the stream is drained
const MAX_ESTIMATE: f64 = 99.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DownloadProgress {
    pub bytes_written: u64,
    /// 0 to 99 while streaming, exactly 100 once finished
    pub estimated_fraction: f64,
}

impl DownloadProgress {
    /// `None` when the compressed length isn't known
    fn estimate(bytes_written: u64, compressed_len: Option<u64>) -> Option<Self> {
        let compressed_len = compressed_len.filter(|len| *len > 0)?;

        let fraction = bytes_written as f64 / (compressed_len * EXPANSION_FACTOR) as f64 * 100.0;

        Some(Self {
            bytes_written,
            estimated_fraction: fraction.min(MAX_ESTIMATE),
        })
    }

    fn finished(bytes_written: u64) -> Self {
        Self { bytes_written, estimated_fraction: 100.0 }
    }
}

#[derive(Debug)]
enum CopyError {
    Read(io::Error),
    Write(io::Error),
    /// Nobody is waiting for the result any more
    Abandoned,
}

impl CopyError {
    fn into_error(self, url: &str) -> Error {
        match self {
            CopyError::Read(err) => read_error(err, url),
            CopyError::Write(err) => Error::Io(err),
            CopyError::Abandoned => {
                Error::Io(io::Error::new(io::ErrorKind::Interrupted, "download abandoned"))
            }
        }
    }
}

/// Network failures surface through the decoder as wrapped [`reqwest::Error`]s
fn read_error(err: io::Error, url: &str) -> Error {
    let url = url.to_string();

    if !err.get_ref().is_some_and(|inner| inner.is::<reqwest::Error>()) {
        return Error::Decompression { url, source: err };
    }

    let kind = err.kind();

    match err.into_inner().map(|inner| inner.downcast::<reqwest::Error>()) {
        Some(Ok(source)) => Error::Download { url, source: *source },
        Some(Err(inner)) => Error::Decompression { url, source: io::Error::new(kind, inner) },
        None => Error::Decompression { url, source: kind.into() },
    }
}

/// Copy `reader` into `writer` in [`CHUNK_SIZE`] steps, reporting after every step
///
/// The last report is always 100, sent after `reader` hits EOF
fn copy_with_progress<R, W, F>(
    mut reader: R,
    mut writer: W,
    compressed_len: Option<u64>,
    mut on_progress: F,
) -> Result<u64, CopyError>
where
    R: Read,
    W: Write,
    F: FnMut(DownloadProgress),
{
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut written = 0u64;

    loop {
        let len = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(len) => len,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(CopyError::Read(err)),
        };

        writer.write_all(&buffer[..len]).map_err(CopyError::Write)?;
        written += len as u64;

        if let Some(progress) = DownloadProgress::estimate(written, compressed_len) {
            on_progress(progress);
        }
    }

    writer.flush().map_err(CopyError::Write)?;
    on_progress(DownloadProgress::finished(written));

    Ok(written)
}

/// Mark a file as `rwxr-xr-x`, a no-op on platforms without an execute bit
#[cfg(unix)]
pub fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    use nix::sys::stat::Mode;

    let mode = Mode::S_IRWXU | Mode::S_IRGRP | Mode::S_IXGRP | Mode::S_IROTH | Mode::S_IXOTH;
    let permissions = std::fs::Permissions::from_mode(mode.bits().into());

    std::fs::set_permissions(path, permissions)
        .map_err(|source| Error::Permission { path: path.to_path_buf(), source })
}

#[cfg(not(unix))]
pub fn set_executable(_path: &Path) -> Result<()> {
    Ok(())
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|name| name.to_os_string()).unwrap_or_default();
    name.push(format!(".{}.part", random_string()));

    dest.with_file_name(name)
}

/// A download in progress, removed on drop unless it was moved into place
struct PartFile {
    path: PathBuf,
    kept: bool,
}

impl PartFile {
    fn create(path: PathBuf) -> io::Result<(Self, File)> {
        let file = File::create(&path)?;

        Ok((Self { path, kept: false }, file))
    }

    /// Mark the finished file executable and rename it to `dest`
    fn persist(mut self, dest: &Path) -> io::Result<()> {
        if let Err(err) = set_executable(&self.path) {
            warn!("{err}");
        }

        std::fs::rename(&self.path, dest)?;
        self.kept = true;

        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.kept {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Fetches the gzip-compressed static builds and unpacks them in place
#[derive(Debug, Clone, Default)]
pub struct Installer {
    client: reqwest::Client,
}

impl Installer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Install FFmpeg then FFprobe into `target_dir`, creating it if needed
    ///
    /// Stops at the first failure; a tool that was already installed stays in place
    pub async fn install<F>(
        &self,
        artifact: &PlatformArtifact,
        target_dir: &Path,
        mut on_progress: F,
    ) -> Result<()>
    where
        F: FnMut(Tool, f64),
    {
        tokio::fs::create_dir_all(target_dir).await?;

        for tool in Tool::ALL {
            let dest = target_dir.join(artifact.file_name(tool));

            self.download(artifact.url(tool), &dest, |progress| {
                on_progress(tool, progress.estimated_fraction)
            })
            .await?;
        }

        Ok(())
    }

    /// Download one gzip artifact and write the decompressed binary to `dest`
    ///
    /// Returns the number of decompressed bytes written. Dropping the future before it completes
    /// leaves `dest` untouched
    pub async fn download<F>(&self, url: &str, dest: &Path, mut on_progress: F) -> Result<u64>
    where
        F: FnMut(DownloadProgress),
    {
        info!(url, dest = %dest.display(), "downloading");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| Error::Download { url: url.to_string(), source })?;

        if response.status() != StatusCode::OK {
            return Err(Error::DownloadStatus { url: url.to_string(), status: response.status() });
        }

        let compressed_len = response.content_length();

        let stream = response
            .bytes_stream()
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        let reader = SyncIoBridge::new(StreamReader::new(Box::pin(stream)));

        let (progress_tx, mut progress_rx) = unbounded_channel();

        let handle = tokio::task::spawn_blocking({
            let part = part_path(dest);
            let dest = dest.to_path_buf();

            move || {
                let (part, file) = PartFile::create(part).map_err(CopyError::Write)?;

                let decoder = GzDecoder::new(reader);

                let written = copy_with_progress(decoder, file, compressed_len, |progress| {
                    // The receiver only goes away if the caller's future was dropped
                    let _ = progress_tx.send(progress);
                })?;

                if progress_tx.is_closed() {
                    return Err(CopyError::Abandoned);
                }

                part.persist(&dest).map_err(CopyError::Write)?;

                Ok(written)
            }
        });

        while let Some(progress) = progress_rx.recv().await {
            on_progress(progress);
        }

        let written = handle
            .await
            .map_err(|err| Error::Io(io::Error::new(io::ErrorKind::Other, err)))?
            .map_err(|err| err.into_error(url))?;

        info!(url, bytes = written, "installed");

        Ok(written)
    }
}
