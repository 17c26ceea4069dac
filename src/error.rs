use std::{io, path::PathBuf, process::ExitStatus};

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("input file does not exist: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to download {url}: HTTP {status}")]
    DownloadStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("failed to decompress {url}: {source}")]
    Decompression {
        url: String,
        #[source]
        source: io::Error,
    },

    /// Only surfaced by [`crate::install::set_executable`]; the installer logs it and moves on
    #[error("failed to mark {} as executable: {source}", .path.display())]
    Permission {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to probe media: {0}")]
    Probe(String),

    #[error("failed to start {}: {source}", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("conversion failed ({status}){}", stderr_suffix(.stderr))]
    Conversion {
        status: ExitStatus,
        stderr: String,
    },

    #[error("conversion cancelled")]
    Cancelled,

    #[error("a conversion is already running")]
    SessionBusy,

    #[error("{} did not pass its self-test", .path.display())]
    SelfTest { path: PathBuf },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {stderr}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cancellation_is_distinguished() {
        assert!(Error::Cancelled.is_cancelled());
        assert!(!Error::SessionBusy.is_cancelled());
        assert!(!Error::Probe("bad json".into()).is_cancelled());
    }

    #[test]
    fn messages_carry_context() {
        let err = Error::InputNotFound(PathBuf::from("clip.mov"));
        assert_eq!(err.to_string(), "input file does not exist: clip.mov");

        let err = Error::UnsupportedPlatform("freebsd-x86_64".into());
        assert_eq!(err.to_string(), "unsupported platform: freebsd-x86_64");
    }
}
