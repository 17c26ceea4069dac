use std::{collections::HashMap, path::{Path, PathBuf}};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{command::ToolCommand, error::{Error, Result}};

/// Container and first video stream details
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub filename: Option<String>,
    /// Seconds
    pub duration: Option<f64>,
    /// Bytes
    pub size: Option<u64>,
    /// Bits per second
    pub bit_rate: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub codec: Option<String>,
    /// As reported by FFprobe, e.g. `30000/1001`
    pub frame_rate: Option<String>,
    pub pixel_format: Option<String>,
    pub has_alpha: bool,
}

#[derive(Debug, Deserialize)]
struct Report {
    format: Option<Format>,
    #[serde(default)]
    streams: Vec<Stream>,
}

#[derive(Debug, Deserialize)]
struct Format {
    filename: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Stream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    pix_fmt: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Whether a pixel format belongs to one of FFmpeg's alpha-carrying families
pub fn pixel_format_has_alpha(pix_fmt: &str) -> bool {
    let pix_fmt = pix_fmt.to_ascii_lowercase();

    ["yuva", "gbrap", "ya"].iter().any(|family| pix_fmt.starts_with(family))
        || ["rgba", "bgra", "argb", "abgr"].iter().any(|family| pix_fmt.contains(family))
}

fn parse_report(output: &[u8]) -> Result<Report> {
    serde_json::from_slice(output)
        .map_err(|err| Error::Probe(format!("malformed ffprobe output: {err}")))
}

fn parse_number<T: std::str::FromStr>(value: Option<&str>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

fn parse_duration(output: &[u8]) -> Result<f64> {
    let report = parse_report(output)?;

    let duration = report.format
        .and_then(|format| format.duration)
        .ok_or_else(|| Error::Probe("no duration in ffprobe output".to_string()))?;

    match duration.trim().parse::<f64>() {
        Ok(seconds) if seconds.is_finite() && seconds >= 0.0 => Ok(seconds),
        _ => Err(Error::Probe(format!("invalid duration {duration:?}"))),
    }
}

fn parse_info(output: &[u8]) -> Result<MediaInfo> {
    let report = parse_report(output)?;
    let mut info = MediaInfo::default();

    if let Some(format) = report.format {
        info.duration = parse_number(format.duration.as_deref());
        info.size = parse_number(format.size.as_deref());
        info.bit_rate = parse_number(format.bit_rate.as_deref());
        info.filename = format.filename;
    }

    let video = report.streams
        .into_iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"));

    if let Some(stream) = video {
        // libvpx only reports yuv420p for VP9 with alpha, the container tag is what tells
        let tagged_alpha = stream.tags
            .iter()
            .any(|(key, value)| key.eq_ignore_ascii_case("alpha_mode") && value.trim() == "1");

        info.has_alpha =
            tagged_alpha || stream.pix_fmt.as_deref().is_some_and(pixel_format_has_alpha);
        info.width = stream.width;
        info.height = stream.height;
        info.codec = stream.codec_name;
        info.frame_rate = stream.r_frame_rate;
        info.pixel_format = stream.pix_fmt;
    }

    Ok(info)
}

/// Runs FFprobe for a JSON report of a media file
#[derive(Debug, Clone)]
pub struct Prober {
    program: PathBuf,
}

impl Prober {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    /// Container duration in seconds
    pub async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let output = self.run(&["-show_format"], path).await?;

        parse_duration(&output)
    }

    pub async fn probe_info(&self, path: &Path) -> Result<MediaInfo> {
        let output = self.run(&["-show_format", "-show_streams"], path).await?;

        parse_info(&output)
    }

    async fn run(&self, sections: &[&str], path: &Path) -> Result<Vec<u8>> {
        let output = ToolCommand::new(&self.program)
            .args(["-v", "quiet", "-print_format", "json"])
            .args(sections)
            .arg(path)
            .inspect_args(|args| debug!(program = %self.program.display(), ?args, "probing"))
            .build()
            .output()
            .await
            .map_err(|err| {
                Error::Probe(format!("failed to run {}: {err}", self.program.display()))
            })?;

        if !output.status.success() {
            return Err(Error::Probe(format!(
                "{} exited with {}",
                self.program.display(),
                output.status
            )));
        }

        Ok(output.stdout)
    }
}
