use std::{
    collections::VecDeque,
    io,
    path::{Path, PathBuf},
    process::Stdio,
};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    command::{Normal, ToolCommand},
    error::{Error, Result},
    probe::Prober,
    resolver::ToolPaths,
};

/// Lower is better, 63 is the worst VP9 accepts
pub const MAX_QUALITY: u8 = 63;

pub const OUTPUT_EXTENSION: &str = "webm";

const STDERR_TAIL_LINES: usize = 20;

/// `out_time_ms` is in microseconds despite its name
static PROGRESS_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"out_time_ms=(\d+)").expect("valid progress regex"));

pub fn clamp_quality(quality: i64) -> u8 {
    quality.clamp(0, MAX_QUALITY as i64) as u8
}

/// `<folder>/<input stem>.webm`, where an empty folder means the input's own folder
pub fn output_path(input: &Path, output_folder: &Path) -> PathBuf {
    let folder = if output_folder.as_os_str().is_empty() {
        input.parent().unwrap_or(Path::new(""))
    } else {
        output_folder
    };

    let mut name = input.file_stem().unwrap_or(input.as_os_str()).to_os_string();
    name.push(".");
    name.push(OUTPUT_EXTENSION);

    folder.join(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// CRF, always within `0..=63`
    pub quality: u8,
}

impl ConversionRequest {
    pub fn new(input: impl Into<PathBuf>, output_folder: impl AsRef<Path>, quality: i64) -> Self {
        let input = input.into();
        let output = output_path(&input, output_folder.as_ref());

        Self { input, output, quality: clamp_quality(quality) }
    }
}

/// FFmpeg arguments for a VP9 encode that keeps the alpha channel
pub fn transcode_command(ffmpeg: &Path, request: &ConversionRequest) -> ToolCommand<Normal> {
    ToolCommand::new(ffmpeg)
        .args(["-nostats", "-progress", "pipe:1"])
        .input_with_file(&request.input)
        .done()
        .output_as_file(&request.output)
        .codec_video("libvpx-vp9")
        // Undo premultiplied alpha, otherwise edges come out with a gray fringe
        .video_filter("premultiply=inplace=1")
        .pixel_format("yuva420p")
        // Limited range turns the transparent background dark gray
        .args(["-color_range", "pc"])
        .args(["-crf", &request.quality.to_string()])
        .args(["-b:v", "0"])
        // libvpx can't encode alpha with alt-ref frames
        .args(["-auto-alt-ref", "0"])
        .args(["-metadata:s:v:0", "alpha_mode=1"])
        .no_audio()
        .done()
}

/// Turns progress lines into percentages that never go backwards
#[derive(Debug)]
pub struct ProgressTracker {
    duration: Option<f64>,
    last: f64,
}

impl ProgressTracker {
    /// Without a usable duration nothing is ever reported
    pub fn new(duration: Option<f64>) -> Self {
        Self {
            duration: duration.filter(|d| d.is_finite() && *d > 0.0),
            last: 0.0,
        }
    }

    pub fn observe(&mut self, line: &str) -> Option<f64> {
        let duration = self.duration?;

        let captures = PROGRESS_MARKER.captures(line)?;
        let micros: f64 = captures[1].parse().ok()?;

        let percent = (micros / 1_000_000.0 / duration * 100.0).min(100.0);
        self.last = self.last.max(percent);

        Some(self.last)
    }
}

struct ActiveSession {
    token: CancellationToken,
}

/// Frees the session slot however the conversion ends
struct SessionGuard<'a> {
    slot: &'a Mutex<Option<ActiveSession>>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.slot.lock().take();
    }
}

/// Runs one FFmpeg conversion at a time
///
/// Starting a conversion while another one runs fails with [`Error::SessionBusy`]
#[derive(Default)]
pub struct Transcoder {
    slot: Mutex<Option<ActiveSession>>,
}

impl Transcoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Signal the running conversion to stop, returns `false` if nothing is running
    ///
    /// The conversion itself kills FFmpeg, removes the partial output and returns
    /// [`Error::Cancelled`]
    pub fn cancel(&self) -> bool {
        match self.slot.lock().as_ref() {
            Some(session) => {
                session.token.cancel();

                true
            }
            None => false,
        }
    }

    fn claim(&self) -> Result<(SessionGuard<'_>, CancellationToken)> {
        let mut slot = self.slot.lock();

        if slot.is_some() {
            return Err(Error::SessionBusy);
        }

        let token = CancellationToken::new();
        *slot = Some(ActiveSession { token: token.clone() });

        Ok((SessionGuard { slot: &self.slot }, token))
    }

    /// Convert `request.input` into an alpha-channel VP9 WebM at `request.output`
    ///
    /// `on_progress` gets non-decreasing percentages in the order FFmpeg reports them and a final
    /// 100 on success
    pub async fn convert<F>(
        &self,
        paths: &ToolPaths,
        request: &ConversionRequest,
        mut on_progress: F,
    ) -> Result<PathBuf>
    where
        F: FnMut(f64),
    {
        if tokio::fs::metadata(&request.input).await.is_err() {
            return Err(Error::InputNotFound(request.input.clone()));
        }

        let (_guard, token) = self.claim()?;

        let duration = match Prober::new(&paths.ffprobe).probe_duration(&request.input).await {
            Ok(duration) => Some(duration),
            Err(err) => {
                warn!("no progress will be reported: {err}");

                None
            }
        };

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        info!(
            input = %request.input.display(),
            output = %request.output.display(),
            quality = request.quality,
            "converting"
        );

        let mut command = transcode_command(&paths.ffmpeg, request)
            .inspect_args(|args| debug!(?args, "ffmpeg arguments"))
            .build();

        command.stdout(Stdio::piped()).stderr(Stdio::piped());

        let mut child = command.spawn()
            .map_err(|source| Error::Spawn { program: paths.ffmpeg.clone(), source })?;

        let stderr_tail = child.stderr.take().map(|stderr| tokio::spawn(tail(stderr)));

        let stdout = child.stdout.take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "ffmpeg stdout was not captured"))?;

        let mut lines = BufReader::new(stdout).lines();
        let mut tracker = ProgressTracker::new(duration);

        loop {
            tokio::select! {
                biased;

                _ = token.cancelled() => return abort(child, stderr_tail, &request.output).await,
                line = lines.next_line() => match line? {
                    Some(line) => {
                        if let Some(percent) = tracker.observe(&line) {
                            on_progress(percent);
                        }
                    }
                    None => break,
                },
            }
        }

        let status = tokio::select! {
            biased;

            _ = token.cancelled() => None,
            status = child.wait() => Some(status?),
        };

        let Some(status) = status else {
            return abort(child, stderr_tail, &request.output).await;
        };

        if !status.success() {
            if token.is_cancelled() {
                return abort(child, stderr_tail, &request.output).await;
            }

            let stderr = match stderr_tail {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };

            warn!(%status, "conversion failed");

            return Err(Error::Conversion { status, stderr });
        }

        on_progress(100.0);

        info!(output = %request.output.display(), "conversion finished");

        Ok(request.output.clone())
    }
}

async fn abort(
    mut child: Child,
    stderr_tail: Option<JoinHandle<String>>,
    output: &Path,
) -> Result<PathBuf> {
    if let Err(err) = child.kill().await {
        debug!("ffmpeg already gone: {err}");
    }

    if let Some(handle) = stderr_tail {
        handle.abort();
    }

    match tokio::fs::remove_file(output).await {
        Ok(()) => debug!(output = %output.display(), "removed partial output"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => warn!(output = %output.display(), "failed to remove partial output: {err}"),
    }

    info!("conversion cancelled");

    Err(Error::Cancelled)
}

/// Last lines FFmpeg logged, drained so the child never blocks on a full pipe
async fn tail(stderr: ChildStderr) -> String {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);

    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }

        tail.push_back(line);
    }

    Vec::from(tail).join("\n")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn quality_is_clamped() {
        assert_eq!(clamp_quality(-5), 0);
        assert_eq!(clamp_quality(0), 0);
        assert_eq!(clamp_quality(20), 20);
        assert_eq!(clamp_quality(63), 63);
        assert_eq!(clamp_quality(64), 63);
        assert_eq!(clamp_quality(i64::MAX), 63);
    }

    #[test]
    fn output_next_to_input() {
        assert_eq!(output_path(Path::new("clip.mov"), Path::new("")), PathBuf::from("clip.webm"));
        assert_eq!(
            output_path(Path::new("/videos/clip.mov"), Path::new("")),
            PathBuf::from("/videos/clip.webm")
        );
        assert_eq!(
            output_path(Path::new("/videos/intro.v2.mov"), Path::new("")),
            PathBuf::from("/videos/intro.v2.webm")
        );
    }

    #[test]
    fn output_in_chosen_folder() {
        assert_eq!(
            output_path(Path::new("/videos/clip.mov"), Path::new("/exports")),
            PathBuf::from("/exports/clip.webm")
        );

        let request = ConversionRequest::new("/videos/clip.mov", "/exports", 99);
        assert_eq!(request.output, PathBuf::from("/exports/clip.webm"));
        assert_eq!(request.quality, 63);
    }

    #[test]
    fn argument_template() {
        let request = ConversionRequest::new("in.mov", "", 20);
        let args = transcode_command(Path::new("ffmpeg"), &request).into_args();

        assert_eq!(args, [
            "-nostats", "-progress", "pipe:1",
            "-i", "in.mov",
            "-c:v", "libvpx-vp9",
            "-vf", "premultiply=inplace=1",
            "-pix_fmt", "yuva420p",
            "-color_range", "pc",
            "-crf", "20",
            "-b:v", "0",
            "-auto-alt-ref", "0",
            "-metadata:s:v:0", "alpha_mode=1",
            "-an",
            "-y", "in.webm",
        ]);
    }

    #[test]
    fn tracker_maps_markers() {
        let mut tracker = ProgressTracker::new(Some(10.0));

        assert_eq!(tracker.observe("frame=12"), None);
        assert_eq!(tracker.observe("out_time_ms=2500000"), Some(25.0));
        assert_eq!(tracker.observe("out_time_ms=1000000"), Some(25.0));
        assert_eq!(tracker.observe("out_time_ms=N/A"), None);
        assert_eq!(tracker.observe("out_time_ms=12000000"), Some(100.0));
    }

    #[test]
    fn tracker_without_duration_is_silent() {
        assert_eq!(ProgressTracker::new(None).observe("out_time_ms=2500000"), None);
        assert_eq!(ProgressTracker::new(Some(0.0)).observe("out_time_ms=2500000"), None);
    }

    #[tokio::test]
    async fn missing_input_spawns_nothing() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = ToolPaths {
            ffmpeg: dir.path().join("no-ffmpeg"),
            ffprobe: dir.path().join("no-ffprobe"),
        };
        let request = ConversionRequest::new(dir.path().join("missing.mov"), "", 20);
        let mut samples = Vec::new();

        let err = Transcoder::new()
            .convert(&paths, &request, |p| samples.push(p))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InputNotFound(_)));
        assert!(samples.is_empty());

        Ok(())
    }

    #[cfg(unix)]
    mod process {
        use std::sync::Arc;

        use tokio::sync::mpsc::unbounded_channel;

        use super::*;
        use crate::testing::write_script;

        struct Fixture {
            dir: tempfile::TempDir,
            paths: ToolPaths,
            input: PathBuf,
        }

        const PROBE_4S: &str = r#"echo '{ "format": { "duration": "4.0" } }'"#;

        fn fixture(ffmpeg_body: &str, ffprobe_body: &str) -> anyhow::Result<Fixture> {
            let dir = tempfile::tempdir()?;

            let ffmpeg_body = format!("for last; do :; done\n{ffmpeg_body}");
            let ffmpeg = write_script(dir.path(), "ffmpeg", &ffmpeg_body)?;
            let ffprobe = write_script(dir.path(), "ffprobe", ffprobe_body)?;

            let input = dir.path().join("clip.mov");
            std::fs::write(&input, b"mov")?;

            Ok(Fixture { paths: ToolPaths { ffmpeg, ffprobe }, input, dir })
        }

        #[tokio::test]
        async fn reports_progress_and_finishes_at_100() -> anyhow::Result<()> {
            let fixture = fixture(
                "printf 'frame=1\\nout_time_ms=1000000\\nprogress=continue\\n'\n\
                 printf 'out_time_ms=500000\\n'\n\
                 printf 'out_time_ms=3000000\\nprogress=continue\\n'\n\
                 printf 'webm' > \"$last\"\n\
                 printf 'progress=end\\n'",
                PROBE_4S,
            )?;

            let request = ConversionRequest::new(&fixture.input, "", 20);
            let mut samples = Vec::new();

            let output = Transcoder::new()
                .convert(&fixture.paths, &request, |p| samples.push(p))
                .await?;

            assert_eq!(output, fixture.dir.path().join("clip.webm"));
            assert_eq!(std::fs::read(&output)?, b"webm");
            assert_eq!(samples, [25.0, 25.0, 75.0, 100.0]);

            Ok(())
        }

        #[tokio::test]
        async fn non_utf8_file_names_reach_the_tools() -> anyhow::Result<()> {
            use std::{ffi::OsStr, os::unix::ffi::OsStrExt};

            let fixture = fixture(
                "prev=\n\
                 for a; do\n\
                 if [ \"$prev\" = -i ]; then test -e \"$a\" || exit 7; fi\n\
                 prev=$a\n\
                 done\n\
                 printf 'out_time_ms=2000000\\n'\n\
                 printf 'webm' > \"$last\"",
                &format!("for last; do :; done\ntest -e \"$last\" || exit 7\n{PROBE_4S}"),
            )?;

            let input = fixture.dir.path().join(OsStr::from_bytes(b"clip\xff.mov"));
            std::fs::write(&input, b"mov")?;

            let request = ConversionRequest::new(&input, "", 20);
            let mut samples = Vec::new();

            let output = Transcoder::new()
                .convert(&fixture.paths, &request, |p| samples.push(p))
                .await?;

            assert_eq!(output, fixture.dir.path().join(OsStr::from_bytes(b"clip\xff.webm")));
            assert_eq!(std::fs::read(&output)?, b"webm");
            assert_eq!(samples, [50.0, 100.0]);

            Ok(())
        }

        #[tokio::test]
        async fn unknown_duration_still_ends_at_100() -> anyhow::Result<()> {
            let fixture = fixture(
                "printf 'out_time_ms=1000000\\n'\nprintf 'webm' > \"$last\"",
                "exit 1",
            )?;

            let request = ConversionRequest::new(&fixture.input, "", 20);
            let mut samples = Vec::new();

            Transcoder::new().convert(&fixture.paths, &request, |p| samples.push(p)).await?;

            assert_eq!(samples, [100.0]);

            Ok(())
        }

        #[tokio::test]
        async fn failure_keeps_partial_output() -> anyhow::Result<()> {
            let fixture = fixture(
                "printf 'partial' > \"$last\"\necho 'Error while encoding' >&2\nexit 3",
                PROBE_4S,
            )?;

            let request = ConversionRequest::new(&fixture.input, "", 20);
            let transcoder = Transcoder::new();

            let err = transcoder.convert(&fixture.paths, &request, |_| {}).await.unwrap_err();

            match err {
                Error::Conversion { status, stderr } => {
                    assert_eq!(status.code(), Some(3));
                    assert!(stderr.contains("Error while encoding"));
                }
                other => panic!("unexpected error: {other}"),
            }

            assert!(request.output.exists());
            assert!(!transcoder.is_running());

            Ok(())
        }

        #[tokio::test]
        async fn missing_ffmpeg_is_a_spawn_error() -> anyhow::Result<()> {
            let fixture = fixture("exit 0", PROBE_4S)?;
            let paths = ToolPaths {
                ffmpeg: fixture.dir.path().join("no-ffmpeg"),
                ..fixture.paths.clone()
            };

            let request = ConversionRequest::new(&fixture.input, "", 20);
            let transcoder = Transcoder::new();

            let err = transcoder.convert(&paths, &request, |_| {}).await.unwrap_err();

            assert!(matches!(err, Error::Spawn { .. }));
            assert!(!transcoder.is_running());

            Ok(())
        }

        const SLOW_ENCODE: &str = "printf 'partial' > \"$last\"\n\
            printf 'out_time_ms=1000000\\nprogress=continue\\n'\n\
            printf 'out_time_ms=2000000\\nprogress=continue\\n'\n\
            exec sleep 30";

        #[tokio::test]
        async fn cancel_kills_and_cleans_up() -> anyhow::Result<()> {
            let fixture = fixture(SLOW_ENCODE, PROBE_4S)?;
            let request = ConversionRequest::new(&fixture.input, "", 20);
            let transcoder = Arc::new(Transcoder::new());
            let (progress_tx, mut progress_rx) = unbounded_channel();

            let job = tokio::spawn({
                let transcoder = transcoder.clone();
                let paths = fixture.paths.clone();
                let request = request.clone();

                async move {
                    transcoder.convert(&paths, &request, |p| { let _ = progress_tx.send(p); }).await
                }
            });

            assert_eq!(progress_rx.recv().await, Some(25.0));
            assert_eq!(progress_rx.recv().await, Some(50.0));

            assert!(transcoder.cancel());

            let err = job.await?.unwrap_err();

            assert!(err.is_cancelled());
            assert_eq!(progress_rx.recv().await, None);
            assert!(!request.output.exists());
            assert!(!transcoder.is_running());
            assert!(!transcoder.cancel());

            Ok(())
        }

        #[tokio::test]
        async fn second_conversion_is_rejected_while_busy() -> anyhow::Result<()> {
            let fixture = fixture(SLOW_ENCODE, PROBE_4S)?;
            let request = ConversionRequest::new(&fixture.input, "", 20);
            let transcoder = Arc::new(Transcoder::new());
            let (progress_tx, mut progress_rx) = unbounded_channel();

            let job = tokio::spawn({
                let transcoder = transcoder.clone();
                let paths = fixture.paths.clone();
                let request = request.clone();

                async move {
                    transcoder.convert(&paths, &request, |p| { let _ = progress_tx.send(p); }).await
                }
            });

            progress_rx.recv().await;

            let err = transcoder.convert(&fixture.paths, &request, |_| {}).await.unwrap_err();
            assert!(matches!(err, Error::SessionBusy));

            assert!(transcoder.cancel());
            assert!(job.await?.unwrap_err().is_cancelled());

            Ok(())
        }
    }
}
