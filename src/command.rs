use std::{
    ffi::{OsStr, OsString},
    marker::PhantomData,
    path::{Path, PathBuf},
    process::Stdio,
};

use tokio::process::Command;

/// Keeps a console window from popping up for every child on Windows
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

pub trait Mode { }

/// Arguments are appended at the end
pub struct Normal;
impl Mode for Normal { }

/// Arguments are inserted in front of the last `-i <input>` or `-y <output>`
pub struct IO;
impl Mode for IO { }

/// Argument list for one of the FFmpeg tools
///
/// Input and output options are placed in front of the file they apply to:
///
/// ```
/// # use essi_webm::command::ToolCommand;
/// let args = ToolCommand::new("ffmpeg")
///     .input_with_file("in.mov").done()
///     .output_as_file("out.webm").codec_video("libvpx-vp9").arg("-an").done()
///     .into_args();
///
/// assert_eq!(args, ["-i", "in.mov", "-c:v", "libvpx-vp9", "-an", "-y", "out.webm"]);
/// ```
pub struct ToolCommand<M: Mode> {
    program: PathBuf,
    args: Vec<OsString>,
    inserting_offset: Option<usize>,
    marker: PhantomData<M>,
}

impl<A: Mode> ToolCommand<A> {
    fn into_mode<B: Mode>(self) -> ToolCommand<B> {
        ToolCommand {
            program: self.program,
            args: self.args,
            inserting_offset: self.inserting_offset,
            marker: PhantomData,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl ToolCommand<Normal> {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            inserting_offset: None,
            marker: PhantomData,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_os_string());

        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }

        self
    }

    /// Following [`IO`] arguments become input options for this file
    pub fn input_with_file(mut self, path: impl AsRef<Path>) -> ToolCommand<IO> {
        self.inserting_offset = Some(self.args.len());

        self.args.extend([OsString::from("-i"), path.as_ref().as_os_str().to_os_string()]);

        self.into_mode()
    }

    /// Following [`IO`] arguments become output options for this file, which is overwritten
    pub fn output_as_file(mut self, path: impl AsRef<Path>) -> ToolCommand<IO> {
        self.inserting_offset = Some(self.args.len());

        self.args.extend([OsString::from("-y"), path.as_ref().as_os_str().to_os_string()]);

        self.into_mode()
    }

    /// Inspect the arguments before building
    pub fn inspect_args<F>(self, mut f: F) -> Self
    where
        F: FnMut(&[OsString]),
    {
        f(&self.args);

        self
    }

    pub fn into_args(self) -> Vec<OsString> {
        self.args
    }

    /// Child process with stdin bound to null, no console window and killed when dropped
    pub fn build(self) -> Command {
        let mut command = Command::new(&self.program);

        command
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        #[cfg(windows)]
        command.creation_flags(CREATE_NO_WINDOW);

        command
    }
}

impl ToolCommand<IO> {
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        let at = self.inserting_offset.unwrap_or(self.args.len());
        self.args.insert(at, arg.as_ref().to_os_string());

        if let Some(offset) = self.inserting_offset.as_mut() {
            *offset += 1;
        }

        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }

        self
    }

    pub fn codec_video(self, codec: impl AsRef<str>) -> Self {
        self.args(["-c:v", codec.as_ref()])
    }

    pub fn video_filter(self, filter: impl AsRef<str>) -> Self {
        self.args(["-vf", filter.as_ref()])
    }

    pub fn pixel_format(self, format: impl AsRef<str>) -> Self {
        self.args(["-pix_fmt", format.as_ref()])
    }

    pub fn no_audio(self) -> Self {
        self.arg("-an")
    }

    pub fn done(mut self) -> ToolCommand<Normal> {
        self.inserting_offset = None;
        self.into_mode()
    }
}
