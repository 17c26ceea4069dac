use std::{env::consts, fmt};

use once_cell::sync::Lazy;
use serde::Serialize;

static CURRENT: Lazy<Option<Platform>> =
    Lazy::new(|| Platform::from_target(consts::OS, consts::ARCH));

/// `<os>-<arch>` of the running build, e.g. `macos-aarch64`
pub fn platform_dir() -> String {
    format!("{}-{}", consts::OS, consts::ARCH)
}

/// `.exe` on Windows, nothing elsewhere
pub const fn exe_suffix() -> &'static str {
    if cfg!(windows) { ".exe" } else { "" }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tool {
    Ffmpeg,
    Ffprobe,
}

impl Tool {
    pub const ALL: [Tool; 2] = [Tool::Ffmpeg, Tool::Ffprobe];

    pub fn name(self) -> &'static str {
        match self {
            Tool::Ffmpeg => "ffmpeg",
            Tool::Ffprobe => "ffprobe",
        }
    }

    /// Executable name with the platform suffix
    pub fn file_name(self) -> String {
        format!("{}{}", self.name(), exe_suffix())
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Platforms the mirror publishes static builds for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Platform {
    Windows,
    MacosIntel,
    MacosArm,
    LinuxX64,
    LinuxArm64,
}

impl Platform {
    pub fn current() -> Option<Platform> {
        *CURRENT
    }

    pub fn from_target(os: &str, arch: &str) -> Option<Platform> {
        match (os, arch) {
            ("windows", "x86_64") => Some(Platform::Windows),
            ("macos", "x86_64") => Some(Platform::MacosIntel),
            ("macos", "aarch64") => Some(Platform::MacosArm),
            ("linux", "x86_64") => Some(Platform::LinuxX64),
            ("linux", "aarch64") => Some(Platform::LinuxArm64),
            _ => None,
        }
    }

    /// Suffix used in the artifact names, `ffmpeg-<suffix>.gz`
    fn artifact_suffix(self) -> &'static str {
        match self {
            Platform::Windows => "win32-x64",
            Platform::MacosIntel => "darwin-x64",
            Platform::MacosArm => "darwin-arm64",
            Platform::LinuxX64 => "linux-x64",
            Platform::LinuxArm64 => "linux-arm64",
        }
    }

    fn file_extension(self) -> &'static str {
        match self {
            Platform::Windows => ".exe",
            _ => "",
        }
    }

    pub fn artifact(self, mirror_url: &str) -> PlatformArtifact {
        let base = mirror_url.trim_end_matches('/');
        let url = |tool: Tool| format!("{base}/{}-{}.gz", tool.name(), self.artifact_suffix());

        PlatformArtifact {
            platform: self,
            ffmpeg_url: url(Tool::Ffmpeg),
            ffprobe_url: url(Tool::Ffprobe),
            file_extension: self.file_extension().to_string(),
        }
    }
}

/// Where to fetch both tools from for one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformArtifact {
    pub platform: Platform,
    pub ffmpeg_url: String,
    pub ffprobe_url: String,
    pub file_extension: String,
}

impl PlatformArtifact {
    /// Artifact for the running platform, `None` if the mirror has no build for it
    pub fn current(mirror_url: &str) -> Option<PlatformArtifact> {
        Platform::current().map(|platform| platform.artifact(mirror_url))
    }

    pub fn url(&self, tool: Tool) -> &str {
        match tool {
            Tool::Ffmpeg => &self.ffmpeg_url,
            Tool::Ffprobe => &self.ffprobe_url,
        }
    }

    pub fn file_name(&self, tool: Tool) -> String {
        format!("{}{}", tool.name(), self.file_extension)
    }
}
