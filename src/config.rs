use std::{env::current_exe, path::PathBuf};

use crate::platform::platform_dir;

/// ffmpeg-static build mirrored on npmmirror
///
/// https://github.com/eugeneware/ffmpeg-static/releases/tag/b6.1.1
pub const DEFAULT_MIRROR_URL: &str = "https://cdn.npmmirror.com/binaries/ffmpeg-static/b6.1.1";

pub const DEFAULT_TOOL_DIR: &str = "ffmpeg";

const MIRROR_ENV: &str = "ESSI_WEBM_MIRROR";
const HOME_ENV: &str = "ESSI_WEBM_HOME";
const SKIP_PATH_ENV: &str = "ESSI_WEBM_SKIP_PATH";

#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL the per-platform `.gz` artifacts are fetched from
    pub mirror_url: String,
    /// Used instead of the running executable's folder when set
    pub base_dir: Option<PathBuf>,
    /// Look the tools up in `PATH` before the bundled layouts
    pub use_system_path: bool,
    /// Folder name under `resources/`
    pub tool_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mirror_url: DEFAULT_MIRROR_URL.to_string(),
            base_dir: None,
            use_system_path: true,
            tool_dir: DEFAULT_TOOL_DIR.to_string(),
        }
    }
}

impl Settings {
    /// Defaults, overridden by `ESSI_WEBM_MIRROR`, `ESSI_WEBM_HOME` and `ESSI_WEBM_SKIP_PATH`
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(mirror) = lookup(MIRROR_ENV).filter(|v| !v.trim().is_empty()) {
            settings.mirror_url = mirror.trim().trim_end_matches('/').to_string();
        }

        if let Some(home) = lookup(HOME_ENV).filter(|v| !v.trim().is_empty()) {
            settings.base_dir = Some(PathBuf::from(home));
        }

        if let Some(skip) = lookup(SKIP_PATH_ENV) {
            settings.use_system_path = !matches!(skip.trim(), "1" | "true" | "yes");
        }

        settings
    }

    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());

        self
    }

    pub fn with_mirror_url(mut self, url: impl Into<String>) -> Self {
        self.mirror_url = url.into();

        self
    }

    pub fn with_system_path(mut self, enabled: bool) -> Self {
        self.use_system_path = enabled;

        self
    }

    /// The running executable's folder, or [`Settings::base_dir`] when overridden
    ///
    /// Falls back to the current directory if the executable path can't be determined
    pub fn base_dir(&self) -> PathBuf {
        if let Some(dir) = &self.base_dir {
            return dir.clone();
        }

        current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// `<base>/resources/<tool-dir>`
    pub fn resources_dir(&self) -> PathBuf {
        self.base_dir().join("resources").join(&self.tool_dir)
    }

    /// Where downloaded tools are installed, `<base>/resources/<tool-dir>/<os>-<arch>`
    pub fn install_dir(&self) -> PathBuf {
        self.resources_dir().join(platform_dir())
    }
}
