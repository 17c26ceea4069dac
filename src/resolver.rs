use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::{config::Settings, platform::{platform_dir, Tool}};

/// Where the two tools are invoked from
///
/// The paths are not guaranteed to exist, that is only found out by running them
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPaths {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl ToolPaths {
    pub fn get(&self, tool: Tool) -> &Path {
        match tool {
            Tool::Ffmpeg => &self.ffmpeg,
            Tool::Ffprobe => &self.ffprobe,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Resolver {
    settings: Settings,
}

impl Resolver {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Locate both tools, never fails
    pub fn resolve(&self) -> ToolPaths {
        let base_dir = self.settings.base_dir();
        let use_path = self.settings.use_system_path;

        let lookup = |name: &str| if use_path { which::which(name).ok() } else { None };

        resolve_in(&base_dir, &self.settings.tool_dir, lookup)
    }
}

fn resolve_in(
    base_dir: &Path,
    tool_dir: &str,
    lookup: impl Fn(&str) -> Option<PathBuf>,
) -> ToolPaths {
    ToolPaths {
        ffmpeg: resolve_tool(Tool::Ffmpeg, base_dir, tool_dir, &lookup),
        ffprobe: resolve_tool(Tool::Ffprobe, base_dir, tool_dir, &lookup),
    }
}

fn resolve_tool(
    tool: Tool,
    base_dir: &Path,
    tool_dir: &str,
    lookup: &impl Fn(&str) -> Option<PathBuf>,
) -> PathBuf {
    let file_name = tool.file_name();

    if let Some(path) = lookup(&file_name) {
        debug!(%tool, path = %path.display(), "found in PATH");
        return path;
    }

    let resources = base_dir.join("resources").join(tool_dir);
    let candidates = [
        resources.join(platform_dir()).join(&file_name),
        resources.join(&file_name),
        base_dir.join(&file_name),
    ];

    for candidate in candidates {
        if candidate.is_file() {
            debug!(%tool, path = %candidate.display(), "found bundled");
            return candidate;
        }
    }

    debug!(%tool, "not found, falling back to bare name");

    PathBuf::from(file_name)
}
