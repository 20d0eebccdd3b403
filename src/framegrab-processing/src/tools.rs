//! External tool availability checks

use std::path::Path;
use std::process::{Command, Stdio};

/// First line of `<program> -version`, or None when the program cannot run
pub fn tool_version(program: &Path) -> Option<String> {
    let output = Command::new(program)
        .arg("-version")
        .stdin(Stdio::null())
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    Some(stdout.lines().next().unwrap_or_default().trim().to_string())
}

/// Check if ffmpeg is available
pub fn check_ffmpeg(ffmpeg: &Path) -> bool {
    tool_version(ffmpeg).is_some()
}

/// Check if ffprobe is available
pub fn check_ffprobe(ffprobe: &Path) -> bool {
    tool_version(ffprobe).is_some()
}
