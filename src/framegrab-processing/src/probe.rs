//! Video probing via ffprobe

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Wall-clock deadline for one probe
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("input missing: {0}")]
    InputMissing(String),

    #[error("failed to start ffprobe: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffprobe timed out after {0:?}")]
    Timeout(Duration),

    #[error("ffprobe failed: {0}")]
    Failed(String),

    #[error("failed to parse ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Metadata of the first video stream
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    /// Container duration in seconds, 0 when unknown
    pub duration_sec: f64,
    pub width: i64,
    pub height: i64,
    /// Average frame rate, 0 when unknown
    pub avg_fps: f64,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    width: Option<i64>,
    #[serde(default)]
    height: Option<i64>,
    #[serde(default)]
    avg_frame_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
}

/// Probe `input` with the given ffprobe executable
pub async fn probe_video(
    ffprobe: &Path,
    input: &Path,
    timeout: Duration,
) -> Result<ProbeResult, ProbeError> {
    match tokio::fs::metadata(input).await {
        Ok(meta) if meta.is_dir() => {
            return Err(ProbeError::InputMissing(format!("{} is a directory", input.display())))
        }
        Ok(_) => {}
        Err(e) => return Err(ProbeError::InputMissing(format!("{}: {}", input.display(), e))),
    }

    let mut cmd = Command::new(ffprobe);
    cmd.args(["-v", "error"])
        .args(["-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height,avg_frame_rate"])
        .args(["-show_entries", "format=duration"])
        .args(["-of", "json"])
        .arg(input)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("spawning ffprobe: {:?}", cmd);

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(ProbeError::Spawn)?,
        Err(_) => return Err(ProbeError::Timeout(timeout)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr.trim();
        return Err(ProbeError::Failed(if message.is_empty() {
            format!("exit status {}", output.status)
        } else {
            message.chars().take(500).collect()
        }));
    }

    parse_probe_output(&output.stdout)
}

/// Parse ffprobe JSON output
pub fn parse_probe_output(stdout: &[u8]) -> Result<ProbeResult, ProbeError> {
    let parsed: FfprobeOutput = serde_json::from_slice(stdout)?;

    let mut result = ProbeResult::default();
    if let Some(stream) = parsed.streams.first() {
        result.width = stream.width.unwrap_or(0);
        result.height = stream.height.unwrap_or(0);
        result.avg_fps = stream.avg_frame_rate.as_deref().map(parse_frame_rate).unwrap_or(0.0);
    }
    if let Some(format) = parsed.format {
        result.duration_sec = format.duration.as_deref().map(parse_duration).unwrap_or(0.0);
    }

    Ok(result)
}

/// Parse `num/den` or a plain number. Unknown or non-positive rates yield 0.
pub fn parse_frame_rate(value: &str) -> f64 {
    let value = value.trim();
    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num = num.trim().parse::<f64>().unwrap_or(0.0);
            let den = den.trim().parse::<f64>().unwrap_or(0.0);
            if den == 0.0 {
                return 0.0;
            }
            num / den
        }
        None => value.parse::<f64>().unwrap_or(0.0),
    };

    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        0.0
    }
}

/// Parse a container duration. Non-finite or negative values clamp to 0.
pub fn parse_duration(value: &str) -> f64 {
    match value.trim().parse::<f64>() {
        Ok(d) if d.is_finite() && d > 0.0 => d,
        _ => 0.0,
    }
}
