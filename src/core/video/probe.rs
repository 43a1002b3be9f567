//! ffprobe 视频信息

use crate::core::error::{LabelError, Result};
use log::debug;
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    /// `None` when the container reports no usable rate (e.g. `0/0`)
    pub fps: Option<f64>,
    pub frame_count: Option<u64>,
    pub codec: String,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
}

pub fn probe_video(path: &Path) -> Result<VideoInfo> {
    if !path.exists() {
        return Err(LabelError::SourceUnavailable(format!(
            "file not found: {}",
            path.display()
        )));
    }

    let ffprobe = which::which("ffprobe")
        .map_err(|_| LabelError::SourceUnavailable("ffprobe not found in PATH".to_string()))?;
    probe_video_with(&ffprobe, path)
}

/// 使用指定的 ffprobe 可执行文件探测
pub fn probe_video_with(ffprobe: &Path, path: &Path) -> Result<VideoInfo> {
    if !path.exists() {
        return Err(LabelError::SourceUnavailable(format!(
            "file not found: {}",
            path.display()
        )));
    }

    let output = Command::new(ffprobe)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-select_streams",
            "v:0",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| LabelError::SourceUnavailable(format!("failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        return Err(LabelError::SourceUnavailable(format!(
            "ffprobe could not open {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    parse_probe_output(&output.stdout)
}

fn parse_probe_output(stdout: &[u8]) -> Result<VideoInfo> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)
        .map_err(|e| LabelError::SourceUnavailable(format!("unreadable ffprobe output: {}", e)))?;

    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| LabelError::SourceUnavailable("no video stream found".to_string()))?;

    let width = stream.width.unwrap_or(0);
    let height = stream.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(LabelError::SourceUnavailable(
            "video stream has no frame size".to_string(),
        ));
    }

    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));

    let frame_count = stream.nb_frames.as_deref().and_then(|n| n.parse().ok());

    debug!(
        "Probed video: {}x{} fps={:?} frames={:?}",
        width, height, fps, frame_count
    );

    Ok(VideoInfo {
        width,
        height,
        fps,
        frame_count,
        codec: stream.codec_name.clone().unwrap_or_default(),
    })
}

/// 解析 `"30000/1001"` 或 `"25"`，零值或格式错误返回 `None`
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let fps = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.trim().parse().ok()?,
    };

    if fps.is_finite() && fps > 0.0 {
        Some(fps)
    } else {
        None
    }
}
