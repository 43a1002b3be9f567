//! 视频源 - 以前向、一次性的方式逐帧产出 RGB 图像

use crate::core::error::{LabelError, Result};
use crate::core::video::probe::{probe_video_with, VideoInfo};
use image::RgbImage;
use log::{debug, info, warn};
use std::collections::VecDeque;
use std::io::{ErrorKind as IoErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

/// 视频源接口，从头到尾只读一次
pub trait FrameSource {
    /// Native frame rate, `None` when the container does not report one.
    fn fps(&self) -> Option<f64>;

    /// `(width, height)` of decoded frames.
    fn dimensions(&self) -> (u32, u32);

    /// 下一帧，读完后返回 `Ok(None)`
    fn next_frame(&mut self) -> Result<Option<RgbImage>>;

    /// Number of frames decoded so far (the frame count is only known at the end).
    fn frames_read(&self) -> u64;

    /// 释放解码器，可重复调用
    fn release(&mut self);
}

/// ffmpeg / ffprobe 可执行文件位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl FfmpegTools {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    /// 在 PATH 中查找两个可执行文件
    pub fn locate() -> Result<Self> {
        let ffprobe = which::which("ffprobe")
            .map_err(|_| LabelError::SourceUnavailable("ffprobe not found in PATH".to_string()))?;
        let ffmpeg = which::which("ffmpeg")
            .map_err(|_| LabelError::SourceUnavailable("ffmpeg not found in PATH".to_string()))?;
        Ok(Self { ffmpeg, ffprobe })
    }

    /// Decoder invocation: coded frame size (no display-matrix rotation) and
    /// one output frame per decoded frame (no CFR duplication or dropping).
    fn decoder_command(&self, path: &Path, threads: usize) -> Command {
        let mut command = Command::new(&self.ffmpeg);
        command
            .args(["-v", "error", "-nostdin", "-threads"])
            .arg(threads.to_string())
            .arg("-noautorotate")
            .arg("-i")
            .arg(path)
            .args([
                "-map",
                "0:v:0",
                "-fps_mode",
                "passthrough",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-",
            ]);
        command
    }
}

/// 基于 ffmpeg 子进程的解码器，rgb24 rawvideo 经管道读取
///
/// 读到流末尾时回收子进程：非零退出码说明解码中途失败，按 `SourceUnavailable` 上报，
/// 不会被当作正常结束。
pub struct FfmpegSource {
    path: PathBuf,
    info: VideoInfo,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
    frames_read: u64,
    released: bool,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(LabelError::SourceUnavailable(format!(
                "file not found: {}",
                path.display()
            )));
        }
        Self::open_with(path, &FfmpegTools::locate()?)
    }

    pub fn open_with(path: &Path, tools: &FfmpegTools) -> Result<Self> {
        info!("🎬 Opening video: {}", path.display());

        let info = probe_video_with(&tools.ffprobe, path)?;

        let threads = num_cpus::get().min(4);
        debug!("Using {} decoder threads", threads);

        let mut child = tools
            .decoder_command(path, threads)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LabelError::SourceUnavailable(format!("failed to spawn ffmpeg: {}", e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            LabelError::SourceUnavailable("ffmpeg stdout unavailable".to_string())
        })?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| LabelError::SourceUnavailable("ffmpeg stderr unavailable".to_string()))
            .and_then(drain_stderr);
        let stderr = match stderr {
            Ok(handle) => handle,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        info!(
            "✅ Video opened: {}x{} @ {:?} fps ({})",
            info.width, info.height, info.fps, info.codec
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            child: Some(child),
            stdout: Some(stdout),
            stderr: Some(stderr),
            frames_read: 0,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    /// 输出结束后回收解码进程，非零退出码即解码失败
    fn reap(&mut self) -> Result<()> {
        self.stdout = None;
        let mut child = match self.child.take() {
            Some(child) => child,
            None => return Ok(()),
        };

        let status = child.wait().map_err(|e| {
            LabelError::SourceUnavailable(format!("waiting for ffmpeg failed: {}", e))
        })?;
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            debug!("Decoder exited cleanly after {} frames", self.frames_read);
            Ok(())
        } else {
            Err(LabelError::SourceUnavailable(format!(
                "ffmpeg failed on {} after {} frames ({}): {}",
                self.path.display(),
                self.frames_read,
                status,
                stderr.trim()
            )))
        }
    }
}

fn drain_stderr(mut stderr: ChildStderr) -> Result<JoinHandle<String>> {
    thread::Builder::new()
        .name("ffmpeg-stderr".to_string())
        .spawn(move || {
            let mut raw = Vec::new();
            let _ = stderr.read_to_end(&mut raw);
            String::from_utf8_lossy(&raw).into_owned()
        })
        .map_err(|e| LabelError::SourceUnavailable(format!("cannot watch ffmpeg stderr: {}", e)))
}

impl FrameSource for FfmpegSource {
    fn fps(&self) -> Option<f64> {
        self.info.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let frame_len = self.frame_len();
        let stdout = match self.stdout.as_mut() {
            Some(stdout) => stdout,
            None => return Ok(None),
        };

        let mut buffer = vec![0u8; frame_len];
        let mut filled = 0;
        while filled < frame_len {
            match stdout.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == IoErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(LabelError::SourceUnavailable(format!(
                        "read from decoder failed: {}",
                        e
                    )))
                }
            }
        }

        if filled == 0 {
            self.reap()?;
            return Ok(None);
        }
        if filled < frame_len {
            self.reap()?;
            warn!(
                "⚠️ Truncated frame after {} frames ({} of {} bytes), ending stream",
                self.frames_read, filled, frame_len
            );
            return Ok(None);
        }

        self.frames_read += 1;
        let image = RgbImage::from_raw(self.info.width, self.info.height, buffer)
            .ok_or_else(|| LabelError::unsupported("decoded frame has wrong size"))?;
        Ok(Some(image))
    }

    fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn release(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.stderr.take() {
            let _ = handle.join();
        }
        if !self.released {
            self.released = true;
            info!(
                "🗑️ FfmpegSource: released {} after {} frames",
                self.path.display(),
                self.frames_read
            );
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

/// 内存帧源 - 合成视频与测试使用
pub struct MemorySource {
    frames: VecDeque<RgbImage>,
    fps: Option<f64>,
    dimensions: (u32, u32),
    frames_read: u64,
    released: bool,
}

impl MemorySource {
    pub fn new(frames: Vec<RgbImage>, fps: Option<f64>) -> Self {
        let dimensions = frames
            .first()
            .map(|f| (f.width(), f.height()))
            .unwrap_or((0, 0));
        Self {
            frames: frames.into(),
            fps,
            dimensions,
            frames_read: 0,
            released: false,
        }
    }

    /// 生成 `count` 帧纯色图，红色通道为帧序号
    pub fn synthetic(width: u32, height: u32, count: usize, fps: f64) -> Self {
        let frames = (0..count)
            .map(|i| RgbImage::from_pixel(width, height, image::Rgb([(i % 256) as u8, 64, 128])))
            .collect();
        Self::new(frames, Some(fps))
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl FrameSource for MemorySource {
    fn fps(&self) -> Option<f64> {
        self.fps
    }

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        if self.released {
            return Ok(None);
        }
        let frame = self.frames.pop_front();
        if frame.is_some() {
            self.frames_read += 1;
        }
        Ok(frame)
    }

    fn frames_read(&self) -> u64 {
        self.frames_read
    }

    fn release(&mut self) {
        self.released = true;
        self.frames.clear();
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn fps(&self) -> Option<f64> {
        (**self).fps()
    }

    fn dimensions(&self) -> (u32, u32) {
        (**self).dimensions()
    }

    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        (**self).next_frame()
    }

    fn frames_read(&self) -> u64 {
        (**self).frames_read()
    }

    fn release(&mut self) {
        (**self).release()
    }
}
