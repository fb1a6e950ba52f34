//! Default [`VideoDecoder`] backed by the `ffprobe` and `ffmpeg` command line
//! tools. Frames are read as raw RGBA from the ffmpeg stdout pipe.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::thread;

use bevy_log::{debug, warn};
use crossbeam_channel::{bounded, Sender};
use serde::Deserialize;

use crate::{FrameStream, VideoDecoder, VideoError, VideoFrame, VideoInfo};

/// Decodes videos by spawning ffmpeg. Output is scaled down to `max_width`
/// and `max_frame_rate`.
#[derive(Debug, Clone)]
pub struct FfmpegDecoder {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
    pub max_width: u32,
    pub max_frame_rate: f64,
}

impl Default for FfmpegDecoder {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
            max_width: 1280,
            max_frame_rate: 30.0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    format: Option<ProbeFormat>,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

fn parse_frame_rate(rate: &str) -> Option<f64> {
    match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den > 0.0).then(|| num / den)
        }
        None => rate.parse().ok(),
    }
}

fn parse_probe(json: &[u8], path: &Path) -> Result<VideoInfo, VideoError> {
    let probe: ProbeOutput = serde_json::from_slice(json)?;
    let stream = probe
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| VideoError::NoVideoStream(path.to_path_buf()))?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        return Err(VideoError::NoVideoStream(path.to_path_buf()));
    };
    let frame_rate = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .filter(|rate| *rate > 0.0)
        .unwrap_or(25.0);
    let duration = probe
        .format
        .and_then(|format| format.duration)
        .and_then(|duration| duration.parse().ok())
        .unwrap_or(0.0);

    Ok(VideoInfo {
        width,
        height,
        frame_rate,
        duration,
    })
}

impl FfmpegDecoder {
    /// Size frames get decoded at for a `width`x`height` video.
    fn output_size(&self, info: &VideoInfo) -> (u32, u32) {
        if info.width <= self.max_width || info.width == 0 {
            return (info.width, info.height);
        }
        let height = (u64::from(info.height) * u64::from(self.max_width) / u64::from(info.width))
            .max(1) as u32;
        (self.max_width, height)
    }
}

impl VideoDecoder for FfmpegDecoder {
    fn prepare(&self, path: &Path) -> Result<VideoInfo, VideoError> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| VideoError::Spawn {
                program: self.ffprobe.display().to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(VideoError::Failed {
                program: self.ffprobe.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        parse_probe(&output.stdout, path)
    }

    fn start(&self, path: &Path, info: &VideoInfo) -> Result<FrameStream, VideoError> {
        let (width, height) = self.output_size(info);
        let frame_rate = info.frame_rate.min(self.max_frame_rate);

        let mut child = Command::new(&self.ffmpeg)
            .args(["-v", "quiet", "-re", "-i"])
            .arg(path)
            .args([
                "-vf",
                &format!("scale={width}:{height},fps={frame_rate}"),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgba",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| VideoError::Spawn {
                program: self.ffmpeg.display().to_string(),
                source,
            })?;
        let Some(stdout) = child.stdout.take() else {
            stop(&mut child);
            return Err(VideoError::Failed {
                program: self.ffmpeg.display().to_string(),
                stderr: "stdout is not piped".to_string(),
            });
        };

        let (tx, rx) = bounded(2);
        thread::spawn(move || pump_frames(child, stdout, tx, width, height));
        Ok(FrameStream::new(rx, frame_rate))
    }
}

fn stop(child: &mut Child) {
    if let Err(err) = child.kill() {
        debug!("ffmpeg already exited: {err}");
    }
    match child.wait() {
        Ok(status) => debug!("ffmpeg exited with {status}"),
        Err(err) => debug!("Failed to reap ffmpeg: {err}"),
    }
}

/// Read frames until ffmpeg exits or the stream gets dropped.
fn pump_frames(
    mut child: Child,
    mut stdout: ChildStdout,
    frames: Sender<VideoFrame>,
    width: u32,
    height: u32,
) {
    let frame_size = width as usize * height as usize * 4;
    loop {
        let mut data = vec![0u8; frame_size];
        if let Err(err) = stdout.read_exact(&mut data) {
            if err.kind() != std::io::ErrorKind::UnexpectedEof {
                warn!("Failed to read video frame: {err}");
            }
            break;
        }
        let frame = VideoFrame {
            width,
            height,
            data,
        };
        if frames.send(frame).is_err() {
            break;
        }
    }
    stop(&mut child);
}
