use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// 媒体流类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "视频"),
            MediaKind::Audio => write!(f, "音频"),
        }
    }
}

/// 需要打开的流组合
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaKinds {
    pub video: bool,
    pub audio: bool,
}

impl MediaKinds {
    pub const VIDEO: MediaKinds = MediaKinds { video: true, audio: false };
    pub const AUDIO: MediaKinds = MediaKinds { video: false, audio: true };
    pub const ALL: MediaKinds = MediaKinds { video: true, audio: true };
}

impl Default for MediaKinds {
    fn default() -> Self {
        Self::ALL
    }
}

/// 媒体源类型
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    /// YouTube 视频 ID，需要经过解析器获得真实流地址
    YouTube(String),

    /// 可直接交给 FFmpeg 打开的地址（本地文件或网络流）
    Direct(String),
}

impl MediaSource {
    /// 从用户输入解析媒体源
    ///
    /// - `https://www.youtube.com/watch?v=ID`、`https://youtu.be/ID`、`/shorts/ID` → `YouTube(ID)`
    /// - 其他带协议的 URL 或存在的本地路径 → `Direct`
    /// - 其余视为裸视频 ID
    pub fn parse(input: &str) -> Self {
        let input = input.trim();

        if let Some(id) = Self::youtube_id(input) {
            return MediaSource::YouTube(id);
        }

        if input.contains("://") || Path::new(input).exists() {
            MediaSource::Direct(input.to_string())
        } else {
            MediaSource::YouTube(input.to_string())
        }
    }

    fn youtube_id(url: &str) -> Option<String> {
        if !(url.contains("youtube.com") || url.contains("youtu.be")) {
            return None;
        }

        let id = if let Some((_, query)) = url.split_once("v=") {
            query
        } else if let Some((_, rest)) = url.split_once("youtu.be/") {
            rest
        } else if let Some((_, rest)) = url.split_once("/shorts/") {
            rest
        } else {
            return None;
        };

        let id: String = id
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();

        if id.is_empty() { None } else { Some(id) }
    }
}

/// 解码流的控制状态
///
/// 只能由公开操作触发状态转换：
/// `pause()` Running → Paused，`unpause()` Paused → Running，
/// `stop()` 任意 → Stopping，`start()` Stopping → Running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Running,
    Paused,
    Stopping,
}

/// 视频帧数据（YUV 4:2:0 平面格式，供渲染器上传纹理）
#[derive(Debug, Clone, Default)]
pub struct VideoFrame {
    pub pts: Duration,      // 显示时间戳
    pub width: u32,
    pub height: u32,
    pub planes: [Vec<u8>; 3], // Y、U、V
    pub strides: [usize; 3],
}

impl VideoFrame {
    /// 按给定尺寸分配空白帧（黑色）
    pub fn blank(width: u32, height: u32) -> Self {
        let chroma_width = (width as usize).div_ceil(2);
        let chroma_height = (height as usize).div_ceil(2);
        Self {
            pts: Duration::ZERO,
            width,
            height,
            planes: [
                vec![0u8; width as usize * height as usize],
                vec![128u8; chroma_width * chroma_height],
                vec![128u8; chroma_width * chroma_height],
            ],
            strides: [width as usize, chroma_width, chroma_width],
        }
    }

    /// 将一帧平面数据复制进来，尽量复用已有内存
    pub fn copy_planes(&mut self, width: u32, height: u32, planes: [&[u8]; 3], strides: [usize; 3]) {
        self.width = width;
        self.height = height;
        self.strides = strides;
        for (dst, src) in self.planes.iter_mut().zip(planes) {
            dst.clear();
            dst.extend_from_slice(src);
        }
    }
}

/// 音频输出格式（交错 f32）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputFormat {
    /// 每个采样帧（所有声道）的字节数
    pub fn bytes_per_frame(&self) -> usize {
        self.channels as usize * std::mem::size_of::<f32>()
    }
}

/// 视频尺寸（含像素宽高比）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoSize {
    pub width: u32,
    pub height: u32,
    /// 像素宽高比 (分子, 分母)，未知时为 (0, 1)
    pub sample_aspect_ratio: (i32, i32),
}
