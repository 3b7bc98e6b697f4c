use crate::core::MediaKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    #[error("FFmpeg 错误: {0}")]
    FFmpegError(#[from] ffmpeg_next::Error),

    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON 解析错误: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("无法打开媒体: {0}")]
    OpenFailed(String),

    #[error("无法找到{0}流")]
    NoSuchStream(MediaKind),

    #[error("不支持的编解码器: {0}")]
    UnsupportedCodec(String),

    #[error("无法打开解码器: {0}")]
    DecoderOpen(String),

    #[error("音频输出错误: {0}")]
    AudioDevice(String),

    #[error("重采样错误: {0}")]
    Resample(String),

    #[error("媒体解析失败: {0}")]
    Resolve(String),

    #[error("媒体没有可用的视频流")]
    NoVideoTrack,

    #[error("媒体没有任何可播放的流")]
    NoPlayableTrack,
}

pub type Result<T> = std::result::Result<T, PlayerError>;
