// 播放器核心模块

pub mod media_stream;
pub mod source;
pub mod decoder;
pub mod sync;
pub mod video_stream;
pub mod audio_output;
pub mod audio_stream;
pub mod resolver;
pub mod youtube_video;

pub use youtube_video::YouTubeVideo;
