use crate::core::{
    MediaKinds, MediaSource, PlaybackClock, PlayerConfig, PlayerError, Result, VideoFrame, VideoSize,
};
use crate::player::audio_stream::AudioStream;
use crate::player::resolver::{MediaResolver, ResolvedStreams, YtDlpResolver};
use crate::player::video_stream::VideoStream;
use log::{error, info, warn};
use parking_lot::MutexGuard;
use std::sync::Arc;
use std::time::Duration;

/// 一次播放会话：解析媒体，持有时钟与视频/音频流，对外提供统一的控制接口
///
/// 控制操作（start/pause/unpause/seek）应由同一个控制线程调用；
/// 先通知各个流，再修改时钟。
pub struct YouTubeVideo {
    clock: Arc<PlaybackClock>,
    video: Option<VideoStream>,
    audio: Option<AudioStream>,
    paused: bool,
}

impl YouTubeVideo {
    /// 打开 YouTube 视频 ID / 链接，或可直接播放的地址
    pub fn open(input: &str, kinds: MediaKinds, config: &PlayerConfig) -> Result<Self> {
        let resolver = YtDlpResolver::new(config.resolver.clone());
        Self::open_with(&resolver, input, kinds, config)
    }

    pub fn open_with(
        resolver: &dyn MediaResolver,
        input: &str,
        kinds: MediaKinds,
        config: &PlayerConfig,
    ) -> Result<Self> {
        let streams = match MediaSource::parse(input) {
            MediaSource::YouTube(id) => ResolvedStreams::from_formats(&resolver.resolve(&id)?),
            MediaSource::Direct(url) => ResolvedStreams::direct(&url),
        };

        let clock = Arc::new(PlaybackClock::new());

        let video = match streams.video_url.filter(|_| kinds.video) {
            Some(url) => VideoStream::open(&url, Arc::clone(&clock))
                .map_err(|e| warn!("⚠️ 视频流不可用: {}", e))
                .ok(),
            None => None,
        };

        let audio = match streams.audio_url.filter(|_| kinds.audio) {
            Some(url) => AudioStream::open(&url, Arc::clone(&clock), &config.audio, &config.sync)
                .map_err(|e| warn!("⚠️ 音频流不可用: {}", e))
                .ok(),
            None => None,
        };

        Self::from_streams(clock, video, audio)
    }

    /// 由已构造的流组成会话，至少需要一路流
    pub fn from_streams(
        clock: Arc<PlaybackClock>,
        video: Option<VideoStream>,
        audio: Option<AudioStream>,
    ) -> Result<Self> {
        if video.is_none() && audio.is_none() {
            return Err(PlayerError::NoPlayableTrack);
        }

        info!(
            "🎞️ 播放会话就绪: 视频 {}, 音频 {}",
            video.as_ref().map_or("无", |v| v.description()),
            audio.as_ref().map_or("无", |a| a.description())
        );

        Ok(Self { clock, video, audio, paused: true })
    }

    /// 启动解码与输出，然后开始走时
    pub fn start(&mut self) -> Result<()> {
        if let Some(video) = &self.video {
            video.start()?;
        }
        if let Some(audio) = &self.audio {
            audio.start()?;
        }
        self.clock.unpause();
        self.paused = false;
        Ok(())
    }

    pub fn pause(&mut self) {
        if let Some(video) = &self.video {
            video.pause();
        }
        if let Some(audio) = &self.audio {
            audio.pause();
        }
        self.clock.pause();
        self.paused = true;
    }

    pub fn unpause(&mut self) {
        if let Some(video) = &self.video {
            video.unpause();
        }
        if let Some(audio) = &self.audio {
            audio.unpause();
        }
        self.clock.unpause();
        self.paused = false;
    }

    pub fn seek(&self, target: Duration) {
        if let Some(video) = &self.video {
            video.seek(target);
        }
        if let Some(audio) = &self.audio {
            audio.seek(target);
        }
        self.clock.seek(target);
    }

    /// 停止解码线程和输出设备
    pub fn stop(&mut self) {
        if let Some(video) = &self.video {
            video.stop();
        }
        if let Some(audio) = &self.audio {
            if let Err(e) = audio.stop() {
                error!("停止音频输出失败: {}", e);
            }
        }
        self.clock.pause();
        self.paused = true;
    }

    /// 当前视频帧；仅有音频时返回 `NoVideoTrack`
    pub fn get_video_frame(&self) -> Result<MutexGuard<'_, VideoFrame>> {
        self.video
            .as_ref()
            .map(VideoStream::get_frame)
            .ok_or(PlayerError::NoVideoTrack)
    }

    pub fn get_video_size(&self) -> Result<VideoSize> {
        self.video
            .as_ref()
            .map(VideoStream::size)
            .ok_or(PlayerError::NoVideoTrack)
    }

    pub fn get_time(&self) -> Duration {
        self.clock.time()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn has_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// 所有存在的流都已播完
    pub fn has_ended(&self) -> bool {
        self.video.as_ref().is_none_or(VideoStream::has_ended)
            && self.audio.as_ref().is_none_or(AudioStream::has_ended)
    }
}
