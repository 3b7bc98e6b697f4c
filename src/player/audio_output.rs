use crate::core::{OutputFormat, PlayerError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, SampleFormat, Stream, StreamConfig, SupportedBufferSize,
    SupportedStreamConfigRange,
};
use log::{debug, error, info, warn};

/// 音频输出 - 使用 cpal 拉取式播放
///
/// 设备线程按自己的节奏调用回调索取数据，回调必须立即填满整个缓冲区
pub struct AudioOutput {
    device: Device,
    config: StreamConfig,
    /// 所选配置支持的硬件缓冲范围
    buffer_range: SupportedBufferSize,
    stream: Option<Stream>,
}

// cpal::Stream 本身不是 Send，但 AudioStream 只在控制线程中创建和使用，
// 不会跨线程传递；回调闭包在设备线程上运行，由 cpal 负责
unsafe impl Send for AudioOutput {}

impl AudioOutput {
    /// 协商输出配置（支持非标准配置自动回退）
    ///
    /// 首选解码器的采样率/声道数，设备不支持时回退到常见的标准配置
    pub fn negotiate(sample_rate: u32, channels: u16) -> Result<Self> {
        info!("初始化音频输出: {} Hz, {} 声道", sample_rate, channels);

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| PlayerError::AudioDevice("无法找到音频输出设备".to_string()))?;

        debug!("使用音频设备: {}", device.name().unwrap_or_default());

        let candidates = [
            (sample_rate, channels),
            (48000, 2), // 最常见
            (44100, 2), // CD 音质
            (48000, 1),
            (44100, 1),
        ];

        for (rate, ch) in candidates {
            let config = StreamConfig {
                channels: ch,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: BufferSize::Default,
            };

            let supported_configs = device
                .supported_output_configs()
                .map_err(|e| PlayerError::AudioDevice(format!("无法获取支持的音频配置: {}", e)))?;

            let matched = supported_configs
                .into_iter()
                .find(|supported| Self::is_config_compatible(&config, supported));

            if let Some(supported) = matched {
                if rate != sample_rate || ch != channels {
                    warn!("⚠️  音频设备不支持原配置，使用回退配置: {} Hz, {} 声道", rate, ch);
                }
                let buffer_range = supported.buffer_size().clone();
                return Ok(Self { device, config, buffer_range, stream: None });
            }
        }

        Err(PlayerError::AudioDevice(format!(
            "音频设备不支持任何 f32 标准配置 (原请求: {} Hz, {} 声道)",
            sample_rate, channels
        )))
    }

    /// 检查配置是否兼容
    fn is_config_compatible(config: &StreamConfig, supported: &SupportedStreamConfigRange) -> bool {
        let rate_in_range = config.sample_rate.0 >= supported.min_sample_rate().0
            && config.sample_rate.0 <= supported.max_sample_rate().0;

        rate_in_range
            && config.channels == supported.channels()
            && supported.sample_format() == SampleFormat::F32
    }

    /// 实际使用的输出格式
    pub fn format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.config.sample_rate.0,
            channels: self.config.channels,
        }
    }

    /// 请求 `buffer_frames` 大小的硬件缓冲
    ///
    /// 设备支持时返回实际生效的帧数；不支持或范围未知时使用默认缓冲，返回 `None`
    pub fn request_buffer(&mut self, buffer_frames: u32) -> Option<u32> {
        let granted = granted_buffer(&self.buffer_range, buffer_frames);
        match granted {
            Some(frames) => self.config.buffer_size = BufferSize::Fixed(frames),
            None => {
                warn!("设备不支持 {} 帧缓冲（{:?}），使用默认缓冲", buffer_frames, self.buffer_range);
                self.config.buffer_size = BufferSize::Default;
            }
        }
        granted
    }

    /// 打开输出流（初始为暂停状态）
    pub fn open<F>(&mut self, callback: F) -> Result<()>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = self.build(&self.config, callback)?;

        // 部分后端创建后即开始播放，统一先暂停，由 start() 开启
        if let Err(e) = stream.pause() {
            debug!("暂停新建音频流失败: {}", e);
        }

        self.stream = Some(stream);
        info!("音频输出已打开");
        Ok(())
    }

    fn build<F>(&self, config: &StreamConfig, mut callback: F) -> Result<Stream>
    where
        F: FnMut(&mut [f32]) + Send + 'static,
    {
        self.device
            .build_output_stream(
                config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| callback(data),
                move |err| {
                    error!("音频流错误: {}", err);
                },
                None,
            )
            .map_err(|e| PlayerError::AudioDevice(format!("创建音频流失败: {}", e)))
    }

    /// 开始播放
    pub fn play(&self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .play()
                .map_err(|e| PlayerError::AudioDevice(format!("启动音频流失败: {}", e)))?;
            info!("音频输出已启动");
        }
        Ok(())
    }

    /// 暂停设备（保留解码状态）
    pub fn pause(&self) -> Result<()> {
        if let Some(stream) = &self.stream {
            stream
                .pause()
                .map_err(|e| PlayerError::AudioDevice(format!("暂停音频流失败: {}", e)))?;
            info!("音频输出已暂停");
        }
        Ok(())
    }

    /// 关闭设备
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("音频输出已关闭");
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// 请求的缓冲帧数落在设备支持范围内时才使用固定缓冲
fn granted_buffer(range: &SupportedBufferSize, buffer_frames: u32) -> Option<u32> {
    match range {
        SupportedBufferSize::Range { min, max } if (*min..=*max).contains(&buffer_frames) => {
            Some(buffer_frames)
        }
        _ => None,
    }
}
