use crate::core::{MediaKind, OutputFormat, PlayerError, Result, VideoFrame, VideoSize};
use crate::player::media_stream::{MediaStream, PacketRead};
use crate::player::source::{AudioSource, AudioStep, DecodeStep, DecodedAudio, VideoSource};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::util::channel_layout::ChannelLayout;
use ffmpeg_next::util::format::{sample, Pixel, Sample};
use ffmpeg_next::{codec, ffi, software, util};
use log::{debug, error, info, warn};
use std::time::Duration;

/// 解码器接收结果
enum Received {
    Frame,
    NeedInput,
    Drained,
}

fn receive(result: std::result::Result<(), ffmpeg::Error>) -> Result<Received> {
    match result {
        Ok(()) => Ok(Received::Frame),
        Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
            Ok(Received::NeedInput)
        }
        Err(ffmpeg::Error::Eof) => Ok(Received::Drained),
        Err(e) => Err(e.into()),
    }
}

/// 视频解码器（软件解码，输出 YUV420P 平面图像）
pub struct FfmpegVideoSource {
    media: MediaStream,
    decoder: codec::decoder::Video,
    working_frame: util::frame::Video,
    converted: util::frame::Video,
    scaler: Option<software::scaling::Context>,
    draining: bool,
}

// SwsContext 本身不是 Send，但我们确保只在单个线程中使用它
// 每个数据源只会被一个解码线程持有
unsafe impl Send for FfmpegVideoSource {}

impl FfmpegVideoSource {
    pub fn open(url: &str) -> Result<Self> {
        let (media, context) = MediaStream::open(url, MediaKind::Video)?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| PlayerError::DecoderOpen(e.to_string()))?;

        info!(
            "视频解码器: {}x{}, 格式: {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );

        Ok(Self {
            media,
            decoder,
            working_frame: util::frame::Video::empty(),
            converted: util::frame::Video::empty(),
            scaler: None,
            draining: false,
        })
    }

    /// 把解码帧复制到目标缓冲，非 YUV420P 的帧先经过 swscale 转换
    fn convert_into(&mut self, target: &mut VideoFrame) -> Result<()> {
        let width = self.working_frame.width();
        let height = self.working_frame.height();

        let frame = if self.working_frame.format() == Pixel::YUV420P {
            &self.working_frame
        } else {
            let rebuild = match &self.scaler {
                Some(scaler) => {
                    let input = scaler.input();
                    input.format != self.working_frame.format()
                        || input.width != width
                        || input.height != height
                }
                None => true,
            };
            if rebuild {
                debug!(
                    "🔧 初始化像素转换: {:?} {}x{} → YUV420P",
                    self.working_frame.format(),
                    width,
                    height
                );
                self.scaler = Some(software::scaling::Context::get(
                    self.working_frame.format(),
                    width,
                    height,
                    Pixel::YUV420P,
                    width,
                    height,
                    software::scaling::Flags::BILINEAR,
                )?);
            }
            if let Some(scaler) = self.scaler.as_mut() {
                scaler.run(&self.working_frame, &mut self.converted)?;
            }
            &self.converted
        };

        target.copy_planes(
            width,
            height,
            [frame.data(0), frame.data(1), frame.data(2)],
            [frame.stride(0), frame.stride(1), frame.stride(2)],
        );
        Ok(())
    }

    fn presentation_time(&mut self) -> Duration {
        let pts = self.working_frame.pts().or(self.working_frame.timestamp());
        self.media.note_pts(pts)
    }
}

impl VideoSource for FfmpegVideoSource {
    fn decode_next(&mut self, target: &mut VideoFrame) -> Result<DecodeStep> {
        match receive(self.decoder.receive_frame(&mut self.working_frame))? {
            Received::Frame => {
                self.convert_into(target)?;
                return Ok(DecodeStep::Frame(self.presentation_time()));
            }
            Received::Drained => return Ok(DecodeStep::EndOfStream),
            Received::NeedInput if self.draining => return Ok(DecodeStep::EndOfStream),
            Received::NeedInput => {}
        }

        match self.media.read_packet() {
            PacketRead::Packet(packet) => {
                self.decoder.send_packet(&packet)?;
                Ok(DecodeStep::Pending)
            }
            PacketRead::Skipped => Ok(DecodeStep::Pending),
            PacketRead::EndOfStream => {
                // 送入 EOF，把解码器内部缓存的帧取完
                self.draining = true;
                self.decoder.send_eof()?;
                Ok(DecodeStep::Pending)
            }
        }
    }

    fn seek(&mut self, target: Duration) -> Result<()> {
        self.media.seek(target)?;
        self.decoder.flush();
        self.draining = false;
        Ok(())
    }

    fn size(&self) -> VideoSize {
        let aspect = self.decoder.aspect_ratio();
        VideoSize {
            width: self.decoder.width(),
            height: self.decoder.height(),
            sample_aspect_ratio: (aspect.numerator(), aspect.denominator()),
        }
    }

    fn description(&self) -> String {
        self.media.description()
    }
}

/// 音频格式（重采样器的输入/输出描述）
#[derive(Debug, Clone, Copy, PartialEq)]
struct AudioFormat {
    format: Sample,
    channel_layout: ChannelLayout,
    rate: u32,
}

impl AudioFormat {
    fn output(target: OutputFormat) -> Self {
        Self {
            format: Sample::F32(sample::Type::Packed),
            channel_layout: ChannelLayout::default(target.channels as i32),
            rate: target.sample_rate,
        }
    }
}

/// 重采样器状态：当前源格式 vs 目标格式
///
/// 每解码一帧比较一次，源格式变化或首次需要采样数补偿时重建。
/// 源格式与目标一致且不需要补偿时直接复制，不创建重采样器。
struct ResamplerState {
    source: AudioFormat,
    target: AudioFormat,
    context: Option<software::resampling::Context>,
}

impl ResamplerState {
    fn new(target: AudioFormat) -> Self {
        Self { source: target, target, context: None }
    }

    fn needs_rebuild(&self, frame: &AudioFormat, compensating: bool) -> bool {
        if self.context.is_none() {
            return compensating || *frame != self.target;
        }
        *frame != self.source
    }

    fn prepare(&mut self, frame: AudioFormat, compensating: bool) -> Result<()> {
        if !self.needs_rebuild(&frame, compensating) {
            return Ok(());
        }

        debug!(
            "🔧 初始化音频重采样器: {:?} {}Hz/{}ch → {}Hz/{}ch",
            frame.format,
            frame.rate,
            frame.channel_layout.channels(),
            self.target.rate,
            self.target.channel_layout.channels()
        );

        self.context = None;
        let context = software::resampling::Context::get(
            frame.format,
            frame.channel_layout,
            frame.rate,
            self.target.format,
            self.target.channel_layout,
            self.target.rate,
        )
        .map_err(|e| PlayerError::Resample(format!("无法创建重采样器: {}", e)))?;
        self.context = Some(context);
        self.source = frame;
        Ok(())
    }
}

/// 音频解码器（输出交错 f32，按需重采样与补偿）
pub struct FfmpegAudioSource {
    media: MediaStream,
    decoder: codec::decoder::Audio,
    working_frame: util::frame::Audio,
    resampler: ResamplerState,
    output: OutputFormat,
    draining: bool,
}

// SwrContext 只在音频回调线程中使用
unsafe impl Send for FfmpegAudioSource {}

impl FfmpegAudioSource {
    pub fn open(url: &str) -> Result<Self> {
        let (media, context) = MediaStream::open(url, MediaKind::Audio)?;
        let decoder = context
            .decoder()
            .audio()
            .map_err(|e| PlayerError::DecoderOpen(e.to_string()))?;

        info!(
            "音频解码器: {} Hz, {} 声道, 格式: {:?}",
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );

        let output = OutputFormat {
            sample_rate: decoder.rate(),
            channels: decoder.channels(),
        };

        Ok(Self {
            media,
            decoder,
            working_frame: util::frame::Audio::empty(),
            resampler: ResamplerState::new(AudioFormat::output(output)),
            output,
            draining: false,
        })
    }

    /// 解码器报告的源格式（用于向音频设备请求配置）
    pub fn source_format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.decoder.rate(),
            channels: self.decoder.channels(),
        }
    }

    /// 设置设备实际协商得到的输出格式
    pub fn set_output(&mut self, output: OutputFormat) {
        self.output = output;
        self.resampler = ResamplerState::new(AudioFormat::output(output));
    }

    fn frame_format(&self) -> AudioFormat {
        let channels = self.working_frame.channels() as i32;
        let layout = self.working_frame.channel_layout();
        let channel_layout = if !layout.is_empty() && layout.channels() == channels {
            layout
        } else {
            ChannelLayout::default(channels)
        };
        AudioFormat {
            format: self.working_frame.format(),
            channel_layout,
            rate: self.working_frame.rate(),
        }
    }

    fn resample(&mut self, wanted_nb_samples: usize, out: &mut [u8]) -> Result<usize> {
        let nb_samples = self.working_frame.samples();
        let src_rate = self.working_frame.rate().max(1) as i64;
        let dst_rate = self.output.sample_rate as i64;
        let frame_bytes = self.output.bytes_per_frame();

        let Some(context) = self.resampler.context.as_mut() else {
            return Err(PlayerError::Resample("重采样器不可用".to_string()));
        };

        let wanted = wanted_nb_samples as i64;
        let out_count = (wanted * dst_rate / src_rate + 256).min((out.len() / frame_bytes) as i64);

        if wanted_nb_samples != nb_samples {
            let delta = (wanted - nb_samples as i64) * dst_rate / src_rate;
            let distance = wanted * dst_rate / src_rate;
            let ret = unsafe {
                ffi::swr_set_compensation(context.as_mut_ptr(), delta as i32, distance as i32)
            };
            if ret < 0 {
                return Err(PlayerError::Resample(format!(
                    "设置采样补偿失败: {}",
                    ffmpeg::Error::from(ret)
                )));
            }
        }

        let mut out_ptr = out.as_mut_ptr();
        let len = unsafe {
            ffi::swr_convert(
                context.as_mut_ptr(),
                &mut out_ptr,
                out_count as i32,
                (*self.working_frame.as_ptr()).extended_data as *mut *const u8,
                nb_samples as i32,
            )
        };
        if len < 0 {
            return Err(PlayerError::Resample(format!(
                "重采样失败: {}",
                ffmpeg::Error::from(len)
            )));
        }

        if len as i64 == out_count {
            warn!("音频缓冲区可能过小（输出 {} 采样已占满）", len);
            // 重新初始化以丢弃重采样器内部残留
            if unsafe { ffi::swr_init(context.as_mut_ptr()) } < 0 {
                error!("重采样器重新初始化失败，下一帧重建");
                self.resampler.context = None;
            }
        }

        Ok(len as usize * frame_bytes)
    }
}

impl AudioSource for FfmpegAudioSource {
    fn decode_next(&mut self) -> Result<AudioStep> {
        match receive(self.decoder.receive_frame(&mut self.working_frame))? {
            Received::Frame => {
                let pts = self.working_frame.pts().or(self.working_frame.timestamp());
                return Ok(AudioStep::Frame(DecodedAudio {
                    pts: self.media.note_pts(pts),
                    nb_samples: self.working_frame.samples(),
                    sample_rate: self.working_frame.rate(),
                }));
            }
            Received::Drained => return Ok(AudioStep::EndOfStream),
            Received::NeedInput if self.draining => return Ok(AudioStep::EndOfStream),
            Received::NeedInput => {}
        }

        match self.media.read_packet() {
            PacketRead::Packet(packet) => {
                self.decoder.send_packet(&packet)?;
                Ok(AudioStep::Pending)
            }
            PacketRead::Skipped => Ok(AudioStep::Pending),
            PacketRead::EndOfStream => {
                self.draining = true;
                self.decoder.send_eof()?;
                Ok(AudioStep::Pending)
            }
        }
    }

    fn convert(&mut self, wanted_nb_samples: usize, out: &mut [u8]) -> Result<usize> {
        let nb_samples = self.working_frame.samples();
        let frame_format = self.frame_format();
        self.resampler
            .prepare(frame_format, wanted_nb_samples != nb_samples)?;

        if self.resampler.context.is_some() {
            return self.resample(wanted_nb_samples, out);
        }

        // 源格式与输出一致：直接复制交错数据
        let size = nb_samples * self.output.bytes_per_frame();
        let data = self.working_frame.data(0);
        let size = size.min(data.len()).min(out.len());
        out[..size].copy_from_slice(&data[..size]);
        Ok(size)
    }

    fn seek(&mut self, target: Duration) -> Result<()> {
        self.media.seek(target)?;
        self.decoder.flush();
        self.draining = false;
        Ok(())
    }

    fn description(&self) -> String {
        self.media.description()
    }
}
