use crate::core::{AudioConfig, OutputFormat, PlaybackClock, Result, SyncConfig};
use crate::player::audio_output::AudioOutput;
use crate::player::decoder::FfmpegAudioSource;
use crate::player::source::{AudioSource, AudioStep};
use crate::player::sync::DriftCorrector;
use crossbeam::atomic::AtomicCell;
use log::{debug, error, info, warn};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 一次回调中连续没有产出数据的解码尝试上限，超过后本次回调补静音返回
const MAX_IDLE_DECODES: usize = 256;

/// 控制线程与音频回调之间的共享状态（全部为原子量，回调中不加锁）
#[derive(Default)]
pub struct AudioControl {
    paused: AtomicBool,
    seek_request: AtomicCell<Option<Duration>>,
    ended: AtomicBool,
}

impl AudioControl {
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn request_seek(&self, target: Duration) {
        self.seek_request.store(Some(target));
    }

    pub fn has_ended(&self) -> bool {
        self.ended.load(Ordering::Acquire)
    }
}

enum Decoded {
    Filled,
    Nothing,
    EndOfStream,
}

/// 拉取式音频泵 - 在设备回调线程中按需解码、校正漂移并填充输出
pub struct AudioPump<S: AudioSource> {
    source: S,
    control: Arc<AudioControl>,
    clock: Arc<PlaybackClock>,
    corrector: DriftCorrector,
    buffer: Vec<u8>,
    buffer_len: usize,
    buffer_index: usize,
    /// 设备缓冲大小未知时，用首次回调的请求长度确定校正阈值
    calibration: Option<OutputFormat>,
}

impl<S: AudioSource> AudioPump<S> {
    pub fn new(
        source: S,
        control: Arc<AudioControl>,
        clock: Arc<PlaybackClock>,
        corrector: DriftCorrector,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            source,
            control,
            clock,
            corrector,
            buffer: vec![0u8; buffer_capacity],
            buffer_len: 0,
            buffer_index: 0,
            calibration: None,
        }
    }

    /// 首次 `fill()` 时按回调长度（帧数 / 采样率）设置校正阈值
    pub fn calibrate_on_first_fill(&mut self, format: OutputFormat) {
        self.calibration = Some(format);
    }

    /// 填满 `out`：暂停、播完或暂时无数据时写入静音，从不阻塞等待
    pub fn fill(&mut self, out: &mut [u8]) {
        if let Some(format) = self.calibration.take() {
            let frames = out.len() / format.bytes_per_frame().max(1);
            let threshold = frames as f64 / format.sample_rate.max(1) as f64;
            debug!("{} 设备缓冲 {} 帧，校正阈值 {:.4}s", log_ctx(), frames, threshold);
            self.corrector.set_threshold(threshold);
        }

        let mut written = 0;
        let mut idle = 0;

        while written < out.len() {
            if let Some(target) = self.control.seek_request.take() {
                self.apply_seek(target);
            }

            if self.control.paused.load(Ordering::Acquire)
                || self.control.ended.load(Ordering::Acquire)
                || idle >= MAX_IDLE_DECODES
            {
                out[written..].fill(0);
                return;
            }

            if self.buffer_index >= self.buffer_len {
                match self.decode_frame() {
                    Decoded::Filled => idle = 0,
                    Decoded::Nothing => {
                        idle += 1;
                        continue;
                    }
                    Decoded::EndOfStream => {
                        info!("{} 📄 音频到达流末尾，之后输出静音", log_ctx());
                        self.control.ended.store(true, Ordering::Release);
                        continue;
                    }
                }
            }

            let available = self.buffer_len - self.buffer_index;
            let n = available.min(out.len() - written);
            out[written..written + n]
                .copy_from_slice(&self.buffer[self.buffer_index..self.buffer_index + n]);
            written += n;
            self.buffer_index += n;
        }
    }

    /// 解码一帧，按漂移校正后的采样数转换进内部缓冲
    fn decode_frame(&mut self) -> Decoded {
        self.buffer_index = 0;
        self.buffer_len = 0;

        let frame = match self.source.decode_next() {
            Ok(AudioStep::Frame(frame)) => frame,
            Ok(AudioStep::Pending) => return Decoded::Nothing,
            Ok(AudioStep::EndOfStream) => return Decoded::EndOfStream,
            Err(e) => {
                warn!("{} ⚠️ 音频解码错误，跳过: {}", log_ctx(), e);
                return Decoded::Nothing;
            }
        };

        let diff = frame.pts.as_secs_f64() - self.clock.time().as_secs_f64();
        let wanted = self
            .corrector
            .synchronize(diff, frame.nb_samples, frame.sample_rate);

        match self.source.convert(wanted, &mut self.buffer) {
            Ok(0) => Decoded::Nothing,
            Ok(len) => {
                self.buffer_len = len;
                Decoded::Filled
            }
            Err(e) => {
                error!("{} ❌ 音频转换失败，丢弃本帧: {}", log_ctx(), e);
                Decoded::Nothing
            }
        }
    }

    fn apply_seek(&mut self, target: Duration) {
        info!("{} ⏩ 音频跳转到 {:.3}s", log_ctx(), target.as_secs_f64());
        if let Err(e) = self.source.seek(target) {
            error!("{} ❌ 音频跳转失败: {}", log_ctx(), e);
        }
        self.buffer_len = 0;
        self.buffer_index = 0;
        self.corrector.reset();
        self.control.ended.store(false, Ordering::Release);
    }
}

/// 把音频泵包装成设备回调：泵只在设备线程上使用，直接移入闭包
fn device_callback<S: AudioSource + 'static>(
    mut pump: AudioPump<S>,
) -> impl FnMut(&mut [f32]) + Send + 'static {
    move |data: &mut [f32]| pump.fill(bytemuck::cast_slice_mut(data))
}

/// 音频流 - 没有自己的线程，解码在设备回调中进行
pub struct AudioStream {
    control: Arc<AudioControl>,
    output: Option<AudioOutput>,
    description: String,
}

impl AudioStream {
    /// 打开音频流和输出设备（设备初始为暂停，`start()` 后开始拉取）
    pub fn open(
        url: &str,
        clock: Arc<PlaybackClock>,
        audio: &AudioConfig,
        sync: &SyncConfig,
    ) -> Result<Self> {
        let mut source = FfmpegAudioSource::open(url)?;
        let requested = source.source_format();

        let mut output = AudioOutput::negotiate(requested.sample_rate, requested.channels)?;
        let format = output.format();
        source.set_output(format);
        let granted = output.request_buffer(audio.buffer_frames);

        // 设备硬件缓冲的时长，小于它的偏差听不出来，不做校正
        let threshold =
            granted.unwrap_or(audio.buffer_frames) as f64 / format.sample_rate.max(1) as f64;
        let description = source.description();
        let control = Arc::new(AudioControl::default());

        let mut pump = AudioPump::new(
            source,
            Arc::clone(&control),
            clock,
            DriftCorrector::new(sync, threshold),
            audio.buffer_capacity_bytes,
        );
        if granted.is_none() {
            pump.calibrate_on_first_fill(format);
        }

        output.open(device_callback(pump))?;

        debug!(
            "音频输出格式: {} Hz, {} 声道, 缓冲 {:?} 帧",
            format.sample_rate, format.channels, granted
        );

        let mut stream = Self::detached(control, description);
        stream.output = Some(output);
        Ok(stream)
    }

    /// 不带输出设备的音频流，由调用者自行驱动与 `control` 关联的 `AudioPump`
    pub fn detached(control: Arc<AudioControl>, description: impl Into<String>) -> Self {
        Self { control, output: None, description: description.into() }
    }

    /// 启动输出设备
    pub fn start(&self) -> Result<()> {
        match &self.output {
            Some(output) => output.play(),
            None => Ok(()),
        }
    }

    /// 停止输出设备，解码状态保留
    pub fn stop(&self) -> Result<()> {
        match &self.output {
            Some(output) => output.pause(),
            None => Ok(()),
        }
    }

    pub fn pause(&self) {
        self.control.set_paused(true);
    }

    pub fn unpause(&self) {
        self.control.set_paused(false);
    }

    /// 请求跳转，不阻塞；下一次设备回调时执行
    pub fn seek(&self, target: Duration) {
        self.control.request_seek(target);
    }

    pub fn has_ended(&self) -> bool {
        self.control.has_ended()
    }

    pub fn description(&self) -> &str {
        &self.description
    }
}
