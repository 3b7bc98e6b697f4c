use crate::core::{Result, VideoFrame, VideoSize};
use std::time::Duration;

/// 一次视频解码尝试的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    /// 完成一帧，已写入目标缓冲，附带显示时间
    Frame(Duration),
    /// 本次没有产出（其他流的包、解码器需要更多数据等）
    Pending,
    /// 到达流末尾（或读取失败，无法继续）
    EndOfStream,
}

/// 已解码、尚未转换的一帧音频
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedAudio {
    pub pts: Duration,
    pub nb_samples: usize,
    pub sample_rate: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStep {
    Frame(DecodedAudio),
    Pending,
    EndOfStream,
}

/// 视频数据源抽象接口
///
/// 解码线程只依赖这个接口：FFmpeg 实现负责解封装/解码/像素格式转换，
/// 节奏控制、暂停、跳转和前后缓冲交换都在 `VideoStream` 中完成。
pub trait VideoSource: Send {
    /// 读取并解码，完成一帧时把图像写入 `target`
    ///
    /// 单个包的解码错误以 `Err` 返回，调用者记录后跳过即可
    fn decode_next(&mut self, target: &mut VideoFrame) -> Result<DecodeStep>;

    /// 跳转到媒体时间 `target`，并清空解码器内部缓冲
    fn seek(&mut self, target: Duration) -> Result<()>;

    fn size(&self) -> VideoSize;

    /// 获取描述信息（用于调试）
    fn description(&self) -> String;
}

/// 音频数据源抽象接口
///
/// 解码与格式转换分为两步：`AudioStream` 拿到帧信息后先做漂移校正，
/// 再用校正后的采样数调用 `convert`。
pub trait AudioSource: Send {
    fn decode_next(&mut self) -> Result<AudioStep>;

    /// 把最近解码的一帧转换为输出格式（交错 f32）写入 `out`，返回写入的字节数
    ///
    /// `wanted_nb_samples` 与帧采样数不同时，由重采样器做补偿
    fn convert(&mut self, wanted_nb_samples: usize, out: &mut [u8]) -> Result<usize>;

    fn seek(&mut self, target: Duration) -> Result<()>;

    fn description(&self) -> String;
}

#[cfg(test)]
pub(crate) mod synthetic {
    //! 测试用的合成数据源：时间戳可控，图像/采样内容可校验

    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    pub const WIDTH: u32 = 8;
    pub const HEIGHT: u32 = 4;

    /// 按固定间隔产出帧，每帧所有字节都等于帧序号
    pub struct SyntheticVideo {
        pub next_pts: Duration,
        pub interval: Duration,
        pub remaining: usize,
        pub counter: u8,
        pub seeks: Arc<Mutex<Vec<Duration>>>,
    }

    impl SyntheticVideo {
        pub fn new(first_pts: Duration, interval: Duration, frames: usize) -> Self {
            Self {
                next_pts: first_pts,
                interval,
                remaining: frames,
                counter: 0,
                seeks: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl VideoSource for SyntheticVideo {
        fn decode_next(&mut self, target: &mut VideoFrame) -> Result<DecodeStep> {
            if self.remaining == 0 {
                return Ok(DecodeStep::EndOfStream);
            }
            self.remaining -= 1;
            self.counter = self.counter.wrapping_add(1);

            let luma = vec![self.counter; (WIDTH * HEIGHT) as usize];
            let chroma = vec![self.counter; (WIDTH * HEIGHT / 4) as usize];
            target.copy_planes(
                WIDTH,
                HEIGHT,
                [&luma, &chroma, &chroma],
                [WIDTH as usize, WIDTH as usize / 2, WIDTH as usize / 2],
            );

            let pts = self.next_pts;
            self.next_pts += self.interval;
            Ok(DecodeStep::Frame(pts))
        }

        fn seek(&mut self, target: Duration) -> Result<()> {
            self.seeks.lock().push(target);
            self.next_pts = target;
            Ok(())
        }

        fn size(&self) -> VideoSize {
            VideoSize { width: WIDTH, height: HEIGHT, sample_aspect_ratio: (1, 1) }
        }

        fn description(&self) -> String {
            "synthetic video".to_string()
        }
    }

    /// 交错 f32 双声道，每帧采样值等于帧序号
    pub struct SyntheticAudio {
        pub next_pts: Duration,
        pub nb_samples: usize,
        pub sample_rate: u32,
        pub channels: usize,
        pub remaining: usize,
        pub frame_value: f32,
        pub wanted: Arc<Mutex<Vec<usize>>>,
        pub seeks: Arc<Mutex<Vec<Duration>>>,
    }

    impl SyntheticAudio {
        pub fn new(nb_samples: usize, frames: usize) -> Self {
            Self {
                next_pts: Duration::ZERO,
                nb_samples,
                sample_rate: 48_000,
                channels: 2,
                remaining: frames,
                frame_value: 0.0,
                wanted: Arc::new(Mutex::new(Vec::new())),
                seeks: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn frame_bytes(&self) -> usize {
            self.nb_samples * self.channels * 4
        }
    }

    impl AudioSource for SyntheticAudio {
        fn decode_next(&mut self) -> Result<AudioStep> {
            if self.remaining == 0 {
                return Ok(AudioStep::EndOfStream);
            }
            self.remaining -= 1;
            self.frame_value += 1.0;
            let frame = DecodedAudio {
                pts: self.next_pts,
                nb_samples: self.nb_samples,
                sample_rate: self.sample_rate,
            };
            self.next_pts += Duration::from_secs_f64(self.nb_samples as f64 / self.sample_rate as f64);
            Ok(AudioStep::Frame(frame))
        }

        fn convert(&mut self, wanted_nb_samples: usize, out: &mut [u8]) -> Result<usize> {
            self.wanted.lock().push(wanted_nb_samples);
            let samples = (wanted_nb_samples * self.channels).min(out.len() / 4);
            let value = self.frame_value.to_ne_bytes();
            for sample in out[..samples * 4].chunks_exact_mut(4) {
                sample.copy_from_slice(&value);
            }
            Ok(samples * 4)
        }

        fn seek(&mut self, target: Duration) -> Result<()> {
            self.seeks.lock().push(target);
            self.next_pts = target;
            Ok(())
        }

        fn description(&self) -> String {
            "synthetic audio".to_string()
        }
    }
}
