use crate::core::{MediaKind, PlayerError, Result};
use ffmpeg_next as ffmpeg;
use ffmpeg_next::{codec, ffi, format, media};
use log::{debug, info, warn};
use std::time::Duration;

/// 读取一个包的结果
pub enum PacketRead {
    /// 属于所选流的包
    Packet(ffmpeg::Packet),
    /// 其他流的包，已丢弃
    Skipped,
    EndOfStream,
}

/// 跳转参数：目标时间折算为流时基刻度，并决定向前还是向后查找关键帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeekPlan {
    pub ticks: i64,
    pub backward: bool,
}

impl SeekPlan {
    /// `last_pts` 为最近解码帧的时间戳（流刻度），目标早于它时向后查找
    pub fn new(target: Duration, time_base: f64, last_pts: Option<i64>) -> Self {
        let ticks = (target.as_secs_f64() / time_base) as i64;
        let backward = last_pts.is_some_and(|pts| ticks < pts);
        Self { ticks, backward }
    }
}

/// 流时间线：时基换算与最近的解码位置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamTimeline {
    time_base: f64,
    last_pts: Option<i64>,
}

impl StreamTimeline {
    pub fn new(time_base: f64) -> Self {
        Self { time_base, last_pts: None }
    }

    /// 记录最近解码帧的时间戳，返回对应的媒体时间
    pub fn note_pts(&mut self, pts: Option<i64>) -> Duration {
        if let Some(pts) = pts {
            self.last_pts = Some(pts);
        }
        self.last_pts.map(|pts| self.pts_to_time(pts)).unwrap_or_default()
    }

    fn pts_to_time(&self, pts: i64) -> Duration {
        Duration::from_secs_f64((pts as f64 * self.time_base).max(0.0))
    }

    /// 规划一次跳转，并把跳转目标作为新的当前位置
    ///
    /// 连续跳转（中间尚未解码出新帧）时，方向相对上一次的目标判断
    pub fn plan_seek(&mut self, target: Duration) -> SeekPlan {
        let plan = SeekPlan::new(target, self.time_base, self.last_pts);
        self.last_pts = Some(plan.ticks);
        plan
    }
}

/// 媒体流 - 打开容器并选出某一类型的最佳流（视频/音频共用的解封装部分）
pub struct MediaStream {
    url: String,
    kind: MediaKind,
    input_ctx: format::context::Input,
    stream_index: usize,
    timeline: StreamTimeline,
}

impl MediaStream {
    /// 打开媒体并准备解码上下文
    ///
    /// 返回的解码上下文还未打开，由视频/音频源各自打开为对应的解码器
    pub fn open(url: &str, kind: MediaKind) -> Result<(Self, codec::context::Context)> {
        info!("正在打开{}流: {}", kind, url);

        let input_ctx = if Self::is_network(url) {
            // 网络流：开启 FFmpeg 内部重连，其余交给解封装器
            let mut options = ffmpeg::Dictionary::new();
            options.set("reconnect", "1");
            options.set("reconnect_streamed", "1");
            options.set("reconnect_delay_max", "4");
            options.set("rw_timeout", "8000000");
            format::input_with_dictionary(&url, options)
                .map_err(|e| PlayerError::OpenFailed(format!("{}: {}", url, e)))?
        } else {
            format::input(&url).map_err(|e| PlayerError::OpenFailed(format!("{}: {}", url, e)))?
        };

        let media_type = match kind {
            MediaKind::Video => media::Type::Video,
            MediaKind::Audio => media::Type::Audio,
        };

        let (stream_index, time_base, parameters) = {
            let stream = input_ctx
                .streams()
                .best(media_type)
                .ok_or(PlayerError::NoSuchStream(kind))?;
            let tb = stream.time_base();
            let time_base = tb.numerator() as f64 / tb.denominator() as f64;
            (stream.index(), time_base, stream.parameters())
        };

        let codec_id = parameters.id();
        if codec::decoder::find(codec_id).is_none() {
            return Err(PlayerError::UnsupportedCodec(codec_id.name().to_string()));
        }
        let context = codec::context::Context::from_parameters(parameters)?;

        debug!(
            "{}流索引: {}, 编解码器: {}, 时基: {}",
            kind,
            stream_index,
            codec_id.name(),
            time_base
        );

        Ok((
            Self {
                url: url.to_string(),
                kind,
                input_ctx,
                stream_index,
                timeline: StreamTimeline::new(time_base),
            },
            context,
        ))
    }

    fn is_network(url: &str) -> bool {
        url.starts_with("http://")
            || url.starts_with("https://")
            || url.starts_with("rtsp://")
            || url.starts_with("rtmp://")
    }

    /// 读取下一个数据包
    pub fn read_packet(&mut self) -> PacketRead {
        let mut packet = ffmpeg::Packet::empty();
        match packet.read(&mut self.input_ctx) {
            Ok(()) => {
                if packet.stream() == self.stream_index {
                    PacketRead::Packet(packet)
                } else {
                    PacketRead::Skipped
                }
            }
            Err(ffmpeg::Error::Eof) => PacketRead::EndOfStream,
            Err(ffmpeg::Error::Other { errno }) if errno == ffmpeg::util::error::EAGAIN => {
                PacketRead::Skipped
            }
            Err(e) => {
                warn!("读取{}包失败，按流结束处理: {}", self.kind, e);
                PacketRead::EndOfStream
            }
        }
    }

    /// 记录最近解码帧的时间戳，返回对应的媒体时间
    pub fn note_pts(&mut self, pts: Option<i64>) -> Duration {
        self.timeline.note_pts(pts)
    }

    /// 在容器层执行跳转；调用者随后必须刷新自己的解码器
    pub fn seek(&mut self, target: Duration) -> Result<SeekPlan> {
        let plan = self.timeline.plan_seek(target);
        let flags = if plan.backward { ffi::AVSEEK_FLAG_BACKWARD as i32 } else { 0 };

        let ret = unsafe {
            ffi::avformat_seek_file(
                self.input_ctx.as_mut_ptr(),
                self.stream_index as i32,
                i64::MIN,
                plan.ticks,
                i64::MAX,
                flags,
            )
        };
        if ret < 0 {
            return Err(ffmpeg::Error::from(ret).into());
        }

        debug!(
            "{}流跳转: {:.3}s → {} 刻度（{}）",
            self.kind,
            target.as_secs_f64(),
            plan.ticks,
            if plan.backward { "向后" } else { "向前" }
        );
        Ok(plan)
    }

    /// 获取描述信息
    pub fn description(&self) -> String {
        format!("FFmpeg {}流 #{}: {}", self.kind, self.stream_index, self.url)
    }
}
