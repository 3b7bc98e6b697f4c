use crate::core::{PlaybackClock, PlayerError, Result, StreamState, VideoFrame, VideoSize};
use crate::player::decoder::FfmpegVideoSource;
use crate::player::source::{DecodeStep, VideoSource};
use crossbeam::atomic::AtomicCell;
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

fn log_ctx() -> String {
    format!("[pid:{} tid:{:?}]", process::id(), thread::current().id())
}

/// 单次节奏等待的上限，时钟被外部跳转时最多延迟这么久才重新计算
const MAX_PACING_WAIT: Duration = Duration::from_millis(50);

/// 解码线程与控制线程共享的状态
struct Shared {
    state: Mutex<StreamState>,
    wake: Condvar,
    /// 单槽跳转请求，新请求覆盖未处理的旧请求
    seek_request: AtomicCell<Option<Duration>>,
    /// 前缓冲（当前显示帧），与后缓冲交换时持锁
    current: Mutex<VideoFrame>,
    ended: AtomicBool,
}

impl Shared {
    fn seek_pending(&self) -> bool {
        self.seek_request.load().is_some()
    }

    /// 修改状态并唤醒解码线程（持锁通知，避免丢失唤醒）
    fn transition(&self, from: &[StreamState], to: StreamState) -> bool {
        let mut state = self.state.lock();
        if !from.contains(&state) {
            return false;
        }
        *state = to;
        self.wake.notify_all();
        true
    }
}

/// 节奏等待的结果
enum Pacing {
    Present,
    Stop,
}

/// 视频流 - 独立解码线程 + 双缓冲当前帧
///
/// 解码线程把帧解码进后缓冲，按时钟等待到显示时间后与前缓冲交换；
/// 渲染线程通过 `get_frame()` 持锁读取前缓冲，不会看到写了一半的帧。
pub struct VideoStream {
    shared: Arc<Shared>,
    clock: Arc<PlaybackClock>,
    size: VideoSize,
    description: String,
    /// 线程未运行时由这里持有，运行时移入线程，`stop()` 时归还
    source: Mutex<Option<Box<dyn VideoSource>>>,
    handle: Mutex<Option<JoinHandle<Box<dyn VideoSource>>>>,
}

impl VideoStream {
    /// 用 FFmpeg 打开视频流
    pub fn open(url: &str, clock: Arc<PlaybackClock>) -> Result<Self> {
        let source = FfmpegVideoSource::open(url)?;
        Ok(Self::new(Box::new(source), clock))
    }

    pub fn new(source: Box<dyn VideoSource>, clock: Arc<PlaybackClock>) -> Self {
        let size = source.size();
        let description = source.description();
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(StreamState::Stopping),
                wake: Condvar::new(),
                seek_request: AtomicCell::new(None),
                current: Mutex::new(VideoFrame::blank(size.width, size.height)),
                ended: AtomicBool::new(false),
            }),
            clock,
            size,
            description,
            source: Mutex::new(Some(source)),
            handle: Mutex::new(None),
        }
    }

    /// 启动解码线程（已在运行时不做任何事）
    pub fn start(&self) -> Result<()> {
        self.shared.transition(&[StreamState::Stopping], StreamState::Running);
        self.spawn()
    }

    fn spawn(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }

        let Some(mut source) = self.source.lock().take() else {
            return Err(PlayerError::DecoderOpen(format!(
                "视频源已丢失，无法重新启动: {}",
                self.description
            )));
        };

        let shared = Arc::clone(&self.shared);
        let clock = Arc::clone(&self.clock);
        let spawned = thread::Builder::new()
            .name("video-decode".to_string())
            .spawn(move || {
                Self::decode_loop(&shared, &clock, source.as_mut());
                source
            });

        match spawned {
            Ok(join) => {
                *handle = Some(join);
                info!("{} ▶️ 视频解码线程已启动: {}", log_ctx(), self.description);
                Ok(())
            }
            Err(e) => {
                *self.shared.state.lock() = StreamState::Stopping;
                Err(e.into())
            }
        }
    }

    /// 解码线程在流末尾退出后，回收数据源并重新启动（用于播完后的跳转）
    fn revive(&self) {
        let Some(join) = self.handle.lock().take() else {
            return;
        };
        match join.join() {
            Ok(source) => *self.source.lock() = Some(source),
            Err(_) => {
                error!("{} ❌ 视频解码线程异常退出", log_ctx());
                return;
            }
        }

        self.shared.ended.store(false, Ordering::Release);
        if *self.shared.state.lock() == StreamState::Stopping {
            return;
        }
        if let Err(e) = self.spawn() {
            error!("{} ❌ 重新启动视频解码线程失败: {}", log_ctx(), e);
        }
    }

    /// 停止并等待解码线程退出；解码状态保留，可再次 `start()`
    pub fn stop(&self) {
        let Some(join) = self.handle.lock().take() else {
            return;
        };

        self.shared.transition(
            &[StreamState::Running, StreamState::Paused],
            StreamState::Stopping,
        );

        match join.join() {
            Ok(source) => {
                *self.source.lock() = Some(source);
                info!("{} ⏹ 视频解码线程已停止", log_ctx());
            }
            Err(_) => error!("{} ❌ 视频解码线程异常退出", log_ctx()),
        }
    }

    pub fn pause(&self) {
        if self.shared.transition(&[StreamState::Running], StreamState::Paused) {
            debug!("{} ⏸ 视频暂停", log_ctx());
        }
    }

    pub fn unpause(&self) {
        if self.shared.transition(&[StreamState::Paused], StreamState::Running) {
            debug!("{} ▶️ 视频恢复", log_ctx());
        }
    }

    /// 请求跳转，不阻塞；由解码线程在下一轮循环中执行
    pub fn seek(&self, target: Duration) {
        self.shared.seek_request.store(Some(target));
        let ended = {
            // 持锁通知，保证正在等待的解码线程能看到请求
            let _state = self.shared.state.lock();
            self.shared.wake.notify_all();
            self.shared.ended.load(Ordering::Acquire)
        };
        // 线程已在流末尾退出，请求不会再被处理
        if ended {
            self.revive();
        }
    }

    /// 当前帧，持有返回的锁期间解码线程无法交换缓冲，调用者应尽快释放
    pub fn get_frame(&self) -> MutexGuard<'_, VideoFrame> {
        self.shared.current.lock()
    }

    pub fn size(&self) -> VideoSize {
        self.size
    }

    /// 是否已播放到流末尾（跳转后重置）
    pub fn has_ended(&self) -> bool {
        self.shared.ended.load(Ordering::Acquire)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    fn decode_loop(shared: &Shared, clock: &PlaybackClock, source: &mut dyn VideoSource) {
        info!("{} 🎬 视频解码循环开始: {}", log_ctx(), source.description());
        let mut back = VideoFrame::default();
        let mut frames: u64 = 0;

        loop {
            if let Some(target) = shared.seek_request.take() {
                info!("{} ⏩ 视频跳转到 {:.3}s", log_ctx(), target.as_secs_f64());
                match source.seek(target) {
                    Ok(()) => shared.ended.store(false, Ordering::Release),
                    Err(e) => error!("{} ❌ 视频跳转失败: {}", log_ctx(), e),
                }
                continue;
            }

            {
                let mut state = shared.state.lock();
                match *state {
                    StreamState::Stopping => break,
                    StreamState::Paused => {
                        if !shared.seek_pending() {
                            shared.wake.wait(&mut state);
                        }
                        continue;
                    }
                    StreamState::Running => {}
                }
            }

            match source.decode_next(&mut back) {
                Ok(DecodeStep::Frame(pts)) => {
                    back.pts = pts;
                    if let Pacing::Stop = Self::pace(shared, clock, pts) {
                        break;
                    }
                    std::mem::swap(&mut *shared.current.lock(), &mut back);
                    frames += 1;
                }
                Ok(DecodeStep::Pending) => {}
                Ok(DecodeStep::EndOfStream) => {
                    // 与 seek() 在同一把锁下判断，退出前到达的跳转请求不会丢失
                    let _state = shared.state.lock();
                    if shared.seek_pending() {
                        continue;
                    }
                    info!("{} 📄 视频到达流末尾，共显示 {} 帧", log_ctx(), frames);
                    shared.ended.store(true, Ordering::Release);
                    break;
                }
                Err(e) => warn!("{} ⚠️ 视频解码错误，跳过: {}", log_ctx(), e),
            }
        }

        info!("{} 🛑 视频解码循环退出", log_ctx());
    }

    /// 等到 `pts` 的显示时间；有跳转请求时立即交换，不再等待旧时间戳
    fn pace(shared: &Shared, clock: &PlaybackClock, pts: Duration) -> Pacing {
        let mut state = shared.state.lock();
        loop {
            if shared.seek_pending() {
                return Pacing::Present;
            }
            match *state {
                StreamState::Stopping => return Pacing::Stop,
                StreamState::Paused => {
                    shared.wake.wait(&mut state);
                }
                StreamState::Running => {
                    let now = clock.time();
                    if pts <= now {
                        return Pacing::Present;
                    }
                    shared.wake.wait_for(&mut state, (pts - now).min(MAX_PACING_WAIT));
                }
            }
        }
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::source::synthetic::{SyntheticVideo, HEIGHT, WIDTH};
    use std::time::Instant;

    fn running_clock() -> Arc<PlaybackClock> {
        let clock = Arc::new(PlaybackClock::new());
        clock.unpause();
        clock
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn test_initial_frame_is_blank() {
        let stream = VideoStream::new(
            Box::new(SyntheticVideo::new(Duration::ZERO, Duration::ZERO, 1)),
            running_clock(),
        );
        let frame = stream.get_frame();
        assert_eq!((frame.width, frame.height), (WIDTH, HEIGHT));
        assert!(frame.planes[0].iter().all(|&b| b == 0));
        assert_eq!(stream.size().sample_aspect_ratio, (1, 1));
    }

    #[test]
    fn test_readers_never_see_torn_frames() {
        let stream = VideoStream::new(
            Box::new(SyntheticVideo::new(Duration::ZERO, Duration::ZERO, 5000)),
            running_clock(),
        );
        stream.start().unwrap();

        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    let mut reads = 0;
                    while !stream.has_ended() || reads < 100 {
                        let frame = stream.get_frame();
                        let (y, u) = (frame.planes[0][0], frame.planes[1][0]);
                        for plane in &frame.planes {
                            let first = plane[0];
                            assert!(plane.iter().all(|&b| b == first), "读到撕裂的帧");
                        }
                        assert_eq!(frame.planes[2][0], u);
                        // 初始黑帧之外，所有平面都来自同一帧
                        assert!(y == u || (y, u) == (0, 128), "平面来自不同的帧");
                        reads += 1;
                    }
                });
            }
        });

        assert!(wait_until(Duration::from_secs(2), || stream.has_ended()));
        // 5000 % 256 = 136
        assert_eq!(stream.get_frame().planes[0][0], 136);
        stream.stop();
    }

    #[test]
    fn test_frames_are_not_shown_before_their_time() {
        let clock = running_clock();
        let stream = VideoStream::new(
            Box::new(SyntheticVideo::new(Duration::ZERO, Duration::from_millis(100), 4)),
            Arc::clone(&clock),
        );
        let started = Instant::now();
        stream.start().unwrap();

        let slack = Duration::from_millis(5);
        while !stream.has_ended() {
            let pts = stream.get_frame().pts;
            assert!(pts <= clock.time() + slack, "帧 {:?} 提前显示", pts);
            thread::sleep(Duration::from_millis(1));
            assert!(started.elapsed() < Duration::from_secs(3));
        }

        assert_eq!(stream.get_frame().pts, Duration::from_millis(300));
        assert!(started.elapsed() >= Duration::from_millis(290));
    }

    #[test]
    fn test_seek_uses_new_baseline() {
        let clock = running_clock();
        let source = SyntheticVideo::new(Duration::from_secs(5), Duration::from_millis(40), 1000);
        let seeks = Arc::clone(&source.seeks);
        let stream = VideoStream::new(Box::new(source), Arc::clone(&clock));
        stream.start().unwrap();
        thread::sleep(Duration::from_millis(30));

        // 解码线程正在等 5s 的帧，跳转后不应继续按旧时间戳等待
        let target = Duration::from_secs(10);
        stream.seek(target);
        clock.seek(target);

        assert!(wait_until(Duration::from_millis(500), || stream.get_frame().pts >= target));
        assert_eq!(*seeks.lock(), vec![target]);
    }

    #[test]
    fn test_pause_stops_advancing() {
        let stream = VideoStream::new(
            Box::new(SyntheticVideo::new(Duration::ZERO, Duration::from_millis(10), 1000)),
            running_clock(),
        );
        stream.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        stream.pause();
        thread::sleep(Duration::from_millis(30));
        let paused_at = stream.get_frame().pts;
        thread::sleep(Duration::from_millis(100));
        assert_eq!(stream.get_frame().pts, paused_at);

        stream.unpause();
        assert!(wait_until(Duration::from_millis(500), || stream.get_frame().pts > paused_at));
    }

    #[test]
    fn test_stop_is_prompt_while_paused_or_waiting() {
        let paused = VideoStream::new(
            Box::new(SyntheticVideo::new(Duration::ZERO, Duration::from_millis(10), 1000)),
            running_clock(),
        );
        paused.start().unwrap();
        paused.pause();
        thread::sleep(Duration::from_millis(30));
        let t = Instant::now();
        paused.stop();
        assert!(t.elapsed() < Duration::from_millis(500));

        // 第一帧在 60s 之后
        let waiting = VideoStream::new(
            Box::new(SyntheticVideo::new(Duration::from_secs(60), Duration::ZERO, 10)),
            running_clock(),
        );
        waiting.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        let t = Instant::now();
        waiting.stop();
        assert!(t.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_seek_after_end_restarts_decoding() {
        let source = SyntheticVideo::new(Duration::ZERO, Duration::ZERO, 3);
        let seeks = Arc::clone(&source.seeks);
        let stream = VideoStream::new(Box::new(source), running_clock());
        stream.start().unwrap();
        assert!(wait_until(Duration::from_millis(500), || stream.has_ended()));

        stream.seek(Duration::from_secs(1));
        assert!(wait_until(Duration::from_millis(500), || !seeks.lock().is_empty()));
        assert_eq!(*seeks.lock(), vec![Duration::from_secs(1)]);
        stream.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let stream = VideoStream::new(
            Box::new(SyntheticVideo::new(Duration::ZERO, Duration::ZERO, 3)),
            running_clock(),
        );
        stream.start().unwrap();
        stream.start().unwrap();
        assert!(wait_until(Duration::from_millis(500), || stream.has_ended()));
        stream.stop();
        stream.stop();
        stream.start().unwrap();
        assert_eq!(stream.get_frame().planes[0][0], 3);
    }
}
