use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// 时钟的可变部分，整体读写
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ClockState {
    /// 累计的时间修正量（纳秒），暂停时长与跳转偏移都折算进来
    time_adjustment: i64,
    /// 最近一次暂停的时刻（相对 start 的纳秒）
    last_paused: i64,
    paused: bool,
}

/// 播放时钟 - 视频与音频共享的媒体时间线
///
/// 时钟只由编排器（`YouTubeVideo`）在单一控制线程上修改（暂停/恢复/跳转），
/// 解码线程和音频回调线程并发读取。读取与修改都在锁内取当前时刻，
/// 并发的暂停/恢复不会让读到的时间倒退。
pub struct PlaybackClock {
    start: Instant,
    state: Mutex<ClockState>,
}

impl PlaybackClock {
    /// 新建的时钟处于暂停状态，时间为 0
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            state: Mutex::new(ClockState {
                time_adjustment: 0,
                last_paused: 0,
                paused: true,
            }),
        }
    }

    /// 当前媒体时间，暂停期间保持不变
    pub fn time(&self) -> Duration {
        let state = self.state.lock();
        Self::time_at(*state, self.elapsed_nanos())
    }

    fn time_at(state: ClockState, now: i64) -> Duration {
        let reference = if state.paused { state.last_paused } else { now };
        Duration::from_nanos(reference.saturating_sub(state.time_adjustment).max(0) as u64)
    }

    /// 暂停；重复调用不会移动暂停时刻
    pub fn pause(&self) {
        self.update(|state, now| {
            if state.paused {
                return None;
            }
            Some(ClockState { last_paused: now, paused: true, ..state })
        });
    }

    /// 恢复；暂停的时长计入时间修正量
    pub fn unpause(&self) {
        self.update(|state, now| {
            if !state.paused {
                return None;
            }
            Some(ClockState {
                time_adjustment: state.time_adjustment + (now - state.last_paused),
                paused: false,
                ..state
            })
        });
    }

    /// 跳转，调用返回后 `time()` 立即等于 `target`（无论是否暂停）
    pub fn seek(&self, target: Duration) {
        let target = target.as_nanos().min(i64::MAX as u128) as i64;
        self.update(|state, now| {
            let current = Self::time_at(state, now).as_nanos() as i64;
            Some(ClockState {
                time_adjustment: state.time_adjustment - (target - current),
                ..state
            })
        });
    }

    /// 是否暂停
    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn update(&self, f: impl FnOnce(ClockState, i64) -> Option<ClockState>) {
        let mut state = self.state.lock();
        if let Some(next) = f(*state, self.elapsed_nanos()) {
            *state = next;
        }
    }

    fn elapsed_nanos(&self) -> i64 {
        self.start.elapsed().as_nanos().min(i64::MAX as u128) as i64
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}
