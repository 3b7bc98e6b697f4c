use crate::core::SyncConfig;
use log::debug;

/// 音频漂移校正器
///
/// 用指数加权累计 `帧时间戳 - 时钟时间` 的差值，窗口填满后，
/// 若平均差值超过阈值，就按差值微调本帧的目标采样数，
/// 交给重采样器做补偿（拉伸/压缩），避免出现可听见的跳变。
#[derive(Debug, Clone)]
pub struct DriftCorrector {
    cumulative_difference: f64,
    average_coef: f64,
    average_count: u32,
    average_window: u32,
    /// 平均差值超过该值（秒）才开始校正，由设备硬件缓冲时长决定
    difference_threshold: f64,
    no_sync_threshold: f64,
    max_correction_percent: u32,
}

impl DriftCorrector {
    pub fn new(config: &SyncConfig, difference_threshold: f64) -> Self {
        let window = config.average_window.max(1);
        Self {
            cumulative_difference: 0.0,
            average_coef: (0.01f64.ln() / window as f64).exp(),
            average_count: 0,
            average_window: window,
            difference_threshold,
            no_sync_threshold: config.no_sync_threshold_secs,
            max_correction_percent: config.max_correction_percent,
        }
    }

    /// 根据 `diff`（秒，帧时间戳减时钟时间）计算本帧期望输出的采样数
    pub fn synchronize(&mut self, diff: f64, nb_samples: usize, sample_rate: u32) -> usize {
        if !(diff.abs() < self.no_sync_threshold) {
            // 差值过大（通常是 seek 之后），重新开始统计
            self.reset();
            return nb_samples;
        }

        self.cumulative_difference = diff + self.average_coef * self.cumulative_difference;
        if self.average_count < self.average_window {
            self.average_count += 1;
            return nb_samples;
        }

        let avg_diff = self.cumulative_difference * (1.0 - self.average_coef);
        if avg_diff.abs() < self.difference_threshold {
            return nb_samples;
        }

        let wanted = nb_samples as f64 + diff * sample_rate as f64;
        let (min, max) = self.sample_bounds(nb_samples);
        let wanted = (wanted as i64).clamp(min as i64, max as i64) as usize;

        debug!(
            "音频漂移校正: diff={:.4}s avg={:.4}s {} → {} 采样",
            diff, avg_diff, nb_samples, wanted
        );
        wanted
    }

    /// 平均差值超过该值（秒）才开始校正
    pub fn threshold(&self) -> f64 {
        self.difference_threshold
    }

    /// 按设备实际的硬件缓冲时长更新校正阈值
    pub fn set_threshold(&mut self, difference_threshold: f64) {
        self.difference_threshold = difference_threshold;
    }

    /// 清空累计状态
    pub fn reset(&mut self) {
        self.cumulative_difference = 0.0;
        self.average_count = 0;
    }

    fn sample_bounds(&self, nb_samples: usize) -> (usize, usize) {
        // 下界向上取整、上界向下取整，保证偏移不超过比例
        let percent = self.max_correction_percent.min(100) as usize;
        let min = (nb_samples * (100 - percent)).div_ceil(100);
        let max = nb_samples * (100 + percent) / 100;
        (min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 48_000;
    // 1024 帧设备缓冲 @ 48kHz
    const THRESHOLD: f64 = 1024.0 / 48_000.0;

    fn corrector() -> DriftCorrector {
        DriftCorrector::new(&SyncConfig::default(), THRESHOLD)
    }

    #[test]
    fn test_no_correction_before_window_fills() {
        let mut sync = corrector();
        for _ in 0..SyncConfig::default().average_window {
            assert_eq!(sync.synchronize(0.5, 1024, RATE), 1024);
        }
        // 窗口已满，0.5s 的持续偏差开始校正
        assert_ne!(sync.synchronize(0.5, 1024, RATE), 1024);
    }

    #[test]
    fn test_correction_is_clamped_to_ten_percent() {
        let mut sync = corrector();
        let diffs = [9.9, -9.9, 0.03, -0.03, 2.0, -4.0, 0.0001, 5.0];
        for round in 0..200 {
            let diff = diffs[round % diffs.len()];
            for nb in [1, 23, 441, 1024, 1152, 4096] {
                let wanted = sync.synchronize(diff, nb, RATE);
                let delta = (wanted as f64 - nb as f64).abs();
                assert!(delta <= nb as f64 * 0.1, "nb={} wanted={}", nb, wanted);
            }
        }
    }

    #[test]
    fn test_stretch_direction_follows_diff() {
        let mut ahead = corrector();
        let mut behind = corrector();
        let mut last_ahead = 0;
        let mut last_behind = 0;
        for _ in 0..=SyncConfig::default().average_window {
            last_ahead = ahead.synchronize(0.2, 1000, RATE);
            last_behind = behind.synchronize(-0.2, 1000, RATE);
        }
        // 音频超前时钟 → 多输出采样（放慢）；落后 → 少输出
        assert_eq!(last_ahead, 1100);
        assert_eq!(last_behind, 900);
    }

    #[test]
    fn test_small_drift_below_threshold_is_ignored() {
        let mut sync = corrector();
        for _ in 0..100 {
            assert_eq!(sync.synchronize(0.005, 1024, RATE), 1024);
        }
    }

    #[test]
    fn test_discontinuity_resets_window() {
        let mut sync = corrector();
        for _ in 0..=SyncConfig::default().average_window {
            sync.synchronize(0.3, 1024, RATE);
        }
        assert_ne!(sync.synchronize(0.3, 1024, RATE), 1024);

        // seek 造成的大跳变：直接返回原值并重新开始统计
        assert_eq!(sync.synchronize(25.0, 1024, RATE), 1024);
        assert_eq!(sync.synchronize(0.3, 1024, RATE), 1024);
    }

    #[test]
    fn test_nan_diff_is_treated_as_discontinuity() {
        let mut sync = corrector();
        assert_eq!(sync.synchronize(f64::NAN, 512, RATE), 512);
        assert_eq!(sync.average_count, 0);
    }
}
