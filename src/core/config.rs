use crate::core::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 配置文件路径环境变量
pub const CONFIG_ENV: &str = "TUBE_PLAYER_CONFIG";

/// 播放器配置（所有字段都有默认值，配置文件可只写需要覆盖的部分）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub sync: SyncConfig,
    pub audio: AudioConfig,
    pub resolver: ResolverConfig,
}

/// 音频漂移校正参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// 超过该差值（秒）视为不连续（如 seek 之后），重置累计器
    pub no_sync_threshold_secs: f64,
    /// 平均窗口（音频帧数）
    pub average_window: u32,
    /// 单帧最大拉伸/压缩比例（百分比）
    pub max_correction_percent: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            no_sync_threshold_secs: 10.0,
            average_window: 20,
            max_correction_percent: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// 向音频设备请求的硬件缓冲（采样帧数），同时决定漂移阈值
    pub buffer_frames: u32,
    /// 内部解码缓冲容量（字节）
    pub buffer_capacity_bytes: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            buffer_frames: 1024,
            buffer_capacity_bytes: 192_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// 解析程序（yt-dlp 或兼容的 youtube-dl）
    pub program: String,
    pub watch_url_prefix: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            watch_url_prefix: "https://www.youtube.com/watch?v=".to_string(),
        }
    }
}

impl PlayerConfig {
    /// 从 JSON 文件读取配置
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// 读取 `TUBE_PLAYER_CONFIG` 指定的配置，未设置时使用默认值
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => {
                info!("读取配置文件: {}", Path::new(&path).display());
                Self::from_file(Path::new(&path))
            }
            None => Ok(Self::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let config: PlayerConfig =
            serde_json::from_str(r#"{ "sync": { "average_window": 32 } }"#).unwrap();
        assert_eq!(config.sync.average_window, 32);
        assert_eq!(config.sync.max_correction_percent, 10);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.resolver.program, "yt-dlp");
    }

    #[test]
    fn test_empty_config() {
        let config: PlayerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, PlayerConfig::default());
    }
}
