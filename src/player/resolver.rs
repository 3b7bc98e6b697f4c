use crate::core::{PlayerError, ResolverConfig, Result};
use log::{debug, info};
use serde::Deserialize;
use std::process::Command;

/// 解析得到的一路可播放格式
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFormat {
    pub url: String,
    pub has_video: bool,
    pub has_audio: bool,
}

/// 视频/音频各自使用的地址（同一地址可同时提供两者）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedStreams {
    pub video_url: Option<String>,
    pub audio_url: Option<String>,
}

impl ResolvedStreams {
    /// 各取第一个带有对应轨道的格式
    pub fn from_formats(formats: &[StreamFormat]) -> Self {
        Self {
            video_url: formats.iter().find(|f| f.has_video).map(|f| f.url.clone()),
            audio_url: formats.iter().find(|f| f.has_audio).map(|f| f.url.clone()),
        }
    }

    /// 直接地址：视频和音频都从同一个容器读取
    pub fn direct(url: &str) -> Self {
        Self {
            video_url: Some(url.to_string()),
            audio_url: Some(url.to_string()),
        }
    }
}

/// 把视频 ID 解析为可播放地址的外部协作者
pub trait MediaResolver {
    fn resolve(&self, id: &str) -> Result<Vec<StreamFormat>>;
}

#[derive(Debug, Deserialize)]
struct YtDlpFormat {
    url: Option<String>,
    vcodec: Option<String>,
    acodec: Option<String>,
}

impl YtDlpFormat {
    fn into_stream_format(self) -> Option<StreamFormat> {
        let url = self.url?;
        Some(StreamFormat {
            url,
            has_video: codec_present(self.vcodec.as_deref()),
            has_audio: codec_present(self.acodec.as_deref()),
        })
    }
}

#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    #[serde(default)]
    requested_formats: Vec<YtDlpFormat>,
    #[serde(flatten)]
    single: YtDlpFormat,
}

/// yt-dlp 用 "none" 表示没有该轨道；字段缺失时按存在处理
fn codec_present(codec: Option<&str>) -> bool {
    codec != Some("none")
}

/// 解析 `yt-dlp -J` 输出的 JSON
///
/// 分离的音视频格式在 `requested_formats` 中；单一格式（音视频合一）时
/// 地址直接位于顶层。
pub fn parse_formats(json: &str) -> Result<Vec<StreamFormat>> {
    let info: YtDlpInfo = serde_json::from_str(json)
        .map_err(|e| PlayerError::Resolve(format!("无法解析输出: {}", e)))?;

    let formats: Vec<StreamFormat> = if info.requested_formats.is_empty() {
        info.single.into_stream_format().into_iter().collect()
    } else {
        info.requested_formats
            .into_iter()
            .filter_map(YtDlpFormat::into_stream_format)
            .collect()
    };

    if formats.is_empty() {
        return Err(PlayerError::Resolve("输出中没有可用的格式".to_string()));
    }
    Ok(formats)
}

/// 调用 yt-dlp（或兼容的 youtube-dl）子进程解析视频
pub struct YtDlpResolver {
    config: ResolverConfig,
}

impl YtDlpResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }
}

impl MediaResolver for YtDlpResolver {
    fn resolve(&self, id: &str) -> Result<Vec<StreamFormat>> {
        let url = format!("{}{}", self.config.watch_url_prefix, id);
        info!("🔍 解析视频: {} ({})", url, self.config.program);

        let output = Command::new(&self.config.program)
            .arg("-J")
            .arg("--no-playlist")
            .arg(&url)
            .output()
            .map_err(|e| PlayerError::Resolve(format!("无法运行 {}: {}", self.config.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PlayerError::Resolve(format!(
                "{} 退出码 {:?}: {}",
                self.config.program,
                output.status.code(),
                stderr.trim()
            )));
        }

        let formats = parse_formats(&String::from_utf8_lossy(&output.stdout))?;
        debug!("解析到 {} 个格式", formats.len());
        Ok(formats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_formats_split_tracks() {
        let json = r#"{
            "id": "abc",
            "url": null,
            "requested_formats": [
                {"format_id": "137", "url": "https://v.example/video", "vcodec": "avc1.640028", "acodec": "none"},
                {"format_id": "140", "url": "https://v.example/audio", "vcodec": "none", "acodec": "mp4a.40.2"}
            ]
        }"#;

        let formats = parse_formats(json).unwrap();
        assert_eq!(formats.len(), 2);
        assert!(formats[0].has_video && !formats[0].has_audio);

        let streams = ResolvedStreams::from_formats(&formats);
        assert_eq!(streams.video_url.as_deref(), Some("https://v.example/video"));
        assert_eq!(streams.audio_url.as_deref(), Some("https://v.example/audio"));
    }

    #[test]
    fn test_single_muxed_format() {
        let json = r#"{"id": "abc", "url": "https://v.example/muxed", "vcodec": "vp9", "acodec": "opus"}"#;
        let streams = ResolvedStreams::from_formats(&parse_formats(json).unwrap());
        assert_eq!(streams, ResolvedStreams::direct("https://v.example/muxed"));
    }

    #[test]
    fn test_audio_only_format() {
        let json = r#"{"url": "https://v.example/a", "vcodec": "none", "acodec": "opus"}"#;
        let streams = ResolvedStreams::from_formats(&parse_formats(json).unwrap());
        assert_eq!(streams.video_url, None);
        assert_eq!(streams.audio_url.as_deref(), Some("https://v.example/a"));
    }

    #[test]
    fn test_invalid_output_is_resolve_error() {
        assert!(matches!(parse_formats("ERROR: video unavailable"), Err(PlayerError::Resolve(_))));
        assert!(matches!(parse_formats(r#"{"id": "abc"}"#), Err(PlayerError::Resolve(_))));
    }

    #[test]
    fn test_missing_program_is_resolve_error() {
        let resolver = YtDlpResolver::new(ResolverConfig {
            program: "definitely-not-a-real-resolver-binary".to_string(),
            ..ResolverConfig::default()
        });
        assert!(matches!(resolver.resolve("abc"), Err(PlayerError::Resolve(_))));
    }
}
