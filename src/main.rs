use anyhow::{Context, Result};
use log::{info, warn};
use std::io::{self, BufRead, Write};
use std::time::Duration;

mod core;
mod player;

use crate::core::{MediaKinds, PlayerConfig};
use player::YouTubeVideo;

const USAGE: &str = "用法: tube_player <视频ID|链接|文件> [--video-only|--audio-only]";

fn main() -> Result<()> {
    // 初始化日志
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("🎬 Tube Player 启动");

    let mut args = std::env::args().skip(1);
    let input = args.next().context(USAGE)?;
    let kinds = match args.next().as_deref() {
        None => MediaKinds::ALL,
        Some("--video-only") => MediaKinds::VIDEO,
        Some("--audio-only") => MediaKinds::AUDIO,
        Some(other) => anyhow::bail!("未知参数 {}\n{}", other, USAGE),
    };

    // 初始化 FFmpeg
    ffmpeg_next::init().map_err(|e| anyhow::anyhow!("FFmpeg 初始化失败: {}", e))?;
    info!("✅ FFmpeg 初始化成功");

    let config = PlayerConfig::load()?;
    let mut video = YouTubeVideo::open(&input, kinds, &config)
        .with_context(|| format!("无法打开 {}", input))?;
    video.start()?;

    println!("命令: p 暂停 | r 继续 | s <秒> 跳转 | t 状态 | q 退出");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("p") => video.pause(),
            Some("r") => video.unpause(),
            Some("s") => match parts.next().and_then(|s| s.parse::<f64>().ok()) {
                Some(secs) if secs.is_finite() && secs >= 0.0 => {
                    video.seek(Duration::from_secs_f64(secs))
                }
                _ => warn!("跳转需要非负的秒数，例如: s 42.5"),
            },
            Some("t") => print_status(&video),
            Some("q") => break,
            Some(other) => warn!("未知命令: {}", other),
            None => {}
        }
        io::stdout().flush()?;
    }

    video.stop();
    info!("👋 退出");
    Ok(())
}

fn print_status(video: &YouTubeVideo) {
    let state = if video.is_paused() { "暂停" } else { "播放中" };
    let tracks = match (video.has_video(), video.has_audio()) {
        (true, true) => "音视频",
        (true, false) => "仅视频",
        (false, true) => "仅音频",
        (false, false) => "无",
    };
    print!("[{}] {} 时间 {:.3}s", state, tracks, video.get_time().as_secs_f64());

    if let Ok(size) = video.get_video_size() {
        let (num, den) = size.sample_aspect_ratio;
        print!(" | 画面 {}x{} SAR {}:{}", size.width, size.height, num, den);
    }
    if let Ok(frame) = video.get_video_frame() {
        print!(" | 当前帧 {:.3}s", frame.pts.as_secs_f64());
    }
    if video.has_ended() {
        print!(" | 已播完");
    }
    println!();
}
