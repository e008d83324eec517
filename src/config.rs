//! Process configuration, read once from the environment at start-up.

use crate::domain::ladder::{GopPolicy, Ladder, PlanError, RenditionSpec};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_LADDER: &str = "480:854x480:1400:128,720:1280x720:2800:128,1080:1920x1080:5000:192";
const DEFAULT_AUDIO_KBPS: u32 = 128;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} has invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
    #[error("invalid ladder row {row:?}: expected label:WIDTHxHEIGHT:VIDEO_KBPS[:AUDIO_KBPS]")]
    LadderRow { row: String },
    #[error(transparent)]
    Plan(#[from] PlanError),
}

#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP server bind address
    pub http_addr: String,
    pub http_port: u16,
    /// Host the encoder pulls published streams from
    pub ingest_host: String,
    pub ingest_port: u16,
    /// Application segment of ingest URLs (`rtmp://host:port/<app>/<key>`)
    pub ingest_app: String,
    /// Root of the per-stream output directories
    pub media_root: PathBuf,
    /// Base URL players use to reach `media_root`
    pub public_base_url: String,
    pub ffmpeg_path: PathBuf,
    pub ladder: Ladder,
    pub gop: GopPolicy,
    /// Time a stopped encoder gets before it is killed; `None` never kills.
    pub stop_grace: Option<Duration>,
}

impl Config {
    /// Load configuration from the environment (and `.env`, if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let http_addr = var("HTTP_ADDR", "127.0.0.1");
        let http_port: u16 = parse("HTTP_PORT", var("HTTP_PORT", "8000"))?;
        let public_base_url = lookup("PUBLIC_BASE_URL")
            .unwrap_or_else(|| format!("http://{}:{}/media", http_addr, http_port));

        let video_codec = var("VIDEO_CODEC", "libx264");
        let audio_codec = var("AUDIO_CODEC", "aac");
        let ladder = parse_ladder(&var("LADDER", DEFAULT_LADDER), &video_codec, &audio_codec)?;

        let keyframe_interval = match lookup("KEYFRAME_INTERVAL") {
            Some(value) if !value.trim().is_empty() => Some(parse("KEYFRAME_INTERVAL", value)?),
            _ => None,
        };
        let gop = GopPolicy {
            frame_rate: parse("INPUT_FRAME_RATE", var("INPUT_FRAME_RATE", "30"))?,
            segment_seconds: parse("SEGMENT_SECONDS", var("SEGMENT_SECONDS", "4"))?,
            playlist_size: parse("PLAYLIST_SIZE", var("PLAYLIST_SIZE", "6"))?,
            keyframe_interval,
        };
        ladder.validate()?;
        gop.validate()?;

        let grace_secs: u64 = parse("STOP_GRACE_SECS", var("STOP_GRACE_SECS", "10"))?;

        Ok(Self {
            http_port,
            ingest_host: var("INGEST_HOST", "127.0.0.1"),
            ingest_port: parse("INGEST_PORT", var("INGEST_PORT", "1935"))?,
            ingest_app: var("INGEST_APP", "live"),
            media_root: PathBuf::from(var("MEDIA_ROOT", "./media")),
            public_base_url,
            ffmpeg_path: PathBuf::from(var("FFMPEG_PATH", "ffmpeg")),
            ladder,
            gop,
            stop_grace: (grace_secs > 0).then(|| Duration::from_secs(grace_secs)),
            http_addr,
        })
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid { name, value })
}

/// Parse `source` or a comma-separated list of `label:WIDTHxHEIGHT:VIDEO_KBPS[:AUDIO_KBPS]`.
pub fn parse_ladder(rows: &str, video_codec: &str, audio_codec: &str) -> Result<Ladder, ConfigError> {
    if rows.trim().eq_ignore_ascii_case("source") {
        return Ok(Ladder::PassThrough);
    }

    let rungs = rows
        .split(',')
        .map(str::trim)
        .filter(|row| !row.is_empty())
        .map(|row| parse_rung(row, video_codec, audio_codec))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Ladder::Transcode(rungs))
}

fn parse_rung(row: &str, video_codec: &str, audio_codec: &str) -> Result<RenditionSpec, ConfigError> {
    let bad_row = || ConfigError::LadderRow {
        row: row.to_string(),
    };
    let fields: Vec<&str> = row.split(':').collect();
    if !(3..=4).contains(&fields.len()) {
        return Err(bad_row());
    }

    let (width, height) = fields[1].split_once('x').ok_or_else(bad_row)?;
    let number = |s: &str| s.trim().parse::<u32>().map_err(|_| bad_row());

    Ok(RenditionSpec {
        label: fields[0].to_string(),
        width: number(width)?,
        height: number(height)?,
        video_kbps: number(fields[2])?,
        audio_kbps: match fields.get(3) {
            Some(kbps) => number(*kbps)?,
            None => DEFAULT_AUDIO_KBPS,
        },
        video_codec: video_codec.to_string(),
        audio_codec: audio_codec.to_string(),
    })
}
