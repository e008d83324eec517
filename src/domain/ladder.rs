//! Rendition ladder and encoder invocation planning.

use super::stream_key::StreamKey;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Playlist name used when the stream is repackaged without re-encoding.
pub const PASS_THROUGH_PLAYLIST: &str = "index";

/// Peak rate allowed above the nominal video bitrate.
pub const MAXRATE_FACTOR: f64 = 1.07;
/// Rate-control buffer relative to the nominal video bitrate.
pub const BUFSIZE_FACTOR: f64 = 1.5;

#[derive(Debug, Error, PartialEq)]
pub enum PlanError {
    #[error("ladder has no renditions")]
    EmptyLadder,
    #[error("duplicate rendition label {0:?}")]
    DuplicateRung(String),
    #[error("invalid rendition label {0:?}")]
    InvalidLabel(String),
    #[error("rendition {0:?} has a zero dimension or bitrate")]
    InvalidRendition(String),
    #[error("{field} must be at least 1")]
    ZeroTiming { field: &'static str },
    #[error(
        "keyframe interval {keyframe_interval} does not divide a {segment_seconds}s segment at {frame_rate} fps"
    )]
    MisalignedKeyframes {
        keyframe_interval: u32,
        frame_rate: u32,
        segment_seconds: u32,
    },
    #[error("{segment_seconds}s segments at {frame_rate} fps overflow the frame counter")]
    TimingOverflow { frame_rate: u32, segment_seconds: u32 },
}

/// One rung of an adaptive bitrate ladder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenditionSpec {
    /// Stable rung label, also the rung's playlist file stem ("480", "720", ...).
    pub label: String,
    pub width: u32,
    pub height: u32,
    /// Nominal video bitrate in kbit/s.
    pub video_kbps: u32,
    pub audio_kbps: u32,
    pub video_codec: String,
    pub audio_codec: String,
}

impl RenditionSpec {
    /// Approximate peak bandwidth in bits per second, as advertised to players.
    pub fn peak_bandwidth(&self) -> u64 {
        ((self.video_kbps as f64 * MAXRATE_FACTOR + self.audio_kbps as f64) * 1000.0).round() as u64
    }

    fn validate(&self) -> Result<(), PlanError> {
        let label_ok = !self.label.is_empty()
            && self
                .label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !label_ok || self.label == PASS_THROUGH_PLAYLIST {
            return Err(PlanError::InvalidLabel(self.label.clone()));
        }
        if self.width == 0 || self.height == 0 || self.video_kbps == 0 {
            return Err(PlanError::InvalidRendition(self.label.clone()));
        }
        Ok(())
    }
}

/// Output mode of an encode job.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", content = "renditions", rename_all = "snake_case")]
pub enum Ladder {
    /// Single "source" rung, the input is repackaged as-is.
    PassThrough,
    /// One or more independently scaled rungs sharing a single decode.
    Transcode(Vec<RenditionSpec>),
}

impl Ladder {
    pub fn validate(&self) -> Result<(), PlanError> {
        let Ladder::Transcode(rungs) = self else {
            return Ok(());
        };
        if rungs.is_empty() {
            return Err(PlanError::EmptyLadder);
        }
        let mut seen = HashSet::new();
        for rung in rungs {
            rung.validate()?;
            if !seen.insert(rung.label.as_str()) {
                return Err(PlanError::DuplicateRung(rung.label.clone()));
            }
        }
        Ok(())
    }

    /// Rung labels, in ladder order.
    pub fn labels(&self) -> Vec<String> {
        match self {
            Ladder::PassThrough => vec![PASS_THROUGH_PLAYLIST.to_string()],
            Ladder::Transcode(rungs) => rungs.iter().map(|r| r.label.clone()).collect(),
        }
    }

    pub fn mode_name(&self) -> &'static str {
        match self {
            Ladder::PassThrough => "pass_through",
            Ladder::Transcode(_) => "transcode",
        }
    }
}

/// Segmenting and keyframe cadence.
///
/// The keyframe interval must land on every segment boundary, otherwise some
/// players stall or glitch when switching segments.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GopPolicy {
    /// Expected input frame rate.
    pub frame_rate: u32,
    pub segment_seconds: u32,
    /// Segments advertised by each rung playlist.
    pub playlist_size: u32,
    /// Explicit GOP length in frames; derived from frame rate and segment length when unset.
    pub keyframe_interval: Option<u32>,
}

impl Default for GopPolicy {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            segment_seconds: 4,
            playlist_size: 6,
            keyframe_interval: None,
        }
    }
}

impl GopPolicy {
    pub fn validate(&self) -> Result<(), PlanError> {
        for (field, value) in [
            ("frame rate", self.frame_rate),
            ("segment duration", self.segment_seconds),
            ("playlist size", self.playlist_size),
        ] {
            if value == 0 {
                return Err(PlanError::ZeroTiming { field });
            }
        }
        let frames_per_segment = self.frame_rate.checked_mul(self.segment_seconds).ok_or(
            PlanError::TimingOverflow {
                frame_rate: self.frame_rate,
                segment_seconds: self.segment_seconds,
            },
        )?;
        if let Some(interval) = self.keyframe_interval {
            if interval == 0 || frames_per_segment % interval != 0 {
                return Err(PlanError::MisalignedKeyframes {
                    keyframe_interval: interval,
                    frame_rate: self.frame_rate,
                    segment_seconds: self.segment_seconds,
                });
            }
        }
        Ok(())
    }

    pub fn gop_frames(&self) -> u32 {
        self.keyframe_interval
            .unwrap_or(self.frame_rate.saturating_mul(self.segment_seconds))
    }
}

/// Files one rung is expected to produce.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputArtifact {
    pub rung: String,
    pub playlist: PathBuf,
    pub segment_pattern: PathBuf,
}

impl OutputArtifact {
    fn for_rung(output_dir: &Path, rung: &str) -> Self {
        Self {
            rung: rung.to_string(),
            playlist: output_dir.join(format!("{rung}.m3u8")),
            segment_pattern: output_dir.join(format!("{rung}_%05d.ts")),
        }
    }
}

/// Declarative description of one encoder process.
///
/// Only the supervisor turns this into a running process.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodeInvocation {
    pub key: StreamKey,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub input: String,
    pub output_dir: PathBuf,
    pub ladder: Ladder,
    pub artifacts: Vec<OutputArtifact>,
}

/// Builds encoder invocations for a fixed ladder and cadence.
#[derive(Debug, Clone)]
pub struct LadderPlanner {
    program: PathBuf,
    ladder: Ladder,
    gop: GopPolicy,
}

impl LadderPlanner {
    pub fn new(
        program: impl Into<PathBuf>,
        ladder: Ladder,
        gop: GopPolicy,
    ) -> Result<Self, PlanError> {
        ladder.validate()?;
        gop.validate()?;
        Ok(Self {
            program: program.into(),
            ladder,
            gop,
        })
    }

    pub fn ladder(&self) -> &Ladder {
        &self.ladder
    }

    pub fn plan(&self, key: &StreamKey, input: &str, output_dir: &Path) -> EncodeInvocation {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "warning", "-i", input]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let artifacts = match &self.ladder {
            Ladder::PassThrough => {
                let artifact = OutputArtifact::for_rung(output_dir, PASS_THROUGH_PLAYLIST);
                args.extend(["-map", "0", "-c", "copy"].map(String::from));
                self.push_hls_output(&mut args, &artifact);
                vec![artifact]
            }
            Ladder::Transcode(rungs) => self.push_transcode(&mut args, rungs, output_dir),
        };

        EncodeInvocation {
            key: key.clone(),
            program: self.program.clone(),
            args,
            input: input.to_string(),
            output_dir: output_dir.to_path_buf(),
            ladder: self.ladder.clone(),
            artifacts,
        }
    }

    fn push_transcode(
        &self,
        args: &mut Vec<String>,
        rungs: &[RenditionSpec],
        output_dir: &Path,
    ) -> Vec<OutputArtifact> {
        // Decode once, split, then scale per rung.
        let split_outputs: String = (0..rungs.len()).map(|i| format!("[v{i}]")).collect();
        let mut filter = format!("[0:v]split={}{}", rungs.len(), split_outputs);
        for (i, rung) in rungs.iter().enumerate() {
            filter.push_str(&format!(
                ";[v{i}]scale=w={}:h={}[v{i}out]",
                rung.width, rung.height
            ));
        }
        args.push("-filter_complex".into());
        args.push(filter);

        let gop = self.gop.gop_frames().to_string();
        rungs
            .iter()
            .enumerate()
            .map(|(i, rung)| {
                let maxrate = (rung.video_kbps as f64 * MAXRATE_FACTOR).round() as u64;
                let bufsize = (rung.video_kbps as f64 * BUFSIZE_FACTOR).round() as u64;
                args.extend([
                    "-map".to_string(),
                    format!("[v{i}out]"),
                    "-map".to_string(),
                    "0:a?".to_string(),
                    "-c:v".to_string(),
                    rung.video_codec.clone(),
                    "-b:v".to_string(),
                    format!("{}k", rung.video_kbps),
                    "-maxrate".to_string(),
                    format!("{maxrate}k"),
                    "-bufsize".to_string(),
                    format!("{bufsize}k"),
                    "-g".to_string(),
                    gop.clone(),
                    "-keyint_min".to_string(),
                    gop.clone(),
                    "-sc_threshold".to_string(),
                    "0".to_string(),
                    "-c:a".to_string(),
                    rung.audio_codec.clone(),
                    "-b:a".to_string(),
                    format!("{}k", rung.audio_kbps),
                ]);
                let artifact = OutputArtifact::for_rung(output_dir, &rung.label);
                self.push_hls_output(args, &artifact);
                artifact
            })
            .collect()
    }

    fn push_hls_output(&self, args: &mut Vec<String>, artifact: &OutputArtifact) {
        args.extend([
            "-f".to_string(),
            "hls".to_string(),
            "-hls_time".to_string(),
            self.gop.segment_seconds.to_string(),
            "-hls_list_size".to_string(),
            self.gop.playlist_size.to_string(),
            "-hls_flags".to_string(),
            "delete_segments+independent_segments".to_string(),
            "-hls_segment_filename".to_string(),
            artifact.segment_pattern.to_string_lossy().into_owned(),
            artifact.playlist.to_string_lossy().into_owned(),
        ]);
    }
}
