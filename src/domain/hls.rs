use super::ladder::{Ladder, PASS_THROUGH_PLAYLIST};
use super::stream_key::StreamKey;
use std::fmt::Write;

/// Advertised bandwidth for pass-through streams. The source bitrate is not
/// known before the encoder runs, so this is a placeholder, not a measurement.
pub const PASS_THROUGH_BANDWIDTH: u64 = 2_000_000;

pub struct VariantStream {
    pub bandwidth: u64,
    pub resolution: Option<(u32, u32)>,
    pub uri: String,
}

pub struct MasterPlaylist {
    pub version: u8,
    pub independent_segments: bool,
    pub variants: Vec<VariantStream>,
}

impl MasterPlaylist {
    pub fn new() -> Self {
        Self {
            version: 3,
            independent_segments: true,
            variants: Vec::new(),
        }
    }

    /// Master playlist for `key`, one variant per rung of `ladder`.
    pub fn for_ladder(key: &StreamKey, ladder: &Ladder, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        let mut playlist = Self::new();

        match ladder {
            Ladder::PassThrough => playlist.add_variant(
                PASS_THROUGH_BANDWIDTH,
                None,
                format!("{base}/{key}/{PASS_THROUGH_PLAYLIST}.m3u8"),
            ),
            Ladder::Transcode(rungs) => {
                for rung in rungs {
                    playlist.add_variant(
                        rung.peak_bandwidth(),
                        Some((rung.width, rung.height)),
                        format!("{base}/{key}/{}.m3u8", rung.label),
                    );
                }
            }
        }

        // Lowest bandwidth first; stable so equal rates keep ladder order.
        playlist.variants.sort_by_key(|v| v.bandwidth);
        playlist
    }

    pub fn add_variant(&mut self, bandwidth: u64, resolution: Option<(u32, u32)>, uri: String) {
        self.variants.push(VariantStream {
            bandwidth,
            resolution,
            uri,
        });
    }

    pub fn render(&self) -> String {
        let mut out = String::from("#EXTM3U\n");
        // Writing into a String cannot fail.
        let _ = writeln!(out, "#EXT-X-VERSION:{}", self.version);
        if self.independent_segments {
            out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
        }

        for variant in &self.variants {
            let _ = write!(out, "#EXT-X-STREAM-INF:BANDWIDTH={}", variant.bandwidth);
            if let Some((width, height)) = variant.resolution {
                let _ = write!(out, ",RESOLUTION={}x{}", width, height);
            }
            out.push('\n');
            out.push_str(&variant.uri);
            out.push('\n');
        }

        out
    }
}

impl Default for MasterPlaylist {
    fn default() -> Self {
        Self::new()
    }
}

/// Master playlist text for `key` served under `base_url`.
pub fn compose_master(key: &StreamKey, ladder: &Ladder, base_url: &str) -> String {
    MasterPlaylist::for_ladder(key, ladder, base_url).render()
}
