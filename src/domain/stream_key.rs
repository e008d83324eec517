//! Stream identity and its resolution from ingest session data.
//!
//! The ingest server does not report the stream name in a stable place: it can
//! arrive as a path, buried in the argument bag or in protocol metadata. The
//! resolver tries each [`ResolutionSource`] in priority order and never guesses
//! an empty or unsafe identity.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use tracing::warn;

static KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,127}$").unwrap());

static LIVE_TOKEN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/live/([^/?#\s]+)").unwrap());

/// Minimum length (exclusive) of an argument value accepted as a bare key.
const FALLBACK_MIN_LEN: usize = 5;

/// Opaque name of one logical live stream.
///
/// Doubles as the name of the stream's output directory, so construction is
/// restricted to a conservative character set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StreamKey(String);

impl StreamKey {
    pub fn parse(candidate: &str) -> Option<Self> {
        if KEY_REGEX.is_match(candidate) && !candidate.contains("..") {
            Some(Self(candidate.to_owned()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StreamKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Protocol specific block nested in the session metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStream {
    #[serde(default, alias = "streamName", alias = "name")]
    pub stream_name: Option<String>,
}

/// Metadata attached to an ingest session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, alias = "streamName", alias = "name")]
    pub stream_name: Option<String>,
    #[serde(default)]
    pub rtmp: Option<ProtocolStream>,
    #[serde(default)]
    pub publish: Option<ProtocolStream>,
}

/// One place a stream key may be found, in the order they are consulted.
#[derive(Debug, Clone, Copy)]
pub enum ResolutionSource<'a> {
    Path(&'a str),
    Args(&'a BTreeMap<String, serde_json::Value>),
    Metadata(&'a SessionMetadata),
}

impl ResolutionSource<'_> {
    pub fn resolve(&self) -> Option<StreamKey> {
        match self {
            ResolutionSource::Path(path) => from_path(path),
            ResolutionSource::Args(args) => from_args(args),
            ResolutionSource::Metadata(metadata) => from_metadata(metadata),
        }
    }
}

/// Resolve the stream key of a session, or `None` if no source yields a valid key.
///
/// A path that names a segment is authoritative: if that segment is not a
/// valid key the session is unresolvable, the other sources are not consulted.
pub fn resolve(
    stream_path: Option<&str>,
    args: &BTreeMap<String, serde_json::Value>,
    metadata: Option<&SessionMetadata>,
) -> Option<StreamKey> {
    if let Some(segment) = stream_path.and_then(last_segment) {
        let key = StreamKey::parse(segment);
        if key.is_none() {
            warn!(segment, "stream path names an invalid stream key");
        }
        return key;
    }

    let mut sources = Vec::with_capacity(2);
    sources.push(ResolutionSource::Args(args));
    if let Some(metadata) = metadata {
        sources.push(ResolutionSource::Metadata(metadata));
    }

    sources.iter().find_map(ResolutionSource::resolve)
}

fn last_segment(path: &str) -> Option<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).last()
}

fn from_path(path: &str) -> Option<StreamKey> {
    last_segment(path).and_then(StreamKey::parse)
}

fn from_args(args: &BTreeMap<String, serde_json::Value>) -> Option<StreamKey> {
    let strings = || args.values().filter_map(serde_json::Value::as_str);

    // A `/live/<token>` anywhere in the bag beats the length heuristic.
    let live_token = strings().find_map(|value| {
        LIVE_TOKEN_REGEX
            .captures(value)
            .and_then(|caps| caps.get(1))
            .and_then(|token| StreamKey::parse(token.as_str()))
    });

    live_token.or_else(|| {
        strings()
            .filter(|value| value.chars().count() > FALLBACK_MIN_LEN)
            .find_map(StreamKey::parse)
    })
}

fn from_metadata(metadata: &SessionMetadata) -> Option<StreamKey> {
    let nested = [metadata.rtmp.as_ref(), metadata.publish.as_ref()];

    std::iter::once(metadata.stream_name.as_deref())
        .chain(
            nested
                .into_iter()
                .map(|block| block.and_then(|b| b.stream_name.as_deref())),
        )
        .flatten()
        .find_map(|name| from_path(name))
}
