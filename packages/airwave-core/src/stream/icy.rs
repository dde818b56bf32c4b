//! ICY (Shoutcast) protocol metadata extraction.
//!
//! Upstreams that honour `Icy-MetaData: 1` interleave a metadata block after
//! every `icy-metaint` audio bytes:
//!
//! ```text
//! [metaint audio bytes][L][L * 16 metadata bytes][metaint audio bytes][L]...
//! ```
//!
//! [`IcyFrameState`] strips those blocks back out so the client only ever
//! sees audio, and decodes each block into a [`StreamMetadata`] event.

use std::sync::OnceLock;

use bytes::{Bytes, BytesMut};
use regex_lite::Regex;

use super::StreamMetadata;
use crate::protocol_constants::ICY_BLOCK_UNIT;

/// Output of one [`IcyFrameState::push`] call.
#[derive(Debug, Default)]
pub struct FramedChunk {
    /// Clean audio, in upstream order. May be empty.
    pub audio: Bytes,
    /// Metadata blocks completed by this chunk.
    pub events: Vec<StreamMetadata>,
}

/// Where the framer is within the current metaint cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Copying audio until `metaint` bytes have passed.
    Audio,
    /// Next byte is the block length.
    Length,
    /// Collecting a metadata block of the given size.
    Block(usize),
}

/// Stateful audio/metadata splitter for a single upstream connection.
///
/// Partial length bytes and partial blocks are carried across `push` calls,
/// so output does not depend on how the upstream fragments its writes.
/// Audio is emitted as soon as it arrives; only metadata bytes are held.
pub struct IcyFrameState {
    /// Audio bytes between blocks. 0 disables framing.
    metaint: usize,
    bytes_since_last_marker: usize,
    phase: Phase,
    /// Partial metadata block.
    pending: BytesMut,
    /// Scratch buffer reused across push() calls.
    audio_out: BytesMut,
    desyncs: u64,
}

impl IcyFrameState {
    /// Creates a framer. `metaint == 0` means passthrough for the whole connection.
    #[must_use]
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            bytes_since_last_marker: 0,
            phase: Phase::Audio,
            pending: BytesMut::new(),
            audio_out: BytesMut::new(),
            desyncs: 0,
        }
    }

    /// Number of blocks discarded as undecodable.
    #[must_use]
    pub fn desyncs(&self) -> u64 {
        self.desyncs
    }

    /// Feeds upstream bytes and returns the audio and metadata they complete.
    pub fn push(&mut self, chunk: &[u8]) -> FramedChunk {
        if self.metaint == 0 {
            return FramedChunk {
                audio: Bytes::copy_from_slice(chunk),
                events: Vec::new(),
            };
        }

        let mut events = Vec::new();
        let mut rest = chunk;
        self.audio_out.reserve(chunk.len());

        while !rest.is_empty() {
            match self.phase {
                Phase::Audio => {
                    let want = self.metaint - self.bytes_since_last_marker;
                    let take = want.min(rest.len());
                    self.audio_out.extend_from_slice(&rest[..take]);
                    self.bytes_since_last_marker += take;
                    rest = &rest[take..];
                    if self.bytes_since_last_marker == self.metaint {
                        self.phase = Phase::Length;
                    }
                }
                Phase::Length => {
                    let len = rest[0] as usize * ICY_BLOCK_UNIT;
                    rest = &rest[1..];
                    self.bytes_since_last_marker = 0;
                    if len == 0 {
                        self.phase = Phase::Audio;
                    } else {
                        self.pending.clear();
                        self.pending.reserve(len);
                        self.phase = Phase::Block(len);
                    }
                }
                Phase::Block(len) => {
                    let take = (len - self.pending.len()).min(rest.len());
                    self.pending.extend_from_slice(&rest[..take]);
                    rest = &rest[take..];
                    if self.pending.len() == len {
                        self.phase = Phase::Audio;
                        let block = self.pending.split();
                        match parse_icy_metadata(&block) {
                            Some(meta) => {
                                log::debug!(
                                    "[ICY] StreamTitle='{}' StreamUrl='{}'",
                                    meta.title,
                                    meta.url
                                );
                                events.push(meta);
                            }
                            None => self.resync(len),
                        }
                    }
                }
            }
        }

        FramedChunk {
            audio: self.audio_out.split().freeze(),
            events,
        }
    }

    /// Drops the current block and restarts counting at the next metaint
    /// boundary.
    fn resync(&mut self, len: usize) {
        self.desyncs += 1;
        self.pending.clear();
        self.bytes_since_last_marker = 0;
        self.phase = Phase::Audio;
        log::warn!(
            "[ICY] Undecodable {}-byte metadata block (metaint={}), resynchronizing",
            len,
            self.metaint
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Block decoding
// ─────────────────────────────────────────────────────────────────────────────

fn title_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"StreamTitle='(.*?)';").expect("valid StreamTitle pattern"))
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"StreamUrl='(.*?)';").expect("valid StreamUrl pattern"))
}

fn key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*='").expect("valid key pattern"))
}

/// Decodes text, falling back to Latin-1 for servers that send it.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

/// Parses a metadata block body (without its length byte).
///
/// Returns `None` when the block is not `key='value';` text, which means the
/// framer has lost its place in the stream. An all-NUL block decodes to an
/// empty record.
#[must_use]
pub fn parse_icy_metadata(block: &[u8]) -> Option<StreamMetadata> {
    let end = block
        .iter()
        .rposition(|&b| b != 0)
        .map(|i| i + 1)
        .unwrap_or(0);
    let text = decode_text(&block[..end]);
    let text = text.trim();

    if text.is_empty() {
        return Some(StreamMetadata::default());
    }
    if text
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\r' | '\n'))
        || !key_regex().is_match(text)
    {
        return None;
    }

    let capture = |re: &Regex| {
        re.captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    };

    Some(StreamMetadata {
        title: capture(title_regex()),
        url: capture(url_regex()),
    })
}
