//! Byte-stream handling for relayed audio.
//!
//! - [`icy`]: splits interleaved ICY metadata out of the audio
//! - [`headers`]: upstream → client header translation
//! - [`guard`]: per-relay lifecycle logging
//! - [`capped`]: bounded reads of playlist and manifest bodies

pub mod capped;
pub mod guard;
pub mod headers;
pub mod icy;

pub use capped::read_capped;
pub use guard::{EndReason, RelayStreamGuard};
pub use headers::{
    file_content_type, live_audio_headers, normalize_content_type, parse_metaint,
    playlist_headers, segment_headers,
};
pub use icy::{parse_icy_metadata, FramedChunk, IcyFrameState};

use serde::{Deserialize, Serialize};

/// Decoded contents of one ICY metadata block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMetadata {
    /// `StreamTitle`, conventionally "Artist - Title".
    pub title: String,
    /// `StreamUrl`, often album art or a station page. Empty when absent.
    pub url: String,
}

impl StreamMetadata {
    /// Whether the block carried a usable title.
    #[must_use]
    pub fn has_title(&self) -> bool {
        !self.title.is_empty()
    }
}
