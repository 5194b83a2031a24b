//! Crate error type.

use thiserror::Error;

/// Errors surfaced by the score input layer.
///
/// Playback-side failures (missing sequence, rejected track add) never
/// reach this type; they degrade to logged no-ops instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The XML could not be parsed at all.
    #[error("XML parse error: {0}")]
    Parse(String),

    /// The document parsed but is not a supported MusicXML score.
    #[error("unsupported document: {0}")]
    Unsupported(String),

    /// A compressed .mxl container was malformed.
    #[error("invalid MXL archive: {0}")]
    Archive(String),

    /// Reading a score file from disk failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
