//! playbacklib — score playback rendering and audio-engine track
//! synchronization.
//!
//! The crate turns a parsed MusicXML score into per-track streams of
//! timestamped performance events, keeps those streams current under
//! incremental score edits, and synchronizes them with an external audio
//! engine: one engine sequence per open score, one engine track per
//! instrument, transport and loop control, and bidirectional parameter
//! sync against persisted settings.
//!
//! Supports both uncompressed MusicXML (.musicxml) and compressed MXL
//! (.mxl) files as score input.
//!
//! # Example
//! ```no_run
//! use playbacklib::{parse_file, PlaybackController, ScorePlayback};
//!
//! # fn engine() -> Box<dyn playbacklib::AudioEngine> { unimplemented!() }
//! let score = parse_file("path/to/score.musicxml").unwrap();
//! let mut controller = PlaybackController::new(engine(), Default::default());
//! controller.set_playback(Some(ScorePlayback::new(score)));
//! controller.process_events(); // adopt the engine sequence when it resolves
//! controller.play();
//! ```

pub mod context;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod model;
pub mod mxl;
pub mod notify;
pub mod parser;
pub mod playback;
pub mod profile;
pub mod render;
pub mod repeats;
pub mod settings;
pub mod setup;
pub mod timemap;

use std::path::Path;

pub use controller::{ActionId, PlaybackController};
pub use engine::{
    AudioEngine, EngineEvent, EngineTrackId, PlaybackStatus, RequestId, SequenceId,
};
pub use error::Error;
pub use events::{PlaybackData, PlaybackEvent, TrackId};
pub use model::*;
pub use mxl::parse_mxl;
pub use parser::parse_musicxml;
pub use playback::{
    ChangeRange, ChangedTracks, LoopBoundaries, LoopBoundaryType, PlaybackModel, ScorePlayback,
};
pub use settings::{
    AudioInputParams, AudioOutputParams, AudioParams, AudioSettings, PlaybackConfig,
};

/// Parse a MusicXML file from a file path.
/// Automatically detects format based on file extension:
/// - `.musicxml` or `.xml` → uncompressed MusicXML
/// - `.mxl` → compressed MXL (ZIP archive)
pub fn parse_file<P: AsRef<Path>>(path: P) -> Result<Score, Error> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    parse_bytes(&data, path.extension().and_then(|e| e.to_str()))
}

/// Parse MusicXML from raw bytes with an optional format hint.
/// If `extension` is None, tries to auto-detect the format.
pub fn parse_bytes(data: &[u8], extension: Option<&str>) -> Result<Score, Error> {
    match extension {
        Some("mxl") => parse_mxl(data),
        Some("musicxml") | Some("xml") => {
            let xml = std::str::from_utf8(data)
                .map_err(|e| Error::Parse(format!("invalid UTF-8 in MusicXML file: {e}")))?;
            parse_musicxml(xml)
        }
        _ => {
            // Auto-detect: try as XML first, then as MXL
            if let Ok(xml) = std::str::from_utf8(data) {
                if xml.trim_start().starts_with("<?xml") || xml.trim_start().starts_with('<') {
                    return parse_musicxml(xml);
                }
            }
            parse_mxl(data)
        }
    }
}
