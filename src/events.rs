//! Playback event types: instrument track identity, rendered performance
//! events, and the per-track event collections handed to the audio layer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::{Articulation, Score, Tick};
use crate::setup::SetupData;

/// Identifies one playable line: a part plus one of its instruments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId {
    pub part_id: String,
    pub instrument_id: String,
}

impl TrackId {
    pub fn new(part_id: impl Into<String>, instrument_id: impl Into<String>) -> Self {
        Self { part_id: part_id.into(), instrument_id: instrument_id.into() }
    }

    /// The reserved metronome track.
    pub fn metronome() -> Self {
        Self::new("metronome", "metronome")
    }

    pub fn is_metronome(&self) -> bool {
        self.part_id == "metronome" && self.instrument_id == "metronome"
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.part_id, self.instrument_id)
    }
}

/// Score position an event was rendered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePosition {
    /// Raw tick (repeat expansion not applied)
    pub tick: Tick,
    /// Original measure index
    pub measure: usize,
}

/// A sounding note with its expressive parameters resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    /// Onset on the played timeline, in milliseconds
    pub timestamp_ms: u64,
    /// Sounding duration in milliseconds (articulations applied)
    pub duration_ms: u64,
    /// Voice number within the part
    pub voice: i32,
    /// MIDI pitch
    pub pitch: u8,
    /// Dynamic level on the MIDI velocity scale
    pub dynamic_level: u8,
    /// Articulations applied to this event
    pub articulations: Vec<Articulation>,
    /// Where in the score this event came from
    pub source: SourcePosition,
}

/// A silent gap. Kept so downstream consumers can distinguish "nothing
/// rendered" from "an explicit rest".
#[derive(Debug, Clone, PartialEq)]
pub struct RestEvent {
    pub timestamp_ms: u64,
    pub duration_ms: u64,
    pub voice: i32,
    pub source: SourcePosition,
}

/// A single rendered performance event. Immutable once rendered;
/// superseded by re-render, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Note(NoteEvent),
    Rest(RestEvent),
}

impl PlaybackEvent {
    pub fn timestamp_ms(&self) -> u64 {
        match self {
            PlaybackEvent::Note(e) => e.timestamp_ms,
            PlaybackEvent::Rest(e) => e.timestamp_ms,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            PlaybackEvent::Note(e) => e.duration_ms,
            PlaybackEvent::Rest(e) => e.duration_ms,
        }
    }

    pub fn source(&self) -> SourcePosition {
        match self {
            PlaybackEvent::Note(e) => e.source,
            PlaybackEvent::Rest(e) => e.source,
        }
    }
}

/// Timestamp-ordered event collection. Multiple events may share one
/// timestamp (chords, multiple voices).
pub type PlaybackEventMap = BTreeMap<u64, Vec<PlaybackEvent>>;

/// Everything the audio layer needs for one track: its rendered events,
/// a dynamics snapshot, and the instrument setup metadata.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlaybackData {
    pub events: PlaybackEventMap,
    /// Dynamic level changes by raw tick, as captured at render time
    pub dynamic_levels: BTreeMap<Tick, u8>,
    pub setup: SetupData,
}

impl PlaybackData {
    /// Total number of events across all timestamps.
    pub fn event_count(&self) -> usize {
        self.events.values().map(Vec::len).sum()
    }

    /// Remove every event whose source tick falls in [from, to).
    /// This expires all repeat occurrences of the edited range at once.
    pub fn remove_events_in_source_range(&mut self, from: Tick, to: Tick) {
        for list in self.events.values_mut() {
            list.retain(|e| {
                let tick = e.source().tick;
                tick < from || tick >= to
            });
        }
        self.events.retain(|_, list| !list.is_empty());
    }
}

/// All instrument tracks of a score, in part/instrument declaration
/// order. This order defines the track indices used by change-range
/// notifications.
pub fn collect_track_ids(score: &Score) -> Vec<TrackId> {
    let mut ids = Vec::new();
    for part in &score.parts {
        for instrument in &part.instruments {
            ids.push(TrackId::new(part.id.clone(), instrument.id.clone()));
        }
    }
    ids
}

/// Tracks whose flat index falls in [track_from, track_to], preserving
/// declaration order. An inverted or out-of-range window yields an empty
/// set rather than an error.
pub fn tracks_in_index_range(score: &Score, track_from: usize, track_to: usize) -> Vec<TrackId> {
    collect_track_ids(score)
        .into_iter()
        .enumerate()
        .filter(|(i, _)| *i >= track_from && *i <= track_to)
        .map(|(_, id)| id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metronome_track_id_is_reserved() {
        let id = TrackId::metronome();
        assert!(id.is_metronome());
        assert!(!TrackId::new("P1", "P1-I1").is_metronome());
    }

    #[test]
    fn remove_events_by_source_range() {
        let mut data = PlaybackData::default();
        let mk = |tick: Tick, ts: u64| {
            PlaybackEvent::Note(NoteEvent {
                timestamp_ms: ts,
                duration_ms: 100,
                voice: 1,
                pitch: 60,
                dynamic_level: 80,
                articulations: Vec::new(),
                source: SourcePosition { tick, measure: 0 },
            })
        };
        data.events.entry(0).or_default().push(mk(0, 0));
        data.events.entry(500).or_default().push(mk(480, 500));
        // The same raw tick occurs again later (repeat occurrence)
        data.events.entry(2500).or_default().push(mk(480, 2500));

        data.remove_events_in_source_range(480, 960);

        assert_eq!(data.event_count(), 1);
        assert!(data.events.contains_key(&0));
        assert!(!data.events.contains_key(&500));
        assert!(!data.events.contains_key(&2500));
    }
}
