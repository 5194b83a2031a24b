//! Per-track setup metadata: which sound a track uses, independent of its
//! note content. Consulted once per track add and on instrument
//! reassignment, not on every note edit.

use serde::{Deserialize, Serialize};

use crate::events::TrackId;
use crate::model::Score;

/// Coarse sound classification used to pick an articulation profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SoundFamily {
    Keyboards,
    Strings,
    Plucked,
    Winds,
    Brass,
    Voice,
    Percussion,
    #[default]
    Unknown,
}

/// Non-event track metadata: sound identity and channel layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SetupData {
    /// Instrument identifier from the score
    pub instrument_id: String,
    /// Human-readable instrument name
    pub instrument_name: String,
    pub family: SoundFamily,
    /// General MIDI program number (0-based)
    pub midi_program: u8,
    /// Audio channel count requested from the engine
    pub audio_channels: u16,
}

/// Resolves setup metadata for instrument tracks.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetupDataResolver;

impl SetupDataResolver {
    /// Resolve setup data for a track, or None if the score no longer
    /// contains the instrument.
    pub fn resolve(&self, score: &Score, track_id: &TrackId) -> Option<SetupData> {
        if track_id.is_metronome() {
            return Some(Self::metronome_setup());
        }

        let part = score.parts.iter().find(|p| p.id == track_id.part_id)?;
        let instrument = part
            .instruments
            .iter()
            .find(|i| i.id == track_id.instrument_id)?;

        let program = instrument.midi_program.unwrap_or(0).clamp(0, 127) as u8;
        Some(SetupData {
            instrument_id: instrument.id.clone(),
            instrument_name: instrument.name.clone(),
            family: classify(program, &instrument.name),
            midi_program: program,
            audio_channels: 2,
        })
    }

    /// Fixed percussion setup for the reserved metronome track.
    pub fn metronome_setup() -> SetupData {
        SetupData {
            instrument_id: "metronome".to_string(),
            instrument_name: "Metronome".to_string(),
            family: SoundFamily::Percussion,
            midi_program: 115, // woodblock
            audio_channels: 2,
        }
    }
}

/// Classify an instrument into a sound family from its General MIDI
/// program, falling back to name keywords for programs that straddle
/// families.
fn classify(program: u8, name: &str) -> SoundFamily {
    let lower = name.to_lowercase();
    if lower.contains("voice") || lower.contains("choir") || lower.contains("soprano")
        || lower.contains("alto") || lower.contains("tenor") || lower.contains("bass voice")
    {
        return SoundFamily::Voice;
    }

    match program {
        0..=23 => SoundFamily::Keyboards,
        24..=31 => SoundFamily::Plucked,
        32..=39 => {
            if lower.contains("guitar") || lower.contains("bass") {
                SoundFamily::Plucked
            } else {
                SoundFamily::Strings
            }
        }
        40..=47 => SoundFamily::Strings,
        48..=51 => SoundFamily::Strings,
        52..=54 => SoundFamily::Voice,
        55 => SoundFamily::Percussion,
        56..=63 => SoundFamily::Brass,
        64..=79 => SoundFamily::Winds,
        80..=103 => SoundFamily::Keyboards,
        104..=111 => SoundFamily::Plucked,
        112..=119 => SoundFamily::Percussion,
        _ => SoundFamily::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instrument, Part};

    fn score_with_instrument(program: Option<i32>, name: &str) -> Score {
        let mut score = Score::new();
        score.parts.push(Part {
            id: "P1".into(),
            name: name.into(),
            instruments: vec![Instrument {
                id: "P1-I1".into(),
                name: name.into(),
                midi_program: program,
                midi_channel: Some(1),
            }],
            measures: Vec::new(),
        });
        score
    }

    #[test]
    fn resolves_declared_instrument() {
        let score = score_with_instrument(Some(40), "Violin");
        let setup = SetupDataResolver
            .resolve(&score, &TrackId::new("P1", "P1-I1"))
            .unwrap();
        assert_eq!(setup.midi_program, 40);
        assert_eq!(setup.family, SoundFamily::Strings);
        assert_eq!(setup.audio_channels, 2);
    }

    #[test]
    fn missing_instrument_resolves_to_none() {
        let score = score_with_instrument(Some(0), "Piano");
        assert!(SetupDataResolver
            .resolve(&score, &TrackId::new("P1", "nope"))
            .is_none());
        assert!(SetupDataResolver
            .resolve(&score, &TrackId::new("P9", "P1-I1"))
            .is_none());
    }

    #[test]
    fn metronome_is_always_resolvable() {
        let score = Score::new();
        let setup = SetupDataResolver
            .resolve(&score, &TrackId::metronome())
            .unwrap();
        assert_eq!(setup.family, SoundFamily::Percussion);
    }
}
