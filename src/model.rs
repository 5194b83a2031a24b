//! Data model for representing a parsed MusicXML score.
//!
//! These structures capture the musical information needed for audio
//! playback: pitches and durations, dynamics and articulations, tempo,
//! and the repeat/jump structure. Engraving details (layout, fonts,
//! beaming) are out of scope.
//!
//! Time is measured in **ticks**: [`TICKS_PER_QUARTER`] ticks per quarter
//! note, independent of the per-file MusicXML `divisions` resolution.

use serde::{Deserialize, Serialize};

/// Score-relative discrete time unit.
pub type Tick = u32;

/// Ticks per quarter note.
pub const TICKS_PER_QUARTER: Tick = 480;

/// A complete musical score parsed from MusicXML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Score {
    /// Title of the piece
    pub title: Option<String>,
    /// Composer name
    pub composer: Option<String>,
    /// MusicXML version (e.g., "3.1", "4.0")
    pub version: Option<String>,
    /// Musical parts (instruments)
    pub parts: Vec<Part>,
}

/// A musical part (one staff group belonging to one player).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    /// Part identifier (e.g., "P1")
    pub id: String,
    /// Part name (e.g., "Classical Guitar")
    pub name: String,
    /// Declared instruments. Usually exactly one per part.
    pub instruments: Vec<Instrument>,
    /// Ordered list of measures
    pub measures: Vec<Measure>,
}

/// One playable instrument declared by a part.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instrument {
    /// Instrument identifier (e.g., "P1-I1")
    pub id: String,
    /// Instrument name (e.g., "Piano")
    pub name: String,
    /// General MIDI program number
    pub midi_program: Option<i32>,
    /// MIDI channel
    pub midi_channel: Option<i32>,
}

/// A single measure (bar) of music.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    /// Measure number
    pub number: i32,
    /// Whether this is an implicit measure (e.g., pickup/anacrusis)
    pub implicit: bool,
    /// Attributes (divisions, key, time) — only present when they change
    pub attributes: Option<Attributes>,
    /// Notes and rests in this measure
    pub notes: Vec<Note>,
    /// Directions (tempo, dynamics, navigation markers)
    pub directions: Vec<Direction>,
    /// Barlines (repeat signs, volta brackets)
    pub barlines: Vec<Barline>,
}

/// Musical attributes that may change at the start of a measure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attributes {
    /// Divisions per quarter note (duration resolution of this file)
    pub divisions: Option<i32>,
    /// Key signature
    pub key: Option<Key>,
    /// Time signature
    pub time: Option<TimeSignature>,
    /// Number of staves in this part (e.g. 2 for piano grand staff)
    pub staves: Option<i32>,
}

/// Key signature.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Key {
    /// Number of sharps (positive) or flats (negative)
    pub fifths: i32,
    /// Mode (e.g., "major", "minor")
    pub mode: Option<String>,
}

/// Time signature.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator (e.g., 3 in 3/4)
    pub beats: i32,
    /// Denominator (e.g., 4 in 3/4)
    pub beat_type: i32,
}

impl TimeSignature {
    /// Nominal measure length in ticks.
    pub fn ticks_per_measure(&self) -> Tick {
        self.ticks_per_beat() * self.beats.max(1) as Tick
    }

    /// Length of one beat in ticks.
    pub fn ticks_per_beat(&self) -> Tick {
        TICKS_PER_QUARTER * 4 / self.beat_type.max(1) as Tick
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { beats: 4, beat_type: 4 }
    }
}

/// A single note or rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    /// Pitch (None if this is a rest)
    pub pitch: Option<Pitch>,
    /// Duration in divisions
    pub duration: i32,
    /// Voice number (for multi-voice writing)
    pub voice: Option<i32>,
    /// Staff number (1-based; for multi-staff parts like piano)
    pub staff: Option<i32>,
    /// Whether this is a rest
    pub rest: bool,
    /// Whether this note is part of a chord with the previous note
    pub chord: bool,
    /// Whether this is a grace note (takes no time)
    pub grace: bool,
    /// Tie into the following note of the same pitch
    pub tie_start: bool,
    /// Tied from the preceding note of the same pitch
    pub tie_stop: bool,
    /// Articulation marks attached to this note
    pub articulations: Vec<Articulation>,
}

impl Note {
    /// Duration of this note in ticks at the given divisions resolution.
    pub fn tick_len(&self, divisions: i32) -> Tick {
        if divisions <= 0 || self.duration <= 0 {
            return 0;
        }
        (self.duration as i64 * TICKS_PER_QUARTER as i64 / divisions as i64) as Tick
    }
}

/// Pitch of a note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pitch {
    /// Note name: A, B, C, D, E, F, G
    pub step: String,
    /// Octave number (middle C = C4)
    pub octave: i32,
    /// Chromatic alteration: -1.0 = flat, 1.0 = sharp, 0.0 = natural
    pub alter: Option<f64>,
}

impl Pitch {
    /// Convert pitch to MIDI note number. Middle C (C4) = 60.
    pub fn to_midi(&self) -> i32 {
        let step_semitone = match self.step.as_str() {
            "C" => 0,
            "D" => 2,
            "E" => 4,
            "F" => 5,
            "G" => 7,
            "A" => 9,
            "B" => 11,
            _ => 0,
        };
        let alter = self.alter.unwrap_or(0.0) as i32;
        (self.octave + 1) * 12 + step_semitone + alter
    }
}

/// An articulation mark on a note, or a persistent playing technique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Articulation {
    Staccato,
    Staccatissimo,
    Tenuto,
    DetachedLegato,
    Accent,
    Marcato,
    /// Persistent technique switched by "pizz." / "arco" directions.
    Pizzicato,
}

/// A dynamic mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dynamic {
    Ppp,
    Pp,
    P,
    Mp,
    Mf,
    F,
    Ff,
    Fff,
}

impl Dynamic {
    /// Nominal dynamic level on the MIDI velocity scale.
    pub fn level(&self) -> u8 {
        match self {
            Dynamic::Ppp => 16,
            Dynamic::Pp => 33,
            Dynamic::P => 49,
            Dynamic::Mp => 64,
            Dynamic::Mf => 80,
            Dynamic::F => 96,
            Dynamic::Ff => 112,
            Dynamic::Fff => 126,
        }
    }

    /// Parse a MusicXML dynamics element name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ppp" => Some(Dynamic::Ppp),
            "pp" => Some(Dynamic::Pp),
            "p" => Some(Dynamic::P),
            "mp" => Some(Dynamic::Mp),
            "mf" => Some(Dynamic::Mf),
            "f" => Some(Dynamic::F),
            "ff" => Some(Dynamic::Ff),
            "fff" => Some(Dynamic::Fff),
            _ => None,
        }
    }
}

/// A direction attached to a measure (tempo, dynamics, navigation).
///
/// Directions anchor to the start of their measure; MusicXML offsets
/// within the measure are not tracked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Direction {
    /// Tempo in quarter notes per minute, from `<sound tempo>` or a
    /// metronome mark
    pub tempo_bpm: Option<f64>,
    /// Dynamic mark
    pub dynamic: Option<Dynamic>,
    /// Persistent technique change ("pizz." / "arco")
    pub technique: Option<Technique>,
    /// Segno marker (jump target for D.S.)
    pub segno: bool,
    /// Coda marker (jump target for To Coda)
    pub coda: bool,
    /// `<sound dalsegno>` — jump back to the segno
    pub sound_dalsegno: bool,
    /// `<sound dacapo>` — jump back to the beginning
    pub sound_dacapo: bool,
    /// `<sound fine>` — stop here on a post-jump pass
    pub sound_fine: bool,
    /// `<sound tocoda>` — jump to the coda on a post-jump pass
    pub sound_tocoda: bool,
    /// Free direction text (used to detect "Fine" when `<sound>` is absent)
    pub words: Option<String>,
}

/// Persistent playing technique switched by a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Technique {
    Pizzicato,
    Arco,
}

/// A barline (may include repeat signs and volta brackets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Barline {
    /// Which side of the measure the barline sits on
    pub location: BarlineLocation,
    /// Repeat sign
    pub repeat: Option<Repeat>,
    /// Volta bracket (1st/2nd ending)
    pub ending: Option<Ending>,
}

/// Barline placement within its measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarlineLocation {
    Left,
    Right,
}

/// A repeat sign on a barline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Repeat {
    pub direction: RepeatDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepeatDirection {
    Forward,
    Backward,
}

/// A volta bracket (1st/2nd ending).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ending {
    /// Ending number(s), e.g., "1", "2", "1, 2", "1-3"
    pub number: String,
    pub ending_type: EndingType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndingType {
    Start,
    Stop,
    Discontinue,
}

/// Tick geometry of one measure: where it starts and how long it is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureSpan {
    /// Absolute start tick (repeat expansion not applied)
    pub start: Tick,
    /// Length in ticks
    pub len: Tick,
}

impl MeasureSpan {
    pub fn end(&self) -> Tick {
        self.start + self.len
    }

    pub fn contains(&self, tick: Tick) -> bool {
        tick >= self.start && tick < self.end()
    }
}

impl Score {
    /// Create a new empty score.
    pub fn new() -> Self {
        Self {
            title: None,
            composer: None,
            version: None,
            parts: Vec::new(),
        }
    }

    /// Number of measures (all parts share the same measure structure).
    pub fn measure_count(&self) -> usize {
        self.parts.first().map_or(0, |p| p.measures.len())
    }

    /// Compute the raw tick span of every measure.
    ///
    /// Measure lengths come from the active time signature; implicit
    /// (pickup) measures take the length of their actual content when it
    /// is shorter than the nominal measure.
    pub fn measure_spans(&self) -> Vec<MeasureSpan> {
        let part = match self.parts.first() {
            Some(p) => p,
            None => return Vec::new(),
        };

        let mut spans = Vec::with_capacity(part.measures.len());
        let mut time_sig = TimeSignature::default();
        let mut divisions: i32 = 1;
        let mut start: Tick = 0;

        for measure in &part.measures {
            if let Some(ref attrs) = measure.attributes {
                if let Some(d) = attrs.divisions {
                    divisions = d;
                }
                if let Some(ts) = attrs.time {
                    time_sig = ts;
                }
            }

            let nominal = time_sig.ticks_per_measure();
            let mut len = nominal;

            if measure.implicit {
                let actual = content_tick_len(measure, divisions);
                if actual > 0 && actual < nominal {
                    len = actual;
                }
            }

            spans.push(MeasureSpan { start, len });
            start += len;
        }

        spans
    }

    /// First playable tick of the score.
    pub fn first_tick(&self) -> Tick {
        0
    }

    /// One past the last playable tick of the score.
    pub fn last_tick(&self) -> Tick {
        self.measure_spans().last().map_or(0, |s| s.end())
    }

    /// Index of the measure containing `tick`, clamped to the last
    /// measure for out-of-range ticks.
    pub fn measure_at_tick(&self, tick: Tick) -> Option<usize> {
        let spans = self.measure_spans();
        if spans.is_empty() {
            return None;
        }
        match spans.iter().position(|s| s.contains(tick)) {
            Some(i) => Some(i),
            None => Some(spans.len() - 1),
        }
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest per-(staff, voice) chain of note durations in a measure, in
/// ticks. Used for pickup measures where the nominal duration doesn't
/// match the actual content.
fn content_tick_len(measure: &Measure, divisions: i32) -> Tick {
    use std::collections::HashMap;

    let mut voice_totals: HashMap<(i32, i32), Tick> = HashMap::new();
    for note in &measure.notes {
        // Chord notes share time with the previous note — don't double-count
        if note.chord || note.grace {
            continue;
        }
        let key = (note.staff.unwrap_or(1), note.voice.unwrap_or(1));
        *voice_totals.entry(key).or_insert(0) += note.tick_len(divisions);
    }
    voice_totals.values().copied().max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quarter_note(step: &str, octave: i32) -> Note {
        Note {
            pitch: Some(Pitch { step: step.to_string(), octave, alter: None }),
            duration: 1,
            voice: Some(1),
            staff: None,
            rest: false,
            chord: false,
            grace: false,
            tie_start: false,
            tie_stop: false,
            articulations: Vec::new(),
        }
    }

    fn measure(number: i32, notes: Vec<Note>) -> Measure {
        Measure {
            number,
            implicit: false,
            attributes: None,
            notes,
            directions: Vec::new(),
            barlines: Vec::new(),
        }
    }

    #[test]
    fn pitch_to_midi() {
        let c4 = Pitch { step: "C".into(), octave: 4, alter: None };
        assert_eq!(c4.to_midi(), 60);
        let fs3 = Pitch { step: "F".into(), octave: 3, alter: Some(1.0) };
        assert_eq!(fs3.to_midi(), 54);
        let bb4 = Pitch { step: "B".into(), octave: 4, alter: Some(-1.0) };
        assert_eq!(bb4.to_midi(), 70);
    }

    #[test]
    fn measure_spans_follow_time_signature() {
        let mut score = Score::new();
        let mut m1 = measure(1, vec![quarter_note("C", 4); 4]);
        m1.attributes = Some(Attributes {
            divisions: Some(1),
            key: None,
            time: Some(TimeSignature { beats: 4, beat_type: 4 }),
            staves: None,
        });
        let mut m2 = measure(2, vec![quarter_note("D", 4); 3]);
        m2.attributes = Some(Attributes {
            divisions: None,
            key: None,
            time: Some(TimeSignature { beats: 3, beat_type: 4 }),
            staves: None,
        });
        score.parts.push(Part {
            id: "P1".into(),
            name: "Test".into(),
            instruments: Vec::new(),
            measures: vec![m1, m2],
        });

        let spans = score.measure_spans();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0], MeasureSpan { start: 0, len: 4 * TICKS_PER_QUARTER });
        assert_eq!(spans[1], MeasureSpan { start: 4 * TICKS_PER_QUARTER, len: 3 * TICKS_PER_QUARTER });
        assert_eq!(score.last_tick(), 7 * TICKS_PER_QUARTER);
    }

    #[test]
    fn pickup_measure_takes_content_length() {
        let mut score = Score::new();
        let mut m1 = measure(0, vec![quarter_note("G", 4)]);
        m1.implicit = true;
        m1.attributes = Some(Attributes {
            divisions: Some(1),
            key: None,
            time: Some(TimeSignature { beats: 4, beat_type: 4 }),
            staves: None,
        });
        let m2 = measure(1, vec![quarter_note("C", 4); 4]);
        score.parts.push(Part {
            id: "P1".into(),
            name: "Test".into(),
            instruments: Vec::new(),
            measures: vec![m1, m2],
        });

        let spans = score.measure_spans();
        assert_eq!(spans[0].len, TICKS_PER_QUARTER);
        assert_eq!(spans[1].start, TICKS_PER_QUARTER);
    }

    #[test]
    fn measure_at_tick_clamps_out_of_range() {
        let mut score = Score::new();
        let mut m1 = measure(1, vec![quarter_note("C", 4); 4]);
        m1.attributes = Some(Attributes {
            divisions: Some(1),
            key: None,
            time: Some(TimeSignature { beats: 4, beat_type: 4 }),
            staves: None,
        });
        score.parts.push(Part {
            id: "P1".into(),
            name: "Test".into(),
            instruments: Vec::new(),
            measures: vec![m1],
        });

        assert_eq!(score.measure_at_tick(0), Some(0));
        assert_eq!(score.measure_at_tick(100_000), Some(0));
    }
}
