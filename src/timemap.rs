//! Tick ↔ wall-clock mapping over the played (repeat-expanded) timeline.
//!
//! The map holds one entry per played measure and answers "when does this
//! tick sound?" and "which tick sounds at this time?". Out-of-range
//! lookups clamp to the nearest timeline boundary instead of failing:
//! a stale map must never invent coordinates for removed measures.

use crate::model::{MeasureSpan, Score, Tick, TimeSignature};
use crate::repeats::RepeatList;

/// Default tempo if none is specified in the score.
const DEFAULT_TEMPO: f64 = 120.0;

/// Timing information for one measure in the played sequence.
#[derive(Debug, Clone)]
pub struct TimeMapEntry {
    /// Start position in the played timeline
    pub played_start: Tick,
    /// Length of the measure in ticks
    pub tick_len: Tick,
    /// Index into the original measure list
    pub raw_measure: usize,
    /// Cumulative start time in milliseconds
    pub timestamp_ms: f64,
    /// Duration of this measure in milliseconds
    pub duration_ms: f64,
    /// Active tempo (BPM) at this measure
    pub tempo_bpm: f64,
    /// Active time signature
    pub time_sig: TimeSignature,
}

impl TimeMapEntry {
    pub fn played_end(&self) -> Tick {
        self.played_start + self.tick_len
    }
}

/// Current tempo at a score position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tempo {
    pub bpm: f64,
}

/// Measure/beat coordinates of a score position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MeasureBeat {
    /// 0-based measure index
    pub measure: usize,
    /// 0-based beat index within the measure
    pub beat: usize,
    /// Total number of measures
    pub measure_count: usize,
    /// Number of beats in this measure
    pub beat_count: usize,
}

/// State snapshot at a particular original measure position.
/// Pre-computed by walking measures in score order so that jumps
/// (D.S., D.C.) correctly restore the tempo/time signature that was
/// in effect at the jump destination.
#[derive(Debug, Clone, Copy)]
struct MeasureState {
    tempo: f64,
    time_sig: TimeSignature,
}

/// Played-timeline time map.
#[derive(Debug, Clone, Default)]
pub struct TimeMap {
    entries: Vec<TimeMapEntry>,
    total_ms: f64,
    /// Raw measure geometry, for beat arithmetic
    spans: Vec<MeasureSpan>,
    states: Vec<MeasureState>,
}

impl TimeMap {
    /// Build the map for a score under the given repeat expansion.
    pub fn build(score: &Score, repeats: &RepeatList) -> Self {
        let spans = score.measure_spans();
        let states = precompute_measure_states(score);

        let mut entries = Vec::with_capacity(repeats.measure_order().len());
        let mut current_ms: f64 = 0.0;
        let mut played: Tick = 0;

        for &raw_idx in repeats.measure_order() {
            let span = match spans.get(raw_idx) {
                Some(s) => *s,
                None => continue,
            };
            let state = states[raw_idx];

            let quarters = span.len as f64 / crate::model::TICKS_PER_QUARTER as f64;
            let ms_per_quarter = 60_000.0 / state.tempo;
            let duration_ms = quarters * ms_per_quarter;

            entries.push(TimeMapEntry {
                played_start: played,
                tick_len: span.len,
                raw_measure: raw_idx,
                timestamp_ms: current_ms,
                duration_ms,
                tempo_bpm: state.tempo,
                time_sig: state.time_sig,
            });

            current_ms += duration_ms;
            played += span.len;
        }

        Self { entries, total_ms: current_ms, spans, states }
    }

    pub fn entries(&self) -> &[TimeMapEntry] {
        &self.entries
    }

    /// Total duration of the played timeline in milliseconds.
    pub fn total_play_time_ms(&self) -> f64 {
        self.total_ms
    }

    /// Convert a played tick to milliseconds, clamping out-of-range
    /// positions to the timeline boundaries.
    pub fn played_tick_to_ms(&self, played: Tick) -> f64 {
        let entry = match self.entry_at_played(played) {
            Some(e) => e,
            None => return self.total_ms,
        };
        let into = played.saturating_sub(entry.played_start) as f64;
        if entry.tick_len == 0 {
            return entry.timestamp_ms;
        }
        entry.timestamp_ms + (into / entry.tick_len as f64) * entry.duration_ms
    }

    /// Convert milliseconds on the played timeline back to a played tick,
    /// clamping to the timeline boundaries.
    pub fn ms_to_played_tick(&self, ms: f64) -> Tick {
        if self.entries.is_empty() || ms <= 0.0 {
            return 0;
        }
        for entry in &self.entries {
            if ms < entry.timestamp_ms + entry.duration_ms {
                let into = (ms - entry.timestamp_ms).max(0.0);
                let frac = if entry.duration_ms > 0.0 {
                    into / entry.duration_ms
                } else {
                    0.0
                };
                return entry.played_start + (frac * entry.tick_len as f64).round() as Tick;
            }
        }
        self.entries.last().map_or(0, |e| e.played_end())
    }

    /// Tempo in effect at a raw tick.
    pub fn tempo_at(&self, raw_tick: Tick) -> Tempo {
        let idx = self.raw_measure_at(raw_tick);
        let bpm = self
            .states
            .get(idx)
            .map_or(DEFAULT_TEMPO, |s| s.tempo);
        Tempo { bpm }
    }

    /// Measure/beat coordinates of a raw tick.
    pub fn beat_at(&self, raw_tick: Tick) -> MeasureBeat {
        let idx = self.raw_measure_at(raw_tick);
        let (span, state) = match (self.spans.get(idx), self.states.get(idx)) {
            (Some(sp), Some(st)) => (sp, st),
            _ => return MeasureBeat::default(),
        };
        let ticks_per_beat = state.time_sig.ticks_per_beat().max(1);
        let into = raw_tick.saturating_sub(span.start).min(span.len.saturating_sub(1));
        MeasureBeat {
            measure: idx,
            beat: (into / ticks_per_beat) as usize,
            measure_count: self.spans.len(),
            beat_count: (span.len / ticks_per_beat).max(1) as usize,
        }
    }

    /// Raw tick at the given measure/beat coordinates (both 0-based),
    /// clamped to valid positions.
    pub fn beat_to_tick(&self, measure: usize, beat: usize) -> Tick {
        let idx = measure.min(self.spans.len().saturating_sub(1));
        let (span, state) = match (self.spans.get(idx), self.states.get(idx)) {
            (Some(sp), Some(st)) => (sp, st),
            _ => return 0,
        };
        let ticks_per_beat = state.time_sig.ticks_per_beat();
        let offset = (beat as Tick * ticks_per_beat).min(span.len.saturating_sub(1));
        span.start + offset
    }

    fn entry_at_played(&self, played: Tick) -> Option<&TimeMapEntry> {
        if self.entries.is_empty() {
            return None;
        }
        for entry in &self.entries {
            if played >= entry.played_start && played < entry.played_end() {
                return Some(entry);
            }
        }
        // Clamp: before the first entry is impossible (timeline starts at
        // 0), so this is a past-the-end tick.
        None
    }

    fn raw_measure_at(&self, raw_tick: Tick) -> usize {
        match self.spans.iter().position(|s| s.contains(raw_tick)) {
            Some(i) => i,
            None => self.spans.len().saturating_sub(1),
        }
    }
}

/// Pre-compute the effective state (tempo, time signature) at each
/// original measure index by walking through the score in order.
fn precompute_measure_states(score: &Score) -> Vec<MeasureState> {
    let part = match score.parts.first() {
        Some(p) => p,
        None => return Vec::new(),
    };

    let mut states = Vec::with_capacity(part.measures.len());
    let mut tempo = DEFAULT_TEMPO;
    let mut time_sig = TimeSignature::default();

    for measure in &part.measures {
        if let Some(ref attrs) = measure.attributes {
            if let Some(ts) = attrs.time {
                time_sig = ts;
            }
        }
        for dir in &measure.directions {
            if let Some(t) = dir.tempo_bpm {
                if t > 0.0 {
                    tempo = t;
                }
            }
        }
        states.push(MeasureState { tempo, time_sig });
    }

    states
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn note() -> Note {
        Note {
            pitch: Some(Pitch { step: "C".into(), octave: 4, alter: None }),
            duration: 4,
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

    fn measure(number: i32, tempo: Option<f64>) -> Measure {
        let mut directions = Vec::new();
        if let Some(bpm) = tempo {
            directions.push(Direction { tempo_bpm: Some(bpm), ..Direction::default() });
        }
        Measure {
            number,
            implicit: false,
            attributes: None,
            notes: vec![note()],
            directions,
            barlines: Vec::new(),
        }
    }

    fn score_of(measures: Vec<Measure>) -> Score {
        let mut measures = measures;
        if let Some(m) = measures.first_mut() {
            m.attributes = Some(Attributes {
                divisions: Some(1),
                key: None,
                time: Some(TimeSignature { beats: 4, beat_type: 4 }),
                staves: None,
            });
        }
        let mut score = Score::new();
        score.parts.push(Part {
            id: "P1".into(),
            name: "Test".into(),
            instruments: Vec::new(),
            measures,
        });
        score
    }

    const M: Tick = 4 * TICKS_PER_QUARTER;

    #[test]
    fn constant_tempo_conversions() {
        let score = score_of(vec![measure(1, Some(120.0)), measure(2, None)]);
        let repeats = RepeatList::expand(&score, true);
        let map = TimeMap::build(&score, &repeats);

        // 4/4 at 120 bpm = 2000 ms per measure
        assert_eq!(map.total_play_time_ms(), 4000.0);
        assert_eq!(map.played_tick_to_ms(0), 0.0);
        assert_eq!(map.played_tick_to_ms(M), 2000.0);
        assert_eq!(map.played_tick_to_ms(M / 2), 1000.0);
        assert_eq!(map.ms_to_played_tick(1000.0), M / 2);
    }

    #[test]
    fn roundtrip_within_bounds() {
        let score = score_of(vec![
            measure(1, Some(90.0)),
            measure(2, Some(140.0)),
            measure(3, None),
        ]);
        let repeats = RepeatList::expand(&score, true);
        let map = TimeMap::build(&score, &repeats);

        for tick in (0..3 * M).step_by(120) {
            let ms = map.played_tick_to_ms(tick);
            assert_eq!(map.ms_to_played_tick(ms), tick, "roundtrip at tick {tick}");
        }
    }

    #[test]
    fn tempo_change_shortens_measures() {
        let score = score_of(vec![measure(1, Some(60.0)), measure(2, Some(120.0))]);
        let repeats = RepeatList::expand(&score, true);
        let map = TimeMap::build(&score, &repeats);

        assert_eq!(map.entries()[0].duration_ms, 4000.0);
        assert_eq!(map.entries()[1].duration_ms, 2000.0);
        assert_eq!(map.tempo_at(0).bpm, 60.0);
        assert_eq!(map.tempo_at(M).bpm, 120.0);
    }

    #[test]
    fn out_of_range_clamps() {
        let score = score_of(vec![measure(1, Some(120.0))]);
        let repeats = RepeatList::expand(&score, true);
        let map = TimeMap::build(&score, &repeats);

        assert_eq!(map.played_tick_to_ms(100 * M), 2000.0);
        assert_eq!(map.ms_to_played_tick(1e9), M);
        assert_eq!(map.ms_to_played_tick(-5.0), 0);
    }

    #[test]
    fn beat_arithmetic() {
        let score = score_of(vec![measure(1, Some(120.0)), measure(2, None)]);
        let repeats = RepeatList::expand(&score, true);
        let map = TimeMap::build(&score, &repeats);

        assert_eq!(map.beat_to_tick(0, 0), 0);
        assert_eq!(map.beat_to_tick(0, 2), 2 * TICKS_PER_QUARTER);
        assert_eq!(map.beat_to_tick(1, 1), M + TICKS_PER_QUARTER);

        let mb = map.beat_at(M + TICKS_PER_QUARTER);
        assert_eq!(mb.measure, 1);
        assert_eq!(mb.beat, 1);
        assert_eq!(mb.measure_count, 2);
        assert_eq!(mb.beat_count, 4);
    }
}
