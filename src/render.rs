//! Event rendering: converts score measures into timestamped playback
//! events, and the time map into metronome clicks.
//!
//! Rendering is pure with respect to its inputs — identical (measure
//! range, context, profile) input produces identical output, which is
//! what makes replace-on-edit re-rendering safe. Malformed measures are
//! skipped; the rest of the range still renders.

use std::collections::HashMap;

use crate::context::PlaybackContext;
use crate::events::{NoteEvent, PlaybackEvent, RestEvent, SourcePosition};
use crate::model::{Score, Tick};
use crate::profile::ArticulationProfile;
use crate::repeats::RepeatList;
use crate::timemap::TimeMap;

/// How far a tie chain may be followed, in measures. Bounds the forward
/// scan on pathological input.
const MAX_TIE_CHAIN_MEASURES: usize = 32;

/// Render one part's measures in [measure_from, measure_to) into events,
/// once per repeat occurrence.
///
/// Returns events for every occurrence of the range in the played
/// timeline; the caller merges them into the track's event map.
pub fn render_part_window(
    score: &Score,
    part_idx: usize,
    measure_from: usize,
    measure_to: usize,
    repeats: &RepeatList,
    timemap: &TimeMap,
    ctx: &PlaybackContext,
    profile: &ArticulationProfile,
) -> Vec<PlaybackEvent> {
    let part = match score.parts.get(part_idx) {
        Some(p) => p,
        None => return Vec::new(),
    };
    let spans = score.measure_spans();
    let divisions = measure_divisions(score);

    let mut events = Vec::new();

    for measure_idx in measure_from..measure_to.min(part.measures.len()) {
        let measure = &part.measures[measure_idx];
        let span = match spans.get(measure_idx) {
            Some(s) => *s,
            None => continue,
        };
        let div = divisions.get(measure_idx).copied().unwrap_or(1).max(1);

        // A segment always contains whole measures, so each overlapping
        // segment is one full occurrence of this measure.
        for segment in repeats.segments_overlapping_raw(span.start, span.end()) {
            let offset = segment.tick_offset();

            // Per-(staff, voice) position tracking for correct
            // multi-voice timing; chord notes share their principal
            // note's onset.
            type VoiceKey = (i32, i32);
            let mut voice_positions: HashMap<VoiceKey, Tick> = HashMap::new();
            let mut voice_last_onset: HashMap<VoiceKey, Tick> = HashMap::new();

            for (note_idx, note) in measure.notes.iter().enumerate() {
                if note.grace {
                    continue;
                }

                let vk: VoiceKey = (note.staff.unwrap_or(1), note.voice.unwrap_or(1));
                let pos = voice_positions.entry(vk).or_insert(0);
                let note_len = note.tick_len(div);

                if note.rest {
                    let onset_raw = span.start + *pos;
                    events.push(PlaybackEvent::Rest(rest_event(
                        onset_raw, note_len, offset, vk.1, measure_idx, timemap,
                    )));
                    *pos += note_len;
                    continue;
                }

                let onset_offset = if note.chord {
                    voice_last_onset.get(&vk).copied().unwrap_or(0)
                } else {
                    let onset = *pos;
                    voice_last_onset.insert(vk, onset);
                    *pos += note_len;
                    onset
                };

                // Only the head of a tie chain produces an event; the
                // chain's full length is folded into its duration.
                if note.tie_stop {
                    continue;
                }

                let pitch = match note.pitch.as_ref() {
                    Some(p) => p.to_midi().clamp(0, 127) as u8,
                    None => continue,
                };

                let onset_raw = span.start + onset_offset;
                let mut total_len = note_len;
                if note.tie_start {
                    total_len += tie_continuation_ticks(
                        score, part_idx, measure_idx, note_idx, &divisions, pitch, vk,
                    );
                }

                let mut articulations = note.articulations.clone();
                if let Some(persistent) = ctx.persistent_articulation_at(onset_raw) {
                    if !articulations.contains(&persistent) {
                        articulations.push(persistent);
                    }
                }

                let mut length_factor: f64 = 1.0;
                let mut velocity_delta: i16 = 0;
                for &articulation in &articulations {
                    let patch = profile.patch(articulation);
                    length_factor = length_factor.min(patch.length_factor);
                    velocity_delta += patch.velocity_delta;
                }

                let played_on = apply_offset(onset_raw, offset);
                let played_off = apply_offset(onset_raw + total_len, offset);
                let on_ms = timemap.played_tick_to_ms(played_on);
                let off_ms = timemap.played_tick_to_ms(played_off);
                let duration_ms = ((off_ms - on_ms) * length_factor).max(0.0);

                let level = ctx.nominal_dynamic_at(onset_raw) as i16 + velocity_delta;

                events.push(PlaybackEvent::Note(NoteEvent {
                    timestamp_ms: on_ms.round() as u64,
                    duration_ms: duration_ms.round() as u64,
                    voice: vk.1,
                    pitch,
                    dynamic_level: level.clamp(1, 127) as u8,
                    articulations,
                    source: SourcePosition { tick: onset_raw, measure: measure_idx },
                }));
            }
        }
    }

    events
}

/// Render the metronome track: one click per beat of every played
/// measure, with an accented (higher-pitched, louder) downbeat.
pub fn render_metronome(timemap: &TimeMap) -> Vec<PlaybackEvent> {
    const CLICK_MS: f64 = 100.0;
    const CLICK_HI: u8 = 71; // downbeat
    const CLICK_LO: u8 = 69;

    let mut events = Vec::new();

    for entry in timemap.entries() {
        let ticks_per_beat = entry.time_sig.ticks_per_beat().max(1);
        // Pickup measures carry fewer beats than the nominal signature.
        let beats = (entry.tick_len / ticks_per_beat).max(1);
        let beat_ms = entry.duration_ms / (entry.tick_len as f64 / ticks_per_beat as f64).max(1e-9);

        for b in 0..beats {
            let timestamp = entry.timestamp_ms + b as f64 * beat_ms;
            let click_tick = entry.played_start + b * ticks_per_beat;
            events.push(PlaybackEvent::Note(NoteEvent {
                timestamp_ms: timestamp.round() as u64,
                duration_ms: CLICK_MS.min(beat_ms).round() as u64,
                voice: 0,
                pitch: if b == 0 { CLICK_HI } else { CLICK_LO },
                dynamic_level: if b == 0 { 100 } else { 80 },
                articulations: Vec::new(),
                source: SourcePosition { tick: click_tick, measure: entry.raw_measure },
            }));
        }
    }

    events
}

fn rest_event(
    onset_raw: Tick,
    len: Tick,
    offset: i64,
    voice: i32,
    measure_idx: usize,
    timemap: &TimeMap,
) -> RestEvent {
    let on_ms = timemap.played_tick_to_ms(apply_offset(onset_raw, offset));
    let off_ms = timemap.played_tick_to_ms(apply_offset(onset_raw + len, offset));
    RestEvent {
        timestamp_ms: on_ms.round() as u64,
        duration_ms: (off_ms - on_ms).max(0.0).round() as u64,
        voice,
        source: SourcePosition { tick: onset_raw, measure: measure_idx },
    }
}

fn apply_offset(raw: Tick, offset: i64) -> Tick {
    (raw as i64 + offset).max(0) as Tick
}

/// Extra ticks contributed by the tie chain continuing after a
/// tie-start note: the sum of tied-to note durations in the same
/// (staff, voice) at the same pitch, across following measures.
fn tie_continuation_ticks(
    score: &Score,
    part_idx: usize,
    measure_idx: usize,
    note_idx: usize,
    divisions: &[i32],
    pitch: u8,
    vk: (i32, i32),
) -> Tick {
    let part = match score.parts.get(part_idx) {
        Some(p) => p,
        None => return 0,
    };

    let mut extra: Tick = 0;
    let mut chain_open = true;
    let mut m_idx = measure_idx;
    let mut start_note = note_idx + 1;
    let limit = (measure_idx + MAX_TIE_CHAIN_MEASURES).min(part.measures.len());

    while chain_open && m_idx < limit {
        let measure = &part.measures[m_idx];
        let div = divisions.get(m_idx).copied().unwrap_or(1).max(1);

        for note in measure.notes.iter().skip(start_note) {
            if note.grace || note.rest {
                continue;
            }
            if (note.staff.unwrap_or(1), note.voice.unwrap_or(1)) != vk {
                continue;
            }
            let same_pitch = note
                .pitch
                .as_ref()
                .map_or(false, |p| p.to_midi().clamp(0, 127) as u8 == pitch);
            if note.tie_stop && same_pitch {
                extra += note.tick_len(div);
                chain_open = note.tie_start;
                if !chain_open {
                    return extra;
                }
            }
        }

        m_idx += 1;
        start_note = 0;
    }

    extra
}

/// Effective divisions resolution at each measure, walked in score order.
fn measure_divisions(score: &Score) -> Vec<i32> {
    let part = match score.parts.first() {
        Some(p) => p,
        None => return Vec::new(),
    };
    let mut out = Vec::with_capacity(part.measures.len());
    let mut divisions = 1;
    for measure in &part.measures {
        if let Some(ref attrs) = measure.attributes {
            if let Some(d) = attrs.divisions {
                divisions = d;
            }
        }
        out.push(divisions);
    }
    out
}
