//! Repeat and jump expansion — flattens a score's repeat structure into a
//! linear play-order timeline of tick segments.
//!
//! Handles:
//! - Forward / backward repeat barlines
//! - Volta brackets (1st / 2nd / Nth endings)
//! - D.S. (dal segno) — jump to segno
//! - D.C. (da capo) — jump to beginning
//! - Fine — stop on D.S./D.C. pass (from `<sound fine>` or "Fine" text)
//! - To Coda / Coda — jump to the coda section
//! - Senza ripetizione: repeats are NOT taken again after a D.S./D.C. jump
//!
//! The result is a [`RepeatList`]: ordered (played-tick, raw-tick, length)
//! segments. Every tick lookup between raw score positions and played
//! timeline positions is resolved through this layer.

use crate::model::{
    BarlineLocation, EndingType, Measure, RepeatDirection, Score, Tick,
};

/// One contiguous run of measures in the played timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatSegment {
    /// Start position in the played (expanded) timeline
    pub played_start: Tick,
    /// Start position in the raw score
    pub raw_start: Tick,
    /// Length in ticks
    pub len: Tick,
}

impl RepeatSegment {
    pub fn played_end(&self) -> Tick {
        self.played_start + self.len
    }

    pub fn raw_end(&self) -> Tick {
        self.raw_start + self.len
    }

    /// Offset to add to a raw tick to get its played position in this
    /// segment. Negative when earlier material was elided.
    pub fn tick_offset(&self) -> i64 {
        self.played_start as i64 - self.raw_start as i64
    }
}

/// Expanded play-order timeline.
#[derive(Debug, Clone, Default)]
pub struct RepeatList {
    segments: Vec<RepeatSegment>,
    total_len: Tick,
    /// Play order of original measure indices (one entry per played measure)
    order: Vec<usize>,
}

impl RepeatList {
    /// Expand a score's repeat structure.
    ///
    /// With `play_repeats` disabled the list degenerates to a single
    /// identity segment covering the whole score.
    pub fn expand(score: &Score, play_repeats: bool) -> Self {
        let spans = score.measure_spans();
        if spans.is_empty() {
            return Self::default();
        }

        let order: Vec<usize> = if play_repeats {
            unroll_measures(score)
        } else {
            (0..spans.len()).collect()
        };

        // Coalesce runs of consecutive original measures into segments.
        let mut segments: Vec<RepeatSegment> = Vec::new();
        let mut played: Tick = 0;

        for &idx in &order {
            let span = spans[idx];
            match segments.last_mut() {
                Some(seg) if seg.raw_end() == span.start && seg.played_end() == played => {
                    seg.len += span.len;
                }
                _ => {
                    segments.push(RepeatSegment {
                        played_start: played,
                        raw_start: span.start,
                        len: span.len,
                    });
                }
            }
            played += span.len;
        }

        Self { segments, total_len: played, order }
    }

    pub fn segments(&self) -> &[RepeatSegment] {
        &self.segments
    }

    /// Original measure indices in play order.
    pub fn measure_order(&self) -> &[usize] {
        &self.order
    }

    /// Total length of the played timeline in ticks.
    pub fn total_len(&self) -> Tick {
        self.total_len
    }

    /// Map a raw tick to its first occurrence in the played timeline.
    /// Out-of-range ticks clamp to the nearest timeline boundary.
    pub fn raw_to_played(&self, raw: Tick) -> Tick {
        for seg in &self.segments {
            if raw >= seg.raw_start && raw < seg.raw_end() {
                return seg.played_start + (raw - seg.raw_start);
            }
        }
        // Not covered: either past the end, or inside a range elided by
        // a volta/jump. Clamp to the closest boundary of a covering run.
        if raw >= self.segments.last().map_or(0, |s| s.raw_end()) {
            return self.total_len;
        }
        self.segments
            .iter()
            .find(|seg| seg.raw_start > raw)
            .map_or(self.total_len, |seg| seg.played_start)
    }

    /// Map a played tick back to the raw score tick it plays.
    /// Out-of-range ticks clamp to the nearest valid raw position.
    pub fn played_to_raw(&self, played: Tick) -> Tick {
        for seg in &self.segments {
            if played >= seg.played_start && played < seg.played_end() {
                return seg.raw_start + (played - seg.played_start);
            }
        }
        self.segments.last().map_or(0, |s| s.raw_end())
    }

    /// All played occurrences of one raw tick (a repeated passage plays
    /// more than once).
    pub fn occurrences(&self, raw: Tick) -> Vec<Tick> {
        self.segments
            .iter()
            .filter(|seg| raw >= seg.raw_start && raw < seg.raw_end())
            .map(|seg| seg.played_start + (raw - seg.raw_start))
            .collect()
    }

    /// Segments whose raw range overlaps [raw_from, raw_to).
    pub fn segments_overlapping_raw(&self, raw_from: Tick, raw_to: Tick) -> Vec<RepeatSegment> {
        self.segments
            .iter()
            .filter(|seg| seg.raw_start < raw_to && seg.raw_end() > raw_from)
            .copied()
            .collect()
    }
}

/// Unroll a score's measures into play order.
///
/// The algorithm walks through the measures linearly, following repeat
/// barlines (with volta handling) and navigation jumps (D.S., D.C.,
/// Coda, Fine). All parts share the same structure, so the first part's
/// measures drive the walk.
fn unroll_measures(score: &Score) -> Vec<usize> {
    let measures = match score.parts.first() {
        Some(p) => &p.measures,
        None => return Vec::new(),
    };
    if measures.is_empty() {
        return Vec::new();
    }

    // ── Pre-scan: locate segno, coda markers ────────────────────────
    let mut segno_index: Option<usize> = None;
    let mut coda_index: Option<usize> = None;

    for (i, m) in measures.iter().enumerate() {
        for dir in &m.directions {
            if dir.segno {
                segno_index = Some(i);
            }
            if dir.coda {
                coda_index = Some(i);
            }
        }
    }

    // ── Pre-scan: build volta (ending) map ──────────────────────────
    let mut volta_map: std::collections::HashMap<usize, Vec<i32>> =
        std::collections::HashMap::new();
    let mut current_ending: Option<Vec<i32>> = None;
    for (i, m) in measures.iter().enumerate() {
        for bl in &m.barlines {
            if let Some(ref ending) = bl.ending {
                match ending.ending_type {
                    EndingType::Start => {
                        let nums = parse_ending_numbers(&ending.number);
                        current_ending = Some(nums.clone());
                        volta_map.insert(i, nums);
                    }
                    EndingType::Stop | EndingType::Discontinue => {
                        if let Some(ref nums) = current_ending {
                            volta_map.entry(i).or_insert_with(|| nums.clone());
                        }
                        current_ending = None;
                    }
                }
            }
        }
        if let Some(ref nums) = current_ending {
            volta_map.entry(i).or_insert_with(|| nums.clone());
        }
    }

    // ── Pre-scan: compute max passes per repeat section ─────────────
    // For each forward-repeat position, the highest volta ending number
    // in its section tells us how many passes to take.
    let mut section_max_passes: std::collections::HashMap<usize, i32> =
        std::collections::HashMap::new();
    {
        // Start with 0 as the implicit forward repeat position (handles
        // backward repeats with no explicit forward barline).
        let mut current_forward: usize = 0;
        for (i, m) in measures.iter().enumerate() {
            for bl in &m.barlines {
                if bl.location == BarlineLocation::Left {
                    if let Some(rep) = bl.repeat {
                        if rep.direction == RepeatDirection::Forward {
                            current_forward = i;
                        }
                    }
                }
            }
            if let Some(nums) = volta_map.get(&i) {
                let entry = section_max_passes.entry(current_forward).or_insert(2);
                for &n in nums {
                    if n > *entry {
                        *entry = n;
                    }
                }
            }
        }
    }

    // ── Walk: expand into play order ────────────────────────────────
    let mut result: Vec<usize> = Vec::new();
    let mut pos: usize = 0;
    let mut repeat_start: usize = 0;
    let mut repeat_pass: i32 = 1; // 1-based pass counter
    let mut jump_taken = false;
    // Safety limit: a section with N endings iterates ~N × its length.
    let max_iterations = measures.len() * 50;
    let mut iterations = 0;

    while pos < measures.len() {
        iterations += 1;
        if iterations > max_iterations {
            log::warn!(
                "repeat expansion hit safety limit ({max_iterations} iterations) — \
                 output may be truncated. Raw measures: {}, expanded so far: {}",
                measures.len(),
                result.len()
            );
            break;
        }

        let m = &measures[pos];

        // Forward repeat barline (left barline). Only update repeat_start
        // on the first pass; on later passes we jumped back here.
        for bl in &m.barlines {
            if bl.location == BarlineLocation::Left {
                if let Some(rep) = bl.repeat {
                    if rep.direction == RepeatDirection::Forward && repeat_pass == 1 {
                        repeat_start = pos;
                    }
                }
            }
        }

        // Volta: skip measures whose ending number doesn't match this pass.
        if let Some(nums) = volta_map.get(&pos) {
            if !nums.contains(&repeat_pass) {
                pos += 1;
                continue;
            }
        }

        // Fine — stop if we've already taken a D.S./D.C. jump.
        if jump_taken && measure_has_fine(m) {
            result.push(pos);
            break;
        }

        // "To Coda" (only honored after a D.S./D.C. jump)
        if jump_taken {
            let mut goto_coda = false;
            for dir in &m.directions {
                if dir.sound_tocoda {
                    if let Some(coda_idx) = coda_index {
                        pos = coda_idx;
                        jump_taken = false; // reset so we don't loop
                        goto_coda = true;
                        break;
                    }
                }
            }
            if goto_coda {
                continue;
            }
        }

        // Emit this measure
        result.push(pos);

        // Backward repeat barline (right barline).
        // SENZA RIPETIZIONE: after a D.S./D.C. jump, repeats are not taken.
        let mut took_repeat = false;
        if !jump_taken {
            for bl in &m.barlines {
                if bl.location == BarlineLocation::Right {
                    if let Some(rep) = bl.repeat {
                        if rep.direction == RepeatDirection::Backward {
                            let max_pass = section_max_passes
                                .get(&repeat_start)
                                .copied()
                                .unwrap_or(2);
                            if repeat_pass < max_pass {
                                repeat_pass += 1;
                                pos = repeat_start;
                                took_repeat = true;
                                break;
                            }
                            // Last pass done — continue forward.
                        }
                    }
                }
            }
        }
        if took_repeat {
            continue;
        }

        // D.S. / D.C. jumps
        if !jump_taken {
            let mut jumped = false;
            for dir in &m.directions {
                if dir.sound_dalsegno {
                    if let Some(segno_idx) = segno_index {
                        pos = segno_idx;
                        jump_taken = true;
                        repeat_pass = 1;
                        jumped = true;
                        break;
                    }
                }
                if dir.sound_dacapo {
                    pos = 0;
                    jump_taken = true;
                    repeat_pass = 1;
                    jumped = true;
                    break;
                }
            }
            if jumped {
                continue;
            }
        }

        pos += 1;
        // Reset pass tracking once we've moved past a finished repeat
        // section (and any trailing volta bracket).
        if repeat_pass > 1 {
            let prev_had_backward = measures.get(pos.wrapping_sub(1)).map_or(false, |pm| {
                pm.barlines.iter().any(|bl| {
                    bl.location == BarlineLocation::Right
                        && bl
                            .repeat
                            .map_or(false, |r| r.direction == RepeatDirection::Backward)
                })
            });
            if prev_had_backward && !volta_map.contains_key(&pos) {
                repeat_pass = 1;
                // Future backward repeats without an explicit forward
                // barline loop back to this position, not the previous
                // section's start.
                repeat_start = pos;
            }
        }
    }

    result
}

/// Check if a measure contains a Fine marker, either via
/// `<sound fine="yes">` or via "Fine" in direction words (excluding
/// "D.S. al Fine" / "D.C. al Fine" which are jump instructions).
fn measure_has_fine(m: &Measure) -> bool {
    m.directions.iter().any(|dir| {
        if dir.sound_fine {
            return true;
        }
        if let Some(ref w) = dir.words {
            let lower = w.to_lowercase();
            if lower.contains("fine") && !lower.contains("d.s.") && !lower.contains("d.c.") {
                return true;
            }
        }
        false
    })
}

/// Parse ending number strings like "1", "2", "1, 2", or "1-3".
fn parse_ending_numbers(s: &str) -> Vec<i32> {
    let mut result = Vec::new();
    for part in s.split(|c: char| c == ',' || c == ' ') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        // Range notation like "1-3"
        if let Some(dash_pos) = part.find('-') {
            if dash_pos > 0 {
                if let (Ok(start), Ok(end)) = (
                    part[..dash_pos].parse::<i32>(),
                    part[dash_pos + 1..].parse::<i32>(),
                ) {
                    for n in start..=end {
                        result.push(n);
                    }
                    continue;
                }
            }
        }
        if let Ok(n) = part.parse::<i32>() {
            result.push(n);
        }
    }
    // If nothing parsed, default to [1] so the measure is reachable.
    if result.is_empty() && !s.trim().is_empty() {
        result.push(1);
    }
    result
}
