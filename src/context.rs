//! Per-track playback context: the dynamic level and persistent playing
//! technique in effect at any score position.
//!
//! State is keyed by raw tick. Events are always interpreted with the
//! context entry at-or-before their own position — never a later
//! snapshot — so a dynamics change later in the piece cannot leak
//! backward into earlier events during a partial re-render.

use std::collections::BTreeMap;

use crate::model::{Articulation, Score, Technique, Tick};

/// Dynamic level assumed when the score marks nothing (mf).
pub const NATURAL_DYNAMIC_LEVEL: u8 = 80;

/// Accumulated expressive state for one track.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackContext {
    dynamics: BTreeMap<Tick, u8>,
    techniques: BTreeMap<Tick, Technique>,
}

impl PlaybackContext {
    /// Re-scan the part's directions in [tick_from, tick_to) and refresh
    /// the state entries anchored there. Entries outside the window are
    /// left untouched.
    pub fn update(&mut self, score: &Score, part_id: &str, tick_from: Tick, tick_to: Tick) {
        self.clear_range(tick_from, tick_to);

        let part = match score.parts.iter().find(|p| p.id == part_id) {
            Some(p) => p,
            None => return,
        };
        let spans = score.measure_spans();

        for (idx, measure) in part.measures.iter().enumerate() {
            let span = match spans.get(idx) {
                Some(s) => *s,
                None => continue,
            };
            // Directions anchor to their measure's start tick.
            if span.start < tick_from || span.start >= tick_to {
                continue;
            }
            for dir in &measure.directions {
                if let Some(dynamic) = dir.dynamic {
                    self.dynamics.insert(span.start, dynamic.level());
                }
                if let Some(technique) = dir.technique {
                    self.techniques.insert(span.start, technique);
                }
            }
        }
    }

    /// Dynamic level in effect at a tick: the latest entry at-or-before
    /// it, or the natural level if none.
    pub fn nominal_dynamic_at(&self, tick: Tick) -> u8 {
        self.dynamics
            .range(..=tick)
            .next_back()
            .map_or(NATURAL_DYNAMIC_LEVEL, |(_, level)| *level)
    }

    /// Persistent articulation in effect at a tick, if any.
    pub fn persistent_articulation_at(&self, tick: Tick) -> Option<Articulation> {
        match self.techniques.range(..=tick).next_back() {
            Some((_, Technique::Pizzicato)) => Some(Articulation::Pizzicato),
            _ => None,
        }
    }

    /// Drop state entries anchored in [from, to).
    pub fn clear_range(&mut self, from: Tick, to: Tick) {
        self.dynamics.retain(|tick, _| *tick < from || *tick >= to);
        self.techniques.retain(|tick, _| *tick < from || *tick >= to);
    }

    /// Drop all state.
    pub fn clear(&mut self) {
        self.dynamics.clear();
        self.techniques.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.dynamics.is_empty() && self.techniques.is_empty()
    }

    /// Snapshot of dynamic level changes, copied into PlaybackData.
    pub fn dynamic_levels(&self) -> &BTreeMap<Tick, u8> {
        &self.dynamics
    }
}
