//! Playback orchestration: the rendering model that keeps per-track
//! event sets in sync with score edits, and the score playback facade
//! that owns it.
//!
//! The model renders incrementally: a change notification names a tick
//! window and a track window, and only that intersection is re-rendered.
//! Everything outside the window is left bit-identical, which is what
//! keeps "tracks changed" notifications honest.

use std::collections::{BTreeSet, HashMap};

use crate::context::PlaybackContext;
use crate::events::{
    collect_track_ids, tracks_in_index_range, PlaybackData, PlaybackEvent, TrackId,
};
use crate::model::{Score, Tick};
use crate::notify::Channel;
use crate::profile::ProfileRepository;
use crate::render;
use crate::repeats::RepeatList;
use crate::setup::SetupDataResolver;
use crate::timemap::{MeasureBeat, Tempo, TimeMap};

/// A score change notification: the tick window and track index window
/// an edit touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeRange {
    pub tick_from: Tick,
    pub tick_to: Tick,
    pub track_from: usize,
    pub track_to: usize,
}

impl ChangeRange {
    pub fn new(tick_from: Tick, tick_to: Tick, track_from: usize, track_to: usize) -> Self {
        Self { tick_from, tick_to, track_from, track_to }
    }

    /// A change covering the whole score and every track.
    pub fn everything() -> Self {
        Self::new(0, Tick::MAX, 0, usize::MAX)
    }

    fn is_setup_only(&self) -> bool {
        self.tick_from >= self.tick_to
    }
}

/// Set of tracks whose playback data actually changed in one update.
pub type ChangedTracks = BTreeSet<TrackId>;

/// Incremental score-to-event rendering model.
///
/// Lifecycle: `Unloaded → load() → Loaded`, then `handle_change` keeps
/// the per-track data current until `reload()` or a fresh `load()`.
#[derive(Debug, Default)]
pub struct PlaybackModel {
    loaded: bool,
    play_repeats: bool,
    repeats: RepeatList,
    timemap: TimeMap,
    profiles: ProfileRepository,
    setup_resolver: SetupDataResolver,
    contexts: HashMap<TrackId, PlaybackContext>,
    data: HashMap<TrackId, PlaybackData>,
    tracks_changed: Channel<ChangedTracks>,
}

impl PlaybackModel {
    pub fn new() -> Self {
        Self { play_repeats: true, ..Self::default() }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_play_repeats_enabled(&self) -> bool {
        self.play_repeats
    }

    /// Change the repeat expansion mode. Takes effect on the next
    /// `load`/`reload`.
    pub fn set_play_repeats(&mut self, enabled: bool) {
        self.play_repeats = enabled;
    }

    pub fn metronome_track_id(&self) -> TrackId {
        TrackId::metronome()
    }

    /// Build the maps, clear all per-track state and render every track.
    pub fn load(&mut self, score: &Score) {
        self.repeats = RepeatList::expand(score, self.play_repeats);
        self.timemap = TimeMap::build(score, &self.repeats);
        self.contexts.clear();
        self.data.clear();

        for track_id in collect_track_ids(score) {
            self.render_track_full(score, &track_id);
        }
        self.render_metronome_track();

        self.loaded = true;
    }

    /// Equivalent to unload + load. Used when structural assumptions
    /// (e.g. the repeat expansion toggle) change.
    pub fn reload(&mut self, score: &Score) {
        self.loaded = false;
        self.load(score);
    }

    /// Subscribe to aggregated "tracks changed" notifications.
    pub fn tracks_changed(&self) -> &Channel<ChangedTracks> {
        &self.tracks_changed
    }

    /// Read-only view of one track's rendered data.
    pub fn track_playback_data(&self, track: &TrackId) -> Option<&PlaybackData> {
        self.data.get(track)
    }

    /// Every track the model currently holds data for, metronome included.
    pub fn track_ids(&self) -> Vec<TrackId> {
        let mut ids: Vec<TrackId> = self.data.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Apply one change notification: expire, re-render, diff, notify.
    /// Returns the set of tracks whose data actually changed.
    pub fn handle_change(&mut self, score: &Score, range: ChangeRange) -> ChangedTracks {
        if !self.loaded {
            log::warn!("change notification before load, ignoring");
            return ChangedTracks::new();
        }

        let affected = tracks_in_index_range(score, range.track_from, range.track_to);
        let mut candidates: BTreeSet<TrackId> = affected.iter().cloned().collect();

        // Tracks whose instrument no longer exists expire wholesale.
        let existing: BTreeSet<TrackId> = collect_track_ids(score).into_iter().collect();
        let removed: Vec<TrackId> = self
            .data
            .keys()
            .filter(|id| !id.is_metronome() && !existing.contains(*id))
            .cloned()
            .collect();

        // Snapshot for the diff before anything mutates.
        let structural = !range.is_setup_only()
            && window_has_structure(score, range.tick_from, range.tick_to);
        if structural {
            candidates.extend(self.data.keys().cloned());
        }
        // New instruments render from scratch and are always candidates.
        for id in &existing {
            if !self.data.contains_key(id) {
                candidates.insert(id.clone());
            }
        }
        let snapshot: HashMap<TrackId, Option<PlaybackData>> = candidates
            .iter()
            .map(|id| (id.clone(), self.data.get(id).cloned()))
            .collect();

        for id in &removed {
            self.data.remove(id);
            self.contexts.remove(id);
        }

        if structural {
            // Tempo/repeat structure moved; every timestamp may shift.
            self.repeats = RepeatList::expand(score, self.play_repeats);
            self.timemap = TimeMap::build(score, &self.repeats);
            for track_id in &existing {
                self.render_track_full(score, track_id);
            }
            self.render_metronome_track();
        } else if range.is_setup_only() {
            for track_id in &affected {
                self.refresh_setup(score, track_id);
            }
        } else {
            for track_id in &affected {
                if !existing.contains(track_id) {
                    continue;
                }
                if self.data.contains_key(track_id) {
                    self.render_track_window(score, track_id, range.tick_from, range.tick_to);
                } else {
                    self.render_track_full(score, track_id);
                }
                self.refresh_setup(score, track_id);
            }
            for id in &existing {
                if !self.data.contains_key(id) {
                    self.render_track_full(score, id);
                }
            }
        }

        // Only report tracks whose data actually differs now.
        let mut changes = ChangedTracks::new();
        for (id, before) in &snapshot {
            if self.data.get(id) != before.as_ref() {
                changes.insert(id.clone());
            }
        }
        for id in removed {
            changes.insert(id);
        }

        if !changes.is_empty() {
            self.tracks_changed.send(&changes);
        }
        changes
    }

    /// Refresh setup metadata for every track (instrument reassignment).
    pub fn update_setup_data(&mut self, score: &Score) -> ChangedTracks {
        let mut changes = ChangedTracks::new();
        for track_id in collect_track_ids(score) {
            if self.refresh_setup(score, &track_id) {
                changes.insert(track_id);
            }
        }
        if !changes.is_empty() {
            self.tracks_changed.send(&changes);
        }
        changes
    }

    // ── Conversions (repeat expansion composed with the time map) ──

    pub fn timemap(&self) -> &TimeMap {
        &self.timemap
    }

    pub fn repeats(&self) -> &RepeatList {
        &self.repeats
    }

    /// Milliseconds at which a raw tick first sounds.
    pub fn tick_to_played_ms(&self, tick: Tick) -> f64 {
        self.timemap
            .played_tick_to_ms(self.repeats.raw_to_played(tick))
    }

    /// Raw tick sounding at a played-timeline position.
    pub fn played_ms_to_tick(&self, ms: f64) -> Tick {
        self.repeats
            .played_to_raw(self.timemap.ms_to_played_tick(ms))
    }

    pub fn total_play_time_ms(&self) -> u64 {
        self.timemap.total_play_time_ms().round() as u64
    }

    pub fn tempo_at(&self, tick: Tick) -> Tempo {
        self.timemap.tempo_at(tick)
    }

    pub fn beat_at(&self, tick: Tick) -> MeasureBeat {
        self.timemap.beat_at(tick)
    }

    pub fn beat_to_tick(&self, measure: usize, beat: usize) -> Tick {
        self.timemap.beat_to_tick(measure, beat)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn render_track_full(&mut self, score: &Score, track_id: &TrackId) {
        let part_idx = match score.parts.iter().position(|p| p.id == track_id.part_id) {
            Some(i) => i,
            None => return,
        };
        let setup = match self.setup_resolver.resolve(score, track_id) {
            Some(s) => s,
            None => return,
        };

        let last = score.last_tick();
        let ctx = self.contexts.entry(track_id.clone()).or_default();
        ctx.clear();
        ctx.update(score, &track_id.part_id, 0, last.max(1));

        let mut data = PlaybackData {
            setup,
            dynamic_levels: ctx.dynamic_levels().clone(),
            ..PlaybackData::default()
        };

        // Only a part's first instrument carries the note events;
        // additional declared instruments stay setup-only.
        if is_primary_instrument(score, track_id) {
            let events = render::render_part_window(
                score,
                part_idx,
                0,
                score.parts[part_idx].measures.len(),
                &self.repeats,
                &self.timemap,
                &*ctx,
                self.profiles.profile_for(data.setup.family),
            );
            insert_events(&mut data, events);
        }

        self.data.insert(track_id.clone(), data);
    }

    fn render_track_window(
        &mut self,
        score: &Score,
        track_id: &TrackId,
        tick_from: Tick,
        tick_to: Tick,
    ) {
        let part_idx = match score.parts.iter().position(|p| p.id == track_id.part_id) {
            Some(i) => i,
            None => return,
        };
        let part = &score.parts[part_idx];
        let spans = score.measure_spans();

        let mut m_from = match spans.iter().position(|s| s.end() > tick_from) {
            Some(i) => i,
            None => return,
        };
        let m_to = spans
            .iter()
            .position(|s| s.start >= tick_to)
            .unwrap_or(spans.len());

        // A window starting mid tie chain must re-render the chain head,
        // or the merged event would be lost.
        while m_from > 0
            && part
                .measures
                .get(m_from)
                .map_or(false, |m| m.notes.iter().any(|n| n.tie_stop))
        {
            m_from -= 1;
        }

        let clear_from = spans[m_from].start;
        let clear_to = spans.get(m_to).map_or(Tick::MAX, |s| s.start);

        let ctx = self.contexts.entry(track_id.clone()).or_default();
        ctx.update(score, &track_id.part_id, clear_from, clear_to.min(score.last_tick()));

        let data = match self.data.get_mut(track_id) {
            Some(d) => d,
            None => return,
        };
        data.remove_events_in_source_range(clear_from, clear_to);
        data.dynamic_levels = ctx.dynamic_levels().clone();

        if is_primary_instrument(score, track_id) {
            let events = render::render_part_window(
                score,
                part_idx,
                m_from,
                m_to,
                &self.repeats,
                &self.timemap,
                &*ctx,
                self.profiles.profile_for(data.setup.family),
            );
            insert_events(data, events);
        }
    }

    fn render_metronome_track(&mut self) {
        let setup = SetupDataResolver::metronome_setup();
        let mut data = PlaybackData { setup, ..PlaybackData::default() };
        insert_events(&mut data, render::render_metronome(&self.timemap));
        self.data.insert(TrackId::metronome(), data);
    }

    /// Refresh one track's setup metadata. Returns true if it changed.
    fn refresh_setup(&mut self, score: &Score, track_id: &TrackId) -> bool {
        let setup = match self.setup_resolver.resolve(score, track_id) {
            Some(s) => s,
            None => return false,
        };
        match self.data.get_mut(track_id) {
            Some(data) if data.setup != setup => {
                data.setup = setup;
                true
            }
            Some(_) => false,
            None => false,
        }
    }
}

fn insert_events(data: &mut PlaybackData, events: Vec<PlaybackEvent>) {
    for event in events {
        data.events.entry(event.timestamp_ms()).or_default().push(event);
    }
}

fn is_primary_instrument(score: &Score, track_id: &TrackId) -> bool {
    score
        .parts
        .iter()
        .find(|p| p.id == track_id.part_id)
        .and_then(|p| p.instruments.first())
        .map_or(false, |i| i.id == track_id.instrument_id)
}

/// Does the tick window contain structural material (tempo, time
/// signature, repeats, voltas, jumps)? Content-only edits reuse the
/// existing maps so untouched tracks stay bit-identical.
fn window_has_structure(score: &Score, tick_from: Tick, tick_to: Tick) -> bool {
    let part = match score.parts.first() {
        Some(p) => p,
        None => return false,
    };
    let spans = score.measure_spans();

    for (idx, measure) in part.measures.iter().enumerate() {
        let span = match spans.get(idx) {
            Some(s) => *s,
            None => continue,
        };
        if span.start >= tick_to || span.end() <= tick_from {
            continue;
        }
        if measure
            .attributes
            .as_ref()
            .map_or(false, |a| a.time.is_some())
        {
            return true;
        }
        if measure.barlines.iter().any(|b| b.repeat.is_some() || b.ending.is_some()) {
            return true;
        }
        if measure.directions.iter().any(|d| {
            d.tempo_bpm.is_some()
                || d.segno
                || d.coda
                || d.sound_dalsegno
                || d.sound_dacapo
                || d.sound_fine
                || d.sound_tocoda
        }) {
            return true;
        }
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════
// Loop boundaries and the score playback facade
// ═══════════════════════════════════════════════════════════════════════

/// Which end of the loop a boundary command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopBoundaryType {
    LoopIn,
    LoopOut,
}

/// User-defined playback loop. "Null" means no boundaries set; a loop
/// may exist while hidden.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopBoundaries {
    pub loop_in_tick: Option<Tick>,
    pub loop_out_tick: Option<Tick>,
    pub visible: bool,
}

impl LoopBoundaries {
    pub fn is_null(&self) -> bool {
        self.loop_in_tick.is_none() && self.loop_out_tick.is_none()
    }
}

/// Facade owning one open score and its rendering model — the playback
/// view of a project. The controller holds at most one of these.
#[derive(Debug)]
pub struct ScorePlayback {
    score: Score,
    model: PlaybackModel,
    loop_boundaries: LoopBoundaries,
}

impl ScorePlayback {
    /// Open a score for playback: loads the model and renders all tracks.
    pub fn new(score: Score) -> Self {
        let mut model = PlaybackModel::new();
        model.load(&score);
        Self {
            score,
            model,
            loop_boundaries: LoopBoundaries::default(),
        }
    }

    pub fn score(&self) -> &Score {
        &self.score
    }

    /// Mutable score access for the editing collaborator. Edits must be
    /// followed by a `handle_change` carrying the affected range.
    pub fn score_mut(&mut self) -> &mut Score {
        &mut self.score
    }

    pub fn model(&self) -> &PlaybackModel {
        &self.model
    }

    /// Forward a change notification to the model.
    pub fn handle_change(&mut self, range: ChangeRange) -> ChangedTracks {
        self.model.handle_change(&self.score, range)
    }

    /// Toggle repeat expansion and re-render everything under the new
    /// timeline.
    pub fn set_play_repeats(&mut self, enabled: bool) {
        if self.model.is_play_repeats_enabled() == enabled {
            return;
        }
        self.model.set_play_repeats(enabled);
        self.model.reload(&self.score);
    }

    pub fn metronome_track_id(&self) -> TrackId {
        self.model.metronome_track_id()
    }

    pub fn track_playback_data(&self, track: &TrackId) -> Option<&PlaybackData> {
        self.model.track_playback_data(track)
    }

    /// Instrument tracks currently in the score (metronome excluded).
    pub fn instrument_track_ids(&self) -> Vec<TrackId> {
        collect_track_ids(&self.score)
    }

    pub fn first_tick(&self) -> Tick {
        self.score.first_tick()
    }

    pub fn last_tick(&self) -> Tick {
        self.score.last_tick()
    }

    pub fn tick_to_played_ms(&self, tick: Tick) -> f64 {
        self.model.tick_to_played_ms(tick)
    }

    pub fn played_ms_to_tick(&self, ms: f64) -> Tick {
        self.model.played_ms_to_tick(ms)
    }

    pub fn total_play_time_ms(&self) -> u64 {
        self.model.total_play_time_ms()
    }

    pub fn tempo_at(&self, tick: Tick) -> Tempo {
        self.model.tempo_at(tick)
    }

    pub fn beat_at(&self, tick: Tick) -> MeasureBeat {
        self.model.beat_at(tick)
    }

    pub fn beat_to_tick(&self, measure: usize, beat: usize) -> Tick {
        self.model.beat_to_tick(measure, beat)
    }

    // ── Loop boundaries ─────────────────────────────────────────────

    pub fn loop_boundaries(&self) -> LoopBoundaries {
        self.loop_boundaries
    }

    /// Set one loop boundary. Boundaries are reordered if needed so that
    /// loop-in ≤ loop-out always holds once both are set.
    pub fn add_loop_boundary(&mut self, boundary: LoopBoundaryType, tick: Tick) {
        match boundary {
            LoopBoundaryType::LoopIn => self.loop_boundaries.loop_in_tick = Some(tick),
            LoopBoundaryType::LoopOut => self.loop_boundaries.loop_out_tick = Some(tick),
        }
        if let (Some(li), Some(lo)) = (
            self.loop_boundaries.loop_in_tick,
            self.loop_boundaries.loop_out_tick,
        ) {
            if li > lo {
                self.loop_boundaries.loop_in_tick = Some(lo);
                self.loop_boundaries.loop_out_tick = Some(li);
            }
        }
    }

    /// Show or hide the loop. Boundary values are untouched.
    pub fn set_loop_boundaries_visible(&mut self, visible: bool) {
        self.loop_boundaries.visible = visible;
    }
}
