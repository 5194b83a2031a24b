//! Track synchronizer / transport controller.
//!
//! Owns at most one engine sequence per open score, the instrument-track
//! → engine-track map, and the persisted audio settings. All engine
//! interaction is non-blocking: async completions arrive on the engine
//! event channel and are applied by [`PlaybackController::process_events`]
//! on the owner thread, after re-validating the context they closed over
//! (request id, generation, sequence id). Stale completions are
//! discarded, not errors.

use std::collections::HashMap;

use crossbeam_channel::Receiver;

use crate::engine::{
    AudioEngine, EngineEvent, EngineTrackId, PlaybackStatus, RequestId, SequenceId,
};
use crate::events::TrackId;
use crate::model::Tick;
use crate::notify::{Channel, Notification};
use crate::playback::{
    ChangeRange, ChangedTracks, LoopBoundaries, LoopBoundaryType, ScorePlayback,
};
use crate::settings::{AudioOutputParams, AudioParams, AudioSettings};
use crate::timemap::{MeasureBeat, Tempo};

/// Checkable playback actions surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionId {
    Loop,
    Metronome,
    MidiInput,
    PlayRepeats,
    Pan,
    CountIn,
}

/// A track add in flight: which instrument asked, under which playback
/// generation.
#[derive(Debug, Clone)]
struct PendingTrackAdd {
    track_id: TrackId,
    generation: u64,
}

/// The transport controller.
pub struct PlaybackController {
    engine: Box<dyn AudioEngine>,
    engine_events: Receiver<EngineEvent>,
    settings: AudioSettings,

    playback: Option<ScorePlayback>,
    /// Bumped on every `set_playback`; stale async completions carry an
    /// older value and are discarded.
    generation: u64,

    pending_sequence: Option<RequestId>,
    pending_tracks: HashMap<RequestId, PendingTrackAdd>,
    current_sequence: SequenceId,
    track_map: HashMap<TrackId, EngineTrackId>,

    current_tick: Tick,
    is_playing: bool,
    playback_status: PlaybackStatus,
    need_rewind_before_play: bool,
    selection: Option<(Tick, Tick)>,

    is_playing_changed: Notification,
    playback_position_changed: Notification,
    tick_played: Channel<Tick>,
    sequence_changed: Notification,
    action_checked_changed: Channel<ActionId>,
}

impl PlaybackController {
    pub fn new(engine: Box<dyn AudioEngine>, settings: AudioSettings) -> Self {
        let engine_events = engine.events();
        Self {
            engine,
            engine_events,
            settings,
            playback: None,
            generation: 0,
            pending_sequence: None,
            pending_tracks: HashMap::new(),
            current_sequence: SequenceId::NONE,
            track_map: HashMap::new(),
            current_tick: 0,
            is_playing: false,
            playback_status: PlaybackStatus::Stopped,
            need_rewind_before_play: true,
            selection: None,
            is_playing_changed: Notification::new(),
            playback_position_changed: Notification::new(),
            tick_played: Channel::new(),
            sequence_changed: Notification::new(),
            action_checked_changed: Channel::new(),
        }
    }

    // ── Project lifecycle ───────────────────────────────────────────

    /// Switch to a new open score (or none). Any live sequence is torn
    /// down first; a new one is requested asynchronously and adopted on
    /// resolution.
    pub fn set_playback(&mut self, playback: Option<ScorePlayback>) {
        if !self.current_sequence.is_none() {
            self.reset_current_sequence();
        }

        // Pending track adds are not cancelled; their completions are
        // discarded by the generation check when they arrive.
        self.generation += 1;
        self.pending_sequence = None;
        self.playback = playback;

        if self.playback.is_some() {
            self.pending_sequence = Some(self.engine.add_sequence());
        }
    }

    pub fn playback(&self) -> Option<&ScorePlayback> {
        self.playback.as_ref()
    }

    pub fn playback_mut(&mut self) -> Option<&mut ScorePlayback> {
        self.playback.as_mut()
    }

    pub fn settings(&self) -> &AudioSettings {
        &self.settings
    }

    pub fn current_sequence_id(&self) -> SequenceId {
        self.current_sequence
    }

    /// Engine-side track bound to an instrument track, if resolved.
    pub fn engine_track_id(&self, track: &TrackId) -> Option<EngineTrackId> {
        self.track_map.get(track).copied()
    }

    fn reset_current_sequence(&mut self) {
        self.engine.stop(self.current_sequence);
        self.set_current_tick(0);
        self.is_playing = false;
        self.playback_status = PlaybackStatus::Stopped;
        self.is_playing_changed.notify();

        self.engine.remove_sequence(self.current_sequence);
        self.current_sequence = SequenceId::NONE;
        self.sequence_changed.notify();
        self.track_map.clear();
    }

    // ── Engine event pump ───────────────────────────────────────────

    /// Drain pending engine notifications and apply them. Call from the
    /// owner thread; this is the only place engine results touch state.
    pub fn process_events(&mut self) {
        while let Ok(event) = self.engine_events.try_recv() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::SequenceResolved { request, sequence } => {
                if self.pending_sequence != Some(request) {
                    log::debug!("discarding stale sequence resolution {request:?}");
                    return;
                }
                self.pending_sequence = None;
                self.setup_new_sequence(sequence);
            }
            EngineEvent::TrackResolved { request, sequence, track, applied } => {
                let pending = match self.pending_tracks.remove(&request) {
                    Some(p) => p,
                    None => return,
                };
                // The score may have been closed (or another opened)
                // while the add was in flight.
                if pending.generation != self.generation || sequence != self.current_sequence {
                    log::debug!("discarding stale track resolution for {}", pending.track_id);
                    return;
                }
                self.track_map.insert(pending.track_id.clone(), track);
                self.settings
                    .set_track_input_params(&pending.track_id, applied.input);
                self.settings
                    .set_track_output_params(&pending.track_id, applied.output);
            }
            EngineEvent::TrackRejected { request, code, message } => {
                self.pending_tracks.remove(&request);
                log::error!("can't add a new track, code: [{code}] {message}");
            }
            EngineEvent::PositionChanged { sequence, position_ms } => {
                if sequence != self.current_sequence {
                    return;
                }
                let tick = match self.playback.as_ref() {
                    Some(pb) => pb.played_ms_to_tick(position_ms as f64),
                    None => return,
                };
                // Order matters: position listeners first, then the
                // fine-grained tick cue. One pair per reported sample.
                self.set_current_tick(tick);
                self.tick_played.send(&tick);
            }
            EngineEvent::StatusChanged { sequence, status } => {
                if sequence != self.current_sequence {
                    return;
                }
                self.playback_status = status;
                if status == PlaybackStatus::Paused && self.is_playing {
                    self.is_playing = false;
                    self.is_playing_changed.notify();
                }
            }
            EngineEvent::OutputParamsChanged { sequence, track, params } => {
                if sequence != self.current_sequence {
                    return;
                }
                // Resolve by the current engine track id, never a cached
                // instrument id.
                if let Some(track_id) = self.track_id_for_engine_track(track) {
                    self.settings.set_track_output_params(&track_id, params);
                }
            }
            EngineEvent::InputParamsChanged { sequence, track, params } => {
                if sequence != self.current_sequence {
                    return;
                }
                if let Some(track_id) = self.track_id_for_engine_track(track) {
                    self.settings.set_track_input_params(&track_id, params);
                }
            }
            EngineEvent::MasterOutputParamsChanged { params } => {
                self.settings.set_master_output_params(params);
            }
        }
    }

    fn track_id_for_engine_track(&self, track: EngineTrackId) -> Option<TrackId> {
        self.track_map
            .iter()
            .find(|(_, engine_track)| **engine_track == track)
            .map(|(id, _)| id.clone())
    }

    fn setup_new_sequence(&mut self, sequence: SequenceId) {
        self.engine.remove_all_tracks(self.current_sequence);

        self.current_sequence = sequence;
        self.sequence_changed.notify();

        if self.playback.is_none() {
            return;
        }

        self.engine
            .set_master_output_params(self.settings.master_output_params());
        self.setup_sequence_tracks();

        let total = self
            .playback
            .as_ref()
            .map_or(0, |pb| pb.total_play_time_ms());
        self.engine.set_duration(self.current_sequence, total);
    }

    fn setup_sequence_tracks(&mut self) {
        self.track_map.clear();

        let tracks: Vec<(TrackId, String)> = match self.playback.as_ref() {
            Some(pb) => pb
                .instrument_track_ids()
                .into_iter()
                .map(|id| {
                    let title = self.track_title(&id);
                    (id, title)
                })
                .collect(),
            None => return,
        };

        for (track_id, title) in tracks {
            self.add_track(&track_id, &title);
        }
        self.add_track(&TrackId::metronome(), "Metronome");
    }

    fn track_title(&self, track_id: &TrackId) -> String {
        if track_id.is_metronome() {
            return "Metronome".to_string();
        }
        self.playback
            .as_ref()
            .and_then(|pb| {
                pb.score()
                    .parts
                    .iter()
                    .find(|p| p.id == track_id.part_id)
                    .map(|p| p.name.clone())
            })
            .unwrap_or_else(|| track_id.to_string())
    }

    // ── Track add/remove protocol ───────────────────────────────────

    fn add_track(&mut self, track_id: &TrackId, title: &str) {
        if self.playback.is_none() || self.current_sequence.is_none() {
            log::warn!("can't add track {track_id}: no active sequence");
            return;
        }

        let input = self.settings.track_input_params(track_id);
        let output = self.track_output_params(track_id);

        let data = match self
            .playback
            .as_ref()
            .and_then(|pb| pb.track_playback_data(track_id))
            .cloned()
        {
            Some(d) => d,
            None => {
                log::warn!("no playback data for {track_id}, track not added");
                return;
            }
        };

        let request = self.engine.add_track(
            self.current_sequence,
            title,
            data,
            AudioParams { input, output },
        );
        self.pending_tracks.insert(
            request,
            PendingTrackAdd {
                track_id: track_id.clone(),
                generation: self.generation,
            },
        );
    }

    fn remove_track(&mut self, track_id: &TrackId) {
        if let Some(engine_track) = self.track_map.remove(track_id) {
            self.engine.remove_track(self.current_sequence, engine_track);
        }
        self.settings.remove_track_params(track_id);
    }

    fn remove_non_existing_tracks(&mut self) {
        let existing: Vec<TrackId> = match self.playback.as_ref() {
            Some(pb) => pb.instrument_track_ids(),
            None => return,
        };
        let stale: Vec<TrackId> = self
            .track_map
            .keys()
            .filter(|id| !id.is_metronome() && !existing.contains(id))
            .cloned()
            .collect();
        for track_id in stale {
            self.remove_track(&track_id);
        }
    }

    /// React to an instrumentation change: sweep tracks whose instrument
    /// is gone and add tracks for instruments that appeared.
    pub fn on_instrumentation_changed(&mut self) {
        if self.playback.is_none() {
            log::warn!("instrumentation change with no active playback");
            return;
        }

        self.remove_non_existing_tracks();

        let missing: Vec<(TrackId, String)> = match self.playback.as_ref() {
            Some(pb) => pb
                .instrument_track_ids()
                .into_iter()
                .filter(|id| {
                    !self.track_map.contains_key(id)
                        && !self.pending_tracks.values().any(|p| {
                            p.track_id == *id && p.generation == self.generation
                        })
                })
                .map(|id| {
                    let title = self.track_title(&id);
                    (id, title)
                })
                .collect(),
            None => return,
        };

        for (track_id, title) in missing {
            self.add_track(&track_id, &title);
        }
    }

    /// Forward a score change notification to the rendering model and
    /// push the resulting track changes into the engine.
    pub fn handle_score_change(&mut self, range: ChangeRange) -> ChangedTracks {
        let changes = match self.playback.as_mut() {
            Some(pb) => pb.handle_change(range),
            None => {
                log::warn!("score change with no active playback");
                return ChangedTracks::new();
            }
        };

        self.push_changed_tracks(&changes);
        changes
    }

    fn push_changed_tracks(&mut self, changes: &ChangedTracks) {
        let mut to_remove: Vec<TrackId> = Vec::new();
        let mut to_add: Vec<(TrackId, String)> = Vec::new();

        {
            let pb = match self.playback.as_ref() {
                Some(pb) => pb,
                None => return,
            };
            for track_id in changes {
                match (self.track_map.get(track_id), pb.track_playback_data(track_id)) {
                    (Some(&engine_track), Some(data)) => {
                        self.engine.update_track_data(
                            self.current_sequence,
                            engine_track,
                            data.clone(),
                        );
                    }
                    (Some(_), None) => to_remove.push(track_id.clone()),
                    (None, Some(_)) => {
                        to_add.push((track_id.clone(), self.track_title(track_id)));
                    }
                    (None, None) => {}
                }
            }
            self.engine
                .set_duration(self.current_sequence, pb.total_play_time_ms());
        }

        for track_id in to_remove {
            self.remove_track(&track_id);
        }
        for (track_id, title) in to_add {
            self.add_track(&track_id, &title);
        }
    }

    /// Mute or unmute one track from the local side. The engine echo
    /// path writes the applied value back into settings.
    pub fn set_track_activity(&mut self, track_id: &TrackId, active: bool) {
        let engine_track = match self.track_map.get(track_id) {
            Some(t) => *t,
            None => {
                log::warn!("can't set activity for unmapped track {track_id}");
                return;
            }
        };
        let mut params = self.settings.track_output_params(track_id);
        params.muted = !active;
        self.engine
            .set_output_params(self.current_sequence, engine_track, params);
    }

    fn track_output_params(&self, track_id: &TrackId) -> AudioOutputParams {
        let mut params = self.settings.track_output_params(track_id);
        if track_id.is_metronome() {
            params.muted = !self.settings.config().metronome_enabled;
        }
        params
    }

    // ── Transport ───────────────────────────────────────────────────

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub fn is_play_allowed(&self) -> bool {
        self.playback.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_paused(&self) -> bool {
        self.playback_status == PlaybackStatus::Paused
    }

    pub fn playback_status(&self) -> PlaybackStatus {
        self.playback_status
    }

    pub fn toggle_play(&mut self) {
        if !self.is_play_allowed() {
            log::warn!("playback not allowed");
            return;
        }

        if self.is_playing() {
            self.pause();
        } else if self.is_paused() {
            self.resume();
        } else {
            self.play();
        }
    }

    pub fn play(&mut self) {
        if !self.transport_ready("play") {
            return;
        }

        if self.need_rewind_before_play {
            self.seek_tick(self.current_tick);
        } else {
            self.need_rewind_before_play = true;
        }

        self.engine.play(self.current_sequence);
        self.is_playing = true;
        self.is_playing_changed.notify();
    }

    /// Rewind to a position. While the transport is running this seeks
    /// and (for a non-zero offset) suppresses the next
    /// auto-rewind-on-play; otherwise it is equivalent to stop.
    pub fn rewind(&mut self, position_ms: u64) {
        if !self.transport_ready("rewind") {
            return;
        }

        if self.playback_status == PlaybackStatus::Running {
            self.seek_ms(position_ms);
            if position_ms != 0 {
                self.need_rewind_before_play = false;
            }
        } else {
            self.stop();
        }
    }

    pub fn pause(&mut self) {
        if !self.transport_ready("pause") {
            return;
        }
        self.engine.pause(self.current_sequence);
        self.is_playing = false;
        self.is_playing_changed.notify();
    }

    pub fn stop(&mut self) {
        if !self.transport_ready("stop") {
            return;
        }
        self.engine.stop(self.current_sequence);
        self.is_playing = false;
        self.is_playing_changed.notify();
    }

    pub fn resume(&mut self) {
        if !self.transport_ready("resume") {
            return;
        }
        self.engine.resume(self.current_sequence);
        self.is_playing = true;
        self.is_playing_changed.notify();
    }

    /// Seek to a score tick.
    pub fn seek_tick(&mut self, tick: Tick) {
        let ms = match self.playback.as_ref() {
            Some(pb) => pb.tick_to_played_ms(tick),
            None => {
                log::warn!("can't seek: no active playback");
                return;
            }
        };
        if self.current_sequence.is_none() {
            log::warn!("can't seek: no active sequence");
            return;
        }
        self.engine.seek(self.current_sequence, ms.round() as u64);
    }

    /// Seek to a played-timeline position in milliseconds.
    pub fn seek_ms(&mut self, position_ms: u64) {
        if !self.transport_ready("seek") {
            return;
        }
        self.engine.seek(self.current_sequence, position_ms);
    }

    fn transport_ready(&self, operation: &str) -> bool {
        if self.playback.is_none() || self.current_sequence.is_none() {
            log::warn!("can't {operation}: no active sequence");
            return false;
        }
        true
    }

    fn set_current_tick(&mut self, tick: Tick) {
        self.current_tick = tick;
        self.playback_position_changed.notify();
    }

    // ── Loop management ─────────────────────────────────────────────

    pub fn is_loop_visible(&self) -> bool {
        self.playback
            .as_ref()
            .map_or(false, |pb| pb.loop_boundaries().visible)
    }

    pub fn is_playback_looped(&self) -> bool {
        self.playback
            .as_ref()
            .map_or(false, |pb| !pb.loop_boundaries().is_null())
    }

    pub fn loop_boundaries(&self) -> LoopBoundaries {
        self.playback
            .as_ref()
            .map_or_else(LoopBoundaries::default, |pb| pb.loop_boundaries())
    }

    /// The user's current range selection, in ticks. Drives loop
    /// creation when no loop exists yet.
    pub fn set_selection(&mut self, selection: Option<(Tick, Tick)>) {
        self.selection = selection;
    }

    /// Toggle loop playback:
    /// - a visible loop is hidden;
    /// - an existing hidden loop with no range selected is shown again;
    /// - otherwise new boundaries come from the selection, or span the
    ///   whole score.
    pub fn toggle_loop_playback(&mut self) {
        if self.playback.is_none() {
            log::warn!("can't toggle loop: no active playback");
            return;
        }

        if self.is_loop_visible() {
            self.hide_loop();
            return;
        }

        if self.is_playback_looped() && self.selection.is_none() {
            self.show_loop();
            return;
        }

        let (first, last) = match self.playback.as_ref() {
            Some(pb) => (pb.first_tick(), pb.last_tick()),
            None => return,
        };
        let (loop_in, loop_out) = match self.selection {
            Some((from, to)) if to > from => (from, to),
            _ => (first, last),
        };

        self.add_loop_boundary_to_tick(LoopBoundaryType::LoopIn, loop_in);
        self.add_loop_boundary_to_tick(LoopBoundaryType::LoopOut, loop_out);
    }

    /// Place one loop boundary: at the playhead while playing, else at
    /// the selection start (falling back to the playhead).
    pub fn add_loop_boundary(&mut self, boundary: LoopBoundaryType) {
        let tick = if self.is_playing() {
            self.current_tick
        } else {
            self.selection.map_or(self.current_tick, |(from, _)| from)
        };
        self.add_loop_boundary_to_tick(boundary, tick);
    }

    pub fn add_loop_boundary_to_tick(&mut self, boundary: LoopBoundaryType, tick: Tick) {
        match self.playback.as_mut() {
            Some(pb) => pb.add_loop_boundary(boundary, tick),
            None => {
                log::warn!("can't set loop boundary: no active playback");
                return;
            }
        }
        self.show_loop();
    }

    /// Make the loop visible and push its boundaries to the engine.
    pub fn show_loop(&mut self) {
        let (from_ms, to_ms) = {
            let pb = match self.playback.as_mut() {
                Some(pb) => pb,
                None => return,
            };
            pb.set_loop_boundaries_visible(true);
            let boundaries = pb.loop_boundaries();
            let first = pb.first_tick();
            let last = pb.last_tick();
            (
                pb.tick_to_played_ms(boundaries.loop_in_tick.unwrap_or(first)),
                pb.tick_to_played_ms(boundaries.loop_out_tick.unwrap_or(last)),
            )
        };

        if self.current_sequence.is_none() {
            log::warn!("loop boundaries set with no active sequence");
        } else {
            self.engine.set_loop(
                self.current_sequence,
                from_ms.round() as u64,
                to_ms.round() as u64,
            );
        }
        self.action_checked_changed.send(&ActionId::Loop);
    }

    /// Hide the loop. The engine-side loop resets; the stored boundary
    /// values survive.
    pub fn hide_loop(&mut self) {
        if self.playback.is_none() {
            log::warn!("can't hide loop: no active playback");
            return;
        }
        if !self.current_sequence.is_none() {
            self.engine.reset_loop(self.current_sequence);
        }
        if let Some(pb) = self.playback.as_mut() {
            pb.set_loop_boundaries_visible(false);
        }
        self.action_checked_changed.send(&ActionId::Loop);
    }

    // ── Checkable actions ───────────────────────────────────────────

    pub fn toggle_metronome(&mut self) {
        let enabled = !self.settings.config().metronome_enabled;
        self.settings.config_mut().metronome_enabled = enabled;
        self.action_checked_changed.send(&ActionId::Metronome);

        let metronome = TrackId::metronome();
        if self.track_map.contains_key(&metronome) {
            self.set_track_activity(&metronome, enabled);
        }
    }

    pub fn toggle_midi_input(&mut self) {
        let enabled = !self.settings.config().midi_input_enabled;
        self.settings.config_mut().midi_input_enabled = enabled;
        self.action_checked_changed.send(&ActionId::MidiInput);
    }

    pub fn toggle_count_in(&mut self) {
        let enabled = !self.settings.config().count_in_enabled;
        self.settings.config_mut().count_in_enabled = enabled;
        self.action_checked_changed.send(&ActionId::CountIn);
    }

    pub fn toggle_automatically_pan(&mut self) {
        let enabled = !self.settings.config().pan_enabled;
        self.settings.config_mut().pan_enabled = enabled;
        self.action_checked_changed.send(&ActionId::Pan);
    }

    /// Toggle repeat playback. The rendering model reloads under the new
    /// timeline and every mapped track's data is re-pushed.
    pub fn toggle_play_repeats(&mut self) {
        let enabled = !self.settings.config().play_repeats_enabled;
        self.settings.config_mut().play_repeats_enabled = enabled;
        self.action_checked_changed.send(&ActionId::PlayRepeats);

        let all_tracks: ChangedTracks = match self.playback.as_mut() {
            Some(pb) => {
                pb.set_play_repeats(enabled);
                pb.model().track_ids().into_iter().collect()
            }
            None => return,
        };
        self.push_changed_tracks(&all_tracks);
    }

    pub fn action_checked(&self, action: ActionId) -> bool {
        let config = self.settings.config();
        match action {
            ActionId::Loop => self.is_loop_visible(),
            ActionId::Metronome => config.metronome_enabled,
            ActionId::MidiInput => config.midi_input_enabled,
            ActionId::PlayRepeats => config.play_repeats_enabled,
            ActionId::Pan => config.pan_enabled,
            ActionId::CountIn => config.count_in_enabled,
        }
    }

    // ── Position queries ────────────────────────────────────────────

    pub fn playback_position_seconds(&self) -> f64 {
        self.playback
            .as_ref()
            .map_or(0.0, |pb| pb.tick_to_played_ms(self.current_tick) / 1000.0)
    }

    pub fn total_play_time_ms(&self) -> u64 {
        self.playback
            .as_ref()
            .map_or(0, |pb| pb.total_play_time_ms())
    }

    pub fn current_tempo(&self) -> Tempo {
        self.playback
            .as_ref()
            .map_or_else(Tempo::default, |pb| pb.tempo_at(self.current_tick))
    }

    pub fn current_beat(&self) -> MeasureBeat {
        self.playback
            .as_ref()
            .map_or_else(MeasureBeat::default, |pb| pb.beat_at(self.current_tick))
    }

    pub fn beat_to_milliseconds(&self, measure: usize, beat: usize) -> u64 {
        self.playback.as_ref().map_or(0, |pb| {
            pb.tick_to_played_ms(pb.beat_to_tick(measure, beat)).round() as u64
        })
    }

    // ── Notifications ───────────────────────────────────────────────

    pub fn is_playing_changed(&self) -> &Notification {
        &self.is_playing_changed
    }

    pub fn playback_position_changed(&self) -> &Notification {
        &self.playback_position_changed
    }

    pub fn tick_played(&self) -> &Channel<Tick> {
        &self.tick_played
    }

    pub fn sequence_changed(&self) -> &Notification {
        &self.sequence_changed
    }

    pub fn action_checked_changed(&self) -> &Channel<ActionId> {
        &self.action_checked_changed
    }
}
