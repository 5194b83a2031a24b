//! Transport controller tests — sequence lifecycle, the async track-add
//! protocol, staleness discarding, transport/loop semantics, and
//! parameter echo filtering, all against a recording stub engine.

use std::cell::RefCell;
use std::rc::Rc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use playbacklib::{
    parse_musicxml, ActionId, AudioEngine, AudioOutputParams, AudioParams, AudioSettings,
    ChangeRange, EngineEvent, EngineTrackId, PlaybackController, PlaybackData, PlaybackStatus,
    RequestId, ScorePlayback, SequenceId, TrackId, TICKS_PER_QUARTER,
};
use pretty_assertions::assert_eq;

const M: u32 = 4 * TICKS_PER_QUARTER;

/// One piano part, two 4/4 measures at 120 bpm. Total play time 4000 ms.
const SCORE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<score-partwise version="4.0">
  <part-list>
    <score-part id="P1"><part-name>Piano</part-name></score-part>
  </part-list>
  <part id="P1">
    <measure number="1">
      <attributes>
        <divisions>1</divisions>
        <time><beats>4</beats><beat-type>4</beat-type></time>
      </attributes>
      <direction><sound tempo="120"/></direction>
      <note><pitch><step>C</step><octave>4</octave></pitch><duration>1</duration><voice>1</voice></note>
      <note><pitch><step>D</step><octave>4</octave></pitch><duration>1</duration><voice>1</voice></note>
      <note><pitch><step>E</step><octave>4</octave></pitch><duration>1</duration><voice>1</voice></note>
      <note><pitch><step>F</step><octave>4</octave></pitch><duration>1</duration><voice>1</voice></note>
    </measure>
    <measure number="2">
      <note><pitch><step>G</step><octave>4</octave></pitch><duration>4</duration><voice>1</voice></note>
    </measure>
  </part>
</score-partwise>"#;

// ─── Stub engine ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Call {
    AddSequence(RequestId),
    RemoveSequence(SequenceId),
    AddTrack { request: RequestId, sequence: SequenceId, title: String },
    RemoveTrack(SequenceId, EngineTrackId),
    RemoveAllTracks(SequenceId),
    UpdateTrackData(SequenceId, EngineTrackId),
    SetOutputParams { track: EngineTrackId, muted: bool },
    SetMasterOutputParams,
    Play(SequenceId),
    Pause(SequenceId),
    Stop(SequenceId),
    Resume(SequenceId),
    Seek(SequenceId, u64),
    SetLoop(SequenceId, u64, u64),
    ResetLoop(SequenceId),
    SetDuration(SequenceId, u64),
}

type CallLog = Rc<RefCell<Vec<Call>>>;

struct StubEngine {
    tx: Sender<EngineEvent>,
    rx: Receiver<EngineEvent>,
    next_request: u64,
    calls: CallLog,
}

impl StubEngine {
    fn issue_request(&mut self) -> RequestId {
        self.next_request += 1;
        RequestId(self.next_request)
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }
}

impl AudioEngine for StubEngine {
    fn add_sequence(&mut self) -> RequestId {
        let request = self.issue_request();
        self.record(Call::AddSequence(request));
        request
    }

    fn remove_sequence(&mut self, sequence: SequenceId) {
        self.record(Call::RemoveSequence(sequence));
    }

    fn add_track(
        &mut self,
        sequence: SequenceId,
        title: &str,
        _data: PlaybackData,
        _params: AudioParams,
    ) -> RequestId {
        let request = self.issue_request();
        self.record(Call::AddTrack { request, sequence, title: title.to_string() });
        request
    }

    fn remove_track(&mut self, sequence: SequenceId, track: EngineTrackId) {
        self.record(Call::RemoveTrack(sequence, track));
    }

    fn remove_all_tracks(&mut self, sequence: SequenceId) {
        self.record(Call::RemoveAllTracks(sequence));
    }

    fn update_track_data(&mut self, sequence: SequenceId, track: EngineTrackId, _data: PlaybackData) {
        self.record(Call::UpdateTrackData(sequence, track));
    }

    fn set_output_params(
        &mut self,
        _sequence: SequenceId,
        track: EngineTrackId,
        params: AudioOutputParams,
    ) {
        self.record(Call::SetOutputParams { track, muted: params.muted });
    }

    fn set_master_output_params(&mut self, _params: AudioOutputParams) {
        self.record(Call::SetMasterOutputParams);
    }

    fn play(&mut self, sequence: SequenceId) {
        self.record(Call::Play(sequence));
    }

    fn pause(&mut self, sequence: SequenceId) {
        self.record(Call::Pause(sequence));
    }

    fn stop(&mut self, sequence: SequenceId) {
        self.record(Call::Stop(sequence));
    }

    fn resume(&mut self, sequence: SequenceId) {
        self.record(Call::Resume(sequence));
    }

    fn seek(&mut self, sequence: SequenceId, position_ms: u64) {
        self.record(Call::Seek(sequence, position_ms));
    }

    fn set_loop(&mut self, sequence: SequenceId, from_ms: u64, to_ms: u64) {
        self.record(Call::SetLoop(sequence, from_ms, to_ms));
    }

    fn reset_loop(&mut self, sequence: SequenceId) {
        self.record(Call::ResetLoop(sequence));
    }

    fn set_duration(&mut self, sequence: SequenceId, duration_ms: u64) {
        self.record(Call::SetDuration(sequence, duration_ms));
    }

    fn events(&self) -> Receiver<EngineEvent> {
        self.rx.clone()
    }
}

struct StubHandle {
    tx: Sender<EngineEvent>,
    calls: CallLog,
}

impl StubHandle {
    fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    fn clear(&self) {
        self.calls.borrow_mut().clear();
    }

    fn send(&self, event: EngineEvent) {
        self.tx.send(event).unwrap();
    }

    fn sequence_requests(&self) -> Vec<RequestId> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::AddSequence(request) => Some(*request),
                _ => None,
            })
            .collect()
    }

    fn track_requests(&self) -> Vec<(RequestId, SequenceId, String)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| match c {
                Call::AddTrack { request, sequence, title } => {
                    Some((*request, *sequence, title.clone()))
                }
                _ => None,
            })
            .collect()
    }
}

fn stub() -> (Box<dyn AudioEngine>, StubHandle) {
    let (tx, rx) = unbounded();
    let calls: CallLog = Rc::new(RefCell::new(Vec::new()));
    let engine = StubEngine {
        tx: tx.clone(),
        rx,
        next_request: 0,
        calls: Rc::clone(&calls),
    };
    (Box::new(engine), StubHandle { tx, calls })
}

fn piano() -> TrackId {
    TrackId::new("P1", "P1-I1")
}

fn open_controller() -> (PlaybackController, StubHandle) {
    let (engine, handle) = stub();
    let mut controller = PlaybackController::new(engine, AudioSettings::default());
    let score = parse_musicxml(SCORE).unwrap();
    controller.set_playback(Some(ScorePlayback::new(score)));
    (controller, handle)
}

fn resolve_sequence(controller: &mut PlaybackController, handle: &StubHandle, id: i64) {
    let request = *handle.sequence_requests().last().unwrap();
    handle.send(EngineEvent::SequenceResolved { request, sequence: SequenceId(id) });
    controller.process_events();
}

/// Answer every outstanding track add with sequential engine track ids.
fn resolve_tracks(controller: &mut PlaybackController, handle: &StubHandle) {
    let mut next: EngineTrackId = 0;
    for (request, sequence, _) in handle.track_requests() {
        next += 1;
        handle.send(EngineEvent::TrackResolved {
            request,
            sequence,
            track: next,
            applied: AudioParams::default(),
        });
    }
    controller.process_events();
}

fn ready_controller() -> (PlaybackController, StubHandle) {
    let (mut controller, handle) = open_controller();
    resolve_sequence(&mut controller, &handle, 1);
    resolve_tracks(&mut controller, &handle);
    handle.clear();
    (controller, handle)
}

const SEQ: SequenceId = SequenceId(1);

// ─── Lifecycle ───────────────────────────────────────────────────────

#[test]
fn sequence_setup_adds_all_tracks() {
    let (mut controller, handle) = open_controller();

    assert!(controller.current_sequence_id().is_none());
    assert_eq!(handle.sequence_requests().len(), 1);

    resolve_sequence(&mut controller, &handle, 7);
    assert_eq!(controller.current_sequence_id(), SequenceId(7));

    let calls = handle.calls();
    assert!(calls.contains(&Call::SetMasterOutputParams));
    assert!(calls.contains(&Call::SetDuration(SequenceId(7), 4000)));

    let titles: Vec<String> = handle.track_requests().into_iter().map(|(_, _, t)| t).collect();
    assert_eq!(titles, vec!["Piano".to_string(), "Metronome".to_string()]);

    resolve_tracks(&mut controller, &handle);
    assert_eq!(controller.engine_track_id(&piano()), Some(1));
    assert_eq!(controller.engine_track_id(&TrackId::metronome()), Some(2));
    // Applied params were echoed into settings on resolution.
    assert!(controller.settings().has_track_params(&piano()));
}

#[test]
fn switching_projects_tears_down_the_old_sequence() {
    let (mut controller, handle) = open_controller();
    resolve_sequence(&mut controller, &handle, 1);
    resolve_tracks(&mut controller, &handle);
    handle.clear();

    let score = parse_musicxml(SCORE).unwrap();
    controller.set_playback(Some(ScorePlayback::new(score)));

    let calls = handle.calls();
    assert!(calls.contains(&Call::Stop(SEQ)));
    assert!(calls.contains(&Call::RemoveSequence(SEQ)));
    assert!(controller.current_sequence_id().is_none());
    assert_eq!(controller.current_tick(), 0);
    // A fresh sequence was requested for the new score.
    assert_eq!(handle.sequence_requests().len(), 1);
}

#[test]
fn stale_sequence_resolution_is_discarded() {
    let (mut controller, handle) = open_controller();
    let old_request = *handle.sequence_requests().last().unwrap();

    // Project changes before the sequence resolves.
    let score = parse_musicxml(SCORE).unwrap();
    controller.set_playback(Some(ScorePlayback::new(score)));

    handle.send(EngineEvent::SequenceResolved { request: old_request, sequence: SequenceId(5) });
    controller.process_events();
    assert!(controller.current_sequence_id().is_none());

    // The current request still resolves normally.
    resolve_sequence(&mut controller, &handle, 6);
    assert_eq!(controller.current_sequence_id(), SequenceId(6));
}

#[test]
fn stale_track_add_never_mutates_the_new_track_map() {
    let (mut controller, handle) = open_controller();
    resolve_sequence(&mut controller, &handle, 1);
    let old_requests = handle.track_requests();
    assert!(!old_requests.is_empty());

    // The score is closed and another opened while the adds are in flight.
    let score = parse_musicxml(SCORE).unwrap();
    controller.set_playback(Some(ScorePlayback::new(score)));

    for (request, sequence, _) in old_requests {
        handle.send(EngineEvent::TrackResolved {
            request,
            sequence,
            track: 99,
            applied: AudioParams::default(),
        });
    }
    controller.process_events();

    assert_eq!(controller.engine_track_id(&piano()), None);
    assert!(!controller.settings().has_track_params(&piano()));
}

#[test]
fn track_rejection_binds_nothing() {
    let (mut controller, handle) = open_controller();
    resolve_sequence(&mut controller, &handle, 1);

    for (request, _, _) in handle.track_requests() {
        handle.send(EngineEvent::TrackRejected {
            request,
            code: 42,
            message: "no free channels".into(),
        });
    }
    controller.process_events();

    assert_eq!(controller.engine_track_id(&piano()), None);
    assert_eq!(controller.engine_track_id(&TrackId::metronome()), None);
}

// ─── Position feedback ───────────────────────────────────────────────

#[test]
fn each_position_sample_fires_one_ordered_notification_pair() {
    let (mut controller, handle) = ready_controller();

    let order: Rc<RefCell<Vec<(&'static str, u32)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&order);
    controller
        .playback_position_changed()
        .subscribe(move || sink.borrow_mut().push(("position", 0)));
    let sink = Rc::clone(&order);
    controller
        .tick_played()
        .subscribe(move |tick| sink.borrow_mut().push(("tick", *tick)));

    handle.send(EngineEvent::PositionChanged { sequence: SEQ, position_ms: 1000 });
    handle.send(EngineEvent::PositionChanged { sequence: SEQ, position_ms: 1500 });
    controller.process_events();

    // At 120 bpm: 1000 ms → tick 960, 1500 ms → tick 1440.
    assert_eq!(
        *order.borrow(),
        vec![("position", 0), ("tick", 960), ("position", 0), ("tick", 1440)]
    );
    assert_eq!(controller.current_tick(), 1440);

    // Positions for a non-active sequence are ignored.
    handle.send(EngineEvent::PositionChanged { sequence: SequenceId(9), position_ms: 9999 });
    controller.process_events();
    assert_eq!(controller.current_tick(), 1440);
    assert_eq!(order.borrow().len(), 4);
}

// ─── Transport ───────────────────────────────────────────────────────

#[test]
fn play_seeks_to_the_current_tick_first() {
    let (mut controller, handle) = ready_controller();

    controller.play();
    assert_eq!(handle.calls(), vec![Call::Seek(SEQ, 0), Call::Play(SEQ)]);
    assert!(controller.is_playing());
}

#[test]
fn rewind_while_running_suppresses_the_next_auto_rewind() {
    let (mut controller, handle) = ready_controller();

    controller.play();
    handle.send(EngineEvent::StatusChanged { sequence: SEQ, status: PlaybackStatus::Running });
    controller.process_events();
    handle.clear();

    controller.rewind(500);
    assert_eq!(handle.calls(), vec![Call::Seek(SEQ, 500)]);

    handle.clear();
    controller.play();
    assert_eq!(handle.calls(), vec![Call::Play(SEQ)]);

    // The suppression is one-shot: the next play seeks again.
    handle.clear();
    controller.play();
    assert_eq!(handle.calls(), vec![Call::Seek(SEQ, 0), Call::Play(SEQ)]);
}

#[test]
fn rewind_while_stopped_is_a_stop() {
    let (mut controller, handle) = ready_controller();

    controller.rewind(0);
    assert_eq!(handle.calls(), vec![Call::Stop(SEQ)]);
    assert!(!controller.is_playing());
}

#[test]
fn transport_without_a_sequence_is_a_no_op() {
    let (engine, handle) = stub();
    let mut controller = PlaybackController::new(engine, AudioSettings::default());

    controller.play();
    controller.pause();
    controller.stop();
    controller.seek_tick(480);
    controller.toggle_loop_playback();

    assert!(handle.calls().is_empty());
    assert!(!controller.is_playing());
}

#[test]
fn pause_and_resume_round_trip() {
    let (mut controller, handle) = ready_controller();

    controller.play();
    handle.send(EngineEvent::StatusChanged { sequence: SEQ, status: PlaybackStatus::Running });
    controller.process_events();

    controller.pause();
    assert!(!controller.is_playing());
    handle.send(EngineEvent::StatusChanged { sequence: SEQ, status: PlaybackStatus::Paused });
    controller.process_events();
    assert!(controller.is_paused());

    handle.clear();
    controller.toggle_play();
    assert_eq!(handle.calls(), vec![Call::Resume(SEQ)]);
    assert!(controller.is_playing());
}

// ─── Loop management ─────────────────────────────────────────────────

#[test]
fn loop_toggle_walks_its_three_branches() {
    let (mut controller, handle) = ready_controller();

    // 1. No loop, nothing selected → whole score, visible.
    controller.toggle_loop_playback();
    let boundaries = controller.loop_boundaries();
    assert_eq!(boundaries.loop_in_tick, Some(0));
    assert_eq!(boundaries.loop_out_tick, Some(2 * M));
    assert!(boundaries.visible);
    assert!(handle.calls().contains(&Call::SetLoop(SEQ, 0, 4000)));
    assert!(controller.action_checked(ActionId::Loop));

    // 2. Visible → hide; boundary values survive.
    handle.clear();
    controller.toggle_loop_playback();
    assert_eq!(handle.calls(), vec![Call::ResetLoop(SEQ)]);
    let boundaries = controller.loop_boundaries();
    assert!(!boundaries.visible);
    assert_eq!(boundaries.loop_in_tick, Some(0));
    assert_eq!(boundaries.loop_out_tick, Some(2 * M));
    assert!(!controller.action_checked(ActionId::Loop));

    // 3. Hidden loop exists, nothing selected → show it again.
    handle.clear();
    controller.toggle_loop_playback();
    assert_eq!(handle.calls(), vec![Call::SetLoop(SEQ, 0, 4000)]);
    assert!(controller.loop_boundaries().visible);
}

#[test]
fn selection_drives_new_loop_boundaries() {
    let (mut controller, handle) = ready_controller();

    controller.set_selection(Some((TICKS_PER_QUARTER, 2 * TICKS_PER_QUARTER)));
    controller.toggle_loop_playback();

    let boundaries = controller.loop_boundaries();
    assert_eq!(boundaries.loop_in_tick, Some(TICKS_PER_QUARTER));
    assert_eq!(boundaries.loop_out_tick, Some(2 * TICKS_PER_QUARTER));
    // Quarter notes at 120 bpm are 500 ms.
    assert!(handle.calls().contains(&Call::SetLoop(SEQ, 500, 1000)));
}

// ─── Parameter synchronization ───────────────────────────────────────

#[test]
fn engine_param_echoes_are_filtered_by_sequence_and_mapping() {
    let (mut controller, handle) = ready_controller();

    let changed = AudioOutputParams { volume: 0.5, pan: 0.0, muted: false };
    handle.send(EngineEvent::OutputParamsChanged {
        sequence: SEQ,
        track: 1,
        params: changed.clone(),
    });
    controller.process_events();
    assert_eq!(controller.settings().track_output_params(&piano()), changed);

    // A stale event for another sequence is ignored.
    handle.send(EngineEvent::OutputParamsChanged {
        sequence: SequenceId(9),
        track: 1,
        params: AudioOutputParams { volume: 0.9, pan: 0.0, muted: false },
    });
    // So is an event for an unmapped engine track.
    handle.send(EngineEvent::OutputParamsChanged {
        sequence: SEQ,
        track: 77,
        params: AudioOutputParams { volume: 0.1, pan: 0.0, muted: false },
    });
    controller.process_events();
    assert_eq!(controller.settings().track_output_params(&piano()), changed);

    handle.send(EngineEvent::MasterOutputParamsChanged {
        params: AudioOutputParams { volume: 0.7, pan: 0.0, muted: false },
    });
    controller.process_events();
    assert_eq!(controller.settings().master_output_params().volume, 0.7);
}

#[test]
fn metronome_toggle_pushes_mute_without_writing_settings() {
    let (mut controller, handle) = ready_controller();

    assert!(controller.action_checked(ActionId::Metronome));
    controller.toggle_metronome();
    assert!(!controller.action_checked(ActionId::Metronome));

    let metronome_track = controller.engine_track_id(&TrackId::metronome()).unwrap();
    assert!(handle
        .calls()
        .contains(&Call::SetOutputParams { track: metronome_track, muted: true }));
    // The local push is not echoed into settings; that's the engine's job.
    assert!(!controller.settings().track_output_params(&TrackId::metronome()).muted);
}

// ─── Instrumentation and score changes ───────────────────────────────

#[test]
fn removed_instruments_are_swept_from_the_sequence() {
    let (mut controller, handle) = ready_controller();

    controller.playback_mut().unwrap().score_mut().parts.clear();
    controller.on_instrumentation_changed();

    assert!(handle.calls().contains(&Call::RemoveTrack(SEQ, 1)));
    assert_eq!(controller.engine_track_id(&piano()), None);
    assert!(!controller.settings().has_track_params(&piano()));
    // The metronome is never swept.
    assert_eq!(controller.engine_track_id(&TrackId::metronome()), Some(2));
}

#[test]
fn score_changes_push_updated_track_data() {
    let (mut controller, handle) = ready_controller();

    {
        let score = controller.playback_mut().unwrap().score_mut();
        score.parts[0].measures[1].notes[0].pitch.as_mut().unwrap().octave = 5;
    }
    let changes = controller.handle_score_change(ChangeRange::new(M, 2 * M, 0, 0));

    assert_eq!(changes.into_iter().collect::<Vec<_>>(), vec![piano()]);
    assert!(handle.calls().contains(&Call::UpdateTrackData(SEQ, 1)));
    assert!(handle.calls().contains(&Call::SetDuration(SEQ, 4000)));
}
