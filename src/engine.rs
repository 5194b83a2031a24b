//! Audio engine interface.
//!
//! The engine is an opaque collaborator: it renders sequences of tracks
//! and reports back asynchronously. Commands are non-blocking; every
//! request that can fail resolves later through the event channel with
//! exactly one terminal outcome. The owner thread drains the channel via
//! [`crate::controller::PlaybackController::process_events`] — engine
//! callbacks never touch shared state directly.

use crossbeam_channel::Receiver;

use crate::events::PlaybackData;
use crate::settings::{AudioInputParams, AudioOutputParams, AudioParams};

/// Identifies one engine playback sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SequenceId(pub i64);

impl SequenceId {
    /// "No sequence" sentinel.
    pub const NONE: SequenceId = SequenceId(-1);

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

/// Engine-side track handle.
pub type EngineTrackId = u32;

/// Identifies one asynchronous engine request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// Engine transport state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    #[default]
    Stopped,
    Paused,
    Running,
}

/// Asynchronous notifications delivered by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// `add_sequence` succeeded.
    SequenceResolved {
        request: RequestId,
        sequence: SequenceId,
    },
    /// `add_track` succeeded; carries the parameters the engine applied.
    TrackResolved {
        request: RequestId,
        sequence: SequenceId,
        track: EngineTrackId,
        applied: AudioParams,
    },
    /// `add_track` was refused.
    TrackRejected {
        request: RequestId,
        code: i32,
        message: String,
    },
    /// Elapsed playback position of a sequence.
    PositionChanged {
        sequence: SequenceId,
        position_ms: u64,
    },
    /// Transport state of a sequence changed.
    StatusChanged {
        sequence: SequenceId,
        status: PlaybackStatus,
    },
    /// The engine adjusted a track's output parameters.
    OutputParamsChanged {
        sequence: SequenceId,
        track: EngineTrackId,
        params: AudioOutputParams,
    },
    /// The engine adjusted a track's input parameters.
    InputParamsChanged {
        sequence: SequenceId,
        track: EngineTrackId,
        params: AudioInputParams,
    },
    /// The engine adjusted the master output parameters.
    MasterOutputParamsChanged { params: AudioOutputParams },
}

/// The audio engine service. All methods are non-blocking; `add_sequence`
/// and `add_track` resolve (or reject) later on the event channel.
pub trait AudioEngine {
    /// Request a new sequence. Resolves via [`EngineEvent::SequenceResolved`].
    fn add_sequence(&mut self) -> RequestId;

    /// Release a sequence and everything in it.
    fn remove_sequence(&mut self, sequence: SequenceId);

    /// Request a new track carrying rendered playback data. Resolves via
    /// [`EngineEvent::TrackResolved`] or [`EngineEvent::TrackRejected`].
    fn add_track(
        &mut self,
        sequence: SequenceId,
        title: &str,
        data: PlaybackData,
        params: AudioParams,
    ) -> RequestId;

    fn remove_track(&mut self, sequence: SequenceId, track: EngineTrackId);

    fn remove_all_tracks(&mut self, sequence: SequenceId);

    /// Replace a track's rendered events after an edit.
    fn update_track_data(&mut self, sequence: SequenceId, track: EngineTrackId, data: PlaybackData);

    fn set_output_params(
        &mut self,
        sequence: SequenceId,
        track: EngineTrackId,
        params: AudioOutputParams,
    );

    fn set_master_output_params(&mut self, params: AudioOutputParams);

    // Transport
    fn play(&mut self, sequence: SequenceId);
    fn pause(&mut self, sequence: SequenceId);
    fn stop(&mut self, sequence: SequenceId);
    fn resume(&mut self, sequence: SequenceId);
    fn seek(&mut self, sequence: SequenceId, position_ms: u64);
    fn set_loop(&mut self, sequence: SequenceId, from_ms: u64, to_ms: u64);
    fn reset_loop(&mut self, sequence: SequenceId);
    fn set_duration(&mut self, sequence: SequenceId, duration_ms: u64);

    /// The channel this engine delivers its notifications on.
    fn events(&self) -> Receiver<EngineEvent>;
}
