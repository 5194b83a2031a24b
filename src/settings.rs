//! Persisted audio settings: per-track input/output parameters, master
//! output parameters, and playback configuration flags.
//!
//! The store is plain data owned by the transport controller; it mirrors
//! what the engine last applied. JSON round-tripping is provided for the
//! embedding project format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::events::TrackId;

/// User-adjustable output parameters of one track (or the master bus).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioOutputParams {
    /// Linear gain, 1.0 = unity
    pub volume: f32,
    /// Stereo pan, -1.0 (left) ..= 1.0 (right)
    pub pan: f32,
    pub muted: bool,
}

impl Default for AudioOutputParams {
    fn default() -> Self {
        Self { volume: 1.0, pan: 0.0, muted: false }
    }
}

/// Input-side parameters of one track: which sound resource drives it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioInputParams {
    /// Engine-side sound resource identifier (e.g. a soundfont preset)
    pub resource_id: String,
}

/// Input and output parameters together, as carried by a track add.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AudioParams {
    pub input: AudioInputParams,
    pub output: AudioOutputParams,
}

/// Playback configuration flags surfaced as checkable UI actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub metronome_enabled: bool,
    pub midi_input_enabled: bool,
    pub count_in_enabled: bool,
    pub pan_enabled: bool,
    pub play_repeats_enabled: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            metronome_enabled: true,
            midi_input_enabled: true,
            count_in_enabled: false,
            pan_enabled: true,
            play_repeats_enabled: true,
        }
    }
}

/// The persisted settings store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioSettings {
    master: AudioOutputParams,
    config: PlaybackConfig,
    tracks: BTreeMap<TrackId, AudioParams>,
}

impl AudioSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn master_output_params(&self) -> AudioOutputParams {
        self.master.clone()
    }

    pub fn set_master_output_params(&mut self, params: AudioOutputParams) {
        self.master = params;
    }

    pub fn track_input_params(&self, track: &TrackId) -> AudioInputParams {
        self.tracks
            .get(track)
            .map(|p| p.input.clone())
            .unwrap_or_default()
    }

    pub fn set_track_input_params(&mut self, track: &TrackId, params: AudioInputParams) {
        self.tracks.entry(track.clone()).or_default().input = params;
    }

    pub fn track_output_params(&self, track: &TrackId) -> AudioOutputParams {
        self.tracks
            .get(track)
            .map(|p| p.output.clone())
            .unwrap_or_default()
    }

    pub fn set_track_output_params(&mut self, track: &TrackId, params: AudioOutputParams) {
        self.tracks.entry(track.clone()).or_default().output = params;
    }

    /// Drop every persisted parameter of a removed track.
    pub fn remove_track_params(&mut self, track: &TrackId) {
        self.tracks.remove(track);
    }

    pub fn has_track_params(&self, track: &TrackId) -> bool {
        self.tracks.contains_key(track)
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PlaybackConfig {
        &mut self.config
    }

    /// Serialize to the project settings JSON schema.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(&SettingsFile::from(self))
            .map_err(|e| Error::Parse(format!("settings serialization error: {e}")))
    }

    /// Load from the project settings JSON schema.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let file: SettingsFile = serde_json::from_str(json)
            .map_err(|e| Error::Parse(format!("settings parse error: {e}")))?;
        Ok(file.into())
    }
}

/// On-disk shape: tracks as an entry list so the key stays structured.
#[derive(Serialize, Deserialize)]
struct SettingsFile {
    master: AudioOutputParams,
    config: PlaybackConfig,
    tracks: Vec<TrackEntry>,
}

#[derive(Serialize, Deserialize)]
struct TrackEntry {
    track: TrackId,
    params: AudioParams,
}

impl From<&AudioSettings> for SettingsFile {
    fn from(settings: &AudioSettings) -> Self {
        Self {
            master: settings.master.clone(),
            config: settings.config.clone(),
            tracks: settings
                .tracks
                .iter()
                .map(|(track, params)| TrackEntry {
                    track: track.clone(),
                    params: params.clone(),
                })
                .collect(),
        }
    }
}

impl From<SettingsFile> for AudioSettings {
    fn from(file: SettingsFile) -> Self {
        Self {
            master: file.master,
            config: file.config,
            tracks: file
                .tracks
                .into_iter()
                .map(|e| (e.track, e.params))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unknown_track_reads_defaults() {
        let settings = AudioSettings::new();
        let track = TrackId::new("P1", "P1-I1");
        assert_eq!(settings.track_output_params(&track), AudioOutputParams::default());
        assert!(!settings.has_track_params(&track));
    }

    #[test]
    fn set_and_remove_track_params() {
        let mut settings = AudioSettings::new();
        let track = TrackId::new("P1", "P1-I1");

        settings.set_track_output_params(
            &track,
            AudioOutputParams { volume: 0.5, pan: -0.25, muted: true },
        );
        assert!(settings.has_track_params(&track));
        assert_eq!(settings.track_output_params(&track).volume, 0.5);

        settings.remove_track_params(&track);
        assert!(!settings.has_track_params(&track));
    }

    #[test]
    fn json_roundtrip() {
        let mut settings = AudioSettings::new();
        settings.set_master_output_params(AudioOutputParams {
            volume: 0.8,
            pan: 0.0,
            muted: false,
        });
        settings.config_mut().metronome_enabled = false;
        let track = TrackId::new("P1", "P1-I1");
        settings.set_track_input_params(
            &track,
            AudioInputParams { resource_id: "sf2:grand-piano".into() },
        );

        let json = settings.to_json().unwrap();
        let restored = AudioSettings::from_json(&json).unwrap();
        assert_eq!(restored, settings);
    }
}
