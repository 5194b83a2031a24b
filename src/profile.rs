//! Articulation profiles: how score articulation symbols translate into
//! expressive performance parameters for each sound family.

use std::collections::HashMap;

use crate::model::Articulation;
use crate::setup::SoundFamily;

/// Expressive adjustment for one articulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArticulationPatch {
    /// Fraction of the nominal duration that actually sounds
    pub length_factor: f64,
    /// Added to the nominal dynamic level
    pub velocity_delta: i16,
}

impl ArticulationPatch {
    /// The do-nothing patch used when no profile entry exists.
    pub const NEUTRAL: ArticulationPatch = ArticulationPatch {
        length_factor: 1.0,
        velocity_delta: 0,
    };
}

/// Articulation → patch table for one sound family.
#[derive(Debug, Clone, Default)]
pub struct ArticulationProfile {
    patches: HashMap<Articulation, ArticulationPatch>,
}

impl ArticulationProfile {
    pub fn with_patch(mut self, articulation: Articulation, patch: ArticulationPatch) -> Self {
        self.patches.insert(articulation, patch);
        self
    }

    /// Patch for an articulation; unknown symbols degrade to neutral.
    pub fn patch(&self, articulation: Articulation) -> ArticulationPatch {
        self.patches
            .get(&articulation)
            .copied()
            .unwrap_or(ArticulationPatch::NEUTRAL)
    }
}

/// Per-family profile set with a shared default.
#[derive(Debug, Clone)]
pub struct ProfileRepository {
    profiles: HashMap<SoundFamily, ArticulationProfile>,
    default_profile: ArticulationProfile,
}

impl ProfileRepository {
    /// Profile for a sound family. A family without its own profile
    /// degrades to the default profile rather than failing the render.
    pub fn profile_for(&self, family: SoundFamily) -> &ArticulationProfile {
        match self.profiles.get(&family) {
            Some(p) => p,
            None => {
                log::debug!("no articulation profile for {family:?}, using default");
                &self.default_profile
            }
        }
    }
}

impl Default for ProfileRepository {
    fn default() -> Self {
        let base = ArticulationProfile::default()
            .with_patch(
                Articulation::Staccato,
                ArticulationPatch { length_factor: 0.5, velocity_delta: 0 },
            )
            .with_patch(
                Articulation::Staccatissimo,
                ArticulationPatch { length_factor: 0.33, velocity_delta: 0 },
            )
            .with_patch(
                Articulation::Tenuto,
                ArticulationPatch { length_factor: 1.0, velocity_delta: 0 },
            )
            .with_patch(
                Articulation::DetachedLegato,
                ArticulationPatch { length_factor: 0.67, velocity_delta: 0 },
            )
            .with_patch(
                Articulation::Accent,
                ArticulationPatch { length_factor: 1.0, velocity_delta: 16 },
            )
            .with_patch(
                Articulation::Marcato,
                ArticulationPatch { length_factor: 0.8, velocity_delta: 25 },
            );

        let mut profiles = HashMap::new();

        // Bowed and plucked strings get the pizzicato technique patch.
        let strings = base.clone().with_patch(
            Articulation::Pizzicato,
            ArticulationPatch { length_factor: 0.25, velocity_delta: 0 },
        );
        profiles.insert(SoundFamily::Strings, strings.clone());
        profiles.insert(SoundFamily::Plucked, strings);

        // Percussion ignores length shaping; hits are as long as they are.
        let percussion = ArticulationProfile::default()
            .with_patch(
                Articulation::Accent,
                ArticulationPatch { length_factor: 1.0, velocity_delta: 16 },
            )
            .with_patch(
                Articulation::Marcato,
                ArticulationPatch { length_factor: 1.0, velocity_delta: 25 },
            );
        profiles.insert(SoundFamily::Percussion, percussion);

        profiles.insert(SoundFamily::Keyboards, base.clone());
        profiles.insert(SoundFamily::Winds, base.clone());
        profiles.insert(SoundFamily::Brass, base.clone());
        profiles.insert(SoundFamily::Voice, base.clone());

        Self { profiles, default_profile: base }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staccato_halves_duration() {
        let repo = ProfileRepository::default();
        let patch = repo
            .profile_for(SoundFamily::Keyboards)
            .patch(Articulation::Staccato);
        assert_eq!(patch.length_factor, 0.5);
    }

    #[test]
    fn unknown_family_degrades_to_default() {
        let repo = ProfileRepository::default();
        let patch = repo
            .profile_for(SoundFamily::Unknown)
            .patch(Articulation::Accent);
        assert_eq!(patch.velocity_delta, 16);
    }

    #[test]
    fn unknown_articulation_is_neutral() {
        let profile = ArticulationProfile::default();
        assert_eq!(profile.patch(Articulation::Marcato), ArticulationPatch::NEUTRAL);
    }
}
