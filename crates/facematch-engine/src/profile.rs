//! Immutable face profiles.
//!
//! A [`FaceProfile`] is built in one step from its observations and never
//! changed afterwards; store mutations build a replacement.

use chrono::{DateTime, Utc};
use facematch_core::{FaceObservation, ImageRef, MatchStrategy, ObservationId, ReferenceIndex};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::error::EngineError;

/// Observations a usable profile must hold.
pub const MIN_OBSERVATIONS: usize = 2;

/// An accepted observation and the order it entered the profile.
#[derive(Debug, Clone)]
pub struct ProfileObservation {
    pub ingest_index: usize,
    pub observation: FaceObservation,
}

impl ProfileObservation {
    pub fn source(&self) -> &ImageRef {
        &self.observation.source
    }

    pub fn quality(&self) -> f32 {
        self.observation.quality_score()
    }
}

/// Aggregate stats of a profile, serializable for external persistence.
///
/// `source_images` is enough to rebuild the profile with `create_profile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileMetadata {
    pub owner_id: String,
    /// Images detection ran on, including ones that yielded no accepted
    /// face. Images whose detection failed are not counted.
    pub image_count: usize,
    pub face_count: usize,
    pub mean_quality: f32,
    pub best_quality: f32,
    pub match_threshold: f32,
    pub match_strategy: MatchStrategy,
    /// Images that contributed an observation, in ingest order.
    pub source_images: Vec<ImageRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Matching settings recorded in a profile's metadata.
#[derive(Debug, Clone, Copy)]
pub struct MatchSettings {
    pub strategy: MatchStrategy,
    pub threshold: f32,
}

/// Distance threshold shared between the store and batch matchers; tunable
/// while running. Stored as `f32` bits.
#[derive(Debug, Clone)]
pub struct SharedThreshold(Arc<AtomicU32>);

impl SharedThreshold {
    pub fn new(threshold: f32) -> Self {
        Self(Arc::new(AtomicU32::new(threshold.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, threshold: f32) {
        self.0.store(threshold.to_bits(), Ordering::Relaxed);
    }
}

#[derive(Debug)]
pub struct FaceProfile {
    owner_id: String,
    observations: Vec<ProfileObservation>,
    examined: Vec<ImageRef>,
    index: ReferenceIndex,
    metadata: ProfileMetadata,
}

impl FaceProfile {
    /// Validate and derive everything from `observations`.
    ///
    /// Fails with `InsufficientFaces` below [`MIN_OBSERVATIONS`] and with
    /// `InvalidDescriptor` if any embedding cannot be indexed.
    pub fn build(
        owner_id: &str,
        observations: Vec<ProfileObservation>,
        examined: Vec<ImageRef>,
        created_at: Option<DateTime<Utc>>,
        settings: MatchSettings,
    ) -> Result<Self, EngineError> {
        if observations.len() < MIN_OBSERVATIONS {
            return Err(EngineError::InsufficientFaces {
                found: observations.len(),
                required: MIN_OBSERVATIONS,
            });
        }

        let faces: Vec<FaceObservation> =
            observations.iter().map(|o| o.observation.clone()).collect();
        let index = ReferenceIndex::build(owner_id, &faces)?;

        let qualities: Vec<f32> = observations.iter().map(ProfileObservation::quality).collect();
        let mean_quality = qualities.iter().sum::<f32>() / qualities.len() as f32;
        let best_quality = qualities.iter().copied().fold(0.0f32, f32::max);

        let mut source_images: Vec<ImageRef> = Vec::new();
        for o in &observations {
            if !source_images.contains(o.source()) {
                source_images.push(o.source().clone());
            }
        }

        let now = Utc::now();
        let metadata = ProfileMetadata {
            owner_id: owner_id.to_string(),
            image_count: examined.len(),
            face_count: observations.len(),
            mean_quality,
            best_quality,
            match_threshold: settings.threshold,
            match_strategy: settings.strategy,
            source_images,
            created_at: created_at.unwrap_or(now),
            updated_at: now,
        };

        Ok(Self {
            owner_id: owner_id.to_string(),
            observations,
            examined,
            index,
            metadata,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn observations(&self) -> &[ProfileObservation] {
        &self.observations
    }

    pub fn face_count(&self) -> usize {
        self.observations.len()
    }

    /// Every image examined so far, in ingest order.
    pub fn examined_images(&self) -> &[ImageRef] {
        &self.examined
    }

    pub fn index(&self) -> &ReferenceIndex {
        &self.index
    }

    pub fn metadata(&self) -> &ProfileMetadata {
        &self.metadata
    }

    pub fn observation(&self, id: ObservationId) -> Option<&ProfileObservation> {
        self.observations.iter().find(|o| o.observation.id == id)
    }

    pub fn next_ingest_index(&self) -> usize {
        self.observations
            .iter()
            .map(|o| o.ingest_index + 1)
            .max()
            .unwrap_or(0)
    }
}
