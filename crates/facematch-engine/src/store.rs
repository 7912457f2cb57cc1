//! Profile store: owns every profile and serializes writes per owner.
//!
//! Each mutation builds a complete replacement [`FaceProfile`] off to the
//! side and swaps it in under the map lock, so readers see either the old
//! profile or the new one.

use chrono::{DateTime, Utc};
use facematch_core::{ImageRef, MatchStrategy, QualityAssessor};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::error::EngineError;
use crate::profile::{
    FaceProfile, MatchSettings, ProfileMetadata, ProfileObservation, SharedThreshold, MIN_OBSERVATIONS,
};
use crate::worker::DetectorHandle;

pub struct ProfileStore {
    detector: DetectorHandle,
    assessor: QualityAssessor,
    strategy: MatchStrategy,
    threshold: SharedThreshold,
    profiles: RwLock<HashMap<String, Arc<FaceProfile>>>,
    /// Per-owner write locks. An entry is dropped on delete once no other
    /// caller holds or waits on it.
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ProfileStore {
    pub fn new(detector: DetectorHandle, assessor: QualityAssessor, settings: MatchSettings) -> Self {
        Self {
            detector,
            assessor,
            strategy: settings.strategy,
            threshold: SharedThreshold::new(settings.threshold),
            profiles: RwLock::new(HashMap::new()),
            writers: Mutex::new(HashMap::new()),
        }
    }

    /// The distance threshold recorded in rebuilt profiles. Batch matchers
    /// share it so a runtime change shows up in later metadata.
    pub fn threshold(&self) -> SharedThreshold {
        self.threshold.clone()
    }

    /// Build a profile from scratch, replacing any existing one for `owner_id`.
    ///
    /// Keeps the best accepted face of each image. On failure the previous
    /// profile, if any, stays installed.
    pub async fn create_profile(
        &self,
        owner_id: &str,
        images: &[ImageRef],
    ) -> Result<Arc<FaceProfile>, EngineError> {
        let lock = self.writer(owner_id).await;
        let _guard = lock.lock().await;
        self.build_fresh(owner_id, images, None).await
    }

    /// Recreate a profile from persisted metadata by re-running detection
    /// over its recorded source images.
    pub async fn restore(&self, metadata: &ProfileMetadata) -> Result<Arc<FaceProfile>, EngineError> {
        let lock = self.writer(&metadata.owner_id).await;
        let _guard = lock.lock().await;
        self.build_fresh(&metadata.owner_id, &metadata.source_images, Some(metadata.created_at))
            .await
    }

    /// Add images to an existing profile.
    ///
    /// Images the profile already examined are skipped; the rest are
    /// detected and the profile is rebuilt from the combined observations.
    pub async fn add_observations(
        &self,
        owner_id: &str,
        images: &[ImageRef],
    ) -> Result<Arc<FaceProfile>, EngineError> {
        let lock = self.writer(owner_id).await;
        let _guard = lock.lock().await;
        let current = self.require(owner_id).await?;

        let fresh: Vec<ImageRef> = dedup(images)
            .into_iter()
            .filter(|img| !current.examined_images().contains(img))
            .collect();
        let (added, detected) = self
            .detect_images(&fresh, current.next_ingest_index())
            .await?;

        tracing::info!(
            owner = owner_id,
            requested = images.len(),
            examined = detected.len(),
            accepted = added.len(),
            "adding observations"
        );

        let mut observations = current.observations().to_vec();
        observations.extend(added);
        let mut examined = current.examined_images().to_vec();
        examined.extend(detected);

        let profile = FaceProfile::build(
            owner_id,
            observations,
            examined,
            Some(current.metadata().created_at),
            self.settings(),
        )?;
        Ok(self.install(profile).await)
    }

    /// Drop every observation that came from one of `sources`.
    pub async fn remove_observations(
        &self,
        owner_id: &str,
        sources: &[ImageRef],
    ) -> Result<Arc<FaceProfile>, EngineError> {
        let lock = self.writer(owner_id).await;
        let _guard = lock.lock().await;
        let current = self.require(owner_id).await?;

        let remaining: Vec<ProfileObservation> = current
            .observations()
            .iter()
            .filter(|o| !sources.contains(o.source()))
            .cloned()
            .collect();
        if remaining.len() < MIN_OBSERVATIONS {
            return Err(EngineError::WouldInvalidateProfile {
                remaining: remaining.len(),
                required: MIN_OBSERVATIONS,
            });
        }

        let examined: Vec<ImageRef> = current
            .examined_images()
            .iter()
            .filter(|img| !sources.contains(*img))
            .cloned()
            .collect();

        tracing::info!(
            owner = owner_id,
            removed = current.face_count() - remaining.len(),
            remaining = remaining.len(),
            "removing observations"
        );

        let profile = FaceProfile::build(
            owner_id,
            remaining,
            examined,
            Some(current.metadata().created_at),
            self.settings(),
        )?;
        Ok(self.install(profile).await)
    }

    /// Drop observations scoring below `min_quality`.
    ///
    /// Returns the current profile untouched when nothing would be dropped
    /// or fewer than [`MIN_OBSERVATIONS`] would remain.
    pub async fn optimize(
        &self,
        owner_id: &str,
        min_quality: f32,
    ) -> Result<Arc<FaceProfile>, EngineError> {
        let lock = self.writer(owner_id).await;
        let _guard = lock.lock().await;
        let current = self.require(owner_id).await?;

        let kept: Vec<ProfileObservation> = current
            .observations()
            .iter()
            .filter(|o| o.quality() >= min_quality)
            .cloned()
            .collect();

        if kept.len() == current.face_count() || kept.len() < MIN_OBSERVATIONS {
            tracing::debug!(
                owner = owner_id,
                min_quality,
                would_keep = kept.len(),
                "optimize left profile unchanged"
            );
            return Ok(current);
        }

        tracing::info!(
            owner = owner_id,
            min_quality,
            dropped = current.face_count() - kept.len(),
            "optimizing profile"
        );

        let profile = FaceProfile::build(
            owner_id,
            kept,
            current.examined_images().to_vec(),
            Some(current.metadata().created_at),
            self.settings(),
        )?;
        Ok(self.install(profile).await)
    }

    /// Remove a profile. Returns whether one existed.
    pub async fn delete_profile(&self, owner_id: &str) -> bool {
        let lock = self.writer(owner_id).await;
        let removed = {
            let _guard = lock.lock().await;
            self.profiles.write().await.remove(owner_id).is_some()
        };
        drop(lock);

        let mut writers = self.writers.lock().await;
        if writers.get(owner_id).is_some_and(|w| Arc::strong_count(w) == 1) {
            writers.remove(owner_id);
        }
        drop(writers);

        if removed {
            tracing::info!(owner = owner_id, "profile deleted");
        }
        removed
    }

    pub async fn get_profile(&self, owner_id: &str) -> Option<Arc<FaceProfile>> {
        self.profiles.read().await.get(owner_id).cloned()
    }

    pub async fn has_profile(&self, owner_id: &str) -> bool {
        self.profiles.read().await.contains_key(owner_id)
    }

    /// Images that contributed to the profile, copied out.
    pub async fn profile_images(&self, owner_id: &str) -> Vec<ImageRef> {
        self.get_profile(owner_id)
            .await
            .map(|p| p.metadata().source_images.clone())
            .unwrap_or_default()
    }

    async fn writer(&self, owner_id: &str) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().await;
        writers.entry(owner_id.to_string()).or_default().clone()
    }

    fn settings(&self) -> MatchSettings {
        MatchSettings { strategy: self.strategy, threshold: self.threshold.get() }
    }

    async fn require(&self, owner_id: &str) -> Result<Arc<FaceProfile>, EngineError> {
        self.get_profile(owner_id)
            .await
            .ok_or_else(|| EngineError::ProfileNotFound(owner_id.to_string()))
    }

    async fn build_fresh(
        &self,
        owner_id: &str,
        images: &[ImageRef],
        created_at: Option<DateTime<Utc>>,
    ) -> Result<Arc<FaceProfile>, EngineError> {
        let (observations, examined) = self.detect_images(&dedup(images), 0).await?;

        let profile =
            match FaceProfile::build(owner_id, observations, examined, created_at, self.settings()) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!(owner = owner_id, error = %e, "profile not created");
                    return Err(e);
                }
            };
        Ok(self.install(profile).await)
    }

    /// Best accepted observation per image, plus the images detection
    /// actually ran on. A failed image is logged and left out of both so a
    /// later add retries it; a dead worker is fatal.
    async fn detect_images(
        &self,
        images: &[ImageRef],
        first_index: usize,
    ) -> Result<(Vec<ProfileObservation>, Vec<ImageRef>), EngineError> {
        let mut observations = Vec::new();
        let mut examined = Vec::with_capacity(images.len());
        for image in images {
            let detection = match self.detector.detect(image.clone()).await {
                Ok(d) => d,
                Err(EngineError::WorkerClosed) => return Err(EngineError::WorkerClosed),
                Err(e) => {
                    tracing::warn!(image = %image, error = %e, "skipping reference image");
                    continue;
                }
            };
            examined.push(image.clone());
            match self
                .assessor
                .best_accepted(detection.faces, detection.strategy, image)
            {
                Some(observation) => observations.push(ProfileObservation {
                    ingest_index: first_index + observations.len(),
                    observation,
                }),
                None => tracing::debug!(image = %image, "no accepted face in reference image"),
            }
        }
        Ok((observations, examined))
    }

    async fn install(&self, profile: FaceProfile) -> Arc<FaceProfile> {
        let profile = Arc::new(profile);
        let previous = self
            .profiles
            .write()
            .await
            .insert(profile.owner_id().to_string(), profile.clone());
        tracing::info!(
            owner = profile.owner_id(),
            faces = profile.face_count(),
            images = profile.metadata().image_count,
            mean_quality = profile.metadata().mean_quality,
            replaced = previous.is_some(),
            "profile installed"
        );
        profile
    }
}

fn dedup(images: &[ImageRef]) -> Vec<ImageRef> {
    let mut out: Vec<ImageRef> = Vec::with_capacity(images.len());
    for img in images {
        if !out.contains(img) {
            out.push(img.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::testing::{CallLog, ScriptedDetector, StubLoader};
    use crate::worker::spawn_worker;
    use facematch_core::fixtures::{faceless_face, seeded_embedding, strong_face, weak_face};
    use facematch_core::{DetectionStrategy, MatchStrategy};
    use rand::{Rng, SeedableRng};

    fn refs(names: &[&str]) -> Vec<ImageRef> {
        names.iter().map(|n| ImageRef::new(*n)).collect()
    }

    /// `s<N>.jpg` holds a strong face, `w<N>.jpg` a weak one, `f<N>.jpg` a
    /// face without descriptor. Anything else has no face.
    fn library() -> ScriptedDetector {
        let mut det = ScriptedDetector::new();
        for i in 0..10u64 {
            det = det
                .with_faces(&format!("s{i}.jpg"), vec![strong_face(seeded_embedding(i))])
                .with_faces(&format!("w{i}.jpg"), vec![weak_face(seeded_embedding(100 + i))])
                .with_faces(&format!("f{i}.jpg"), vec![faceless_face()]);
        }
        det
    }

    fn store_with(detector: ScriptedDetector) -> (ProfileStore, CallLog) {
        let calls = detector.calls();
        let handle = spawn_worker(detector, StubLoader::new(), &EngineConfig::default()).unwrap();
        let settings = MatchSettings { strategy: MatchStrategy::Distance, threshold: 0.5 };
        (ProfileStore::new(handle, QualityAssessor::default(), settings), calls)
    }

    #[tokio::test]
    async fn test_create_keeps_accepted_faces_only() {
        let (store, _) = store_with(library());
        let profile = store
            .create_profile("alice", &refs(&["s0.jpg", "w0.jpg", "f0.jpg"]))
            .await
            .unwrap();

        assert_eq!(profile.face_count(), 2);
        assert_eq!(profile.metadata().image_count, 3);
        assert_eq!(profile.metadata().source_images, refs(&["s0.jpg", "w0.jpg"]));
        assert!(profile.metadata().best_quality > 0.94);
        assert!(store.has_profile("alice").await);
    }

    #[tokio::test]
    async fn test_optimize_is_noop_when_nothing_or_too_much_drops() {
        let (store, _) = store_with(library());
        let profile = store
            .create_profile("alice", &refs(&["s0.jpg", "w0.jpg", "f0.jpg"]))
            .await
            .unwrap();

        // Both remaining observations clear 0.45: nothing to drop.
        let same = store.optimize("alice", 0.45).await.unwrap();
        assert!(Arc::ptr_eq(&profile, &same));

        // Dropping the weak face would leave one observation.
        let same = store.optimize("alice", 0.9).await.unwrap();
        assert!(Arc::ptr_eq(&profile, &same));
        assert_eq!(store.get_profile("alice").await.unwrap().face_count(), 2);
    }

    #[tokio::test]
    async fn test_optimize_drops_low_quality() {
        let (store, _) = store_with(library());
        store
            .create_profile("alice", &refs(&["s0.jpg", "s1.jpg", "s2.jpg", "w0.jpg"]))
            .await
            .unwrap();

        let optimized = store.optimize("alice", 0.9).await.unwrap();
        assert_eq!(optimized.face_count(), 3);
        assert_eq!(optimized.index().len(), 3);
        assert!(optimized.observations().iter().all(|o| o.quality() >= 0.9));
    }

    #[tokio::test]
    async fn test_create_insufficient_faces_keeps_previous() {
        let (store, _) = store_with(library());
        let first = store
            .create_profile("alice", &refs(&["s0.jpg", "s1.jpg"]))
            .await
            .unwrap();

        let err = store
            .create_profile("alice", &refs(&["s2.jpg", "f0.jpg", "empty.jpg"]))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFaces { found: 1, required: 2 }));

        let current = store.get_profile("alice").await.unwrap();
        assert!(Arc::ptr_eq(&first, &current));
    }

    #[tokio::test]
    async fn test_create_replaces_existing_profile() {
        let (store, _) = store_with(library());
        store.create_profile("alice", &refs(&["s0.jpg", "s1.jpg"])).await.unwrap();
        let replaced = store
            .create_profile("alice", &refs(&["s3.jpg", "s4.jpg", "s5.jpg"]))
            .await
            .unwrap();

        assert_eq!(replaced.face_count(), 3);
        assert_eq!(store.profile_images("alice").await, refs(&["s3.jpg", "s4.jpg", "s5.jpg"]));
    }

    #[tokio::test]
    async fn test_create_keeps_best_face_per_image() {
        let detector = ScriptedDetector::new()
            .with_faces(
                "group.jpg",
                vec![weak_face(seeded_embedding(1)), strong_face(seeded_embedding(2))],
            )
            .with_faces("solo.jpg", vec![strong_face(seeded_embedding(3))]);
        let (store, _) = store_with(detector);

        let profile = store
            .create_profile("alice", &refs(&["group.jpg", "solo.jpg"]))
            .await
            .unwrap();
        assert_eq!(profile.face_count(), 2);
        let from_group = &profile.observations()[0];
        assert_eq!(from_group.source(), &ImageRef::new("group.jpg"));
        assert_eq!(from_group.observation.embedding, Some(seeded_embedding(2)));
    }

    #[tokio::test]
    async fn test_create_skips_failed_images() {
        let detector = library().with_failure("broken.jpg");
        let (store, _) = store_with(detector);
        let profile = store
            .create_profile("alice", &refs(&["s0.jpg", "broken.jpg", "s1.jpg"]))
            .await
            .unwrap();
        assert_eq!(profile.face_count(), 2);
        assert_eq!(profile.metadata().image_count, 2);
        assert!(!profile.examined_images().contains(&ImageRef::new("broken.jpg")));
    }

    #[tokio::test]
    async fn test_add_retries_image_whose_detection_failed() {
        let detector = library()
            .with_faces("late.jpg", vec![strong_face(seeded_embedding(50))])
            .with_transient_failure("late.jpg", DetectionStrategy::ALL.len());
        let (store, calls) = store_with(detector);
        store.create_profile("alice", &refs(&["s0.jpg", "s1.jpg"])).await.unwrap();

        let unchanged = store.add_observations("alice", &refs(&["late.jpg"])).await.unwrap();
        assert_eq!(unchanged.face_count(), 2);
        assert_eq!(unchanged.metadata().image_count, 2);
        assert!(!unchanged.examined_images().contains(&ImageRef::new("late.jpg")));

        let before = calls.images().len();
        let grown = store.add_observations("alice", &refs(&["late.jpg"])).await.unwrap();
        assert!(calls.images()[before..].contains(&"late.jpg".to_string()));
        assert_eq!(grown.face_count(), 3);
        assert_eq!(grown.metadata().image_count, 3);
    }

    #[tokio::test]
    async fn test_add_detects_only_new_images() {
        let (store, calls) = store_with(library());
        let first = store
            .create_profile("alice", &refs(&["s0.jpg", "s1.jpg"]))
            .await
            .unwrap();
        let before = calls.images().len();

        let grown = store
            .add_observations("alice", &refs(&["s1.jpg", "s2.jpg", "w0.jpg"]))
            .await
            .unwrap();

        let new_calls: Vec<String> = calls.images()[before..].to_vec();
        assert!(!new_calls.contains(&"s1.jpg".to_string()));
        assert!(new_calls.contains(&"s2.jpg".to_string()));

        assert_eq!(grown.face_count(), 4);
        assert_eq!(grown.index().len(), 4);
        assert_eq!(grown.metadata().created_at, first.metadata().created_at);
        let order: Vec<usize> = grown.observations().iter().map(|o| o.ingest_index).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_add_requires_existing_profile() {
        let (store, _) = store_with(library());
        let err = store.add_observations("nobody", &refs(&["s0.jpg"])).await.unwrap_err();
        assert!(matches!(err, EngineError::ProfileNotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_would_invalidate() {
        let (store, _) = store_with(library());
        let profile = store
            .create_profile("alice", &refs(&["s0.jpg", "s1.jpg"]))
            .await
            .unwrap();

        let err = store
            .remove_observations("alice", &refs(&["s0.jpg"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::WouldInvalidateProfile { remaining: 1, required: 2 }
        ));
        assert!(Arc::ptr_eq(&profile, &store.get_profile("alice").await.unwrap()));
    }

    #[tokio::test]
    async fn test_remove_rebuilds_from_remaining() {
        let (store, _) = store_with(library());
        store
            .create_profile("alice", &refs(&["s0.jpg", "s1.jpg", "s2.jpg"]))
            .await
            .unwrap();

        let shrunk = store
            .remove_observations("alice", &refs(&["s1.jpg"]))
            .await
            .unwrap();
        assert_eq!(shrunk.face_count(), 2);
        assert_eq!(shrunk.index().len(), 2);
        assert_eq!(shrunk.examined_images(), refs(&["s0.jpg", "s2.jpg"]).as_slice());

        // A removed image can be added back.
        let regrown = store.add_observations("alice", &refs(&["s1.jpg"])).await.unwrap();
        assert_eq!(regrown.face_count(), 3);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _) = store_with(library());
        store.create_profile("alice", &refs(&["s0.jpg", "s1.jpg"])).await.unwrap();

        assert!(store.delete_profile("alice").await);
        assert!(!store.delete_profile("alice").await);
        assert!(!store.delete_profile("never-existed").await);
        assert!(!store.has_profile("alice").await);
        assert!(store.profile_images("alice").await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_releases_writer_entry() {
        let (store, _) = store_with(library());
        store.create_profile("alice", &refs(&["s0.jpg", "s1.jpg"])).await.unwrap();
        store.create_profile("bob", &refs(&["s2.jpg", "s3.jpg"])).await.unwrap();
        assert_eq!(store.writers.lock().await.len(), 2);

        store.delete_profile("alice").await;
        store.delete_profile("ghost").await;
        let writers = store.writers.lock().await;
        assert_eq!(writers.len(), 1);
        assert!(writers.contains_key("bob"));
    }

    #[tokio::test]
    async fn test_rebuild_records_current_threshold() {
        let (store, _) = store_with(library());
        let first = store.create_profile("alice", &refs(&["s0.jpg", "s1.jpg"])).await.unwrap();
        assert!((first.metadata().match_threshold - 0.5).abs() < 1e-6);

        store.threshold().set(0.3);
        let grown = store.add_observations("alice", &refs(&["s2.jpg"])).await.unwrap();
        assert!((grown.metadata().match_threshold - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_restore_from_metadata() {
        let (store, _) = store_with(library());
        let original = store
            .create_profile("alice", &refs(&["s0.jpg", "f0.jpg", "s1.jpg"]))
            .await
            .unwrap();
        let metadata = original.metadata().clone();
        store.delete_profile("alice").await;

        let restored = store.restore(&metadata).await.unwrap();
        assert_eq!(restored.face_count(), 2);
        assert_eq!(restored.metadata().source_images, metadata.source_images);
        assert_eq!(restored.metadata().created_at, metadata.created_at);
    }

    #[tokio::test]
    async fn test_concurrent_adds_do_not_lose_updates() {
        let (store, _) = store_with(library());
        let store = Arc::new(store);
        store.create_profile("alice", &refs(&["s0.jpg", "s1.jpg"])).await.unwrap();

        let a = {
            let store = store.clone();
            tokio::spawn(async move {
                store.add_observations("alice", &refs(&["s2.jpg", "s3.jpg"])).await
            })
        };
        let b = {
            let store = store.clone();
            tokio::spawn(async move {
                store.add_observations("alice", &refs(&["s4.jpg", "s5.jpg"])).await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let profile = store.get_profile("alice").await.unwrap();
        assert_eq!(profile.face_count(), 6);
        assert_eq!(profile.index().len(), 6);
    }

    #[tokio::test]
    async fn test_random_mutations_never_leave_fewer_than_two() {
        let (store, _) = store_with(library());
        store.create_profile("alice", &refs(&["s0.jpg", "s1.jpg"])).await.unwrap();

        let pool: Vec<String> = (0..10)
            .flat_map(|i| [format!("s{i}.jpg"), format!("w{i}.jpg"), format!("f{i}.jpg")])
            .collect();
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for _ in 0..40 {
            let pick = |rng: &mut rand::rngs::StdRng| {
                let n = rng.gen_range(1..=3);
                (0..n)
                    .map(|_| ImageRef::new(pool[rng.gen_range(0..pool.len())].clone()))
                    .collect::<Vec<_>>()
            };
            let _ = match rng.gen_range(0..4) {
                0 => store.create_profile("alice", &pick(&mut rng)).await,
                1 => store.add_observations("alice", &pick(&mut rng)).await,
                2 => store.remove_observations("alice", &pick(&mut rng)).await,
                _ => store.optimize("alice", rng.gen_range(0.3..1.0)).await,
            };
            let profile = store.get_profile("alice").await.unwrap();
            assert!(profile.face_count() >= MIN_OBSERVATIONS);
            assert_eq!(profile.index().len(), profile.face_count());
        }
    }
}
