//! Encoded-frame cache.
//!
//! Small sessions are encoded once at build completion and served from a
//! flat array. Large sessions encode on demand behind a per-session LRU so
//! a seek-heavy viewer does not hold the whole encoded session in memory.

use bytes::Bytes;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Tuning;
use crate::telemetry::frame::SessionArtifact;

use super::codec::{self, CodecError};

/// Cache lookup errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Frame index {index} out of range (total {total})")]
    OutOfRange { index: usize, total: usize },

    #[error(transparent)]
    Codec(#[from] CodecError),
}

enum Backing {
    /// Every frame pre-encoded at build time.
    Eager(Vec<Bytes>),
    /// Encode on demand, memoized in a bounded LRU. The mutex spans the
    /// lookup-or-encode step, so the same index is never encoded twice
    /// concurrently.
    OnDemand {
        artifact: Arc<SessionArtifact>,
        lru: Mutex<LruCache<usize, Bytes>>,
    },
}

/// Per-session cache of encoded frame payloads.
pub struct FrameCache {
    backing: Backing,
    total: usize,
}

impl FrameCache {
    /// Build the cache for a sealed artifact.
    ///
    /// Sessions at or below `small_session_threshold` frames take the eager
    /// path; larger sessions get the LRU.
    pub fn build(artifact: &Arc<SessionArtifact>, tuning: &Tuning) -> Result<Self, CodecError> {
        let total = artifact.total_frames();

        if total <= tuning.small_session_threshold {
            debug!(frames = total, "Eagerly encoding session frames");
            let mut encoded = Vec::with_capacity(total);
            for frame in &artifact.frames {
                encoded.push(codec::encode_frame(frame)?);
            }
            Ok(Self {
                backing: Backing::Eager(encoded),
                total,
            })
        } else {
            debug!(
                frames = total,
                capacity = tuning.lru_capacity,
                "Deferring frame encoding to LRU"
            );
            let capacity = NonZeroUsize::new(tuning.lru_capacity).unwrap_or(NonZeroUsize::MIN);
            Ok(Self {
                backing: Backing::OnDemand {
                    artifact: artifact.clone(),
                    lru: Mutex::new(LruCache::new(capacity)),
                },
                total,
            })
        }
    }

    /// An empty cache, for records that never produced frames.
    pub fn empty() -> Self {
        Self {
            backing: Backing::Eager(Vec::new()),
            total: 0,
        }
    }

    pub fn total_frames(&self) -> usize {
        self.total
    }

    /// Whether this cache serves from the pre-encoded array.
    pub fn is_eager(&self) -> bool {
        matches!(self.backing, Backing::Eager(_))
    }

    /// Fetch the encoded payload for a frame index.
    pub async fn get(&self, index: usize) -> Result<Bytes, CacheError> {
        if index >= self.total {
            return Err(CacheError::OutOfRange {
                index,
                total: self.total,
            });
        }

        match &self.backing {
            Backing::Eager(encoded) => Ok(encoded[index].clone()),
            Backing::OnDemand { artifact, lru } => {
                let mut lru = lru.lock().await;
                if let Some(hit) = lru.get(&index) {
                    return Ok(hit.clone());
                }
                let payload = codec::encode_frame(&artifact.frames[index])?;
                lru.put(index, payload.clone());
                Ok(payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::codec::decode_frame;
    use crate::session::{SessionKey, SessionType};
    use crate::telemetry::frame::{Frame, SessionArtifact, SessionMetadata};
    use crate::telemetry::geometry::TrackGeometry;
    use crate::telemetry::types::WeatherSummary;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn artifact(frame_count: usize) -> Arc<SessionArtifact> {
        let key = SessionKey::new(2023, 1, SessionType::Race);
        let frames = (0..frame_count)
            .map(|i| Frame {
                t: i as f64 / 25.0,
                lap: 1,
                drivers: BTreeMap::new(),
            })
            .collect();

        Arc::new(SessionArtifact {
            metadata: SessionMetadata {
                year: 2023,
                round: 1,
                session_type: "R".to_string(),
                total_frames: frame_count,
                total_laps: 1,
                driver_colors: Default::default(),
                driver_numbers: Default::default(),
                driver_teams: Default::default(),
                track_geometry: TrackGeometry::default(),
                track_statuses: Vec::new(),
                race_start_time: 0.0,
                weather: WeatherSummary::default(),
            },
            key,
            frames,
            built_at: Utc::now(),
        })
    }

    fn tuning(threshold: usize, lru: usize) -> Tuning {
        Tuning {
            small_session_threshold: threshold,
            lru_capacity: lru,
            ..Tuning::default()
        }
    }

    #[tokio::test]
    async fn test_eager_path_under_threshold() {
        let cache = FrameCache::build(&artifact(10), &tuning(50, 4)).unwrap();
        assert!(cache.is_eager());

        let frame = decode_frame(&cache.get(3).await.unwrap()).unwrap();
        assert!((frame.t - 3.0 / 25.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_lru_path_over_threshold() {
        let cache = FrameCache::build(&artifact(10), &tuning(5, 4)).unwrap();
        assert!(!cache.is_eager());

        // Same bytes whether served cold or memoized.
        let cold = cache.get(7).await.unwrap();
        let warm = cache.get(7).await.unwrap();
        assert_eq!(cold, warm);
    }

    #[tokio::test]
    async fn test_lru_eviction_still_serves() {
        let cache = FrameCache::build(&artifact(10), &tuning(5, 2)).unwrap();

        // Touch more distinct indices than the capacity holds.
        for index in 0..10 {
            let payload = cache.get(index).await.unwrap();
            let frame = decode_frame(&payload).unwrap();
            assert!((frame.t - index as f64 / 25.0).abs() < 1e-9);
        }

        // Index 0 was evicted; re-encoding yields identical bytes.
        let again = cache.get(0).await.unwrap();
        let frame = decode_frame(&again).unwrap();
        assert_eq!(frame.t, 0.0);
    }

    #[tokio::test]
    async fn test_out_of_range() {
        let cache = FrameCache::build(&artifact(3), &tuning(50, 4)).unwrap();
        assert!(matches!(
            cache.get(3).await,
            Err(CacheError::OutOfRange { index: 3, total: 3 })
        ));
    }

    #[tokio::test]
    async fn test_empty_cache() {
        let cache = FrameCache::empty();
        assert_eq!(cache.total_frames(), 0);
        assert!(matches!(
            cache.get(0).await,
            Err(CacheError::OutOfRange { .. })
        ));
    }
}
