use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use gt_core::types::{AccuracyTier, LocationSample};

use crate::collaborators::{PositionError, PositionSource};

/// Position source that walks a fixed list of waypoints, wrapping around at
/// the end. Used by the headless daemon where no platform fix is available.
#[derive(Debug)]
pub struct ReplayPositionSource {
    waypoints: Vec<(f64, f64)>,
    cursor: AtomicUsize,
}

impl ReplayPositionSource {
    pub fn new(waypoints: Vec<(f64, f64)>) -> Self {
        Self {
            waypoints,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn from_pairs(pairs: &[[f64; 2]]) -> Self {
        Self::new(pairs.iter().map(|[lat, lon]| (*lat, *lon)).collect())
    }

    pub fn len(&self) -> usize {
        self.waypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }
}

#[async_trait]
impl PositionSource for ReplayPositionSource {
    async fn sample(&self, accuracy: AccuracyTier) -> Result<LocationSample, PositionError> {
        if self.waypoints.is_empty() {
            return Err(PositionError::Unavailable("no waypoints to replay".into()));
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.waypoints.len();
        let (lat, lon) = self.waypoints[idx];
        Ok(LocationSample::new(lat, lon, accuracy))
    }
}
