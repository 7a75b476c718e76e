//! Per-category R-trees over hazard points
//!
//! Lookups are bounding-box queries: the route's bbox grown by a buffer,
//! then scored vertex by vertex. Hazards are sparse next to route length,
//! so this stays cheap.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rstar::{RTree, RTreeObject, AABB};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use waymark_common::{Error, LatLon};

use super::{Hazard, HazardCategory, HazardRecord};
use crate::geo::BoundingBox;

/// Hazards grouped by category, as handed to the scorer.
pub type HazardSet = BTreeMap<HazardCategory, Vec<Hazard>>;

/// Whether any category holds at least one hazard.
pub fn has_hazards(set: &HazardSet) -> bool {
    set.values().any(|v| !v.is_empty())
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct HazardPoint {
    lon_lat: [f64; 2],
    slot: u32,
}

impl RTreeObject for HazardPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.lon_lat)
    }
}

#[derive(Debug)]
pub struct HazardIndex {
    hazards: Vec<Hazard>,
    trees: BTreeMap<HazardCategory, RTree<HazardPoint>>,
    loaded_at: DateTime<Utc>,
}

impl Default for HazardIndex {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl HazardIndex {
    pub fn new(hazards: Vec<Hazard>) -> Self {
        let mut points: BTreeMap<HazardCategory, Vec<HazardPoint>> = BTreeMap::new();
        for (slot, h) in hazards.iter().enumerate() {
            points.entry(h.category).or_default().push(HazardPoint {
                lon_lat: [h.lon, h.lat],
                slot: slot as u32,
            });
        }
        let trees = points
            .into_iter()
            .map(|(category, pts)| (category, RTree::bulk_load(pts)))
            .collect();
        Self {
            hazards,
            trees,
            loaded_at: Utc::now(),
        }
    }

    /// Builds from import rows, remapping categories and dropping rows
    /// with unknown categories or illegal coordinates.
    pub fn from_records(records: Vec<HazardRecord>) -> Self {
        let total = records.len();
        let hazards: Vec<Hazard> = records
            .into_iter()
            .filter_map(|r| {
                let category = HazardCategory::from_import(&r.category)?;
                LatLon::new(r.lat, r.lon).ok()?;
                Some(Hazard {
                    lat: r.lat,
                    lon: r.lon,
                    category,
                    description: r.description,
                })
            })
            .collect();
        if hazards.len() < total {
            warn!(
                skipped = total - hazards.len(),
                kept = hazards.len(),
                "dropped hazard records with unknown category or bad coordinates"
            );
        }
        Self::new(hazards)
    }

    /// Loads a JSON array of import records.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let bytes = std::fs::read(path)?;
        let records: Vec<HazardRecord> = serde_json::from_slice(&bytes)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let index = Self::from_records(records);
        info!(path = %path.display(), hazards = index.len(), "hazard index loaded");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.hazards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hazards.is_empty()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn count_by_category(&self) -> BTreeMap<HazardCategory, usize> {
        self.trees.iter().map(|(c, t)| (*c, t.size())).collect()
    }

    /// Hazards inside `bbox` for the given categories, one query per category.
    pub fn query<I>(&self, bbox: &BoundingBox, categories: I) -> HazardSet
    where
        I: IntoIterator<Item = HazardCategory>,
    {
        let envelope = AABB::from_corners([bbox.min_lon, bbox.min_lat], [bbox.max_lon, bbox.max_lat]);
        let mut out = HazardSet::new();
        for category in categories {
            let Some(tree) = self.trees.get(&category) else {
                continue;
            };
            let found: Vec<Hazard> = tree
                .locate_in_envelope(&envelope)
                .map(|p| self.hazards[p.slot as usize].clone())
                .collect();
            if !found.is_empty() {
                out.insert(category, found);
            }
        }
        out
    }
}

/// Swappable reference to the current hazard snapshot.
pub struct HazardHandle {
    current: RwLock<Arc<HazardIndex>>,
}

impl HazardHandle {
    pub fn new(index: HazardIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
        }
    }

    pub fn current(&self) -> Arc<HazardIndex> {
        self.current.read().clone()
    }

    pub fn swap(&self, index: HazardIndex) -> Arc<HazardIndex> {
        std::mem::replace(&mut *self.current.write(), Arc::new(index))
    }

    /// Reloads `path` every `interval` until cancelled. A failed reload
    /// keeps serving the previous snapshot.
    pub fn spawn_refresh(
        self: Arc<Self>,
        path: PathBuf,
        interval: Duration,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; startup already loaded.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        info!("hazard refresh stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let load_path = path.clone();
                        match tokio::task::spawn_blocking(move || HazardIndex::load(&load_path)).await {
                            Ok(Ok(index)) => {
                                let count = index.len();
                                self.swap(index);
                                info!(hazards = count, "hazard snapshot swapped");
                            }
                            Ok(Err(e)) => warn!(error = %e, "hazard reload failed; keeping previous snapshot"),
                            Err(e) => warn!(error = %e, "hazard reload task panicked"),
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(lat: f64, lon: f64, category: &str) -> HazardRecord {
        HazardRecord {
            lat,
            lon,
            category: category.to_string(),
            description: String::new(),
        }
    }

    #[test]
    fn query_filters_by_box_and_category() {
        let index = HazardIndex::from_records(vec![
            record(50.0, 4.0, "speed_camera"),
            record(50.0, 4.0, "roadworks"),
            record(52.0, 6.0, "speed_camera"),
            record(50.0, 4.0, "unknown thing"),
        ]);
        assert_eq!(index.len(), 3);

        let bbox = BoundingBox::around(LatLon::new(50.0, 4.0).unwrap()).expand(0.1);
        let set = index.query(&bbox, [HazardCategory::TrafficEnforcement]);
        assert_eq!(set.len(), 1);
        assert_eq!(set[&HazardCategory::TrafficEnforcement].len(), 1);
        assert!(has_hazards(&set));

        let none = index.query(&bbox, std::iter::empty::<HazardCategory>());
        assert!(!has_hazards(&none));
    }

    #[test]
    fn handle_swap_replaces_snapshot() {
        let handle = HazardHandle::new(HazardIndex::default());
        let before = handle.current();
        handle.swap(HazardIndex::from_records(vec![record(1.0, 1.0, "school_zone")]));
        assert!(before.is_empty());
        assert_eq!(handle.current().len(), 1);
    }

    #[test]
    fn load_reads_json_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("hazards.json");
        std::fs::write(
            &path,
            r#"[{"lat": 50.1, "lon": 4.2, "category": "red_light_camera", "description": "Rue Royale"}]"#,
        )
        .unwrap();
        let index = HazardIndex::load(&path).unwrap();
        assert_eq!(index.count_by_category()[&HazardCategory::RedLightCamera], 1);
    }
}
