//! Geolocation spoofing profiles
//!
//! Profiles are content-addressed: two profiles with the same coordinates,
//! accuracy, timezone and locale share one id, whatever their display name.

use crate::entity_store::{Entity, EntityStore};
use crate::id::IdStrategy;
use crate::storage::{Result, StorageAdapter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Key prefix of geolocation profiles
pub const GEO_PREFIX: &str = "geoProfiles";

/// Fields that make up a profile's identity
pub const GEO_IDENTITY_FIELDS: &[&str] = &["latitude", "longitude", "accuracy", "timezone", "locale"];

/// Spoofed position and locale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoProfile {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: f64,
    pub timezone: String,
    pub locale: String,
}

/// Geolocation profile storage keyed by content hash
pub struct GeoProfileStore {
    store: EntityStore<GeoProfile>,
}

impl GeoProfileStore {
    /// Profiles stored on `adapter`
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            store: EntityStore::new(adapter, GEO_PREFIX, IdStrategy::hash_of(GEO_IDENTITY_FIELDS)),
        }
    }

    pub fn store(&self) -> &EntityStore<GeoProfile> {
        &self.store
    }

    /// Save a profile; an identical profile keeps its existing id
    pub async fn save(&self, profile: &GeoProfile) -> Result<String> {
        self.store.create(profile).await
    }

    pub async fn get(&self, id: &str) -> Option<GeoProfile> {
        self.store.get(id).await
    }

    /// Profiles sorted by display name
    pub async fn list(&self) -> Vec<Entity<GeoProfile>> {
        let mut profiles = self.store.list(None).await;
        profiles.sort_by(|a, b| a.data.name.cmp(&b.data.name));
        profiles
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await
    }
}
