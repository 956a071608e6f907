use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::{CommerceError, CommerceResult};
use crate::inventory::InventoryLedger;
use crate::models::{Coordinates, OrderItem, StockKey};

const EARTH_RADIUS_KM: f64 = 6371.0;

/// A dark store or warehouse that can serve orders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentLocation {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl FulfillmentLocation {
    pub fn distance_km(&self, to: &Coordinates) -> f64 {
        haversine_km(self.latitude, self.longitude, to.latitude, to.longitude)
    }
}

/// Picks the location that fulfils an order. `None` means nothing can.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, coordinates: &Coordinates, items: &[OrderItem]) -> CommerceResult<Option<String>>;
}

/// Always answers with the same location.
pub struct FixedLocationResolver {
    location_id: String,
}

impl FixedLocationResolver {
    pub fn new(location_id: impl Into<String>) -> Self {
        Self {
            location_id: location_id.into(),
        }
    }
}

#[async_trait]
impl LocationResolver for FixedLocationResolver {
    async fn resolve(&self, _coordinates: &Coordinates, _items: &[OrderItem]) -> CommerceResult<Option<String>> {
        Ok(Some(self.location_id.clone()))
    }
}

/// Nearest location within `radius_km` whose stock covers every item.
pub struct NearestLocationResolver {
    locations: Vec<FulfillmentLocation>,
    radius_km: f64,
    inventory: InventoryLedger,
}

impl NearestLocationResolver {
    pub fn new(locations: Vec<FulfillmentLocation>, radius_km: f64, inventory: InventoryLedger) -> Self {
        Self {
            locations,
            radius_km,
            inventory,
        }
    }

    /// In-radius locations, nearest first.
    fn candidates(&self, coordinates: &Coordinates) -> Vec<(f64, &FulfillmentLocation)> {
        let mut in_range: Vec<_> = self
            .locations
            .iter()
            .map(|loc| (loc.distance_km(coordinates), loc))
            .filter(|(distance, _)| *distance <= self.radius_km)
            .collect();
        in_range.sort_by(|a, b| a.0.total_cmp(&b.0));
        in_range
    }

    async fn covers(&self, location_id: &str, items: &[OrderItem]) -> CommerceResult<bool> {
        for item in items {
            let key = StockKey::new(&item.variant_id, location_id);
            match self.inventory.get(&key).await {
                Ok(stock) if stock.available() >= item.quantity => {}
                Ok(_) | Err(CommerceError::StockNotFound { .. }) => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl LocationResolver for NearestLocationResolver {
    async fn resolve(&self, coordinates: &Coordinates, items: &[OrderItem]) -> CommerceResult<Option<String>> {
        for (distance, location) in self.candidates(coordinates) {
            if self.covers(&location.id, items).await? {
                tracing::debug!(location_id = %location.id, distance_km = distance, "Fulfillment location resolved");
                return Ok(Some(location.id.clone()));
            }
        }
        tracing::info!(
            latitude = coordinates.latitude,
            longitude = coordinates.longitude,
            "No location in range can fulfil the order"
        );
        Ok(None)
    }
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}
