//! Address resolution with request spacing and a per-run cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use radar_shared::{GeoPoint, RadarConfig, RadarError, RegionBounds, Result};
use tracing::{debug, info, warn};

use crate::limiter::RateLimiter;
use crate::service::{GeoHit, GeocodingService};

/// Runtime settings for [`Geocoder`].
#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub min_interval: Duration,
    pub country_suffix: Option<String>,
    pub region_bounds: Option<RegionBounds>,
}

impl From<&RadarConfig> for GeocoderConfig {
    fn from(config: &RadarConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.geocoder.min_interval_ms),
            country_suffix: config
                .geocoder
                .country_suffix
                .clone()
                .filter(|s| !s.trim().is_empty()),
            region_bounds: config.geocoder.region_bounds,
        }
    }
}

/// Turns postal addresses into coordinates.
///
/// One instance is shared by every task of a run. All lookups pass through a
/// single [`RateLimiter`], so concurrent callers never exceed the configured
/// request rate.
pub struct Geocoder {
    service: Arc<dyn GeocodingService>,
    limiter: RateLimiter,
    config: GeocoderConfig,
    cache: Mutex<HashMap<String, Option<GeoHit>>>,
}

impl Geocoder {
    pub fn new(service: Arc<dyn GeocodingService>, config: GeocoderConfig) -> Self {
        Self {
            service,
            limiter: RateLimiter::new(config.min_interval),
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve `address`. Not-found is reported as `GeocodeFailed`.
    pub async fn geocode(&self, address: &str) -> Result<GeoPoint> {
        let address = address.trim();
        if address.is_empty() {
            return Err(RadarError::GeocodeFailed("address is empty".into()));
        }

        let query = self.query_for(address);

        let hit = match self.cached(&query) {
            Some(hit) => {
                debug!(%query, "geocode cache hit");
                hit
            }
            None => {
                let hit = self
                    .limiter
                    .run(self.service.lookup(&query))
                    .await?;
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(query.clone(), hit.clone());
                }
                hit
            }
        };

        let Some(hit) = hit else {
            info!(%query, "address not found");
            return Err(RadarError::GeocodeFailed(format!(
                "no location found for '{query}'"
            )));
        };

        if let Some(bounds) = &self.config.region_bounds {
            if !bounds.contains(hit.latitude, hit.longitude) {
                warn!(
                    %query,
                    lat = hit.latitude,
                    lon = hit.longitude,
                    "geocoded location lies outside the region"
                );
            }
        }

        Ok(GeoPoint {
            latitude: hit.latitude,
            longitude: hit.longitude,
            precision: hit.precision,
            resolved_from: query,
            resolved_at: Utc::now(),
        })
    }

    fn query_for(&self, address: &str) -> String {
        match &self.config.country_suffix {
            Some(suffix) if !address.to_lowercase().contains(&suffix.to_lowercase()) => {
                format!("{address}, {suffix}")
            }
            _ => address.to_string(),
        }
    }

    fn cached(&self, query: &str) -> Option<Option<GeoHit>> {
        self.cache.lock().ok()?.get(query).cloned()
    }
}
