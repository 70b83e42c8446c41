//! Rate-limited address geocoding.

pub mod geocode;
pub mod limiter;
pub mod service;

pub use geocode::{Geocoder, GeocoderConfig};
pub use limiter::RateLimiter;
pub use service::{GeoHit, GeocodingService, NominatimService};
