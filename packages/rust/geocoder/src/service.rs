//! Geocoding service seam and the Nominatim client.

use std::time::Duration;

use async_trait::async_trait;
use radar_shared::{GeoPrecision, GeocoderSection, RadarError, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// One resolved location.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoHit {
    pub latitude: f64,
    pub longitude: f64,
    pub precision: GeoPrecision,
    pub display_name: Option<String>,
}

/// Resolves a free-text address. `Ok(None)` means the service found nothing.
#[async_trait]
pub trait GeocodingService: Send + Sync {
    async fn lookup(&self, query: &str) -> Result<Option<GeoHit>>;
}

/// Client for the Nominatim `/search` API.
pub struct NominatimService {
    client: Client,
    base_url: String,
    country_codes: Option<String>,
}

#[derive(Deserialize)]
struct Place {
    lat: String,
    lon: String,
    #[serde(default)]
    addresstype: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl NominatimService {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration) -> Result<Self> {
        // Nominatim rejects requests without an identifying user agent
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| RadarError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            country_codes: None,
        })
    }

    pub fn from_config(config: &GeocoderSection) -> Result<Self> {
        let mut service = Self::new(
            &config.base_url,
            &config.user_agent,
            Duration::from_secs(config.timeout_secs),
        )?;
        service.country_codes = config
            .country_codes
            .clone()
            .filter(|c| !c.trim().is_empty());
        Ok(service)
    }

    pub fn with_country_codes(mut self, codes: impl Into<String>) -> Self {
        self.country_codes = Some(codes.into());
        self
    }

    fn search_url(&self, query: &str) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/search", self.base_url))
            .map_err(|e| RadarError::config(format!("invalid geocoder base URL: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", query)
                .append_pair("format", "json")
                .append_pair("limit", "1");
            if let Some(codes) = &self.country_codes {
                pairs.append_pair("countrycodes", codes);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl GeocodingService for NominatimService {
    async fn lookup(&self, query: &str) -> Result<Option<GeoHit>> {
        let url = self.search_url(query)?;
        debug!(%query, "geocoding");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RadarError::GeocodeFailed(format!("request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RadarError::GeocodeFailed(
                "rate limited by geocoding service (HTTP 429)".into(),
            ));
        }
        if !status.is_success() {
            return Err(RadarError::GeocodeFailed(format!(
                "geocoding service returned HTTP {status}"
            )));
        }

        let places: Vec<Place> = response
            .json()
            .await
            .map_err(|e| RadarError::GeocodeFailed(format!("invalid response: {e}")))?;

        let Some(place) = places.into_iter().next() else {
            return Ok(None);
        };

        let latitude = place
            .lat
            .parse::<f64>()
            .map_err(|e| RadarError::GeocodeFailed(format!("invalid latitude: {e}")))?;
        let longitude = place
            .lon
            .parse::<f64>()
            .map_err(|e| RadarError::GeocodeFailed(format!("invalid longitude: {e}")))?;

        let precision = place
            .addresstype
            .as_deref()
            .or(place.kind.as_deref())
            .map(precision_of)
            .unwrap_or(GeoPrecision::Unknown);

        Ok(Some(GeoHit {
            latitude,
            longitude,
            precision,
            display_name: place.display_name,
        }))
    }
}

/// Map a Nominatim address type to a precision class.
fn precision_of(addresstype: &str) -> GeoPrecision {
    match addresstype {
        "house" | "building" | "amenity" | "office" | "shop" | "industrial" | "commercial"
        | "retail" => GeoPrecision::Building,
        "road" | "street" | "residential" => GeoPrecision::Street,
        "postcode" => GeoPrecision::Postcode,
        "suburb" | "neighbourhood" | "quarter" | "city_district" | "city" | "town" | "village"
        | "hamlet" | "municipality" => GeoPrecision::Locality,
        "county" | "state_district" | "state" | "region" | "country" => GeoPrecision::Region,
        _ => GeoPrecision::Unknown,
    }
}
