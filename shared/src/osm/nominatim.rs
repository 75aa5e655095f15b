use crate::error::ClientError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://nominatim.openstreetmap.org";

/// One hit of a forward search. Nominatim encodes the coordinates as strings.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReverseResult {
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Clone)]
pub struct NominatimClient {
    client: Client,
    base_url: String,
}

impl NominatimClient {
    pub fn new_with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn search(&self, address: &str) -> Result<Vec<SearchHit>, ClientError> {
        debug!(address, "forward geocoding");
        let url = format!("{}/search", self.base_url);
        let hits = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en")
            .query(&[("format", "json"), ("q", address)])
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<SearchHit>>()
            .await?;
        Ok(hits)
    }

    pub async fn reverse(&self, lat: f64, lon: f64) -> Result<ReverseResult, ClientError> {
        debug!(lat, lon, "reverse geocoding");
        let url = format!("{}/reverse", self.base_url);
        let lat = lat.to_string();
        let lon = lon.to_string();
        let result = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en")
            .query(&[("format", "jsonv2"), ("lat", lat.as_str()), ("lon", lon.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json::<ReverseResult>()
            .await?;
        Ok(result)
    }
}
