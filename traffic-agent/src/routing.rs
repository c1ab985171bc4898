//! Distance Matrix client
//!
//! One request per intersection per cycle, towards a fixed destination
//! (Tandoğan junction). Any failure is reported to the caller, who falls
//! back to the heuristic estimate.

use serde::Deserialize;
use std::time::Duration;

use crate::error::RoutingError;
use crate::estimator::RoutingSample;

const DISTANCE_MATRIX_URL: &str = "https://maps.googleapis.com/maps/api/distancematrix/json";
const DESTINATION: &str = "39.9347,32.8197";

#[derive(Debug, Deserialize)]
struct DistanceMatrixResponse {
    #[serde(default)]
    rows: Vec<MatrixRow>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    #[serde(default)]
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    duration_in_traffic: Option<MatrixValue>,
    distance: Option<MatrixValue>,
}

#[derive(Debug, Deserialize)]
struct MatrixValue {
    value: i64,
}

#[derive(Clone)]
pub struct RoutingClient {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl RoutingClient {
    pub fn new(api_key: impl Into<String>, timeout: Duration) -> Result<Self, RoutingError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("ankara-traffic-agent")
            .build()?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            endpoint: DISTANCE_MATRIX_URL.to_string(),
        })
    }

    /// Points the client at another base URL (local stubs).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub async fn sample(&self, latitude: f64, longitude: f64) -> Result<RoutingSample, RoutingError> {
        let origin = format!("{latitude},{longitude}");
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("origins", origin.as_str()),
                ("destinations", DESTINATION),
                ("departure_time", "now"),
                ("key", self.api_key.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(RoutingError::Status(response.status().as_u16()));
        }

        let body: serde_json::Value = response.json().await?;
        parse_sample(body)
    }
}

/// Extracts the first element's traffic duration and distance.
fn parse_sample(body: serde_json::Value) -> Result<RoutingSample, RoutingError> {
    let response: DistanceMatrixResponse =
        serde_json::from_value(body).map_err(|e| RoutingError::Malformed(e.to_string()))?;

    let element = response
        .rows
        .into_iter()
        .next()
        .and_then(|row| row.elements.into_iter().next())
        .ok_or_else(|| RoutingError::Malformed("no rows/elements".into()))?;

    match (element.duration_in_traffic, element.distance) {
        (Some(duration), Some(distance)) => Ok(RoutingSample {
            duration_secs: duration.value,
            distance_m: distance.value,
        }),
        (None, _) => Err(RoutingError::Malformed("missing duration_in_traffic".into())),
        (_, None) => Err(RoutingError::Malformed("missing distance".into())),
    }
}
