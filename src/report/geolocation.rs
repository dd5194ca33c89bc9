use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn to_location_string(self) -> String {
        format!("{:.5}, {:.5}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum GeolocationError {
    #[error("Location access denied. Please enable it in your browser settings.")]
    PermissionDenied,
    #[error("Location information is unavailable.")]
    PositionUnavailable,
    #[error("Location request timed out.")]
    Timeout,
    #[error("Your browser does not support geolocation.")]
    Unsupported,
}

impl GeolocationError {
    pub fn notice_title(self) -> &'static str {
        match self {
            GeolocationError::Unsupported => "Geolocation Not Supported",
            _ => "Location Error",
        }
    }
}

#[async_trait]
pub trait Geolocator: Send + Sync {
    async fn current_position(&self) -> Result<Position, GeolocationError>;
}

pub async fn locate_with_timeout(
    geolocator: &dyn Geolocator,
    timeout: Duration,
) -> Result<Position, GeolocationError> {
    match tokio::time::timeout(timeout, geolocator.current_position()).await {
        Ok(result) => result,
        Err(_) => Err(GeolocationError::Timeout),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReportedPosition {
    Resolved(Position),
    Failed { error: GeolocationError },
}

#[async_trait]
impl Geolocator for ReportedPosition {
    async fn current_position(&self) -> Result<Position, GeolocationError> {
        match *self {
            ReportedPosition::Resolved(position) => {
                if position.latitude.is_finite()
                    && position.longitude.is_finite()
                    && position.latitude.abs() <= 90.0
                    && position.longitude.abs() <= 180.0
                {
                    Ok(position)
                } else {
                    Err(GeolocationError::PositionUnavailable)
                }
            }
            ReportedPosition::Failed { error } => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Never;

    #[async_trait]
    impl Geolocator for Never {
        async fn current_position(&self) -> Result<Position, GeolocationError> {
            std::future::pending().await
        }
    }

    #[test]
    fn formats_five_decimals() {
        let position = Position {
            latitude: 40.7127753,
            longitude: -74.0059728,
        };
        assert_eq!(position.to_location_string(), "40.71278, -74.00597");
    }

    #[test]
    fn parses_browser_reports() {
        let ok: ReportedPosition =
            serde_json::from_str(r#"{"latitude": 1.5, "longitude": 2.25}"#).unwrap();
        assert_eq!(
            ok,
            ReportedPosition::Resolved(Position {
                latitude: 1.5,
                longitude: 2.25
            })
        );
        let denied: ReportedPosition =
            serde_json::from_str(r#"{"error": "permission_denied"}"#).unwrap();
        assert_eq!(
            denied,
            ReportedPosition::Failed {
                error: GeolocationError::PermissionDenied
            }
        );
    }

    #[tokio::test]
    async fn out_of_range_coordinates_are_unavailable() {
        let report = ReportedPosition::Resolved(Position {
            latitude: 123.0,
            longitude: 0.0,
        });
        assert_eq!(
            report.current_position().await,
            Err(GeolocationError::PositionUnavailable)
        );
    }

    #[tokio::test]
    async fn slow_lookups_time_out() {
        let result = locate_with_timeout(&Never, Duration::from_millis(20)).await;
        assert_eq!(result, Err(GeolocationError::Timeout));
    }
}
