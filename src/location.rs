//! Best-effort position source for an open session.
//!
//! Location never gates the session lifecycle: a denied permission or a
//! failed fix is logged by the caller and the sample is skipped.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Location unavailable: {0}")]
    Unavailable(String),
}

pub trait LocationProvider {
    fn current_position(&mut self) -> Result<Position, LocationError>;
}

/// Always reports the same position (configured coordinates)
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Position);

impl LocationProvider for FixedLocation {
    fn current_position(&mut self) -> Result<Position, LocationError> {
        let Position {
            latitude,
            longitude,
        } = self.0;
        if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
            return Err(LocationError::Unavailable(format!(
                "coordinates out of range ({}, {})",
                latitude, longitude
            )));
        }
        Ok(self.0)
    }
}

/// Behaves like a device where the user refused location access
#[derive(Debug, Default, Clone, Copy)]
pub struct DeniedLocation;

impl LocationProvider for DeniedLocation {
    fn current_position(&mut self) -> Result<Position, LocationError> {
        Err(LocationError::PermissionDenied)
    }
}
