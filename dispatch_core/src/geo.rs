use crate::facilities::Facility;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Mean Earth radius used for every distance in the dashboard, in statute miles.
///
/// Display rounding to 0.1 mi depends on this value, so it must not change silently.
pub const EARTH_RADIUS_MILES: f64 = 3958.8;
pub const METERS_PER_MILE: f64 = 1609.344;

const DEG_TO_RAD: f64 = std::f64::consts::PI / 180.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    /// Builds a coordinate, or `None` if it is not a usable position.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let coordinate = Self { lat, lon };
        coordinate.is_valid().then_some(coordinate)
    }

    /// Finite, in range, and not the `0,0` placeholder upstream sources emit for missing data.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
            && !(self.lat == 0.0 && self.lon == 0.0)
    }
}

impl Display for Coordinate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}, {}", self.lat, self.lon)
    }
}

/// Great-circle distance in miles (haversine).
pub fn distance_miles(a: Coordinate, b: Coordinate) -> f64 {
    let lat1_rad = a.lat * DEG_TO_RAD;
    let lat2_rad = b.lat * DEG_TO_RAD;
    let delta_lat = (b.lat - a.lat) * DEG_TO_RAD;
    let delta_lon = (b.lon - a.lon) * DEG_TO_RAD;

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1_rad.cos() * lat2_rad.cos() * (delta_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.min(1.0).sqrt().asin();

    EARTH_RADIUS_MILES * c
}

pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    distance_miles(a, b) * METERS_PER_MILE
}

/// Rounds to the 0.1 mi precision shown to operators.
pub fn round_tenth(miles: f64) -> f64 {
    (miles * 10.0).round() / 10.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingEntry {
    pub facility: Facility,
    pub distance_miles: f64,
}

/// Every candidate with a valid position, nearest first. Ties keep input order.
pub fn rank(origin: Coordinate, candidates: &[Facility]) -> Vec<RankingEntry> {
    if !origin.is_valid() {
        return Vec::new();
    }

    let mut entries = candidates
        .iter()
        .filter_map(|facility| {
            let at = facility.coordinates.filter(Coordinate::is_valid)?;
            Some(RankingEntry {
                facility: facility.clone(),
                distance_miles: distance_miles(origin, at),
            })
        })
        .collect::<Vec<_>>();

    // `sort_by` is stable, which is what breaks ties by input order.
    entries.sort_by(|a, b| a.distance_miles.total_cmp(&b.distance_miles));
    entries
}

pub fn top_k(origin: Coordinate, candidates: &[Facility], k: usize) -> Vec<RankingEntry> {
    let mut entries = rank(origin, candidates);
    entries.truncate(k);
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_and_out_of_range_positions_are_invalid() {
        assert!(Coordinate::new(0.0, 0.0).is_none());
        assert!(Coordinate::new(91.0, 10.0).is_none());
        assert!(Coordinate::new(10.0, -180.5).is_none());
        assert!(Coordinate::new(f64::NAN, 10.0).is_none());
        assert!(Coordinate::new(0.0, 12.5).is_some());
    }

    #[test]
    fn round_tenth_matches_display_precision() {
        assert_eq!(round_tenth(0.9034), 0.9);
        assert_eq!(round_tenth(12.25), 12.3);
    }

    #[test]
    fn one_degree_of_latitude_is_about_69_miles() {
        let a = Coordinate { lat: 0.0, lon: 10.0 };
        let b = Coordinate { lat: 1.0, lon: 10.0 };
        assert!((distance_miles(a, b) - 69.09).abs() < 0.01);
        assert!((distance_meters(a, b) - 111_195.0).abs() < 5.0);
    }
}
