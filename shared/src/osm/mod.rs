pub mod nominatim;
pub mod overpass;
