//! Location input validation.
//!
//! The number of commas in the trimmed input decides how it is read:
//! none means a city name, exactly one means a `latitude,longitude` pair,
//! anything more is rejected outright.

use crate::error::{Result, WeatherError};
use crate::model::LocationQuery;

pub const MIN_CITY_NAME_LENGTH: usize = 2;
pub const MAX_CITY_NAME_LENGTH: usize = 100;
pub const LATITUDE_RANGE: (f64, f64) = (-90.0, 90.0);
pub const LONGITUDE_RANGE: (f64, f64) = (-180.0, 180.0);

/// Classify and validate raw location input. No network activity happens here.
pub fn validate_location(input: &str) -> Result<LocationQuery> {
    let location = input.trim();

    if location.is_empty() {
        return Err(invalid("Location cannot be empty"));
    }

    match location.matches(',').count() {
        0 => validate_city_name(location).map(|()| LocationQuery::City(location.to_string())),
        1 => parse_coordinates(location).map(|(lat, lon)| LocationQuery::Coordinates { lat, lon }),
        _ => Err(invalid("Too many commas. Use 'latitude,longitude' for coordinates")),
    }
}

pub fn validate_city_name(city_name: &str) -> Result<()> {
    let city_name = city_name.trim();
    let len = city_name.chars().count();

    if city_name.is_empty() {
        return Err(invalid("City name cannot be empty"));
    }
    if len < MIN_CITY_NAME_LENGTH {
        return Err(invalid(format!(
            "City name must be at least {MIN_CITY_NAME_LENGTH} characters"
        )));
    }
    if len > MAX_CITY_NAME_LENGTH {
        return Err(invalid(format!(
            "City name too long (max {MAX_CITY_NAME_LENGTH} characters)"
        )));
    }
    if !city_name.chars().any(char::is_alphabetic) {
        return Err(invalid("City name must contain at least one letter"));
    }

    Ok(())
}

/// Parse `"lat,lon"` and check both bounds.
pub fn parse_coordinates(location: &str) -> Result<(f64, f64)> {
    let location = location.trim();

    if location.is_empty() {
        return Err(invalid("Coordinate string cannot be empty"));
    }

    let Some((lat_raw, lon_raw)) = location.split_once(',') else {
        return Err(invalid("Coordinates must be in format 'latitude,longitude'"));
    };
    if lon_raw.contains(',') {
        return Err(invalid("Coordinates must be in format 'latitude,longitude'"));
    }

    let (Some(lat), Some(lon)) = (parse_number(lat_raw), parse_number(lon_raw)) else {
        return Err(invalid("Both latitude and longitude must be valid numbers"));
    };

    let (lat_min, lat_max) = LATITUDE_RANGE;
    if !(lat_min..=lat_max).contains(&lat) {
        return Err(invalid(format!(
            "Latitude {lat} is out of range. Must be between {lat_min} and {lat_max}"
        )));
    }

    let (lon_min, lon_max) = LONGITUDE_RANGE;
    if !(lon_min..=lon_max).contains(&lon) {
        return Err(invalid(format!(
            "Longitude {lon} is out of range. Must be between {lon_min} and {lon_max}"
        )));
    }

    Ok((lat, lon))
}

// `f64::from_str` accepts "inf" and "NaN", which are not coordinates.
fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn invalid(msg: impl Into<String>) -> WeatherError {
    WeatherError::Validation(msg.into())
}
