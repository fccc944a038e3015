//! NMEA GGA position requests.
//!
//! Network casters serving virtual reference stations need the rover
//! position before they start streaming; the relay sends a `$GPGGA`
//! sentence for the configured station position every request cycle.

use chrono::{DateTime, Duration, Timelike, Utc};
use gnss_relay_core::GeodeticPosition;

/// Build a `$GPGGA` sentence (with `\r\n`) for a fixed position at `time`.
pub fn gga_sentence(position: &GeodeticPosition, time: DateTime<Utc>) -> String {
    // Round to the hundredth of a second; chrono carries into the minute.
    let time = time + Duration::milliseconds(5);
    let hundredths = (time.nanosecond() % 1_000_000_000) / 10_000_000;
    let longitude = normalize_longitude(position.longitude);
    let (lat_deg, lat_min) = degrees_minutes(position.latitude);
    let (lon_deg, lon_min) = degrees_minutes(longitude);

    let body = format!(
        "GPGGA,{:02}{:02}{:02}.{:02},{:02}{:010.7},{},{:03}{:010.7},{},1,08,1.0,{:.3},M,0.000,M,,",
        time.hour(),
        time.minute(),
        time.second(),
        hundredths,
        lat_deg,
        lat_min,
        if position.latitude >= 0.0 { 'N' } else { 'S' },
        lon_deg,
        lon_min,
        if longitude >= 0.0 { 'E' } else { 'W' },
        position.height,
    );
    format!("${}*{:02X}\r\n", body, checksum(&body))
}

/// XOR of every byte between `$` and `*`.
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0, |acc, b| acc ^ b)
}

/// Longitude in (-180, 180].
fn normalize_longitude(value: f64) -> f64 {
    let wrapped = value.rem_euclid(360.0);
    if wrapped > 180.0 {
        wrapped - 360.0
    } else {
        wrapped
    }
}

/// Whole degrees and minutes, rounded to 1e-7 minute before splitting.
fn degrees_minutes(value: f64) -> (u32, f64) {
    const UNITS_PER_DEGREE: u64 = 60 * 10_000_000;
    let units = (value.abs() * 60.0 * 1e7).round() as u64;
    (
        (units / UNITS_PER_DEGREE) as u32,
        (units % UNITS_PER_DEGREE) as f64 / 1e7,
    )
}
