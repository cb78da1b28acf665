// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-enclosure project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Solar Ephemeris
//!
//! Low precision sun position based on the NOAA solar calculator equations.
//! The result is accurate to a few arcminutes between 1800 and 2100, which is
//! plenty to decide whether the sun is up.
//!
//! ## Examples
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use rust_enclosure::utility::ephemeris::sun_altitude;
//!
//! // Noon at Las Campanas Observatory in January
//! let time = Utc.with_ymd_and_hms(2024, 1, 15, 17, 0, 0).unwrap();
//! assert!(sun_altitude(-29.0146, -70.6926, time) > 60.0);
//! ```

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};

/// Altitude of the sun centre at sunrise and sunset, accounting for refraction
/// and the solar radius.
pub const HORIZON_ALTITUDE: f64 = -0.833;

fn julian_day(time: DateTime<Utc>) -> f64 {
    time.timestamp() as f64 / 86400.0
        + f64::from(time.timestamp_subsec_millis()) / 86_400_000.0
        + 2_440_587.5
}

/// Altitude of the sun in degrees for an observer at `latitude`, `longitude`
/// (degrees, positive north and east).
pub fn sun_altitude(latitude: f64, longitude: f64, time: DateTime<Utc>) -> f64 {
    let jc = (julian_day(time) - 2_451_545.0) / 36525.0;

    let mean_long = (280.46646 + jc * (36000.76983 + jc * 0.0003032)).rem_euclid(360.0);
    let mean_anom = 357.52911 + jc * (35999.05029 - 0.0001537 * jc);
    let eccent = 0.016708634 - jc * (0.000042037 + 0.0000001267 * jc);

    let m = mean_anom.to_radians();
    let eq_of_ctr = m.sin() * (1.914602 - jc * (0.004817 + 0.000014 * jc))
        + (2.0 * m).sin() * (0.019993 - 0.000101 * jc)
        + (3.0 * m).sin() * 0.000289;

    let omega = (125.04 - 1934.136 * jc).to_radians();
    let app_long = mean_long + eq_of_ctr - 0.00569 - 0.00478 * omega.sin();

    let mean_obliq =
        23.0 + (26.0 + (21.448 - jc * (46.815 + jc * (0.00059 - jc * 0.001813))) / 60.0) / 60.0;
    let obliq = (mean_obliq + 0.00256 * omega.cos()).to_radians();

    let declination = (obliq.sin() * app_long.to_radians().sin()).asin();

    // Equation of time, in minutes
    let y = (obliq / 2.0).tan().powi(2);
    let l0 = mean_long.to_radians();
    let eq_of_time = 4.0
        * (y * (2.0 * l0).sin() - 2.0 * eccent * m.sin()
            + 4.0 * eccent * y * m.sin() * (2.0 * l0).cos()
            - 0.5 * y * y * (4.0 * l0).sin()
            - 1.25 * eccent * eccent * (2.0 * m).sin())
        .to_degrees();

    let minutes = f64::from(time.hour()) * 60.0
        + f64::from(time.minute())
        + f64::from(time.second()) / 60.0;
    let true_solar_time = (minutes + eq_of_time + 4.0 * longitude).rem_euclid(1440.0);
    let hour_angle = if true_solar_time < 0.0 {
        true_solar_time / 4.0 + 180.0
    } else {
        true_solar_time / 4.0 - 180.0
    };

    let lat = latitude.to_radians();
    let cos_zenith = lat.sin() * declination.sin()
        + lat.cos() * declination.cos() * hour_angle.to_radians().cos();
    90.0 - cos_zenith.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Whether it is daytime at `time`.
///
/// It is daytime when the sun is above the horizon both `tolerance` before and
/// `tolerance` after `time`. Close to sunset or sunrise it is therefore not
/// considered daytime.
pub fn is_daytime(latitude: f64, longitude: f64, time: DateTime<Utc>, tolerance: Duration) -> bool {
    let tolerance = chrono::Duration::from_std(tolerance).unwrap_or(chrono::Duration::zero());
    [time - tolerance, time + tolerance]
        .into_iter()
        .all(|t| sun_altitude(latitude, longitude, t) > HORIZON_ALTITUDE)
}
