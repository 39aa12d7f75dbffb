//! Geodetic → UTM projection.
//!
//! Converts WGS-84 latitude/longitude into Universal Transverse Mercator
//! easting/northing using the USGS transverse Mercator power series (Snyder,
//! *Map Projections: A Working Manual*, eqs. 8-9 to 8-10), and expresses
//! projected fixes relative to the map's [`OriginReference`].
//!
//! # Example
//!
//! ```rust
//! use posefuse_perception::projection::project;
//!
//! let utm = project(51.2, 7.5).unwrap();
//! assert_eq!(utm.zone_number, 32);
//! assert_eq!(utm.zone_letter, 'U');
//! assert!((utm.easting - 395_201.31).abs() < 0.01);
//! ```

use std::f64::consts::PI;

use posefuse_types::{Anomaly, OriginReference, PoseError};

const K0: f64 = 0.9996;
const E: f64 = 0.00669438;
const E2: f64 = E * E;
const E3: f64 = E2 * E;
const E_P2: f64 = E / (1.0 - E);

const M1: f64 = 1.0 - E / 4.0 - 3.0 * E2 / 64.0 - 5.0 * E3 / 256.0;
const M2: f64 = 3.0 * E / 8.0 + 3.0 * E2 / 32.0 + 45.0 * E3 / 1024.0;
const M3: f64 = 15.0 * E2 / 256.0 + 45.0 * E3 / 1024.0;
const M4: f64 = 35.0 * E3 / 3072.0;

/// WGS-84 equatorial radius, metres.
const R: f64 = 6_378_137.0;

const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// Latitude bands C..X, 8° each; X is stretched to 84°N.
const ZONE_LETTERS: &[u8] = b"CDEFGHJKLMNPQRSTUVWXX";

/// A projected fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmCoordinate {
    pub easting: f64,
    pub northing: f64,
    pub zone_number: u8,
    pub zone_letter: char,
}

impl UtmCoordinate {
    /// `true` when this coordinate lies in the same zone as `origin`.
    pub fn same_zone(&self, origin: &OriginReference) -> bool {
        self.zone_number == origin.zone_number && self.zone_letter == origin.zone_letter
    }
}

/// Latitude band letter, or `None` outside the UTM latitude range.
pub fn zone_letter(lat: f64) -> Option<char> {
    if !(-80.0..=84.0).contains(&lat) {
        return None;
    }
    let band = ((lat + 80.0) as usize) >> 3;
    ZONE_LETTERS.get(band).map(|&b| b as char)
}

/// Longitudinal zone number, honouring the Norway and Svalbard exceptions.
pub fn zone_number(lat: f64, lon: f64) -> u8 {
    if (56.0..64.0).contains(&lat) && (3.0..12.0).contains(&lon) {
        return 32;
    }
    if (72.0..=84.0).contains(&lat) && lon >= 0.0 {
        if lon < 9.0 {
            return 31;
        } else if lon < 21.0 {
            return 33;
        } else if lon < 33.0 {
            return 35;
        } else if lon < 42.0 {
            return 37;
        }
    }
    (((lon + 180.0) / 6.0) as u32 % 60 + 1) as u8
}

/// Project a WGS-84 fix into UTM.
///
/// # Errors
///
/// [`PoseError::Projection`] when `lat` is outside `[-80, 84]`, `lon` is
/// outside `[-180, 180]`, or either is not finite.
pub fn project(lat: f64, lon: f64) -> Result<UtmCoordinate, PoseError> {
    let zone_letter = zone_letter(lat).ok_or_else(|| {
        PoseError::Projection(format!("latitude {lat} outside [-80, 84]"))
    })?;
    if !(-180.0..=180.0).contains(&lon) {
        return Err(PoseError::Projection(format!(
            "longitude {lon} outside [-180, 180]"
        )));
    }
    let zone_number = zone_number(lat, lon);

    let lat_rad = lat.to_radians();
    let (lat_sin, lat_cos) = lat_rad.sin_cos();
    let lat_tan = lat_sin / lat_cos;
    let lat_tan2 = lat_tan * lat_tan;
    let lat_tan4 = lat_tan2 * lat_tan2;

    let central_lon = f64::from(zone_number - 1) * 6.0 - 180.0 + 3.0;
    let dlon = wrap_pi(lon.to_radians() - central_lon.to_radians());

    let n = R / (1.0 - E * lat_sin * lat_sin).sqrt();
    let c = E_P2 * lat_cos * lat_cos;
    let a = lat_cos * dlon;
    let m = R
        * (M1 * lat_rad - M2 * (2.0 * lat_rad).sin() + M3 * (4.0 * lat_rad).sin()
            - M4 * (6.0 * lat_rad).sin());

    let easting = K0
        * n
        * (a + a.powi(3) / 6.0 * (1.0 - lat_tan2 + c)
            + a.powi(5) / 120.0 * (5.0 - 18.0 * lat_tan2 + lat_tan4 + 72.0 * c - 58.0 * E_P2))
        + FALSE_EASTING;

    let mut northing = K0
        * (m + n
            * lat_tan
            * (a * a / 2.0
                + a.powi(4) / 24.0 * (5.0 - lat_tan2 + 9.0 * c + 4.0 * c * c)
                + a.powi(6) / 720.0
                    * (61.0 - 58.0 * lat_tan2 + lat_tan4 + 600.0 * c - 330.0 * E_P2)));
    if lat < 0.0 {
        northing += FALSE_NORTHING_SOUTH;
    }

    Ok(UtmCoordinate {
        easting,
        northing,
        zone_number,
        zone_letter,
    })
}

/// Express `coord` relative to the map origin.
///
/// The subtraction is always performed. A fix in a different zone than the
/// origin additionally yields an [`Anomaly::ZoneMismatch`]; the returned
/// offsets are then meaningless, but the caller decides what to do with them.
pub fn to_origin_relative(
    coord: &UtmCoordinate,
    origin: &OriginReference,
) -> ((f64, f64), Option<Anomaly>) {
    let mismatch = (!coord.same_zone(origin)).then(|| Anomaly::ZoneMismatch {
        fix_zone_number: coord.zone_number,
        fix_zone_letter: coord.zone_letter,
        origin_zone_number: origin.zone_number,
        origin_zone_letter: origin.zone_letter,
    });
    ((coord.easting - origin.x0, coord.northing - origin.y0), mismatch)
}

/// Map an angle onto `[-π, π)`.
fn wrap_pi(angle: f64) -> f64 {
    (angle + PI).rem_euclid(2.0 * PI) - PI
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn origin(x0: f64, y0: f64, zone_number: u8, zone_letter: char) -> OriginReference {
        OriginReference {
            x0,
            y0,
            zone_number,
            zone_letter,
        }
    }

    #[test]
    fn projects_known_point() {
        let utm = project(51.2, 7.5).unwrap();
        assert_abs_diff_eq!(utm.easting, 395_201.310_381, epsilon = 1e-3);
        assert_abs_diff_eq!(utm.northing, 5_673_135.241_182, epsilon = 1e-3);
        assert_eq!(utm.zone_number, 32);
        assert_eq!(utm.zone_letter, 'U');
    }

    #[test]
    fn central_meridian_on_equator_is_false_origin() {
        let utm = project(0.0, 3.0).unwrap();
        assert_abs_diff_eq!(utm.easting, 500_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(utm.northing, 0.0, epsilon = 1e-6);
        assert_eq!(utm.zone_number, 31);
        assert_eq!(utm.zone_letter, 'N');
    }

    #[test]
    fn southern_hemisphere_gets_false_northing() {
        let utm = project(-33.9, 151.2).unwrap();
        assert!(utm.northing > 6_000_000.0 && utm.northing < 10_000_000.0);
        assert_eq!(utm.zone_number, 56);
        assert_eq!(utm.zone_letter, 'H');
    }

    #[test]
    fn easting_is_symmetric_about_central_meridian() {
        let west = project(45.0, 8.0).unwrap();
        let east = project(45.0, 10.0).unwrap();
        assert_eq!(west.zone_number, 32);
        assert_eq!(east.zone_number, 32);
        assert_abs_diff_eq!(west.easting - 500_000.0, 500_000.0 - east.easting, epsilon = 1e-6);
        assert_abs_diff_eq!(west.northing, east.northing, epsilon = 1e-6);
    }

    #[test]
    fn norway_and_svalbard_exceptions() {
        assert_eq!(zone_number(60.0, 5.0), 32);
        assert_eq!(zone_number(60.0, 2.0), 31);
        assert_eq!(zone_number(78.0, 5.0), 31);
        assert_eq!(zone_number(78.0, 15.0), 33);
        assert_eq!(zone_number(78.0, 25.0), 35);
        assert_eq!(zone_number(78.0, 40.0), 37);
        assert_eq!(zone_number(78.0, 45.0), 38);
    }

    #[test]
    fn zone_number_wraps_at_antimeridian() {
        assert_eq!(zone_number(0.0, -180.0), 1);
        assert_eq!(zone_number(0.0, 180.0), 1);
        assert_eq!(zone_number(0.0, 179.9), 60);
    }

    #[test]
    fn zone_letters_cover_bands() {
        assert_eq!(zone_letter(-80.0), Some('C'));
        assert_eq!(zone_letter(57.7), Some('V'));
        assert_eq!(zone_letter(84.0), Some('X'));
        assert_eq!(zone_letter(84.1), None);
        assert_eq!(zone_letter(-80.1), None);
    }

    #[test]
    fn out_of_range_fix_is_rejected() {
        assert!(matches!(project(85.0, 0.0), Err(PoseError::Projection(_))));
        assert!(matches!(project(0.0, 181.0), Err(PoseError::Projection(_))));
        assert!(matches!(project(f64::NAN, 0.0), Err(PoseError::Projection(_))));
    }

    #[test]
    fn origin_relative_subtracts_origin() {
        let coord = UtmCoordinate {
            easting: 500_010.0,
            northing: 4_500_005.0,
            zone_number: 33,
            zone_letter: 'T',
        };
        let ((x, y), anomaly) =
            to_origin_relative(&coord, &origin(500_000.0, 4_500_000.0, 33, 'T'));
        assert_abs_diff_eq!(x, 10.0);
        assert_abs_diff_eq!(y, 5.0);
        assert!(anomaly.is_none());
    }

    #[test]
    fn zone_mismatch_is_reported_but_subtraction_proceeds() {
        let coord = UtmCoordinate {
            easting: 500_010.0,
            northing: 4_500_005.0,
            zone_number: 34,
            zone_letter: 'T',
        };
        let ((x, _), anomaly) =
            to_origin_relative(&coord, &origin(500_000.0, 4_500_000.0, 33, 'T'));
        assert_abs_diff_eq!(x, 10.0);
        assert_eq!(
            anomaly,
            Some(Anomaly::ZoneMismatch {
                fix_zone_number: 34,
                fix_zone_letter: 'T',
                origin_zone_number: 33,
                origin_zone_letter: 'T',
            })
        );
    }

    #[test]
    fn letter_only_mismatch_is_reported() {
        let coord = UtmCoordinate {
            easting: 0.0,
            northing: 0.0,
            zone_number: 33,
            zone_letter: 'U',
        };
        let (_, anomaly) = to_origin_relative(&coord, &origin(0.0, 0.0, 33, 'T'));
        assert!(anomaly.is_some());
    }
}
