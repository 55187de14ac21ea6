//! Inverse de la projection UTM (WGS84)
//!
//! Les levés béninois sont en zone 31N (EPSG:32631).

use anyhow::{bail, Result};

use super::ellipsoid::WGS84;
use super::Geographic;

/// Facteur d'échelle sur le méridien central
const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500000.0;
const FALSE_NORTHING_SOUTH: f64 = 10000000.0;

/// Zone UTM d'un code EPSG WGS84 (326zz nord, 327zz sud)
pub fn zone_from_epsg(epsg: u32) -> Option<(u32, bool)> {
    let (zone, south) = match epsg {
        32601..=32660 => (epsg - 32600, false),
        32701..=32760 => (epsg - 32700, true),
        _ => return None,
    };
    Some((zone, south))
}

/// Convertit des coordonnées UTM en coordonnées géographiques
pub fn utm_to_geographic(x: f64, y: f64, zone: u32, south: bool) -> Result<Geographic> {
    if !(1..=60).contains(&zone) {
        bail!("Invalid UTM zone: {}", zone);
    }
    if !x.is_finite() || !y.is_finite() {
        bail!("Non-finite UTM coordinate: ({}, {})", x, y);
    }

    let a = WGS84::A;
    let e2 = WGS84::E2;
    let ep2 = WGS84::EP2;

    let lon0 = (f64::from(zone) * 6.0 - 183.0).to_radians();
    let x = x - FALSE_EASTING;
    let y = if south { y - FALSE_NORTHING_SOUTH } else { y };

    // Latitude d'empreinte
    let mu = y / K0 / (a * (1.0 - e2 / 4.0 - 3.0 * e2.powi(2) / 64.0 - 5.0 * e2.powi(3) / 256.0));
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin_phi1, cos_phi1) = phi1.sin_cos();
    let tan_phi1 = phi1.tan();
    let n1 = a / (1.0 - e2 * sin_phi1.powi(2)).sqrt();
    let t1 = tan_phi1.powi(2);
    let c1 = ep2 * cos_phi1.powi(2);
    let r1 = a * (1.0 - e2) / (1.0 - e2 * sin_phi1.powi(2)).powf(1.5);
    let d = x / (n1 * K0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d.powi(2) / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1.powi(2) - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1.powi(2)
                    - 252.0 * ep2
                    - 3.0 * c1.powi(2))
                    * d.powi(6)
                    / 720.0);

    let lon = lon0
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1.powi(2) + 8.0 * ep2 + 24.0 * t1.powi(2))
                * d.powi(5)
                / 120.0)
            / cos_phi1;

    Ok(Geographic::new(lon, lat))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cotonou() {
        // Cotonou: 2.41°E, 6.40°N
        let geo = utm_to_geographic(435000.0, 708000.0, 31, false).unwrap();
        let (lon, lat) = geo.to_degrees();
        assert!((lon - 2.41).abs() < 0.01, "lon={}", lon);
        assert!((lat - 6.40).abs() < 0.01, "lat={}", lat);
    }

    #[test]
    fn test_central_meridian() {
        let (lon, lat) = utm_to_geographic(500000.0, 0.0, 31, false).unwrap().to_degrees();
        assert!((lon - 3.0).abs() < 1e-9);
        assert!(lat.abs() < 1e-9);
    }

    #[test]
    fn test_zone_from_epsg() {
        assert_eq!(zone_from_epsg(32631), Some((31, false)));
        assert_eq!(zone_from_epsg(32740), Some((40, true)));
        assert_eq!(zone_from_epsg(4326), None);
        assert!(utm_to_geographic(0.0, 0.0, 61, false).is_err());
    }
}
