//! Reprojection légère en Rust pur
//!
//! Sources: UTM WGS84 (EPSG:326zz / 327zz), dont la zone 31N des levés
//! béninois. Cible: WGS84 géographique (EPSG:4326).

mod ellipsoid;
mod utm;

use anyhow::{bail, Result};
use geo::{Coord, Geometry, MapCoords};

pub use utm::{utm_to_geographic, zone_from_epsg};

/// Point en coordonnées géographiques (radians)
#[derive(Debug, Clone, Copy)]
pub struct Geographic {
    pub lon: f64,
    pub lat: f64,
}

impl Geographic {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Longitude et latitude en degrés
    pub fn to_degrees(self) -> (f64, f64) {
        (self.lon.to_degrees(), self.lat.to_degrees())
    }
}

/// Reprojection d'une projection UTM vers WGS84
#[derive(Debug, Clone, Copy)]
pub struct Reprojector {
    source_epsg: u32,
    target_epsg: u32,
    zone: Option<(u32, bool)>,
}

impl Reprojector {
    pub fn new(source_epsg: u32, target_epsg: u32) -> Result<Self> {
        if source_epsg == target_epsg {
            return Ok(Self {
                source_epsg,
                target_epsg,
                zone: None,
            });
        }
        let Some(zone) = zone_from_epsg(source_epsg) else {
            bail!("EPSG:{} not supported. Supported sources: 32601-32660, 32701-32760", source_epsg);
        };
        if target_epsg != 4326 {
            bail!("EPSG:{} not supported. Supported target: 4326", target_epsg);
        }
        Ok(Self {
            source_epsg,
            target_epsg,
            zone: Some(zone),
        })
    }

    pub fn is_supported(source: u32, target: u32) -> bool {
        source == target || (zone_from_epsg(source).is_some() && target == 4326)
    }

    pub fn source_epsg(&self) -> u32 {
        self.source_epsg
    }

    pub fn target_epsg(&self) -> u32 {
        self.target_epsg
    }

    /// Transforme un point (x, y) de la source vers la cible
    pub fn transform_point(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        match self.zone {
            None => Ok((x, y)),
            Some((zone, south)) => Ok(utm_to_geographic(x, y, zone, south)?.to_degrees()),
        }
    }

    /// Transforme tous les sommets d'une géométrie
    pub fn transform_geometry(&self, geom: &Geometry) -> Result<Geometry> {
        if self.zone.is_none() {
            return Ok(geom.clone());
        }
        geom.try_map_coords(|c| {
            let (x, y) = self.transform_point(c.x, c.y)?;
            Ok(Coord { x, y })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_utm31_to_wgs84() {
        let reproj = Reprojector::new(32631, 4326).unwrap();
        let (lon, lat) = reproj.transform_point(401374.38, 712334.71).unwrap();
        assert!((lon - 2.108).abs() < 0.001, "lon={}", lon);
        assert!((lat - 6.444).abs() < 0.001, "lat={}", lat);
    }

    #[test]
    fn test_transform_polygon() {
        let reproj = Reprojector::new(32631, 4326).unwrap();
        let poly = polygon![
            (x: 401374.38, y: 712334.71),
            (x: 401378.12, y: 712287.17),
            (x: 401353.24, y: 712284.56),
            (x: 401374.38, y: 712334.71),
        ];
        let Geometry::Polygon(out) = reproj.transform_geometry(&Geometry::Polygon(poly)).unwrap()
        else {
            panic!("expected polygon");
        };
        assert_eq!(out.exterior().0.len(), 4);
        assert!(out.exterior().0.iter().all(|c| (c.x - 2.1).abs() < 0.1));
    }

    #[test]
    fn test_identity_and_unsupported() {
        let identity = Reprojector::new(32631, 32631).unwrap();
        assert_eq!(identity.transform_point(1.0, 2.0).unwrap(), (1.0, 2.0));
        assert!(Reprojector::new(2154, 4326).is_err());
        assert!(Reprojector::new(32631, 3857).is_err());
        assert!(Reprojector::is_supported(32631, 4326));
    }
}
