//! Construction et contrôle du polygone de la parcelle

pub mod fallback;
pub mod inference;
pub mod ring;

use geo::{Coord, LineString, Polygon};
use serde::Serialize;
use tracing::{debug, warn};

use crate::types::{BoundaryPoint, BoundarySet, ParcelStatus};
use crate::LeveError;

pub use inference::InferencePolicy;

/// Parcelle construite à partir des bornes
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Parcel {
    /// Bornes du polygone, triées par numéro
    pub points: Vec<BoundaryPoint>,
    /// Anneau extérieur fermé
    #[serde(skip)]
    pub ring: Vec<Coord>,
    pub area: f64,
    pub perimeter: f64,
    pub centroid: (f64, f64),
    pub is_simple: bool,
    pub status: ParcelStatus,
    /// Vrai si le premier sommet a été ajouté pour fermer l'anneau
    pub closure_appended: bool,
    pub inferred_count: usize,
}

impl Parcel {
    /// Polygone de la parcelle
    pub fn polygon(&self) -> Polygon {
        Polygon::new(LineString::new(self.ring.clone()), vec![])
    }

    /// Polygone utilisé pour l'analyse spatiale: l'enveloppe convexe si
    /// l'anneau n'est pas simple
    pub fn analysis_polygon(&self) -> Polygon {
        if self.is_simple {
            return self.polygon();
        }
        let vertices = &self.ring[..self.ring.len().saturating_sub(1)];
        match fallback::convex_hull_fallback(vertices) {
            Ok(hull) => {
                debug!(points = vertices.len(), "Using convex hull for non-simple parcel");
                hull
            }
            Err(_) => self.polygon(),
        }
    }
}

/// Construit le polygone à partir des bornes triées par numéro
#[derive(Debug, Clone, Copy)]
pub struct PolygonBuilder {
    closure_tolerance: f64,
    inference: InferencePolicy,
}

impl Default for PolygonBuilder {
    fn default() -> Self {
        Self {
            closure_tolerance: ring::DEFAULT_CLOSURE_TOLERANCE,
            inference: InferencePolicy::default(),
        }
    }
}

impl PolygonBuilder {
    pub fn new(closure_tolerance: f64, inference: InferencePolicy) -> Self {
        Self {
            closure_tolerance,
            inference,
        }
    }

    /// Construit la parcelle (statut initial `invalid`)
    ///
    /// # Errors
    ///
    /// `InsufficientPoints` sous 3 bornes, `InsufficientRecognizedPoints` si
    /// la part de bornes lues est inférieure à la politique.
    pub fn build(&self, set: &BoundarySet) -> Result<Parcel, LeveError> {
        let points: Vec<BoundaryPoint> = set
            .points()
            .filter(|p| !p.inferred || self.inference.allow_in_geometry)
            .cloned()
            .collect();

        if points.len() < 3 {
            return Err(LeveError::InsufficientPoints {
                found: points.len(),
            });
        }

        let inferred_count = points.iter().filter(|p| p.inferred).count();
        if inferred_count > 0 {
            let recognized = points.len() - inferred_count;
            let ratio = recognized as f64 / points.len() as f64;
            if ratio < self.inference.min_recognized_ratio {
                return Err(LeveError::InsufficientRecognizedPoints {
                    recognized,
                    total: points.len(),
                    min_ratio: self.inference.min_recognized_ratio,
                });
            }
        }

        let mut coords: Vec<Coord> = points.iter().map(BoundaryPoint::coord).collect();
        let closure_appended = ring::close_ring(&mut coords, self.closure_tolerance);

        let vertices = &coords[..coords.len() - 1];
        let n = vertices.len() as f64;
        let centroid = (
            vertices.iter().map(|c| c.x).sum::<f64>() / n,
            vertices.iter().map(|c| c.y).sum::<f64>() / n,
        );

        let area = ring::shoelace_area(&coords);
        let perimeter = ring::perimeter(&coords);
        let is_simple = ring::is_simple(&coords);

        if !is_simple {
            let err = LeveError::invalid_geometry(
                format!("{} points", points.len()),
                "self-intersecting or degenerate ring",
            );
            warn!(error = %err, area, "Parcel ring is not simple, keeping it as invalid");
        }

        Ok(Parcel {
            points,
            ring: coords,
            area,
            perimeter,
            centroid,
            is_simple,
            status: ParcelStatus::Invalid,
            closure_appended,
            inferred_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BorneId, OriginPattern};

    fn point(n: u32, x: f64, y: f64, inferred: bool) -> BoundaryPoint {
        BoundaryPoint {
            id: BorneId(n),
            x,
            y,
            confidence: if inferred { 0.3 } else { 1.0 },
            origin_pattern: if inferred {
                OriginPattern::GeometricInference
            } else {
                OriginPattern::ExplicitNormal
            },
            source_backend: "test".to_string(),
            inferred,
        }
    }

    fn square() -> BoundarySet {
        vec![
            point(1, 0.0, 0.0, false),
            point(2, 100.0, 0.0, false),
            point(3, 100.0, 100.0, false),
            point(4, 0.0, 100.0, false),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_square_metrics() {
        let parcel = PolygonBuilder::default().build(&square()).unwrap();
        assert_eq!(parcel.area, 10000.0);
        assert_eq!(parcel.perimeter, 400.0);
        assert_eq!(parcel.centroid, (50.0, 50.0));
        assert_eq!(parcel.ring.len(), 5);
        assert!(parcel.closure_appended);
        assert!(parcel.is_simple);
        assert_eq!(parcel.status, ParcelStatus::Invalid);
    }

    #[test]
    fn test_insufficient_points() {
        let set: BoundarySet = vec![point(1, 0.0, 0.0, false), point(2, 1.0, 0.0, false)]
            .into_iter()
            .collect();
        let result = PolygonBuilder::default().build(&set);
        assert!(matches!(result, Err(LeveError::InsufficientPoints { found: 2 })));
    }

    #[test]
    fn test_vertices_follow_numeric_order() {
        let set: BoundarySet = vec![
            point(3, 100.0, 100.0, false),
            point(1, 0.0, 0.0, false),
            point(4, 0.0, 100.0, false),
            point(2, 100.0, 0.0, false),
        ]
        .into_iter()
        .collect();
        let parcel = PolygonBuilder::default().build(&set).unwrap();
        assert!(parcel.is_simple);
        assert_eq!(parcel.area, 10000.0);
    }

    #[test]
    fn test_bow_tie_kept_invalid() {
        let set: BoundarySet = vec![
            point(1, 0.0, 0.0, false),
            point(2, 100.0, 100.0, false),
            point(3, 100.0, 0.0, false),
            point(4, 0.0, 100.0, false),
        ]
        .into_iter()
        .collect();
        let parcel = PolygonBuilder::default().build(&set).unwrap();
        assert!(!parcel.is_simple);
        assert_eq!(parcel.status, ParcelStatus::Invalid);
        use geo::Area;
        assert!((parcel.analysis_polygon().unsigned_area() - 10000.0).abs() < 1e-9);
    }

    #[test]
    fn test_inferred_points_excluded_by_default() {
        let mut set = square();
        set.insert(point(5, 50.0, 150.0, true));
        let parcel = PolygonBuilder::default().build(&set).unwrap();
        assert_eq!(parcel.points.len(), 4);
        assert_eq!(parcel.inferred_count, 0);
    }

    #[test]
    fn test_recognized_ratio_enforced() {
        let mut set = square();
        set.insert(point(5, 50.0, 150.0, true));
        let policy = InferencePolicy {
            enabled: true,
            allow_in_geometry: true,
            min_recognized_ratio: 0.9,
        };
        let result = PolygonBuilder::new(1e-3, policy).build(&set);
        assert!(matches!(
            result,
            Err(LeveError::InsufficientRecognizedPoints {
                recognized: 4,
                total: 5,
                ..
            })
        ));

        let policy = InferencePolicy {
            min_recognized_ratio: 0.75,
            ..policy
        };
        let parcel = PolygonBuilder::new(1e-3, policy).build(&set).unwrap();
        assert_eq!(parcel.inferred_count, 1);
    }
}
