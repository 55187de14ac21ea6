//! Géométrie de repli (enveloppe convexe) pour les anneaux non simples

use geo::{ConvexHull, Coord, MultiPoint, Point, Polygon};

use crate::LeveError;

/// Calcule l'enveloppe convexe des sommets d'une parcelle
pub fn convex_hull_fallback(vertices: &[Coord]) -> Result<Polygon, LeveError> {
    let points: Vec<Point> = vertices.iter().map(|c| Point::new(c.x, c.y)).collect();

    if points.len() < 3 {
        return Err(LeveError::InsufficientPoints {
            found: points.len(),
        });
    }

    Ok(MultiPoint::new(points).convex_hull())
}
