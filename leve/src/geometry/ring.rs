//! Fermeture et contrôle de l'anneau extérieur

use geo::line_intersection::{line_intersection, LineIntersection};
use geo::{Coord, Line};

/// Tolérance de fermeture par défaut (unités de la projection)
pub const DEFAULT_CLOSURE_TOLERANCE: f64 = 1e-3;

/// Ferme l'anneau.
///
/// Si le dernier sommet est à moins de `tolerance` du premier, il est recalé
/// sur le premier et rien n'est ajouté; sinon le premier sommet est ajouté.
/// Retourne vrai si un sommet a été ajouté.
pub fn close_ring(coords: &mut Vec<Coord>, tolerance: f64) -> bool {
    let (Some(&first), Some(&last)) = (coords.first(), coords.last()) else {
        return false;
    };
    if coords.len() > 1 && distance(first, last) <= tolerance {
        if let Some(end) = coords.last_mut() {
            *end = first;
        }
        return false;
    }

    let gap = distance(first, last);
    tracing::debug!(points = coords.len(), gap_meters = gap, "Closing boundary ring");
    coords.push(first);
    true
}

/// Aire (formule du lacet) d'un anneau fermé
///
/// Les coordonnées sont recentrées sur le premier sommet pour limiter les
/// pertes de précision sur des coordonnées UTM.
pub fn shoelace_area(ring: &[Coord]) -> f64 {
    let Some(&origin) = ring.first() else {
        return 0.0;
    };
    let twice: f64 = ring
        .windows(2)
        .map(|w| {
            let (a, b) = (w[0] - origin, w[1] - origin);
            a.x * b.y - b.x * a.y
        })
        .sum();
    twice.abs() / 2.0
}

/// Périmètre d'un anneau fermé
pub fn perimeter(ring: &[Coord]) -> f64 {
    ring.windows(2).map(|w| distance(w[0], w[1])).sum()
}

/// Vrai si l'anneau fermé ne s'auto-intersecte pas et a une aire non nulle
pub fn is_simple(ring: &[Coord]) -> bool {
    if ring.len() < 4 {
        return false;
    }
    let edges: Vec<Line> = ring.windows(2).map(|w| Line::new(w[0], w[1])).collect();
    let n = edges.len();

    if edges.iter().any(|e| e.start == e.end) {
        return false;
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            match line_intersection(edges[i], edges[j]) {
                None => {}
                Some(LineIntersection::Collinear { .. }) => return false,
                Some(LineIntersection::SinglePoint { .. }) if adjacent => {}
                Some(LineIntersection::SinglePoint { .. }) => return false,
            }
        }
    }

    shoelace_area(ring) > 0.0
}

/// Compare deux coordonnées avec tolérance
pub fn coords_equal(a: Coord, b: Coord) -> bool {
    const TOLERANCE: f64 = 1e-6;
    (a.x - b.x).abs() < TOLERANCE && (a.y - b.y).abs() < TOLERANCE
}

fn distance(a: Coord, b: Coord) -> f64 {
    (a.x - b.x).hypot(a.y - b.y)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> Vec<Coord> {
        vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 100.0, y: 0.0 },
            Coord { x: 100.0, y: 100.0 },
            Coord { x: 0.0, y: 100.0 },
        ]
    }

    #[test]
    fn test_close_appends_once() {
        let mut ring = square();
        assert!(close_ring(&mut ring, DEFAULT_CLOSURE_TOLERANCE));
        assert_eq!(ring.len(), 5);
        assert!(coords_equal(ring[0], ring[4]));

        // déjà fermé: rien n'est ajouté
        assert!(!close_ring(&mut ring, DEFAULT_CLOSURE_TOLERANCE));
        assert_eq!(ring.len(), 5);
    }

    #[test]
    fn test_close_snaps_within_tolerance() {
        let mut ring = square();
        ring.push(Coord { x: 0.0005, y: 0.0 });
        assert!(!close_ring(&mut ring, DEFAULT_CLOSURE_TOLERANCE));
        assert_eq!(ring.len(), 5);
        assert_eq!(ring[4], ring[0]);
    }

    #[test]
    fn test_square_area_and_perimeter() {
        let mut ring = square();
        close_ring(&mut ring, DEFAULT_CLOSURE_TOLERANCE);
        assert_eq!(shoelace_area(&ring), 10000.0);
        assert_eq!(perimeter(&ring), 400.0);
        assert!(is_simple(&ring));
    }

    #[test]
    fn test_bow_tie_not_simple() {
        let mut ring = vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 100.0, y: 100.0 },
            Coord { x: 100.0, y: 0.0 },
            Coord { x: 0.0, y: 100.0 },
        ];
        close_ring(&mut ring, DEFAULT_CLOSURE_TOLERANCE);
        assert!(!is_simple(&ring));
    }

    #[test]
    fn test_collinear_ring_not_simple() {
        let mut ring = vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 50.0, y: 0.0 },
            Coord { x: 100.0, y: 0.0 },
        ];
        close_ring(&mut ring, DEFAULT_CLOSURE_TOLERANCE);
        assert!(!is_simple(&ring));
    }

    #[test]
    fn test_triangle_simple() {
        let mut ring = vec![
            Coord { x: 0.0, y: 0.0 },
            Coord { x: 10.0, y: 0.0 },
            Coord { x: 0.0, y: 10.0 },
        ];
        close_ring(&mut ring, DEFAULT_CLOSURE_TOLERANCE);
        assert!(is_simple(&ring));
        assert_eq!(shoelace_area(&ring), 50.0);
    }
}
