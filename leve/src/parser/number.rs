//! Lecture des nombres de coordonnées

/// Parse une coordonnée en acceptant `,` ou `.` comme séparateur décimal
pub fn parse_coordinate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if raw.contains(',') {
        fast_float::parse(raw.replace(',', ".")).ok()
    } else {
        fast_float::parse(raw).ok()
    }
}
