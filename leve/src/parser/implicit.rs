//! Famille implicite: couple sans étiquette juste avant l'étiquette suivante
//!
//! Sert surtout à récupérer B1 quand son étiquette est illisible.

use super::{label_positions, Family, Pass};
use crate::types::BorneId;

/// Fenêtre maximale lue avant une étiquette
const WINDOW: usize = 96;

pub(crate) fn apply(family: &Family, pass: &mut Pass<'_>) {
    let text = pass.text;
    let labels = label_positions(text);
    let explicit = pass.explicit_ids();

    let mut previous_end = 0usize;
    let mut previous_was_label = false;

    for &(start, end, id) in &labels {
        let window_start = floor_char_boundary(text, previous_end.max(start.saturating_sub(WINDOW)));
        let label_before_window = previous_was_label && window_start == previous_end;
        previous_end = end;
        previous_was_label = true;

        if id.number() < 2 {
            continue;
        }
        let predecessor = BorneId(id.number() - 1);
        if explicit.contains(&predecessor) || pass.found_ids().contains(&predecessor) {
            continue;
        }

        let window = &text[window_start..start];
        let Some(caps) = family.regex.captures(window) else {
            continue;
        };
        let (Some(x), Some(y)) = (caps.get(1), caps.get(2)) else {
            continue;
        };

        let span = (window_start + x.start())..(window_start + y.end());
        if pass.is_consumed(&span) {
            continue;
        }

        // Couple directement précédé d'une étiquette: il lui appartient
        let before = &window[..x.start()];
        if label_before_window && before.chars().all(|c| c.is_whitespace() || c == ':') {
            continue;
        }

        pass.accept(family, predecessor, x.as_str(), y.as_str(), span);
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use crate::parser::CandidateExtractor;
    use crate::types::{BorneId, CoordinateBounds, OriginPattern, RecognizedText};

    fn extract(text: &str) -> Vec<crate::types::BoundaryPoint> {
        CandidateExtractor::new(CoordinateBounds::default())
            .unwrap()
            .extract(&RecognizedText::new("test", text))
            .candidates
    }

    #[test]
    fn test_unlabeled_pair_before_b2_becomes_b1() {
        let points = extract("COORDONNEES 401374.38712334.71 B2 401378.12 712287.17");
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].id, BorneId(1));
        assert_eq!(points[0].origin_pattern, OriginPattern::ImplicitBeforeNext);
        assert_eq!(points[0].confidence, 0.8);
        assert_eq!(points[0].x, 401374.38);
        assert_eq!(points[0].y, 712334.71);
        assert_eq!(points[1].id, BorneId(2));
    }

    #[test]
    fn test_separated_pair_before_label() {
        let points = extract("401374.38 712334.71\nB2 401378.12 712287.17");
        assert_eq!(points[0].id, BorneId(1));
        assert_eq!(points[0].origin_pattern, OriginPattern::ImplicitBeforeNext);
    }

    #[test]
    fn test_labeled_pair_not_reattributed() {
        let points = extract("B1 401374.38 712334.71 B3 401353.24 712284.56");
        let ids: Vec<_> = points.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![BorneId(1), BorneId(3)]);
        assert!(points
            .iter()
            .all(|p| p.origin_pattern == OriginPattern::ExplicitNormal));
    }

    #[test]
    fn test_skipped_when_predecessor_explicit() {
        let points = extract("B1 401374.38 712334.71 401000.00 712000.00 B2 401378.12 712287.17");
        assert_eq!(
            points.iter().filter(|p| p.id == BorneId(1)).count(),
            1,
            "B1 already read explicitly"
        );
    }
}
