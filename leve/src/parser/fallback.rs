//! Famille de repli: groupes de quatre nombres nus lus comme deux couples

use std::ops::Range;

use super::{Family, Pass};
use crate::types::BorneId;

pub(crate) fn apply(family: &Family, pass: &mut Pass<'_>) {
    let text = pass.text;
    let bytes = text.as_bytes();

    let mut runs: Vec<Vec<Range<usize>>> = Vec::new();
    let mut last_end: Option<usize> = None;

    for m in family.regex.find_iter(text) {
        let span = m.range();
        if pass.is_consumed(&span) {
            last_end = None;
            continue;
        }
        // Nombre isolé uniquement (pas un fragment d'un jeton plus long)
        let glued_before = span.start > 0 && bytes[span.start - 1].is_ascii_alphanumeric();
        let glued_after = bytes.get(span.end).is_some_and(|b| b.is_ascii_digit());
        if glued_before || glued_after {
            last_end = None;
            continue;
        }

        let continues_run = last_end.is_some_and(|end| {
            text[end..span.start]
                .chars()
                .all(|c| c.is_whitespace() || c == ',' || c == ';')
        });
        match runs.last_mut() {
            Some(run) if continues_run => run.push(span.clone()),
            _ => runs.push(vec![span.clone()]),
        }
        last_end = Some(span.end);
    }

    let mut taken = pass.found_ids();
    let mut next_missing = 1u32;

    for run in runs {
        for pair in run.chunks_exact(4).flat_map(|quad| quad.chunks_exact(2)) {
            while taken.contains(&BorneId(next_missing)) {
                next_missing += 1;
            }
            let id = BorneId(next_missing);
            let span = pair[0].start..pair[1].end;
            if pass.accept(
                family,
                id,
                &text[pair[0].clone()],
                &text[pair[1].clone()],
                span,
            ) {
                taken.insert(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::CandidateExtractor;
    use crate::types::{BorneId, CoordinateBounds, OriginPattern, RecognizedText};

    fn extract(text: &str) -> crate::parser::Extraction {
        CandidateExtractor::new(CoordinateBounds::default())
            .unwrap()
            .extract(&RecognizedText::new("test", text))
    }

    #[test]
    fn test_four_bare_numbers_fill_lowest_missing() {
        let result = extract(
            "B2 401378.12 712287.17\n401374.38 712334.71 401353.24 712284.56",
        );
        let ids: Vec<_> = result.candidates.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![BorneId(2), BorneId(1), BorneId(3)]);
        let fallback: Vec<_> = result
            .candidates
            .iter()
            .filter(|p| p.origin_pattern == OriginPattern::SequenceFallback)
            .collect();
        assert_eq!(fallback.len(), 2);
        assert!(fallback.iter().all(|p| p.confidence == 0.6));
        assert_eq!(fallback[0].x, 401374.38);
    }

    #[test]
    fn test_incomplete_group_ignored() {
        let result = extract("401374.38 712334.71 401353.24");
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn test_words_break_runs() {
        let result = extract("401374.38 712334.71 SURFACE 401353.24 712284.56");
        assert!(result.candidates.is_empty());
    }
}
