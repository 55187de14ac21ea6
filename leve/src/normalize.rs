//! Correction des confusions de caractères avant extraction
//!
//! Deux passes, dans cet ordre:
//! 1. table des étiquettes de bornes mal lues (`BB` → `B8`, `Bl` → `B1`, ...),
//!    appliquée sur des tokens entiers pour ne jamais toucher `B10`;
//! 2. confusions lettre/chiffre (`O` → `0`, `l` → `1`, ...) uniquement dans
//!    les tokens contenant déjà un chiffre.

/// Étiquettes de bornes mal reconnues
const LABEL_CORRECTIONS: &[(&str, &str)] = &[
    ("BB", "B8"),
    ("BO", "B8"),
    ("B0", "B8"),
    ("Bl", "B1"),
    ("BI", "B1"),
    ("B|", "B1"),
    ("B!", "B1"),
    ("BT", "B1"),
    ("BS", "B5"),
];

/// Normalise un texte reconnu en conservant les séparateurs d'origine
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while !rest.is_empty() {
        let ws_len = rest.len() - rest.trim_start().len();
        out.push_str(&rest[..ws_len]);
        rest = &rest[ws_len..];

        let token_len = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let (token, tail) = rest.split_at(token_len);
        normalize_token(token, &mut out);
        rest = tail;
    }

    out
}

fn normalize_token(token: &str, out: &mut String) {
    if let Some(label) = correct_label(token) {
        out.push_str(label);
        if token.ends_with(':') {
            out.push(':');
        }
        return;
    }

    if token.bytes().any(|b| b.is_ascii_digit()) {
        out.extend(token.chars().map(correct_digit));
    } else {
        out.push_str(token);
    }
}

/// Corrige une étiquette de borne (avec ou sans `:` final)
fn correct_label(token: &str) -> Option<&'static str> {
    let core = token.strip_suffix(':').unwrap_or(token);
    LABEL_CORRECTIONS
        .iter()
        .find(|(wrong, _)| *wrong == core)
        .map(|(_, right)| *right)
}

fn correct_digit(c: char) -> char {
    match c {
        'O' | 'o' => '0',
        'I' | 'l' => '1',
        'S' => '5',
        'G' => '6',
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_corrections() {
        assert_eq!(normalize("BB 401374.38"), "B8 401374.38");
        assert_eq!(normalize("Bl: 401374.38"), "B1: 401374.38");
        assert_eq!(normalize("B| 1"), "B1 1");
        assert_eq!(normalize("BS"), "B5");
    }

    #[test]
    fn test_b10_untouched() {
        assert_eq!(normalize("B10 401374.38"), "B10 401374.38");
        assert_eq!(normalize("B1 B10 B100"), "B1 B10 B100");
    }

    #[test]
    fn test_digit_confusions_only_in_numeric_tokens() {
        assert_eq!(normalize("4O1374.38 7l2334.7I"), "401374.38 712334.71");
        assert_eq!(normalize("SURFACE GOLO"), "SURFACE GOLO");
        assert_eq!(normalize("S5G"), "556");
    }

    #[test]
    fn test_whitespace_preserved() {
        assert_eq!(normalize("  B1\t4O1374.38\n"), "  B1\t401374.38\n");
        assert_eq!(normalize(""), "");
    }
}
