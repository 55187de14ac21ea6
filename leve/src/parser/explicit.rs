//! Familles explicites: étiquette suivie d'un couple (séparé ou collé)

use super::{Family, Pass};
use crate::types::BorneId;

/// Applique une famille à étiquette sur le texte de la passe
pub(crate) fn apply(family: &Family, pass: &mut Pass<'_>) {
    let text = pass.text;

    for caps in family.regex.captures_iter(text) {
        let (Some(whole), Some(label), Some(x), Some(y)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            continue;
        };

        let span = whole.range();
        if pass.is_consumed(&span) {
            continue;
        }

        let Ok(id) = label.as_str().parse::<BorneId>() else {
            continue;
        };

        pass.accept(family, id, x.as_str(), y.as_str(), span);
    }
}
