//! Extraction des bornes candidates depuis le texte reconnu
//!
//! Les familles de motifs sont déclarées dans une table ordonnée
//! ([`FAMILIES`]); ajouter un motif revient à ajouter une ligne.
//! Une portion de texte consommée par une famille n'est plus relue
//! par les suivantes.

pub mod explicit;
pub mod fallback;
pub mod implicit;
pub mod number;

use std::collections::BTreeSet;
use std::ops::Range;

use rayon::prelude::*;
use regex::Regex;
use tracing::debug;

use crate::normalize::normalize;
use crate::types::{BorneId, BoundaryPoint, CoordinateBounds, OriginPattern, RecognizedText};
use crate::LeveError;

/// Nombre de coordonnée: 6-7 chiffres, 0-3 décimales
macro_rules! num {
    () => {
        r"\d{6,7}(?:[.,]\d{1,3})?"
    };
}

/// Règle appliquée par une famille de motifs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// Étiquette suivie d'un couple de nombres
    Labeled,
    /// Couple sans étiquette attribué au prédécesseur de l'étiquette suivante
    BeforeNextLabel,
    /// Groupes de quatre nombres nus
    BareSequence,
}

/// Déclaration d'une famille de motifs
#[derive(Debug, Clone, Copy)]
pub struct FamilyDecl {
    pub origin: OriginPattern,
    pub confidence: f64,
    pub rule: Rule,
    pub pattern: &'static str,
}

/// Familles de motifs, par priorité décroissante
pub const FAMILIES: &[FamilyDecl] = &[
    FamilyDecl {
        origin: OriginPattern::ExplicitNormal,
        confidence: 1.0,
        rule: Rule::Labeled,
        pattern: concat!(r"\b(B\d{1,3})[:\s]*(", num!(), r")[,;\s]+(", num!(), ")"),
    },
    FamilyDecl {
        origin: OriginPattern::ExplicitGlued,
        confidence: 0.9,
        rule: Rule::Labeled,
        pattern: r"\b(B\d{1,3})[:\s]*(\d{6}(?:[.,]\d{1,2})?)(\d{6}(?:[.,]\d{1,2})?)",
    },
    FamilyDecl {
        origin: OriginPattern::ImplicitBeforeNext,
        confidence: 0.8,
        rule: Rule::BeforeNextLabel,
        pattern: concat!("(", num!(), r")[,;\s]*(", num!(), r")[:\s]*$"),
    },
    FamilyDecl {
        origin: OriginPattern::SequenceFallback,
        confidence: 0.6,
        rule: Rule::BareSequence,
        pattern: num!(),
    },
];

/// Famille compilée
#[derive(Debug, Clone)]
pub(crate) struct Family {
    pub origin: OriginPattern,
    pub confidence: f64,
    pub rule: Rule,
    pub regex: Regex,
}

/// Borne candidate avec sa position dans le texte
#[derive(Debug, Clone)]
pub(crate) struct Located {
    pub offset: usize,
    pub point: BoundaryPoint,
}

/// État d'une passe d'extraction sur un texte
pub(crate) struct Pass<'a> {
    pub text: &'a str,
    pub backend: &'a str,
    pub bounds: CoordinateBounds,
    pub consumed: Vec<Range<usize>>,
    pub found: Vec<Located>,
    pub matched: usize,
    pub rejected: usize,
}

impl<'a> Pass<'a> {
    fn new(text: &'a str, backend: &'a str, bounds: CoordinateBounds) -> Self {
        Self {
            text,
            backend,
            bounds,
            consumed: Vec::new(),
            found: Vec::new(),
            matched: 0,
            rejected: 0,
        }
    }

    /// Vrai si la plage chevauche une portion déjà consommée
    pub fn is_consumed(&self, range: &Range<usize>) -> bool {
        self.consumed
            .iter()
            .any(|c| c.start < range.end && range.start < c.end)
    }

    /// Numéros déjà trouvés par les familles explicites
    pub fn explicit_ids(&self) -> BTreeSet<BorneId> {
        self.found
            .iter()
            .filter(|l| l.point.origin_pattern.is_explicit())
            .map(|l| l.point.id)
            .collect()
    }

    pub fn found_ids(&self) -> BTreeSet<BorneId> {
        self.found.iter().map(|l| l.point.id).collect()
    }

    /// Valide un couple contre l'emprise et l'enregistre.
    /// Retourne faux si le couple est rejeté.
    pub fn accept(
        &mut self,
        family: &Family,
        id: BorneId,
        raw_x: &str,
        raw_y: &str,
        span: Range<usize>,
    ) -> bool {
        self.matched += 1;

        let (Some(x), Some(y)) = (number::parse_coordinate(raw_x), number::parse_coordinate(raw_y))
        else {
            self.reject(family, span);
            return false;
        };

        if !self.bounds.contains(x, y) {
            debug!(
                backend = self.backend,
                borne = %id,
                x,
                y,
                origin = family.origin.as_str(),
                "Candidate outside coordinate bounds"
            );
            self.reject(family, span);
            return false;
        }

        self.found.push(Located {
            offset: span.start,
            point: BoundaryPoint {
                id,
                x,
                y,
                confidence: family.confidence,
                origin_pattern: family.origin,
                source_backend: self.backend.to_string(),
                inferred: false,
            },
        });
        self.consumed.push(span);
        true
    }

    /// Un couple étiqueté rejeté reste consommé: ses nombres ne sont pas nus
    fn reject(&mut self, family: &Family, span: Range<usize>) {
        self.rejected += 1;
        if family.rule == Rule::Labeled {
            self.consumed.push(span);
        }
    }
}

/// Résultat de l'extraction sur un texte
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub backend: String,
    /// Bornes candidates dans l'ordre de lecture
    pub candidates: Vec<BoundaryPoint>,
    /// Correspondances brutes, rejets compris
    pub matched: usize,
    /// Correspondances hors emprise ou illisibles
    pub rejected: usize,
}

/// Extracteur de bornes piloté par la table [`FAMILIES`]
#[derive(Debug, Clone)]
pub struct CandidateExtractor {
    bounds: CoordinateBounds,
    families: Vec<Family>,
}

impl CandidateExtractor {
    /// Compile la table des familles
    pub fn new(bounds: CoordinateBounds) -> Result<Self, LeveError> {
        Self::with_families(bounds, FAMILIES)
    }

    /// Compile une table de familles personnalisée
    pub fn with_families(
        bounds: CoordinateBounds,
        decls: &[FamilyDecl],
    ) -> Result<Self, LeveError> {
        let families = decls
            .iter()
            .map(|decl| {
                let regex = Regex::new(decl.pattern).map_err(|e| {
                    LeveError::parse_error(decl.origin.as_str(), format!("invalid pattern: {e}"))
                })?;
                Ok(Family {
                    origin: decl.origin,
                    confidence: decl.confidence,
                    rule: decl.rule,
                    regex,
                })
            })
            .collect::<Result<Vec<_>, LeveError>>()?;

        Ok(Self { bounds, families })
    }

    pub fn bounds(&self) -> CoordinateBounds {
        self.bounds
    }

    /// Extrait les candidates d'un texte (normalisé ici)
    pub fn extract(&self, source: &RecognizedText) -> Extraction {
        let text = normalize(&source.text);
        let mut pass = Pass::new(&text, &source.backend, self.bounds);

        for family in &self.families {
            match family.rule {
                Rule::Labeled => explicit::apply(family, &mut pass),
                Rule::BeforeNextLabel => implicit::apply(family, &mut pass),
                Rule::BareSequence => fallback::apply(family, &mut pass),
            }
        }

        let Pass {
            mut found,
            matched,
            rejected,
            ..
        } = pass;
        found.sort_by_key(|l| l.offset);

        debug!(
            backend = %source.backend,
            candidates = found.len(),
            matched,
            rejected,
            "Extraction pass complete"
        );

        Extraction {
            backend: source.backend.clone(),
            candidates: found.into_iter().map(|l| l.point).collect(),
            matched,
            rejected,
        }
    }

    /// Extrait toutes les sources en parallèle (ordre des sources conservé)
    pub fn extract_all(&self, sources: &[RecognizedText]) -> Vec<Extraction> {
        sources.par_iter().map(|source| self.extract(source)).collect()
    }
}

/// Repère les étiquettes `B<n>` (1 à 3 chiffres) dans le texte
///
/// Retourne (début, fin, numéro) pour chaque étiquette.
pub(crate) fn label_positions(text: &str) -> Vec<(usize, usize, BorneId)> {
    let bytes = text.as_bytes();

    memchr::memchr_iter(b'B', bytes)
        .filter_map(|pos| {
            if pos > 0 && bytes[pos - 1].is_ascii_alphanumeric() {
                return None;
            }
            let digits = bytes[pos + 1..]
                .iter()
                .take_while(|b| b.is_ascii_digit())
                .count();
            if digits == 0 || digits > 3 {
                return None;
            }
            let end = pos + 1 + digits;
            let n: u32 = text[pos + 1..end].parse().ok()?;
            (n > 0).then_some((pos, end, BorneId(n)))
        })
        .collect()
}
