//! Plate text normalization and format validation

use once_cell::sync::Lazy;
use regex::Regex;

/// Three letters followed by four digits (`ABC1234`)
static LEGACY_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{3}[0-9]{4}$").expect("static regex"));

/// Three letters, digit, letter, two digits (`ABC1D23`)
static MERCOSUR_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z]{3}[0-9][A-Z][0-9]{2}$").expect("static regex"));

/// Uppercase `raw` and keep only ASCII letters and digits
pub fn normalize_plate(raw: &str) -> String {
    raw.to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Predicate deciding whether normalized text is an acceptable plate
pub trait PlateValidator: Send + Sync {
    fn is_valid(&self, text: &str) -> bool;
}

impl<F> PlateValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid(&self, text: &str) -> bool {
        self(text)
    }
}

/// Brazilian plates: the legacy `LLLDDDD` shape and the Mercosur `LLLDLDD` shape
#[derive(Debug, Clone, Copy, Default)]
pub struct BrazilianPlateFormat;

impl PlateValidator for BrazilianPlateFormat {
    fn is_valid(&self, text: &str) -> bool {
        LEGACY_FORMAT.is_match(text) || MERCOSUR_FORMAT.is_match(text)
    }
}
