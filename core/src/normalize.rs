//! Canonical keys for user-typed names.
//!
//! Ingredient deduplication and recipe slugs both go through [`normalize`]:
//! trim, collapse whitespace, lowercase, strip diacritics. The result is
//! stable under re-application, so a stored key can be normalized again
//! without changing.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Canonical form of a display name, used as the dedup key.
///
/// `"  Crème   Fraîche "` and `"CREME FRAICHE"` both map to `"creme fraiche"`.
#[must_use]
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    // Lowercasing can reintroduce decomposable characters (e.g. 'İ'), so
    // strip once more on the lowered text.
    let folded: String = folded.nfd().filter(|c| !is_combining_mark(*c)).collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hyphenated variant of [`normalize`] used for recipe slugs.
#[must_use]
pub fn slugify(text: &str) -> String {
    normalize(text).replace(' ', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_trims_and_lowercases() {
        assert_eq!(normalize("  Tomate "), "tomate");
        assert_eq!(normalize("TOMATE"), "tomate");
        assert_eq!(normalize("tomate"), "tomate");
    }

    #[test]
    fn test_normalize_collapses_internal_whitespace() {
        assert_eq!(normalize("olive \t  oil\n extra"), "olive oil extra");
    }

    #[test]
    fn test_normalize_strips_diacritics() {
        assert_eq!(normalize("Crème Fraîche"), "creme fraiche");
        assert_eq!(normalize("JALAPEÑO"), "jalapeno");
        assert_eq!(normalize("Ève"), "eve");
    }

    #[test]
    fn test_normalize_blank_is_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \t "), "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "  Crème   Fraîche ",
            "ÉPICES  Mélangées",
            "İstanbul simit",
            "ﬁgues",
            "Straße",
            "\u{00A0}nbsp\u{2003}spaces\u{00A0}",
            "already normal",
            "",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn test_slugify_hyphenates() {
        assert_eq!(slugify("  Gratin   Dauphinois "), "gratin-dauphinois");
        assert_eq!(slugify("Pâtes à la Crème"), "pates-a-la-creme");
        let slug = slugify("Pâtes à la Crème");
        assert_eq!(slugify(&slug), slug);
    }
}
