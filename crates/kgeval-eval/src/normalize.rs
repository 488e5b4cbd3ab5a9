//! Text normalization for entity name comparison

use unicode_normalization::UnicodeNormalization;

/// Canonical form of a name: NFKC, trimmed, lowercased.
///
/// Folds full-width/half-width and other compatibility variants so that
/// `normalize("ＡＢＣ") == normalize("abc")`.
pub fn normalize(s: &str) -> String {
    let folded: String = s.nfkc().collect();
    folded.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_width_folds() {
        assert_eq!(normalize("ＡＢＣ"), normalize("abc"));
        assert_eq!(normalize("ＡＢＣ"), "abc");
    }

    #[test]
    fn test_half_width_katakana() {
        assert_eq!(normalize("ﾄｳｷｮｳ"), "トウキョウ");
    }

    #[test]
    fn test_trims_ideographic_space() {
        // U+3000 folds to an ASCII space under NFKC before trimming
        assert_eq!(normalize("\u{3000}東京 "), "東京");
    }

    #[test]
    fn test_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn test_idempotent() {
        for s in ["ＴＯＫＹＯ ", "Ｎｏ．１", " 夏目漱石", "ﾊﾟﾘ", "ǅemal"] {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }
}
