//! Product classification: which Comtrade commodity codes are agricultural.
//!
//! Older Comtrade extracts are reported in SITC revision 2, newer ones in
//! the Harmonized System, so the test depends on `classificationSearchCode`.

use crate::model::{CLASSIFICATION_HS, CLASSIFICATION_SITC2};

/// SITC2 two-digit divisions counted as agricultural (food, live animals,
/// beverages, crude animal and vegetable materials, oils and fats).
pub const SITC2_AGRI_CODES: &[u32] = &[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 21, 22, 23, 24, 25, 29, 41, 42, 43];

/// HS chapters 01-24 (sections I-IV).
pub const HS_AGRI_CHAPTERS: std::ops::RangeInclusive<u32> = 1..=24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Hs,
    Sitc2,
    Other,
}

impl Classification {
    /// Parses `classificationSearchCode`; `SITC2` is an accepted alias of `S2`.
    pub fn from_search_code(code: &str) -> Self {
        let normalized = code.trim().to_ascii_uppercase().replace("SITC2", CLASSIFICATION_SITC2);
        if normalized == CLASSIFICATION_SITC2 {
            Classification::Sitc2
        } else if normalized == CLASSIFICATION_HS {
            Classification::Hs
        } else {
            Classification::Other
        }
    }
}

/// Returns `Some(true)` when the commodity is agricultural, `Some(false)`
/// when it is not, and `None` when the classification is unknown or the
/// code is not numeric.
pub fn is_agricultural(classification: Classification, cmd_code: &str) -> Option<bool> {
    let code: u32 = cmd_code.trim().parse().ok()?;
    match classification {
        Classification::Sitc2 => Some(SITC2_AGRI_CODES.contains(&code)),
        Classification::Hs => Some(HS_AGRI_CHAPTERS.contains(&code)),
        Classification::Other => None,
    }
}

/// Zero-padded two-digit chapter code as used in Comtrade requests.
pub fn chapter_code(chapter: u32) -> String {
    format!("{:02}", chapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hs_chapters_up_to_24_are_agricultural() {
        assert_eq!(is_agricultural(Classification::Hs, "01"), Some(true));
        assert_eq!(is_agricultural(Classification::Hs, "24"), Some(true));
        assert_eq!(is_agricultural(Classification::Hs, "25"), Some(false));
        assert_eq!(is_agricultural(Classification::Hs, "9"), Some(true));
    }

    #[test]
    fn sitc2_uses_division_list() {
        assert_eq!(is_agricultural(Classification::Sitc2, "0"), Some(true));
        assert_eq!(is_agricultural(Classification::Sitc2, "29"), Some(true));
        assert_eq!(is_agricultural(Classification::Sitc2, "27"), Some(false));
        assert_eq!(is_agricultural(Classification::Sitc2, "43"), Some(true));
        assert_eq!(is_agricultural(Classification::Sitc2, "51"), Some(false));
    }

    #[test]
    fn unknown_classification_or_code_is_undetermined() {
        assert_eq!(is_agricultural(Classification::Other, "01"), None);
        assert_eq!(is_agricultural(Classification::Hs, "TOTAL"), None);
    }

    #[test]
    fn search_code_aliases() {
        assert_eq!(Classification::from_search_code("SITC2"), Classification::Sitc2);
        assert_eq!(Classification::from_search_code(" s2 "), Classification::Sitc2);
        assert_eq!(Classification::from_search_code("HS"), Classification::Hs);
        assert_eq!(Classification::from_search_code("BEC"), Classification::Other);
    }

    #[test]
    fn chapter_codes_are_zero_padded() {
        assert_eq!(chapter_code(1), "01");
        assert_eq!(chapter_code(99), "99");
    }
}
