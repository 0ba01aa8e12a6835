/// Country registry for the disaster/export panel.
///
/// Defines the canonical list of obsolete or dependent territories that
/// are excluded from every dataset, together with the ISO code hygiene and
/// income classification helpers used by all ingest modules. This is the
/// single source of truth for ISO handling; other modules should go through
/// `IsoFilter` rather than comparing raw codes.

use std::collections::HashSet;

// ---------------------------------------------------------------------------
// Obsolete countries
// ---------------------------------------------------------------------------

/// A reporter that no longer exists (or never had stable borders), whose
/// trade and disaster records cannot be linked to a present-day country.
pub struct ObsoleteCountry {
    /// ISO 3166-1 alpha-3 code as used by Comtrade and EM-DAT.
    pub iso: &'static str,
    pub name: &'static str,
    /// Year the entity ceased to exist (last year it reported).
    pub dissolved: i32,
    /// Present-day successor states.
    pub successors: &'static [&'static str],
}

impl ObsoleteCountry {
    /// `SUN (USSR, dissolved 1991, successors: RUS, UKR, ...)`
    pub fn describe(&self) -> String {
        format!(
            "{} ({}, dissolved {}, successors: {})",
            self.iso,
            self.name,
            self.dissolved,
            self.successors.join(", ")
        )
    }
}

/// Entities excluded from every panel.
pub static OBSOLETE_COUNTRIES: &[ObsoleteCountry] = &[
    ObsoleteCountry {
        iso: "DDR",
        name: "German Democratic Republic",
        dissolved: 1990,
        successors: &["DEU"],
    },
    ObsoleteCountry {
        iso: "CSK",
        name: "Czechoslovakia",
        dissolved: 1992,
        successors: &["CZE", "SVK"],
    },
    ObsoleteCountry {
        iso: "ANT",
        name: "Netherlands Antilles",
        dissolved: 2010,
        successors: &["CUW", "SXM", "BES"],
    },
    ObsoleteCountry {
        iso: "SCG",
        name: "Serbia and Montenegro",
        dissolved: 2006,
        successors: &["SRB", "MNE"],
    },
    ObsoleteCountry {
        iso: "YUG",
        name: "Yugoslavia",
        dissolved: 1992,
        successors: &["SRB", "MNE", "HRV", "SVN", "BIH", "MKD"],
    },
    ObsoleteCountry {
        iso: "SUN",
        name: "USSR",
        dissolved: 1991,
        successors: &["RUS", "UKR", "BLR", "KAZ", "UZB"],
    },
    ObsoleteCountry {
        iso: "ZAR",
        name: "Zaire",
        dissolved: 1997,
        successors: &["COD"],
    },
];

/// ISO codes excluded when the configuration does not override them.
pub static DEFAULT_EXCLUDED_ISO_CODES: &[&str] = &["DDR", "CSK", "ANT", "SCG", "YUG", "SUN", "ZAR"];

/// Looks up an obsolete country by ISO code. Returns `None` if not listed.
pub fn find_obsolete(iso: &str) -> Option<&'static ObsoleteCountry> {
    OBSOLETE_COUNTRIES.iter().find(|c| c.iso == iso)
}

// ---------------------------------------------------------------------------
// ISO code hygiene
// ---------------------------------------------------------------------------

/// Normalizes a raw ISO code: trimmed and uppercased.
///
/// Returns `None` for empty values, the textual `NAN` that spreadsheet
/// exports produce for blanks, and anything that is not three characters.
pub fn clean_iso(raw: &str) -> Option<String> {
    let code = raw.trim().to_ascii_uppercase();
    if code.is_empty() || code == "NAN" || code.chars().count() != 3 {
        return None;
    }
    Some(code)
}

/// Cleans ISO codes and drops the excluded ones.
#[derive(Debug, Clone, Default)]
pub struct IsoFilter {
    excluded: HashSet<String>,
}

impl IsoFilter {
    pub fn new<S: AsRef<str>>(excluded: &[S]) -> Self {
        Self {
            excluded: excluded
                .iter()
                .map(|c| c.as_ref().trim().to_ascii_uppercase())
                .collect(),
        }
    }

    /// Cleaned ISO code, or `None` if invalid or excluded.
    pub fn accept(&self, raw: &str) -> Option<String> {
        clean_iso(raw).filter(|code| !self.excluded.contains(code))
    }

    pub fn is_excluded(&self, iso: &str) -> bool {
        self.excluded.contains(iso)
    }
}

// ---------------------------------------------------------------------------
// Income and size classification
// ---------------------------------------------------------------------------

/// World Bank groups treated as "poor" in the interaction terms.
pub fn is_poor_income_group(group: &str) -> bool {
    matches!(group.trim(), "Low income" | "Lower middle income")
}

/// Two-way income split used in descriptive tables.
pub fn income_group_internal(group: &str) -> &'static str {
    match group.trim() {
        "High income" | "Upper middle income" => "High",
        _ => "Low",
    }
}

/// Column-name key for a disaster type: `"Extreme temperature"` →
/// `"extreme_temperature"`.
pub fn type_key(disaster_type: &str) -> String {
    disaster_type.trim().to_lowercase().replace(' ', "_")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
