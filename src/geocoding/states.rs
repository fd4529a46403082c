use serde::{Deserialize, Serialize};

/// Full state name, postal abbreviation and two-digit FIPS code.
const STATES: &[(&str, &str, &str)] = &[
    ("Alabama", "AL", "01"),
    ("Alaska", "AK", "02"),
    ("Arizona", "AZ", "04"),
    ("Arkansas", "AR", "05"),
    ("California", "CA", "06"),
    ("Colorado", "CO", "08"),
    ("Connecticut", "CT", "09"),
    ("Delaware", "DE", "10"),
    ("Florida", "FL", "12"),
    ("Georgia", "GA", "13"),
    ("Hawaii", "HI", "15"),
    ("Idaho", "ID", "16"),
    ("Illinois", "IL", "17"),
    ("Indiana", "IN", "18"),
    ("Iowa", "IA", "19"),
    ("Kansas", "KS", "20"),
    ("Kentucky", "KY", "21"),
    ("Louisiana", "LA", "22"),
    ("Maine", "ME", "23"),
    ("Maryland", "MD", "24"),
    ("Massachusetts", "MA", "25"),
    ("Michigan", "MI", "26"),
    ("Minnesota", "MN", "27"),
    ("Mississippi", "MS", "28"),
    ("Missouri", "MO", "29"),
    ("Montana", "MT", "30"),
    ("Nebraska", "NE", "31"),
    ("Nevada", "NV", "32"),
    ("New Hampshire", "NH", "33"),
    ("New Jersey", "NJ", "34"),
    ("New Mexico", "NM", "35"),
    ("New York", "NY", "36"),
    ("North Carolina", "NC", "37"),
    ("North Dakota", "ND", "38"),
    ("Ohio", "OH", "39"),
    ("Oklahoma", "OK", "40"),
    ("Oregon", "OR", "41"),
    ("Pennsylvania", "PA", "42"),
    ("Rhode Island", "RI", "44"),
    ("South Carolina", "SC", "45"),
    ("South Dakota", "SD", "46"),
    ("Tennessee", "TN", "47"),
    ("Texas", "TX", "48"),
    ("Utah", "UT", "49"),
    ("Vermont", "VT", "50"),
    ("Virginia", "VA", "51"),
    ("Washington", "WA", "53"),
    ("West Virginia", "WV", "54"),
    ("Wisconsin", "WI", "55"),
    ("Wyoming", "WY", "56"),
];

/// States processed by a default refresh.
pub const CONTIGUOUS_STATES: &[&str] = &[
    "AL", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "ID", "IL", "IN", "IA", "KS", "KY",
    "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ", "NM", "NY",
    "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT", "VA", "WA",
    "WV", "WI", "WY",
];

/// A state as the rest of the pipeline sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AreaContext {
    pub abbrev: String,
    pub fips: String,
}

impl AreaContext {
    /// Accepts either a postal abbreviation (any case) or a full state name.
    pub fn lookup(state: &str) -> Option<Self> {
        let state = state.trim();
        let abbrev = if state.len() == 2 {
            state.to_uppercase()
        } else {
            state_abbrev(state)?.to_string()
        };

        state_fips(&abbrev).map(|fips| Self {
            abbrev,
            fips: fips.to_string(),
        })
    }
}

pub fn state_abbrev(name: &str) -> Option<&'static str> {
    STATES
        .iter()
        .find(|(full, _, _)| full.eq_ignore_ascii_case(name))
        .map(|(_, abbrev, _)| *abbrev)
}

pub fn state_fips(abbrev: &str) -> Option<&'static str> {
    STATES
        .iter()
        .find(|(_, a, _)| *a == abbrev)
        .map(|(_, _, fips)| *fips)
}

pub fn state_name(abbrev: &str) -> Option<&'static str> {
    STATES
        .iter()
        .find(|(_, a, _)| *a == abbrev)
        .map(|(full, _, _)| *full)
}
