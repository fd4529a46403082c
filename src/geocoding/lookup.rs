use super::{standardize_county_name, GeocodeError, GeocodeSource, Region};
use crate::weather::types::Coordinates;
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CountyRow {
    county: String,
    state_id: String,
    lat: f64,
    lng: f64,
}

#[derive(Debug, Clone)]
struct CountyEntry {
    county: String,
    normalized: String,
    state_id: String,
    coords: Coordinates,
}

/// Static county table (`county,state_id,lat,lng`), used both to enumerate a
/// state's counties and as the first geocoding source.
#[derive(Debug, Clone, Default)]
pub struct CountyLookup {
    entries: Vec<CountyEntry>,
}

impl CountyLookup {
    pub fn load(path: &Path) -> Result<Self, GeocodeError> {
        let file = std::fs::File::open(path).map_err(|e| GeocodeError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let lookup = Self::from_reader(file)?;
        tracing::info!(
            path = %path.display(),
            counties = lookup.len(),
            "Loaded county lookup table"
        );
        Ok(lookup)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, GeocodeError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut entries = Vec::new();
        for (line, row) in reader.deserialize::<CountyRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    tracing::warn!(line = line + 2, error = %e, "Skipping malformed county row");
                    continue;
                }
            };
            entries.push(CountyEntry {
                normalized: standardize_county_name(&row.county),
                county: row.county,
                state_id: row.state_id.to_uppercase(),
                coords: Coordinates::new(row.lat, row.lng),
            });
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// County names listed for a state, in table order.
    pub fn counties_in(&self, area: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.state_id == area)
            .map(|e| e.county.clone())
            .collect()
    }

    /// Exact normalized match within the state, then a substring match that
    /// must be unique.
    pub fn find(&self, region: &Region) -> Option<Coordinates> {
        let in_area = || self.entries.iter().filter(|e| e.state_id == region.area);

        if let Some(entry) = in_area().find(|e| e.normalized == region.name) {
            return Some(entry.coords);
        }

        let mut partial = in_area().filter(|e| e.normalized.contains(region.name.as_str()));
        match (partial.next(), partial.next()) {
            (Some(entry), None) => Some(entry.coords),
            _ => None,
        }
    }
}

#[async_trait]
impl GeocodeSource for CountyLookup {
    fn name(&self) -> &'static str {
        "county_table"
    }

    async fn lookup(&self, region: &Region) -> Result<Option<Coordinates>, GeocodeError> {
        Ok(self.find(region))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
county,county_ascii,state_id,state_name,lat,lng
Los Angeles,Los Angeles,CA,California,34.3219,-118.2247
San Bernardino,San Bernardino,CA,California,34.8414,-116.1785
San Benito,San Benito,CA,California,36.6057,-121.075
Carson City,Carson City,NV,Nevada,39.1511,-119.7474
Lake,Lake,CA,California,39.0996,-122.7532
Lake,Lake,OR,Oregon,42.7935,-120.3868
broken,broken,CA,California,not-a-number,1.0
";

    fn lookup() -> CountyLookup {
        CountyLookup::from_reader(TABLE.as_bytes()).unwrap()
    }

    #[test]
    fn test_skips_malformed_rows() {
        assert_eq!(lookup().len(), 6);
    }

    #[test]
    fn test_counties_in_state() {
        let counties = lookup().counties_in("CA");
        assert_eq!(
            counties,
            vec!["Los Angeles", "San Bernardino", "San Benito", "Lake"]
        );
    }

    #[test]
    fn test_exact_match_scoped_to_state() {
        let lookup = lookup();
        let ca = lookup.find(&Region::new("Lake", "CA")).unwrap();
        let or = lookup.find(&Region::new("Lake", "OR")).unwrap();
        assert_eq!(ca, Coordinates::new(39.0996, -122.7532));
        assert_eq!(or, Coordinates::new(42.7935, -120.3868));
    }

    #[test]
    fn test_normalized_table_names() {
        // "Carson City" is stored as "Carson".
        let coords = lookup().find(&Region::new("Carson", "NV")).unwrap();
        assert_eq!(coords, Coordinates::new(39.1511, -119.7474));
    }

    #[test]
    fn test_substring_match_must_be_unique() {
        let lookup = lookup();
        assert!(lookup.find(&Region::new("Angeles", "CA")).is_some());
        assert!(lookup.find(&Region::new("San Be", "CA")).is_none());
        assert!(lookup.find(&Region::new("Nowhere", "CA")).is_none());
    }
}
