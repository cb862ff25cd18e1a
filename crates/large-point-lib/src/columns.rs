//! Column alias resolution
//!
//! Source datasets name their columns inconsistently (localized headers, camelCase,
//! snake_case). Each logical [`Field`] has an ordered alias list; the first alias present
//! in the source wins. Resolution happens once per load, not per row access.

use crate::RawRow;
use serde_json::Value;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Logical fields of a point record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Field {
    Identifier,
    Latitude,
    Longitude,
    Address,
    Status,
    ExternalLink,
}

impl Field {
    /// All fields in resolution order
    pub const ALL: [Field; 6] = [
        Field::Identifier,
        Field::Latitude,
        Field::Longitude,
        Field::Address,
        Field::Status,
        Field::ExternalLink,
    ];

    #[inline]
    fn slot(self) -> usize {
        self as usize
    }
}

/// Ordered alias lists for every logical field
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ColumnAliases {
    pub identifier: Vec<String>,
    pub latitude: Vec<String>,
    pub longitude: Vec<String>,
    pub address: Vec<String>,
    pub status: Vec<String>,
    pub external_link: Vec<String>,
}

fn names(aliases: &[&str]) -> Vec<String> {
    aliases.iter().map(|s| s.to_string()).collect()
}

impl Default for ColumnAliases {
    fn default() -> Self {
        Self {
            identifier: names(&["레코드Id", "recordId", "id"]),
            latitude: names(&["위도", "lat", "latitude"]),
            longitude: names(&["경도", "lng", "lon", "longitude"]),
            address: names(&["대지위치", "address", "addr"]),
            status: names(&["status", "Status"]),
            external_link: names(&[
                "Salesforce URL",
                "salesforce_url",
                "sf_url",
                "SalesforceURL",
            ]),
        }
    }
}

impl ColumnAliases {
    /// Get the alias list of a field
    pub fn aliases(&self, field: Field) -> &[String] {
        match field {
            Field::Identifier => &self.identifier,
            Field::Latitude => &self.latitude,
            Field::Longitude => &self.longitude,
            Field::Address => &self.address,
            Field::Status => &self.status,
            Field::ExternalLink => &self.external_link,
        }
    }

    /// Replace the alias list of a field
    pub fn with(mut self, field: Field, aliases: &[&str]) -> Self {
        let slot = match field {
            Field::Identifier => &mut self.identifier,
            Field::Latitude => &mut self.latitude,
            Field::Longitude => &mut self.longitude,
            Field::Address => &mut self.address,
            Field::Status => &mut self.status,
            Field::ExternalLink => &mut self.external_link,
        };
        *slot = names(aliases);
        self
    }

    /// Resolve every field against the columns present in the source
    ///
    /// For each field the first alias (in alias order, not column order) that names an
    /// available column wins. Unresolved fields stay `None`.
    pub fn resolve<'a>(&self, available: impl IntoIterator<Item = &'a str>) -> ResolvedColumns {
        let available: Vec<&str> = available.into_iter().collect();
        let mut columns: [Option<String>; 6] = Default::default();

        for field in Field::ALL {
            columns[field.slot()] = self
                .aliases(field)
                .iter()
                .find(|alias| available.contains(&alias.as_str()))
                .cloned();
        }

        ResolvedColumns { columns }
    }
}

/// The concrete column chosen for every field of one load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedColumns {
    columns: [Option<String>; 6],
}

impl ResolvedColumns {
    /// Get the column name resolved for a field
    #[inline]
    pub fn column(&self, field: Field) -> Option<&str> {
        self.columns[field.slot()].as_deref()
    }

    /// Get the raw value of a field in a row
    #[inline]
    pub fn get<'r>(&self, row: &'r RawRow, field: Field) -> Option<&'r Value> {
        row.get(self.column(field)?)
    }

    /// Check whether both coordinate columns were found
    pub fn has_coordinates(&self) -> bool {
        self.column(Field::Latitude).is_some() && self.column(Field::Longitude).is_some()
    }
}
