// Incoming property description and the single-row record built from it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid value for `{field}`: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// PropertyRequest
// ---------------------------------------------------------------------------

/// One property to price. Field names on the wire match the column names the
/// preprocessor was fitted on (`Area`, `Rooms`, ...). Unknown extra fields
/// are ignored; missing or wrong-typed fields fail deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyRequest {
    #[serde(rename = "Area")]
    pub area: f64,
    #[serde(rename = "Rooms")]
    pub rooms: u32,
    #[serde(rename = "Bathrooms")]
    pub bathrooms: u32,
    #[serde(rename = "Type")]
    pub property_type: String,
    #[serde(rename = "Furnished")]
    pub furnished: u8,
    #[serde(rename = "Finished")]
    pub finished: u8,
    #[serde(rename = "Feature")]
    pub feature: String,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "District")]
    pub district: String,
}

impl PropertyRequest {
    /// Record column names, in the order `to_record` emits them.
    pub const COLUMNS: [&'static str; 9] = [
        "Area",
        "Rooms",
        "Bathrooms",
        "Type",
        "Furnished",
        "Finished",
        "Feature",
        "City",
        "District",
    ];

    /// Check the value constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.area.is_finite() || self.area <= 0.0 {
            return Err(ValidationError::new(
                "Area",
                format!("must be a positive number, got {}", self.area),
            ));
        }

        for (field, flag) in [("Furnished", self.furnished), ("Finished", self.finished)] {
            if flag > 1 {
                return Err(ValidationError::new(
                    field,
                    format!("must be 0 or 1, got {flag}"),
                ));
            }
        }

        let categories = [
            ("Type", &self.property_type),
            ("Feature", &self.feature),
            ("City", &self.city),
            ("District", &self.district),
        ];
        for (field, value) in categories {
            if value.trim().is_empty() {
                return Err(ValidationError::new(field, "must not be empty"));
            }
        }

        Ok(())
    }

    /// Build the single-row record fed to the preprocessor, columns in
    /// request field order.
    pub fn to_record(&self) -> Record {
        Record::new(vec![
            ("Area".into(), Cell::Number(self.area)),
            ("Rooms".into(), Cell::Number(f64::from(self.rooms))),
            ("Bathrooms".into(), Cell::Number(f64::from(self.bathrooms))),
            ("Type".into(), Cell::Text(self.property_type.clone())),
            ("Furnished".into(), Cell::Number(f64::from(self.furnished))),
            ("Finished".into(), Cell::Number(f64::from(self.finished))),
            ("Feature".into(), Cell::Text(self.feature.clone())),
            ("City".into(), Cell::Text(self.city.clone())),
            ("District".into(), Cell::Text(self.district.clone())),
        ])
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A single value in a record column.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
}

impl std::fmt::Display for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cell::Number(n) => write!(f, "{n}"),
            Cell::Text(s) => write!(f, "'{s}'"),
        }
    }
}

/// An ordered, named single-row table.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    columns: Vec<(String, Cell)>,
}

impl Record {
    pub fn new(columns: Vec<(String, Cell)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cell)| cell)
    }

    /// Iterate `(name, cell)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.columns.iter().map(|(name, cell)| (name.as_str(), cell))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
