// Fitted column transformer: turns a single-row record into the numeric
// feature vector the model was trained on.
//
// The artifact is a JSON description of the fitted pipeline: an ordered list
// of transformer blocks, each owning a set of record columns, plus a policy
// for columns no block names. Output features are the concatenation of the
// block outputs in artifact order.

use crate::request::{Cell, Record};
use crate::ArtifactError;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    #[error("column `{0}` is missing from the input")]
    MissingColumn(String),

    #[error("column `{column}` expects a number, got {found}")]
    ExpectedNumber { column: String, found: String },

    #[error("column `{column}` expects text, got {found}")]
    ExpectedText { column: String, found: String },

    #[error("found unknown category {value} in column `{column}` during transform")]
    UnknownCategory { column: String, value: String },

    #[error("column `{column}` produced a non-finite value")]
    NonFinite { column: String },
}

// ---------------------------------------------------------------------------
// Artifact schema
// ---------------------------------------------------------------------------

/// What to do with record columns that no transformer block names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remainder {
    #[default]
    Drop,
    Passthrough,
}

/// What a categorical encoder does with a value it never saw during fitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownPolicy {
    #[default]
    Error,
    Ignore,
}

/// A fitted category. Encoders fitted on numeric columns store numbers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Category {
    Number(f64),
    Text(String),
}

impl Category {
    fn matches(&self, cell: &Cell) -> bool {
        match (self, cell) {
            (Category::Number(a), Cell::Number(b)) => a == b,
            (Category::Text(a), Cell::Text(b)) => a == b,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnTransform {
    /// `(x - mean) / scale`, per column.
    StandardScaler {
        columns: Vec<String>,
        mean: Vec<f64>,
        scale: Vec<f64>,
    },
    /// `x * scale + min`, per column.
    MinMaxScaler {
        columns: Vec<String>,
        min: Vec<f64>,
        scale: Vec<f64>,
    },
    /// One indicator feature per fitted category, per column.
    OneHot {
        columns: Vec<String>,
        categories: Vec<Vec<Category>>,
        #[serde(default)]
        handle_unknown: UnknownPolicy,
    },
    /// The category's index within its fitted list.
    Ordinal {
        columns: Vec<String>,
        categories: Vec<Vec<Category>>,
        #[serde(default)]
        handle_unknown: UnknownPolicy,
        #[serde(default)]
        unknown_value: Option<f64>,
    },
    /// Numeric columns copied unchanged.
    Passthrough { columns: Vec<String> },
}

impl ColumnTransform {
    fn name(&self) -> &'static str {
        match self {
            ColumnTransform::StandardScaler { .. } => "standard_scaler",
            ColumnTransform::MinMaxScaler { .. } => "min_max_scaler",
            ColumnTransform::OneHot { .. } => "one_hot",
            ColumnTransform::Ordinal { .. } => "ordinal",
            ColumnTransform::Passthrough { .. } => "passthrough",
        }
    }

    pub fn columns(&self) -> &[String] {
        match self {
            ColumnTransform::StandardScaler { columns, .. }
            | ColumnTransform::MinMaxScaler { columns, .. }
            | ColumnTransform::OneHot { columns, .. }
            | ColumnTransform::Ordinal { columns, .. }
            | ColumnTransform::Passthrough { columns } => columns,
        }
    }

    fn width(&self) -> usize {
        match self {
            ColumnTransform::OneHot { categories, .. } => categories.iter().map(Vec::len).sum(),
            other => other.columns().len(),
        }
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        let kind = self.name();
        let columns = self.columns();
        if columns.is_empty() {
            return Err(invalid(format!("{kind} block names no columns")));
        }

        let check_params = |label: &str, values: &[f64]| {
            if values.len() != columns.len() {
                return Err(invalid(format!(
                    "{kind} block has {} columns but {} {label} values",
                    columns.len(),
                    values.len()
                )));
            }
            if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
                return Err(invalid(format!("{kind} block has non-finite {label} value {bad}")));
            }
            Ok(())
        };

        match self {
            ColumnTransform::StandardScaler { mean, scale, .. } => {
                check_params("mean", mean)?;
                check_params("scale", scale)?;
            }
            ColumnTransform::MinMaxScaler { min, scale, .. } => {
                check_params("min", min)?;
                check_params("scale", scale)?;
            }
            ColumnTransform::OneHot { categories, .. } => {
                validate_categories(kind, columns, categories)?;
            }
            ColumnTransform::Ordinal {
                categories,
                handle_unknown,
                unknown_value,
                ..
            } => {
                validate_categories(kind, columns, categories)?;
                if *handle_unknown == UnknownPolicy::Ignore && unknown_value.is_none() {
                    return Err(invalid(format!(
                        "{kind} block ignores unknown categories but has no unknown_value"
                    )));
                }
            }
            ColumnTransform::Passthrough { .. } => {}
        }
        Ok(())
    }

    fn apply(&self, record: &Record, out: &mut Vec<f64>) -> Result<(), TransformError> {
        match self {
            ColumnTransform::StandardScaler {
                columns,
                mean,
                scale,
                ..
            } => {
                for ((column, mean), scale) in columns.iter().zip(mean).zip(scale) {
                    let x = numeric(record, column)?;
                    out.push(finite(column, (x - mean) / nonzero(*scale))?);
                }
            }
            ColumnTransform::MinMaxScaler {
                columns,
                min,
                scale,
            } => {
                for ((column, min), scale) in columns.iter().zip(min).zip(scale) {
                    let x = numeric(record, column)?;
                    out.push(finite(column, x * scale + min)?);
                }
            }
            ColumnTransform::OneHot {
                columns,
                categories,
                handle_unknown,
            } => {
                for (column, fitted) in columns.iter().zip(categories) {
                    let cell = categorical(record, column, fitted)?;
                    match fitted.iter().position(|c| c.matches(cell)) {
                        Some(hit) => {
                            out.extend((0..fitted.len()).map(|i| if i == hit { 1.0 } else { 0.0 }))
                        }
                        None if *handle_unknown == UnknownPolicy::Ignore => {
                            out.extend(std::iter::repeat(0.0).take(fitted.len()))
                        }
                        None => return Err(unknown(column, cell)),
                    }
                }
            }
            ColumnTransform::Ordinal {
                columns,
                categories,
                handle_unknown,
                unknown_value,
            } => {
                for (column, fitted) in columns.iter().zip(categories) {
                    let cell = categorical(record, column, fitted)?;
                    match (fitted.iter().position(|c| c.matches(cell)), unknown_value) {
                        (Some(index), _) => out.push(index as f64),
                        (None, Some(value)) if *handle_unknown == UnknownPolicy::Ignore => {
                            out.push(*value)
                        }
                        (None, _) => return Err(unknown(column, cell)),
                    }
                }
            }
            ColumnTransform::Passthrough { columns } => {
                for column in columns {
                    let x = numeric(record, column)?;
                    out.push(finite(column, x)?);
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Preprocessor
// ---------------------------------------------------------------------------

/// A fitted preprocessing pipeline, loaded once and shared read-only.
#[derive(Debug, Clone, Deserialize)]
pub struct Preprocessor {
    transformers: Vec<ColumnTransform>,
    #[serde(default)]
    remainder: Remainder,
}

impl Preprocessor {
    pub fn new(
        transformers: Vec<ColumnTransform>,
        remainder: Remainder,
    ) -> Result<Self, ArtifactError> {
        let preprocessor = Self {
            transformers,
            remainder,
        };
        preprocessor.validate()?;
        Ok(preprocessor)
    }

    pub fn from_path(path: &Path) -> Result<Self, ArtifactError> {
        let preprocessor: Self = crate::read_json(path)?;
        preprocessor.validate()?;
        Ok(preprocessor)
    }

    pub fn from_json_str(json: &str) -> Result<Self, ArtifactError> {
        let preprocessor: Self =
            serde_json::from_str(json).map_err(|source| ArtifactError::Parse {
                path: "<inline>".into(),
                source,
            })?;
        preprocessor.validate()?;
        Ok(preprocessor)
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        if self.transformers.is_empty() {
            return Err(invalid("preprocessor has no transformer blocks".into()));
        }
        let mut seen = HashSet::new();
        for block in &self.transformers {
            block.validate()?;
            for column in block.columns() {
                if !seen.insert(column.as_str()) {
                    return Err(invalid(format!(
                        "column `{column}` is claimed by more than one block"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn transformers(&self) -> &[ColumnTransform] {
        &self.transformers
    }

    pub fn remainder(&self) -> Remainder {
        self.remainder
    }

    /// Every column some block reads.
    pub fn input_columns(&self) -> impl Iterator<Item = &str> {
        self.transformers
            .iter()
            .flat_map(|block| block.columns().iter().map(String::as_str))
    }

    /// Number of output features for records with the given columns.
    pub fn n_features_out(&self, record_columns: &[&str]) -> usize {
        let blocks: usize = self.transformers.iter().map(ColumnTransform::width).sum();
        match self.remainder {
            Remainder::Drop => blocks,
            Remainder::Passthrough => {
                let claimed: HashSet<&str> = self.input_columns().collect();
                blocks
                    + record_columns
                        .iter()
                        .filter(|c| !claimed.contains(**c))
                        .count()
            }
        }
    }

    /// Encode one record into a feature vector.
    pub fn transform(&self, record: &Record) -> Result<Vec<f64>, TransformError> {
        let mut out = Vec::new();
        for block in &self.transformers {
            block.apply(record, &mut out)?;
        }

        if self.remainder == Remainder::Passthrough {
            let claimed: HashSet<&str> = self.input_columns().collect();
            for (column, _) in record.iter().filter(|(name, _)| !claimed.contains(name)) {
                let x = numeric(record, column)?;
                out.push(finite(column, x)?);
            }
        }

        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn invalid(message: String) -> ArtifactError {
    ArtifactError::Invalid(message)
}

fn validate_categories(
    kind: &str,
    columns: &[String],
    categories: &[Vec<Category>],
) -> Result<(), ArtifactError> {
    if categories.len() != columns.len() {
        return Err(invalid(format!(
            "{kind} block has {} columns but {} category lists",
            columns.len(),
            categories.len()
        )));
    }
    for (column, fitted) in columns.iter().zip(categories) {
        if fitted.is_empty() {
            return Err(invalid(format!("{kind} column `{column}` has no categories")));
        }
        let numbers = fitted.iter().filter(|c| matches!(c, Category::Number(_))).count();
        if numbers != 0 && numbers != fitted.len() {
            return Err(invalid(format!(
                "{kind} column `{column}` mixes numeric and text categories"
            )));
        }
    }
    Ok(())
}

/// sklearn replaces zero scales with 1 at fit time; older exports may not.
fn nonzero(scale: f64) -> f64 {
    if scale == 0.0 {
        1.0
    } else {
        scale
    }
}

fn lookup<'a>(record: &'a Record, column: &str) -> Result<&'a Cell, TransformError> {
    record
        .get(column)
        .ok_or_else(|| TransformError::MissingColumn(column.to_string()))
}

fn numeric(record: &Record, column: &str) -> Result<f64, TransformError> {
    match lookup(record, column)? {
        Cell::Number(x) => Ok(*x),
        other => Err(TransformError::ExpectedNumber {
            column: column.to_string(),
            found: other.to_string(),
        }),
    }
}

/// Fetch a categorical cell, checking it has the same kind as the fitted
/// categories (validation guarantees the list is homogeneous).
fn categorical<'a>(
    record: &'a Record,
    column: &str,
    fitted: &[Category],
) -> Result<&'a Cell, TransformError> {
    let cell = lookup(record, column)?;
    match (fitted.first(), cell) {
        (Some(Category::Text(_)), Cell::Number(_)) => Err(TransformError::ExpectedText {
            column: column.to_string(),
            found: cell.to_string(),
        }),
        (Some(Category::Number(_)), Cell::Text(_)) => Err(TransformError::ExpectedNumber {
            column: column.to_string(),
            found: cell.to_string(),
        }),
        _ => Ok(cell),
    }
}

fn unknown(column: &str, cell: &Cell) -> TransformError {
    TransformError::UnknownCategory {
        column: column.to_string(),
        value: cell.to_string(),
    }
}

fn finite(column: &str, value: f64) -> Result<f64, TransformError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TransformError::NonFinite {
            column: column.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
