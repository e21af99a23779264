// Library root: property request schema, fitted artifacts, and the
// request -> price pipeline that the HTTP server wraps.

pub mod format;
pub mod model;
pub mod predict;
pub mod preprocess;
pub mod request;

pub use model::BoostedTrees;
pub use predict::{PredictionError, PriceEstimate, PricePredictor};
pub use preprocess::Preprocessor;
pub use request::{PropertyRequest, Record};

/// Errors raised while loading or validating an artifact file at startup.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("failed to read artifact {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse artifact {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("invalid artifact: {0}")]
    Invalid(String),

    #[error("preprocessor produces {produced} features but the model expects {expected}")]
    ShapeMismatch { produced: usize, expected: usize },
}

/// Read a JSON artifact from disk and deserialize it.
pub(crate) fn read_json<T: serde::de::DeserializeOwned>(
    path: &std::path::Path,
) -> Result<T, ArtifactError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: display.clone(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ArtifactError::Parse {
        path: display,
        source,
    })
}
