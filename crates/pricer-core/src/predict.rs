// The request -> price pipeline over a fixed preprocessor/model pair.

use crate::format;
use crate::model::{BoostedTrees, InferenceError};
use crate::preprocess::{Preprocessor, TransformError};
use crate::request::{PropertyRequest, ValidationError};
use crate::ArtifactError;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Anything that stops a single request from producing a price. Every
/// variant is reported to the caller the same way; the kind is kept for
/// logging.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl PredictionError {
    pub fn kind(&self) -> &'static str {
        match self {
            PredictionError::Validation(_) => "validation",
            PredictionError::Transform(_) => "transform",
            PredictionError::Inference(_) => "inference",
        }
    }
}

/// Raw model output and its value on the original price scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceEstimate {
    pub log_price: f32,
    pub price: f64,
}

impl PriceEstimate {
    /// `"<thousands-separated integer> <currency>"`.
    pub fn formatted(&self, currency: &str) -> String {
        format::format_price(self.price, currency)
    }
}

/// The shared, immutable artifact pair.
#[derive(Debug, Clone)]
pub struct PricePredictor {
    preprocessor: Preprocessor,
    model: BoostedTrees,
}

impl PricePredictor {
    /// Pair a preprocessor with a model, checking that every column the
    /// preprocessor reads exists on a request and that its output width is
    /// what the model expects.
    pub fn new(preprocessor: Preprocessor, model: BoostedTrees) -> Result<Self, ArtifactError> {
        if let Some(column) = preprocessor
            .input_columns()
            .find(|c| !PropertyRequest::COLUMNS.contains(c))
        {
            return Err(ArtifactError::Invalid(format!(
                "preprocessor reads column `{column}` which requests do not carry"
            )));
        }

        let produced = preprocessor.n_features_out(&PropertyRequest::COLUMNS);
        let expected = model.num_features();
        if produced != expected {
            return Err(ArtifactError::ShapeMismatch { produced, expected });
        }

        Ok(Self {
            preprocessor,
            model,
        })
    }

    pub fn load(preprocessor_path: &Path, model_path: &Path) -> Result<Self, ArtifactError> {
        let preprocessor = Preprocessor::from_path(preprocessor_path)?;
        let model = BoostedTrees::from_path(model_path)?;
        Self::new(preprocessor, model)
    }

    pub fn model(&self) -> &BoostedTrees {
        &self.model
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Validate, encode, score, and undo the `log1p` target transform.
    pub fn predict(&self, request: &PropertyRequest) -> Result<PriceEstimate, PredictionError> {
        request.validate()?;
        let record = request.to_record();
        let features = self.preprocessor.transform(&record)?;
        let log_price = self.model.predict(&features)?;

        let price = f64::from(log_price).exp_m1();
        if !price.is_finite() {
            return Err(InferenceError::NonFinite(price).into());
        }

        debug!(log_price, price, "scored property");
        Ok(PriceEstimate { log_price, price })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::{ColumnTransform, Remainder};

    fn request() -> PropertyRequest {
        PropertyRequest {
            area: 100.0,
            rooms: 2,
            bathrooms: 1,
            property_type: "Apartment".into(),
            furnished: 0,
            finished: 1,
            feature: "Garden".into(),
            city: "Giza".into(),
            district: "Dokki".into(),
        }
    }

    /// One passthrough feature (Furnished) and a single stump on it.
    fn model(base_score: &str, left: f32, right: f32, num_feature: usize) -> BoostedTrees {
        BoostedTrees::from_json_str(&format!(
            r#"{{"learner": {{
                "learner_model_param": {{"base_score": "{base_score}", "num_feature": "{num_feature}"}},
                "objective": {{"name": "reg:squarederror"}},
                "gradient_booster": {{"name": "gbtree", "model": {{"trees": [{{
                    "tree_param": {{"num_nodes": "3"}},
                    "left_children": [1, -1, -1],
                    "right_children": [2, -1, -1],
                    "split_indices": [0, 0, 0],
                    "split_conditions": [0.5, {left}, {right}],
                    "default_left": [0, 0, 0]
                }}]}}}}
            }}}}"#
        ))
        .unwrap()
    }

    fn furnished_only() -> Preprocessor {
        Preprocessor::new(
            vec![ColumnTransform::Passthrough {
                columns: vec!["Furnished".into()],
            }],
            Remainder::Drop,
        )
        .unwrap()
    }

    #[test]
    fn inverts_log_transform() {
        let predictor = PricePredictor::new(furnished_only(), model("1E1", 0.0, 1.0, 1)).unwrap();
        let estimate = predictor.predict(&request()).unwrap();
        assert_eq!(estimate.log_price, 10.0);
        assert!((estimate.price - 10f64.exp_m1()).abs() < 1e-6);
        assert_eq!(estimate.formatted("EGP"), "22,025 EGP");
    }

    #[test]
    fn identical_requests_give_identical_prices() {
        let predictor = PricePredictor::new(furnished_only(), model("1E1", 0.0, 1.0, 1)).unwrap();
        let first = predictor.predict(&request()).unwrap();
        let second = predictor.predict(&request()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn validation_runs_before_transform() {
        let predictor = PricePredictor::new(furnished_only(), model("1E1", 0.0, 1.0, 1)).unwrap();
        let bad = PropertyRequest {
            area: -1.0,
            ..request()
        };
        let err = predictor.predict(&bad).unwrap_err();
        assert_eq!(err.kind(), "validation");
        assert!(err.to_string().contains("Area"));
    }

    #[test]
    fn overflowing_price_is_an_inference_error() {
        let predictor =
            PricePredictor::new(furnished_only(), model("1E3", 0.0, 0.0, 1)).unwrap();
        let err = predictor.predict(&request()).unwrap_err();
        assert_eq!(err.kind(), "inference");
        assert!(matches!(
            err,
            PredictionError::Inference(InferenceError::NonFinite(_))
        ));
    }

    #[test]
    fn unknown_category_surfaces_as_transform_error() {
        let pre = Preprocessor::from_json_str(
            r#"{"transformers":[{"kind":"one_hot","columns":["City"],
                "categories":[["Cairo"]]}]}"#,
        )
        .unwrap();
        let predictor = PricePredictor::new(pre, model("1E1", 0.0, 1.0, 1)).unwrap();
        let err = predictor.predict(&request()).unwrap_err();
        assert_eq!(err.kind(), "transform");
        assert!(err.to_string().contains("'Giza'"));
    }

    #[test]
    fn rejects_width_mismatch() {
        let err = PricePredictor::new(furnished_only(), model("1E1", 0.0, 1.0, 3)).unwrap_err();
        match err {
            ArtifactError::ShapeMismatch { produced, expected } => {
                assert_eq!(produced, 1);
                assert_eq!(expected, 3);
            }
            other => panic!("expected ShapeMismatch, got: {other}"),
        }
    }

    #[test]
    fn rejects_columns_requests_do_not_carry() {
        let pre = Preprocessor::new(
            vec![ColumnTransform::Passthrough {
                columns: vec!["Floor".into()],
            }],
            Remainder::Drop,
        )
        .unwrap();
        let err = PricePredictor::new(pre, model("1E1", 0.0, 1.0, 1)).unwrap_err();
        assert!(err.to_string().contains("`Floor`"));
    }
}
