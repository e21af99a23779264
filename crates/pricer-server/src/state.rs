// Shared, read-only state handed to every request handler.

use crate::config::ResponseLabels;
use chrono::{DateTime, Utc};
use pricer_core::PricePredictor;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    /// Loaded once at startup and never mutated.
    pub predictor: Arc<PricePredictor>,
    pub labels: Arc<ResponseLabels>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(predictor: PricePredictor, labels: ResponseLabels) -> Self {
        Self {
            predictor: Arc::new(predictor),
            labels: Arc::new(labels),
            started_at: Utc::now(),
        }
    }
}
