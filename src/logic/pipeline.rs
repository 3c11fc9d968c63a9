//! Scoring Pipeline - score a stored reading, then record the result

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::recorder::PredictionRecorder;
use super::scoring::{AnomalyScorer, Score};
use super::store::{Measurement, PredictionRecord};

/// What one pipeline run produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveOutcome {
    pub score: Score,
    /// None when the write failed
    pub record: Option<PredictionRecord>,
}

#[derive(Clone)]
pub struct ScoringPipeline {
    scorer: Arc<AnomalyScorer>,
    recorder: Arc<PredictionRecorder>,
}

impl ScoringPipeline {
    pub fn new(scorer: Arc<AnomalyScorer>, recorder: Arc<PredictionRecorder>) -> Self {
        Self { scorer, recorder }
    }

    pub fn scorer(&self) -> &AnomalyScorer {
        &self.scorer
    }

    /// Score `measurement` against the device's latest window and record the result
    pub fn score_and_record(&self, measurement: &Measurement) -> LiveOutcome {
        let score = self.scorer.score(measurement.device_id, measurement.flow);
        let record = self
            .recorder
            .record(measurement.device_id, measurement.timestamp, measurement.flow, &score);

        LiveOutcome { score, record }
    }
}
