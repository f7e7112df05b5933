use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reported once per evaluation that reaches a definite answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureFlagCalled {
    pub key: String,
    pub distinct_id: String,
    pub enabled: bool,
    pub timestamp: DateTime<Utc>,
}

/// Receives [`FeatureFlagCalled`] events, e.g. to record flag usage in your analytics.
///
/// The callback runs inline on the evaluating task, so it should return quickly. A panic inside
/// the callback is caught and logged; it never reaches the caller of the evaluation.
pub trait FeatureFlagCalledCallback {
    fn on_feature_flag_called(&self, event: FeatureFlagCalled);
}

pub(crate) struct NoopFeatureFlagCalledCallback;
impl FeatureFlagCalledCallback for NoopFeatureFlagCalledCallback {
    fn on_feature_flag_called(&self, _event: FeatureFlagCalled) {}
}

impl<T: Fn(FeatureFlagCalled)> FeatureFlagCalledCallback for T {
    fn on_feature_flag_called(&self, event: FeatureFlagCalled) {
        self(event);
    }
}
