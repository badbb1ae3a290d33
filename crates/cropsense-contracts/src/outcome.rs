use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::image::ImageAsset;

/// Substitute advisory used whenever generation fails. The prediction is the
/// primary deliverable; the advisory never blocks it.
pub const FALLBACK_ADVISORY: &str =
    "Disease detected successfully, but advisory guidance could not be generated.";

/// The part of an [`ImageAsset`] that survives into the result; the raw
/// bytes are never echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageMeta {
    pub filename: String,
    pub media_type: String,
    pub byte_len: u64,
}

impl ImageMeta {
    pub fn of(asset: &ImageAsset) -> Self {
        Self {
            filename: asset.filename().to_string(),
            media_type: asset.media_type().to_string(),
            byte_len: asset.byte_len(),
        }
    }
}

/// `confidence` degrades to 0.0 when unresolvable; `raw` keeps the untouched
/// classifier payload for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub confidence: f64,
    pub raw: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub accepted: bool,
    pub reason: String,
}

impl ValidationVerdict {
    pub fn accepted(reason: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: reason.into(),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Advisory {
    pub text: String,
    pub is_fallback: bool,
}

impl Advisory {
    pub fn generated(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_fallback: false,
        }
    }

    pub fn fallback() -> Self {
        Self {
            text: FALLBACK_ADVISORY.to_string(),
            is_fallback: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Ok,
    Rejected,
    ClassifierFailed,
}

/// Constructed once per invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub image: ImageMeta,
    pub status: PipelineStatus,
    pub verdict: Option<ValidationVerdict>,
    pub prediction: Option<Prediction>,
    pub advisory: Option<Advisory>,
    pub failure_message: Option<String>,
}

impl PipelineResult {
    pub fn ok(
        image: ImageMeta,
        verdict: Option<ValidationVerdict>,
        prediction: Prediction,
        advisory: Advisory,
    ) -> Self {
        Self {
            image,
            status: PipelineStatus::Ok,
            verdict,
            prediction: Some(prediction),
            advisory: Some(advisory),
            failure_message: None,
        }
    }

    pub fn rejected(image: ImageMeta, verdict: ValidationVerdict) -> Self {
        Self {
            image,
            status: PipelineStatus::Rejected,
            verdict: Some(verdict),
            prediction: None,
            advisory: None,
            failure_message: None,
        }
    }

    pub fn classifier_failed(
        image: ImageMeta,
        verdict: Option<ValidationVerdict>,
        user_message: impl Into<String>,
    ) -> Self {
        Self {
            image,
            status: PipelineStatus::ClassifierFailed,
            verdict,
            prediction: None,
            advisory: None,
            failure_message: Some(user_message.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{
        Advisory, ImageMeta, PipelineResult, PipelineStatus, Prediction, ValidationVerdict,
        FALLBACK_ADVISORY,
    };
    use crate::image::ImageAsset;

    fn meta() -> ImageMeta {
        ImageMeta::of(&ImageAsset::new("leafA.jpg", "image/jpeg", vec![1, 2, 3]))
    }

    #[test]
    fn status_serializes_to_snake_case_wire_names() {
        assert_eq!(
            serde_json::to_value(PipelineStatus::Ok).unwrap(),
            json!("ok")
        );
        assert_eq!(
            serde_json::to_value(PipelineStatus::Rejected).unwrap(),
            json!("rejected")
        );
        assert_eq!(
            serde_json::to_value(PipelineStatus::ClassifierFailed).unwrap(),
            json!("classifier_failed")
        );
    }

    #[test]
    fn rejected_result_carries_no_prediction_or_advisory() {
        let result = PipelineResult::rejected(
            meta(),
            ValidationVerdict::rejected("not the expected subject"),
        );
        assert_eq!(result.status, PipelineStatus::Rejected);
        assert!(result.prediction.is_none());
        assert!(result.advisory.is_none());
        assert!(result.failure_message.is_none());
        assert!(!result.verdict.unwrap().accepted);
    }

    #[test]
    fn ok_result_round_trips_through_json() {
        let mut raw = Map::new();
        raw.insert("prediction_name".to_string(), json!("Mosaic"));
        let result = PipelineResult::ok(
            meta(),
            None,
            Prediction {
                label: "Mosaic".to_string(),
                confidence: 85.0,
                raw,
            },
            Advisory::generated("Spray early."),
        );
        let parsed: PipelineResult =
            serde_json::from_str(&serde_json::to_string(&result).unwrap()).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn fallback_advisory_uses_the_fixed_text() {
        let advisory = Advisory::fallback();
        assert!(advisory.is_fallback);
        assert_eq!(advisory.text, FALLBACK_ADVISORY);
    }

    #[test]
    fn classifier_failed_result_keeps_the_user_message() {
        let result = PipelineResult::classifier_failed(meta(), None, "Connection error.");
        assert_eq!(result.status, PipelineStatus::ClassifierFailed);
        assert_eq!(result.failure_message.as_deref(), Some("Connection error."));
        let as_value: Value = serde_json::to_value(&result).unwrap();
        assert_eq!(as_value["status"], json!("classifier_failed"));
    }
}
