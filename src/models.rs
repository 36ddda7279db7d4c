use crate::listing::{
    draft::{Category, Condition, ExchangeMode, FieldUpdate},
    service::CreatedProduct,
    submission::SubmissionPhase,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::skip_serializing_none;
use std::fmt::Display;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Warning,
}

/// A user-facing message, the server-side counterpart of a toast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
    #[serde(flatten)]
    pub detail: Value,
}

impl Notice {
    pub fn warning<W: Serialize + Display>(warning: &W) -> Self {
        Self::from_value(NoticeLevel::Warning, warning)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
            detail: Value::Object(Default::default()),
        }
    }

    fn from_value<W: Serialize + Display>(level: NoticeLevel, value: &W) -> Self {
        let detail = match serde_json::to_value(value) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => Value::Object(Default::default()),
        };
        Self {
            level,
            message: value.to_string(),
            detail,
        }
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct DraftView {
    pub title: String,
    pub description: String,
    pub price: Option<f64>,
    pub premium: bool,
    pub exchange_mode: ExchangeMode,
    pub allow_buying: bool,
    pub barter_only: bool,
    pub location: Option<String>,
    pub condition: Option<Condition>,
    pub category: Option<Category>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct ImageView {
    pub index: usize,
    pub id: String,
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub preview_ready: bool,
    /// Data URL. Only `GET /wizards/{id}` embeds it.
    pub preview: Option<String>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct WizardView {
    pub id: String,
    pub step: u8,
    pub step_name: crate::listing::WizardStep,
    pub can_proceed: bool,
    pub gates: Vec<bool>,
    pub draft: DraftView,
    pub images: Vec<ImageView>,
    pub pending_previews: usize,
    pub submission: SubmissionPhase,
    pub last_error: Option<String>,
    pub rules: String,
    pub created_at: DateTime<Utc>,
}

/// Response envelope for every wizard mutation.
#[derive(Debug, Clone, Serialize)]
pub struct WizardResponse {
    pub wizard: WizardView,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DraftUpdateRequest {
    Many { updates: Vec<FieldUpdate> },
    One(FieldUpdate),
}

impl DraftUpdateRequest {
    pub fn into_updates(self) -> Vec<FieldUpdate> {
        match self {
            DraftUpdateRequest::Many { updates } => updates,
            DraftUpdateRequest::One(update) => vec![update],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub product: CreatedProduct,
    pub navigate_to: String,
    pub notices: Vec<Notice>,
    pub stages: Vec<StageReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::draft::FieldWarning;

    #[test]
    fn notices_flatten_the_warning_code() {
        let notice = Notice::warning(&FieldWarning::FieldTooLong {
            field: "title",
            max: 15,
        });
        let value = serde_json::to_value(&notice).unwrap();
        assert_eq!(value["level"], "warning");
        assert_eq!(value["code"], "field_too_long");
        assert_eq!(value["max"], 15);
        assert_eq!(value["message"], "title cannot exceed 15 characters");
    }

    #[test]
    fn draft_update_accepts_single_or_batch() {
        let one: DraftUpdateRequest =
            serde_json::from_str(r#"{"field": "title", "value": "Desk Lamp"}"#).unwrap();
        assert_eq!(one.into_updates().len(), 1);
        let many: DraftUpdateRequest = serde_json::from_str(
            r#"{"updates": [{"field": "allow_buying", "value": true}, {"field": "price", "value": 150}]}"#,
        )
        .unwrap();
        assert_eq!(many.into_updates().len(), 2);
    }
}
