use crate::listing::draft::Draft;
use crate::listing::images::ImageEntry;
use crate::listing::rules::ListingRules;
use crate::listing::service::{
    CreatedProduct, PayloadImage, ProductService, ServiceFailure, SubmissionPayload,
};
use crate::models::StageReport;
use serde::Serialize;
use serde_json::json;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Multipart field order the product backend expects. Do not reorder.
pub const FIELD_ORDER: [&str; 9] = [
    "title",
    "description",
    "price",
    "premium",
    "allow_buying",
    "barter_only",
    "location",
    "condition",
    "category",
];

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("please enter a title")]
    MissingTitle,
    #[error("title cannot exceed {max} characters")]
    TitleTooLong { max: usize },
    #[error("please enter a description")]
    MissingDescription,
    #[error("description must be at least {min} characters")]
    DescriptionTooShort { min: usize },
    #[error("description cannot exceed {max} characters")]
    DescriptionTooLong { max: usize },
    #[error("please upload at least {required} images")]
    NotEnoughImages { required: usize, actual: usize },
    #[error("please enter a price greater than zero")]
    MissingPrice,
    #[error("{name} is larger than the {limit_bytes} byte limit")]
    FileTooLarge { name: String, limit_bytes: u64 },
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::MissingTitle => "missing_title",
            ValidationError::TitleTooLong { .. } => "title_too_long",
            ValidationError::MissingDescription => "missing_description",
            ValidationError::DescriptionTooShort { .. } => "description_too_short",
            ValidationError::DescriptionTooLong { .. } => "description_too_long",
            ValidationError::NotEnoughImages { .. } => "not_enough_images",
            ValidationError::MissingPrice => "missing_price",
            ValidationError::FileTooLarge { .. } => "file_too_large",
        }
    }
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("a submission is already in progress")]
    InFlight,
    #[error("{0}")]
    Service(ServiceFailure),
}

impl SubmissionError {
    pub fn user_message(&self) -> String {
        match self {
            SubmissionError::Service(failure) => failure.message(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPhase {
    #[default]
    Idle,
    Validating,
    Submitting,
    Succeeded,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub product: CreatedProduct,
    pub stages: Vec<StageReport>,
}

/// A draft that passed validation, frozen into its wire form.
pub struct PreparedSubmission {
    payload: SubmissionPayload,
    validate_stage: StageReport,
}

pub struct SubmissionPipeline<S> {
    service: S,
    rules: ListingRules,
}

impl<S: ProductService> SubmissionPipeline<S> {
    pub fn new(service: S, rules: ListingRules) -> Self {
        Self { service, rules }
    }

    /// Checks the completed draft in a fixed order and reports the first rule it breaks.
    pub fn validate(&self, draft: &Draft, images: &[ImageEntry]) -> Result<(), ValidationError> {
        let title = draft.title.trim();
        if title.is_empty() {
            return Err(ValidationError::MissingTitle);
        }
        if let Some(max) = self.rules.title_max_chars
            && title.chars().count() > max
        {
            return Err(ValidationError::TitleTooLong { max });
        }

        let description = draft.description.trim();
        if description.is_empty() {
            return Err(ValidationError::MissingDescription);
        }
        let description_len = description.chars().count();
        if let Some(min) = self.rules.description_min_chars
            && description_len < min
        {
            return Err(ValidationError::DescriptionTooShort { min });
        }
        if let Some(max) = self.rules.description_max_chars
            && description_len > max
        {
            return Err(ValidationError::DescriptionTooLong { max });
        }

        if images.len() < self.rules.min_images {
            return Err(ValidationError::NotEnoughImages {
                required: self.rules.min_images,
                actual: images.len(),
            });
        }

        if draft.allow_buying() && !draft.has_valid_price() {
            return Err(ValidationError::MissingPrice);
        }

        if let Some(oversize) = images
            .iter()
            .find(|image| image.size() > self.rules.max_file_size)
        {
            return Err(ValidationError::FileTooLarge {
                name: oversize.name.clone(),
                limit_bytes: self.rules.max_file_size,
            });
        }
        Ok(())
    }

    pub fn build_payload(draft: &Draft, images: &[ImageEntry]) -> SubmissionPayload {
        let flag = |on: bool| if on { "1" } else { "0" }.to_string();
        let price = if draft.allow_buying() {
            draft.price.map(|p| p.to_string()).unwrap_or_default()
        } else {
            String::new()
        };
        let values = [
            draft.title.trim().to_string(),
            draft.description.trim().to_string(),
            price,
            flag(draft.premium),
            flag(draft.allow_buying()),
            flag(draft.barter_only()),
            draft.location.clone().unwrap_or_default(),
            draft
                .condition
                .map(|c| c.label().to_string())
                .unwrap_or_default(),
            draft
                .category
                .map(|c| c.label().to_string())
                .unwrap_or_default(),
        ];
        SubmissionPayload {
            fields: FIELD_ORDER.into_iter().zip(values).collect(),
            images: images
                .iter()
                .map(|image| PayloadImage {
                    name: image.name.clone(),
                    mime_type: image.mime_type.clone(),
                    bytes: image.bytes.clone(),
                })
                .collect(),
        }
    }

    /// Validates and builds the payload. Nothing is sent until `send`.
    pub fn prepare(
        &self,
        draft: &Draft,
        images: &[ImageEntry],
    ) -> Result<PreparedSubmission, ValidationError> {
        let started = Instant::now();
        self.validate(draft, images)?;
        let validate_ms = started.elapsed().as_millis();
        crate::metrics::phase_elapsed("validate", validate_ms);
        Ok(PreparedSubmission {
            payload: Self::build_payload(draft, images),
            validate_stage: StageReport::new("validate", validate_ms, json!({"images": images.len()})),
        })
    }

    /// Performs the single network call. Never retries.
    pub async fn send(&self, prepared: PreparedSubmission) -> Result<SubmissionReceipt, SubmissionError> {
        let PreparedSubmission {
            payload,
            validate_stage,
        } = prepared;
        let image_count = payload.images.len();
        let started = Instant::now();
        let result = self.service.create(payload).await;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::phase_elapsed("create_product", elapsed_ms);

        match result {
            Ok(product) => {
                info!(
                    target = "barter.submit",
                    product_id = %product.id,
                    images = image_count,
                    elapsed_ms = elapsed_ms as u64,
                    "product created"
                );
                let stages = vec![
                    validate_stage,
                    StageReport::new(
                        "create_product",
                        elapsed_ms,
                        json!({
                            "product_id": product.id,
                            "slug": product.slug,
                            "images": image_count,
                        }),
                    ),
                ];
                Ok(SubmissionReceipt { product, stages })
            }
            Err(failure) => {
                warn!(
                    target = "barter.submit",
                    status = ?failure.status,
                    error = %failure.message(),
                    "product creation failed"
                );
                Err(SubmissionError::Service(failure))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::listing::draft::{Category, Condition, ExchangeMode};
    use crate::listing::service::ProductId;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// Records every payload and answers with a canned result.
    #[derive(Clone)]
    pub(crate) struct RecordingService {
        pub calls: Arc<Mutex<Vec<SubmissionPayload>>>,
        pub failure: Option<ServiceFailure>,
    }

    impl RecordingService {
        pub(crate) fn ok() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                failure: None,
            }
        }

        pub(crate) fn failing(failure: ServiceFailure) -> Self {
            Self {
                failure: Some(failure),
                ..Self::ok()
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl ProductService for RecordingService {
        async fn create(&self, payload: SubmissionPayload) -> Result<CreatedProduct, ServiceFailure> {
            self.calls.lock().unwrap().push(payload);
            match &self.failure {
                Some(failure) => Err(failure.clone()),
                None => Ok(CreatedProduct {
                    id: ProductId::Number(101),
                    slug: Some("desk-lamp".into()),
                }),
            }
        }
    }

    pub(crate) fn entry(name: &str, size: usize) -> ImageEntry {
        ImageEntry {
            id: Uuid::new_v4(),
            name: name.to_string(),
            mime_type: "image/jpeg".to_string(),
            bytes: Arc::from(vec![1u8; size]),
            preview: None,
        }
    }

    fn lamp() -> Draft {
        Draft {
            title: "Desk Lamp".into(),
            description: "A working desk lamp, barely used.".into(),
            exchange_mode: ExchangeMode::BarterOnly,
            ..Draft::default()
        }
    }

    fn three_images() -> Vec<ImageEntry> {
        vec![entry("a.jpg", 10), entry("b.jpg", 10), entry("c.jpg", 10)]
    }

    #[test]
    fn missing_title_never_reaches_the_network() {
        let service = RecordingService::ok();
        let pipeline = SubmissionPipeline::new(service.clone(), ListingRules::standard());
        let draft = Draft {
            title: "   ".into(),
            ..lamp()
        };
        let err = pipeline
            .prepare(&draft, &three_images())
            .err()
            .expect("title is required");
        assert_eq!(err, ValidationError::MissingTitle);
        assert_eq!(service.call_count(), 0);
    }

    #[test]
    fn gates_fire_in_order() {
        let pipeline = SubmissionPipeline::new(RecordingService::ok(), ListingRules::strict());
        let short = Draft {
            description: "too short".into(),
            ..lamp()
        };
        assert_eq!(
            pipeline.validate(&short, &[]),
            Err(ValidationError::DescriptionTooShort { min: 50 })
        );

        let pipeline = SubmissionPipeline::new(RecordingService::ok(), ListingRules::standard());
        assert_eq!(
            pipeline.validate(&lamp(), &three_images()[..2]),
            Err(ValidationError::NotEnoughImages {
                required: 3,
                actual: 2
            })
        );
        let buying = Draft {
            exchange_mode: ExchangeMode::Both,
            price: Some(0.0),
            ..lamp()
        };
        assert_eq!(
            pipeline.validate(&buying, &three_images()),
            Err(ValidationError::MissingPrice)
        );
        let mut images = three_images();
        images.push(entry("huge.jpg", 5 * 1024 * 1024 + 1));
        assert_eq!(
            pipeline.validate(&lamp(), &images),
            Err(ValidationError::FileTooLarge {
                name: "huge.jpg".into(),
                limit_bytes: 5 * 1024 * 1024
            })
        );
    }

    #[test]
    fn payload_fields_follow_backend_order() {
        let draft = Draft {
            price: Some(150.0),
            exchange_mode: ExchangeMode::Both,
            premium: true,
            location: Some("Lisbon, Portugal".into()),
            condition: Some(Condition::LikeNew),
            category: Some(Category::Electronics),
            ..lamp()
        };
        let payload =
            SubmissionPipeline::<RecordingService>::build_payload(&draft, &three_images());
        assert_eq!(
            payload.wire_order(),
            vec![
                "title",
                "description",
                "price",
                "premium",
                "allow_buying",
                "barter_only",
                "location",
                "condition",
                "category",
                "images",
                "images",
                "images",
            ]
        );
        assert_eq!(payload.field("price"), Some("150"));
        assert_eq!(payload.field("premium"), Some("1"));
        assert_eq!(payload.field("allow_buying"), Some("1"));
        assert_eq!(payload.field("barter_only"), Some("1"));
        assert_eq!(payload.field("condition"), Some("Like-New"));
        assert_eq!(payload.field("category"), Some("Electronics"));
    }

    #[test]
    fn barter_only_payload_sends_no_price() {
        let draft = Draft {
            price: Some(99.0),
            ..lamp()
        };
        let payload =
            SubmissionPipeline::<RecordingService>::build_payload(&draft, &three_images());
        assert_eq!(payload.field("price"), Some(""));
        assert_eq!(payload.field("allow_buying"), Some("0"));
        assert_eq!(payload.field("barter_only"), Some("1"));
        assert_eq!(payload.field("location"), Some(""));
    }

    #[tokio::test]
    async fn service_failure_surfaces_details() {
        let failure = ServiceFailure::http(
            422,
            Some(serde_json::json!({"details": "Duplicate listing", "message": "Unprocessable"})),
        );
        let pipeline =
            SubmissionPipeline::new(RecordingService::failing(failure), ListingRules::standard());
        let prepared = pipeline.prepare(&lamp(), &three_images()).expect("valid");
        let err = pipeline.send(prepared).await.expect_err("service refuses");
        assert_eq!(err.user_message(), "Duplicate listing");
    }

    #[tokio::test]
    async fn successful_submit_reports_stages() {
        let service = RecordingService::ok();
        let pipeline = SubmissionPipeline::new(service.clone(), ListingRules::standard());
        let prepared = pipeline.prepare(&lamp(), &three_images()).expect("valid");
        let receipt = pipeline.send(prepared).await.expect("submit");
        assert_eq!(receipt.product.id, ProductId::Number(101));
        let names: Vec<&str> = receipt.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["validate", "create_product"]);
        assert_eq!(service.call_count(), 1);
        assert_eq!(
            serde_json::to_value(&receipt.product).unwrap()["slug"],
            Value::String("desk-lamp".into())
        );
    }
}
