use crate::config::{PRODUCT_API_ROOT, PRODUCT_API_TOKEN};
use crate::http::build_client;
use reqwest::{
    Client,
    multipart::{Form, Part},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{future::Future, sync::Arc};
use tracing::{debug, warn};

pub const GENERIC_FAILURE: &str = "Failed to create product. Please try again.";

/// One file part of the submission payload.
#[derive(Debug, Clone)]
pub struct PayloadImage {
    pub name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

/// Text fields in the order the backend reads them, followed by the images.
#[derive(Debug, Clone)]
pub struct SubmissionPayload {
    pub fields: Vec<(&'static str, String)>,
    pub images: Vec<PayloadImage>,
}

impl SubmissionPayload {
    /// Field names as they appear on the wire, one `images` entry per file.
    pub fn wire_order(&self) -> Vec<&'static str> {
        self.fields
            .iter()
            .map(|(name, _)| *name)
            .chain(self.images.iter().map(|_| "images"))
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn into_form(self) -> Result<Form, reqwest::Error> {
        let mut form = Form::new();
        for (name, value) in self.fields {
            form = form.text(name, value);
        }
        for image in self.images {
            let part = Part::bytes(image.bytes.to_vec())
                .file_name(image.name)
                .mime_str(&image.mime_type)?;
            form = form.part("images", part);
        }
        Ok(form)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductId {
    Text(String),
    Number(u64),
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductId::Text(value) => f.write_str(value),
            ProductId::Number(value) => write!(f, "{value}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedProduct {
    pub id: ProductId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
}

/// What came back when the product service refused or could not be reached.
#[derive(Debug, Clone, Default)]
pub struct ServiceFailure {
    pub status: Option<u16>,
    pub body: Option<Value>,
    pub transport: Option<String>,
}

impl ServiceFailure {
    pub fn transport(err: impl ToString) -> Self {
        Self {
            transport: Some(err.to_string()),
            ..Self::default()
        }
    }

    pub fn http(status: u16, body: Option<Value>) -> Self {
        Self {
            status: Some(status),
            body,
            transport: None,
        }
    }

    /// Human-readable reason: `details`, then `message`, then `error`, then the
    /// transport error, then a generic sentence.
    pub fn message(&self) -> String {
        let from_body = self.body.as_ref().and_then(|body| {
            ["details", "message", "error"]
                .into_iter()
                .find_map(|key| body.get(key).and_then(text_of))
        });
        from_body
            .or_else(|| {
                self.transport
                    .as_deref()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| GENERIC_FAILURE.to_string())
    }
}

impl std::fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message()),
            None => f.write_str(&self.message()),
        }
    }
}

impl std::error::Error for ServiceFailure {}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::String(s) => Some(s.trim().to_string()),
        Value::Array(items) if items.is_empty() => None,
        Value::Array(items) => Some(
            items
                .iter()
                .map(|item| text_of(item).unwrap_or_else(|| item.to_string()))
                .collect::<Vec<_>>()
                .join("; "),
        ),
        other => Some(other.to_string()),
    }
}

/// The backend collaborator that persists a listing.
pub trait ProductService: Send + Sync {
    fn create(
        &self,
        payload: SubmissionPayload,
    ) -> impl Future<Output = Result<CreatedProduct, ServiceFailure>> + Send;
}

#[derive(Debug, Clone)]
pub struct HttpProductService {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl HttpProductService {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            http: build_client(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(PRODUCT_API_ROOT.as_str(), PRODUCT_API_TOKEN.clone())
    }
}

impl ProductService for HttpProductService {
    async fn create(&self, payload: SubmissionPayload) -> Result<CreatedProduct, ServiceFailure> {
        let url = format!("{}/products", self.base_url);
        let form = payload.into_form().map_err(ServiceFailure::transport)?;
        let mut request = self.http.post(&url).multipart(form);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|err| {
            warn!(target = "barter.submit", url = %url, error = %err, "product_service_unreachable");
            ServiceFailure::transport(err)
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<Value>().await.ok();
            debug!(target = "barter.submit", status = status.as_u16(), body = ?body, "product_service_rejected");
            return Err(ServiceFailure::http(status.as_u16(), body));
        }

        response
            .json::<CreatedProduct>()
            .await
            .map_err(|err| ServiceFailure {
                status: Some(status.as_u16()),
                body: None,
                transport: Some(format!("invalid response: {err}")),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn details_win_over_message() {
        let failure = ServiceFailure::http(
            422,
            Some(json!({"details": "Title already used", "message": "Validation failed", "error": "bad"})),
        );
        assert_eq!(failure.message(), "Title already used");
    }

    #[test]
    fn message_then_error_then_transport_then_generic() {
        let failure = ServiceFailure::http(400, Some(json!({"message": "m", "error": "e"})));
        assert_eq!(failure.message(), "m");
        let failure = ServiceFailure::http(400, Some(json!({"error": "e"})));
        assert_eq!(failure.message(), "e");
        let failure = ServiceFailure {
            status: Some(500),
            body: Some(json!({"details": ""})),
            transport: Some("connection reset".into()),
        };
        assert_eq!(failure.message(), "connection reset");
        assert_eq!(ServiceFailure::default().message(), GENERIC_FAILURE);
    }

    #[test]
    fn structured_details_are_flattened() {
        let failure = ServiceFailure::http(
            422,
            Some(json!({"details": ["price must be positive", "title required"]})),
        );
        assert_eq!(
            failure.message(),
            "price must be positive; title required"
        );
    }

    #[test]
    fn product_ids_accept_numbers_and_strings() {
        let created: CreatedProduct =
            serde_json::from_value(json!({"id": 17, "slug": "desk-lamp"})).unwrap();
        assert_eq!(created.id, ProductId::Number(17));
        let created: CreatedProduct = serde_json::from_value(json!({"id": "p_1"})).unwrap();
        assert_eq!(created.id.to_string(), "p_1");
        assert_eq!(created.slug, None);
    }

    #[tokio::test]
    async fn unreachable_service_reports_transport_error() {
        let service = HttpProductService::new("http://127.0.0.1:9", None);
        let payload = SubmissionPayload {
            fields: vec![("title", "Desk Lamp".into())],
            images: Vec::new(),
        };
        let failure = service.create(payload).await.expect_err("nothing listens on port 9");
        assert!(failure.status.is_none());
        assert_ne!(failure.message(), GENERIC_FAILURE);
    }
}
