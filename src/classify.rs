use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{CapturedFrame, CAPTURE_FILE_NAME};
use crate::config::{ClassifierConfig, ClassifierShape};
use crate::error::ClassifyError;
use crate::models::{parse_loose_date, ClassificationResult, UserRole};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    File {
        bytes: Vec<u8>,
        file_name: String,
        mime: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormField {
    pub name: String,
    pub value: FormValue,
}

impl FormField {
    pub fn text(name: &str, value: &str) -> Self {
        Self { name: name.to_string(), value: FormValue::Text(value.to_string()) }
    }

    pub fn file(name: &str, frame: &CapturedFrame) -> Self {
        Self {
            name: name.to_string(),
            value: FormValue::File {
                bytes: frame.bytes().to_vec(),
                file_name: CAPTURE_FILE_NAME.to_string(),
                mime: frame.mime_type().to_string(),
            },
        }
    }
}

/// A `multipart/form-data` POST bound for the classification boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartRequest {
    pub url: String,
    pub fields: Vec<FormField>,
    pub bearer_token: Option<String>,
}

impl MultipartRequest {
    pub fn field(&self, name: &str) -> Option<&FormValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryResponse {
    pub status: u16,
    pub body: String,
}

impl BoundaryResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends requests to the classification boundary. Implementations only
/// fail with [`ClassifyError::Transport`]; HTTP statuses are returned as-is.
#[async_trait]
pub trait ClassificationTransport: Send + Sync {
    async fn post_multipart(&self, request: MultipartRequest) -> Result<BoundaryResponse, ClassifyError>;
}

pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ClassificationTransport for HttpTransport {
    async fn post_multipart(&self, request: MultipartRequest) -> Result<BoundaryResponse, ClassifyError> {
        let mut form = Form::new();
        for field in request.fields {
            form = match field.value {
                FormValue::Text(text) => form.text(field.name, text),
                FormValue::File { bytes, file_name, mime } => {
                    let part = Part::bytes(bytes)
                        .file_name(file_name)
                        .mime_str(&mime)
                        .map_err(|e| ClassifyError::Transport(e.to_string()))?;
                    form.part(field.name, part)
                }
            };
        }

        let mut builder = self.client.post(&request.url).multipart(form);
        if let Some(token) = request.bearer_token.as_deref() {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ClassifyError::Transport(e.to_string()))?;

        Ok(BoundaryResponse { status, body })
    }
}

/// Packages captures for the classification boundary and normalizes what
/// comes back.
pub struct Classifier {
    transport: Arc<dyn ClassificationTransport>,
    hops: Hops,
    endpoint: String,
    bearer_token: Option<String>,
    location: Option<String>,
}

enum Hops {
    Combined,
    TwoHop { enrichment_endpoint: String },
}

impl Classifier {
    /// Fails when a two-hop deployment has no enrichment endpoint.
    pub fn new(config: &ClassifierConfig, transport: Arc<dyn ClassificationTransport>) -> Result<Self, ClassifyError> {
        if config.endpoint.trim().is_empty() {
            return Err(ClassifyError::Config("classifier endpoint is not set".to_string()));
        }

        let hops = match config.shape {
            ClassifierShape::Combined => Hops::Combined,
            ClassifierShape::TwoHop => match config.enrichment_endpoint.as_deref().map(str::trim) {
                Some(endpoint) if !endpoint.is_empty() => Hops::TwoHop {
                    enrichment_endpoint: endpoint.to_string(),
                },
                _ => {
                    return Err(ClassifyError::Config(
                        "two-hop classification requires an enrichment endpoint".to_string(),
                    ))
                }
            },
        };

        Ok(Self {
            transport,
            hops,
            endpoint: config.endpoint.clone(),
            bearer_token: None,
            location: None,
        })
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifyError> {
        let transport = HttpTransport::new(Duration::from_secs(config.timeout_secs))?;
        Self::new(config, Arc::new(transport))
    }

    pub fn set_bearer_token(&mut self, token: Option<String>) {
        self.bearer_token = token;
    }

    pub fn set_location(&mut self, location: Option<String>) {
        self.location = location;
    }

    pub fn shape(&self) -> ClassifierShape {
        match self.hops {
            Hops::Combined => ClassifierShape::Combined,
            Hops::TwoHop { .. } => ClassifierShape::TwoHop,
        }
    }

    /// Classifies a capture for the given role. Missing inputs are rejected
    /// before any request goes out.
    pub async fn classify(
        &self,
        image: Option<&CapturedFrame>,
        role: Option<UserRole>,
    ) -> Result<ClassificationResult, ClassifyError> {
        let image = image.ok_or(ClassifyError::MissingInput("image"))?;
        let role = role.ok_or(ClassifyError::MissingInput("type"))?;
        if image.bytes().is_empty() {
            return Err(ClassifyError::MissingInput("image"));
        }

        info!("Classifying {} byte capture as {}", image.bytes().len(), role);

        let raw = match &self.hops {
            Hops::Combined => self.send(&self.endpoint, self.base_fields(image, role)).await?,
            Hops::TwoHop { enrichment_endpoint } => {
                self.classify_two_hop(enrichment_endpoint, image, role).await?
            }
        };

        let result = normalize_response(role, &raw)?;
        info!("Classified as {} ({})", result.name, result.condition);
        Ok(result)
    }

    async fn classify_two_hop(
        &self,
        enrichment: &str,
        image: &CapturedFrame,
        role: UserRole,
    ) -> Result<Map<String, Value>, ClassifyError> {
        let first = self.send(&self.endpoint, self.base_fields(image, role)).await?;
        debug!("Classification hop returned {} fields", first.len());

        let mut fields = self.base_fields(image, role);
        fields.push(FormField::text("location", self.location.as_deref().unwrap_or("")));
        fields.push(FormField::text("classification", &Value::Object(first.clone()).to_string()));

        let second = self.send(enrichment, fields).await?;
        Ok(merge_hops(first, second))
    }

    fn base_fields(&self, image: &CapturedFrame, role: UserRole) -> Vec<FormField> {
        vec![FormField::file("image", image), FormField::text("type", role.as_tag())]
    }

    async fn send(&self, url: &str, fields: Vec<FormField>) -> Result<Map<String, Value>, ClassifyError> {
        let request = MultipartRequest {
            url: url.to_string(),
            fields,
            bearer_token: self.bearer_token.clone(),
        };

        let response = self.transport.post_multipart(request).await.map_err(|e| {
            error!("Classification request to {} failed: {}", url, e);
            e
        })?;

        if !response.is_success() {
            warn!("Classification service returned {}: {}", response.status, response.body);
            return Err(ClassifyError::ExternalService {
                status: response.status,
                body: response.body,
            });
        }

        match serde_json::from_str::<Value>(&response.body) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(ClassifyError::Decode(format!("expected a JSON object, got {}", kind_of(&other)))),
            Err(e) => Err(ClassifyError::Decode(e.to_string())),
        }
    }
}

/// Overlays the enrichment hop on the classification hop. Nulls in the
/// second hop do not erase first-hop values.
fn merge_hops(mut first: Map<String, Value>, second: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in second {
        if !value.is_null() {
            first.insert(key, value);
        }
    }
    first
}

const NAME_KEYS: &[&str] = &["name", "product_name", "produce_name", "crop_name"];
const CONDITION_KEYS: &[&str] = &["condition", "health"];
const STORAGE_KEYS: &[&str] = &["storageInstructions", "storage_method", "storage"];
const FEATURE_KEYS: &[&str] = &["features", "attributes"];
const SENSORY_KEYS: &[&str] = &["sensoryCharacteristics", "physical_qualities"];
const EXPIRATION_KEYS: &[&str] = &["expirationDate", "expiration_date", "date"];
const HARVEST_KEYS: &[&str] = &["harvestDate", "harvest_date", "date", "expirationDate", "expiration_date"];

/// Maps a raw response body into a [`ClassificationResult`].
pub fn normalize_response(role: UserRole, raw: &Map<String, Value>) -> Result<ClassificationResult, ClassifyError> {
    let name = first_text(raw, NAME_KEYS)
        .ok_or_else(|| ClassifyError::Decode("response is missing a name".to_string()))?;
    let condition = first_text(raw, CONDITION_KEYS)
        .ok_or_else(|| ClassifyError::Decode("response is missing a condition".to_string()))?;

    let date_keys = match role {
        UserRole::Consumer => EXPIRATION_KEYS,
        UserRole::Farmer => HARVEST_KEYS,
    };
    let date = match first_text(raw, date_keys) {
        Some(text) => {
            let parsed = parse_loose_date(&text);
            if parsed.is_none() {
                warn!("Ignoring unparseable {} '{}'", role.date_label(), text);
            }
            parsed
        }
        None => None,
    };

    Ok(ClassificationResult {
        role,
        name,
        condition,
        storage: first_text(raw, STORAGE_KEYS),
        features: first_text(raw, FEATURE_KEYS),
        sensory: first_text(raw, SENSORY_KEYS),
        disease: first_text(raw, &["disease"]).filter(|v| !is_placeholder(v)),
        treatment: first_text(raw, &["treatment"]).filter(|v| !is_placeholder(v)),
        date,
        confidence: raw.get("confidence").and_then(confidence_value),
        location: first_text(raw, &["location"]),
    })
}

fn first_text(raw: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|k| raw.get(*k)).find_map(text_value)
}

fn text_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(text_value)
            .collect::<Vec<_>>()
            .join(", "),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Reads a confidence onto the `0..1` scale. Percent strings and numbers
/// above 1 are taken as percentages.
fn confidence_value(value: &Value) -> Option<f32> {
    let (raw, percent) = match value {
        Value::Number(n) => (n.as_f64()? as f32, false),
        Value::String(s) => match s.trim().strip_suffix('%') {
            Some(number) => (number.trim().parse::<f32>().ok()?, true),
            None => (s.trim().parse::<f32>().ok()?, false),
        },
        _ => return None,
    };

    let scaled = if percent || raw > 1.0 { raw / 100.0 } else { raw };
    (0.0..=1.0).contains(&scaled).then_some(scaled)
}

fn is_placeholder(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "none" | "n/a" | "na" | "null" | "-")
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
