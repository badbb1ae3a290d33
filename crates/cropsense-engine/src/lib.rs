use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cropsense_contracts::{
    Advisory, AdvisoryFailure, ClassifierFailure, GateFailure, GenerativeFailure, ImageAsset,
    ImageMeta, InputError, PipelineResult, Prediction, ValidationVerdict,
};
use reqwest::blocking::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Map, Value};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_GENERATIVE_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GENERATIVE_MODEL: &str = "gemini-2.5-flash";

pub trait ClassifierEndpoint: Send + Sync {
    fn classify(&self, image: &ImageAsset, credential: &str)
        -> Result<Prediction, ClassifierFailure>;
}

/// Shared by the subject gate and the advisory composer.
pub trait GenerativeEndpoint: Send + Sync {
    fn generate(
        &self,
        instruction: &str,
        image: &ImageAsset,
        credential: &str,
    ) -> Result<String, GenerativeFailure>;
}

/// Resolves one scalar confidence from whatever array shape the classifier
/// returned: flat list, singly-nested list, or nothing at all. Classifier
/// revisions disagree on the nesting; both shapes are accepted. Every
/// malformed shape degrades to 0.0; this routine never fails.
pub fn resolve_confidence(payload: &Map<String, Value>, index: usize) -> f64 {
    let Some(scores) = payload.get("confidence_percentages").and_then(Value::as_array) else {
        return 0.0;
    };
    if scores.is_empty() {
        return 0.0;
    }
    let candidates = scores.first().and_then(Value::as_array).unwrap_or(scores);
    candidates.get(index).and_then(Value::as_f64).unwrap_or(0.0)
}

fn predicted_index(payload: &Map<String, Value>) -> usize {
    let Some(raw) = payload.get("prediction_index") else {
        return 0;
    };
    if let Some(index) = raw.as_u64() {
        return index as usize;
    }
    // Some classifier revisions encode the index as a float.
    raw.as_f64()
        .filter(|value| value.is_finite() && *value >= 0.0)
        .map(|value| value as usize)
        .unwrap_or(0)
}

pub fn prediction_from_payload(raw: Map<String, Value>) -> Prediction {
    let label = raw
        .get("prediction_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or("Unknown")
        .to_string();
    let confidence = resolve_confidence(&raw, predicted_index(&raw));
    Prediction {
        label,
        confidence,
        raw,
    }
}

pub struct HttpClassifier {
    endpoint: String,
    http: HttpClient,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into().trim().to_string(),
            http: HttpClient::new(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ClassifierEndpoint for HttpClassifier {
    fn classify(
        &self,
        image: &ImageAsset,
        credential: &str,
    ) -> Result<Prediction, ClassifierFailure> {
        let part = MultipartPart::bytes(image.bytes().to_vec())
            .file_name(image.filename().to_string())
            .mime_str(image.media_type())
            .map_err(|err| {
                ClassifierFailure::malformed(format!(
                    "invalid media type '{}': {err}",
                    image.media_type()
                ))
            })?;
        let form = MultipartForm::new().part("file", part);

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-api-key", credential)
            .timeout(self.timeout)
            .multipart(form)
            .send()
            .map_err(|err| ClassifierFailure::transport(transport_detail(&err)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| ClassifierFailure::transport(transport_detail(&err)))?;
        if !status.is_success() {
            return Err(ClassifierFailure::status(
                status.as_u16(),
                truncate_text(&body, 512),
            ));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            ClassifierFailure::malformed(format!("classifier returned invalid JSON: {err}"))
        })?;
        let Some(object) = parsed.as_object() else {
            return Err(ClassifierFailure::malformed(
                "classifier payload was not a JSON object".to_string(),
            ));
        };
        Ok(prediction_from_payload(object.clone()))
    }
}

pub struct GenerativeClient {
    api_base: String,
    model: String,
    http: HttpClient,
    timeout: Duration,
}

impl GenerativeClient {
    pub fn new(timeout: Duration) -> Self {
        Self::with_api_base(
            DEFAULT_GENERATIVE_API_BASE,
            DEFAULT_GENERATIVE_MODEL,
            timeout,
        )
    }

    pub fn with_api_base(
        api_base: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            api_base: api_base.into().trim().trim_end_matches('/').to_string(),
            model: model.into().trim().to_string(),
            http: HttpClient::new(),
            timeout,
        }
    }

    fn endpoint(&self) -> String {
        let model_path = if self.model.starts_with("models/") {
            self.model.clone()
        } else {
            format!("models/{}", self.model)
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn build_parts(instruction: &str, image: &ImageAsset) -> Vec<Value> {
        vec![json!({ "text": instruction }), inline_image_part(image)]
    }
}

impl GenerativeEndpoint for GenerativeClient {
    fn generate(
        &self,
        instruction: &str,
        image: &ImageAsset,
        credential: &str,
    ) -> Result<String, GenerativeFailure> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": Self::build_parts(instruction, image),
            }],
        });

        let endpoint = self.endpoint();
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", credential)])
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .map_err(|err| GenerativeFailure::transport(transport_detail(&err)))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|err| GenerativeFailure::transport(transport_detail(&err)))?;
        if !status.is_success() {
            return Err(GenerativeFailure::new(
                "The analysis service returned an unexpected reply.",
                format!(
                    "generative endpoint returned {}: {}",
                    status.as_u16(),
                    truncate_text(&body, 512)
                ),
            ));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|err| {
            GenerativeFailure::new(
                "The analysis service returned an unexpected reply.",
                format!("generative endpoint returned invalid JSON: {err}"),
            )
        })?;
        extract_reply_text(&parsed).ok_or_else(|| {
            GenerativeFailure::new(
                "The analysis service returned an unexpected reply.",
                "generative reply contained no text parts".to_string(),
            )
        })
    }
}

fn inline_image_part(image: &ImageAsset) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.media_type(),
            "data": BASE64.encode(image.bytes()),
        }
    })
}

fn extract_reply_text(payload: &Value) -> Option<String> {
    let candidates = payload.get("candidates").and_then(Value::as_array)?;
    let mut out = String::new();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push_str(text);
            }
        }
    }
    let trimmed = out.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Pre-screens the image against an expected subject before the classifier
/// runs. The gate is fail-closed: a transport failure, an unparseable reply,
/// or a missing verdict field all reject the image, because classifying an
/// unverified image risks a misleading downstream advisory.
pub struct SubjectGate {
    subject: String,
    flag_field: String,
}

impl SubjectGate {
    pub fn new(subject: impl Into<String>, flag_field: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            flag_field: flag_field.into(),
        }
    }

    /// Derives the verdict field name from the subject's leading word, e.g.
    /// "cassava leaves (Manihot esculenta)" gates on `is_cassava`.
    pub fn for_subject(subject: impl Into<String>) -> Self {
        let subject = subject.into();
        let token = subject
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        let token = if token.is_empty() {
            "subject".to_string()
        } else {
            token
        };
        let flag_field = format!("is_{token}");
        Self {
            subject,
            flag_field,
        }
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn flag_field(&self) -> &str {
        &self.flag_field
    }

    fn instruction(&self) -> String {
        format!(
            "You are an agricultural vision expert.\n\n\
             Analyze the image and determine whether it clearly shows {subject}.\n\n\
             Rules:\n\
             - Respond ONLY in valid JSON\n\
             - Do NOT include explanations outside JSON\n\
             - Use this exact format:\n\n\
             {{\n  \"{flag}\": true or false,\n  \"reason\": \"short explanation\"\n}}\n\n\
             If the image is unclear, not a plant, or does not show {subject}, \
             return {flag} as false.",
            subject = self.subject,
            flag = self.flag_field,
        )
    }

    /// Surfaces the typed failure; most callers want [`SubjectGate::validate`].
    pub fn evaluate(
        &self,
        model: &dyn GenerativeEndpoint,
        image: &ImageAsset,
        credential: &str,
    ) -> Result<ValidationVerdict, GateFailure> {
        let reply = model
            .generate(&self.instruction(), image, credential)
            .map_err(GateFailure::Endpoint)?;
        let stripped = strip_code_fences(&reply);
        let parsed: Value = serde_json::from_str(&stripped).map_err(|err| {
            GateFailure::UnparseableReply {
                detail: format!("{err}: {}", truncate_text(&stripped, 256)),
            }
        })?;
        let Some(flag) = parsed.get(&self.flag_field).and_then(Value::as_bool) else {
            return Err(GateFailure::MissingVerdictField {
                field: self.flag_field.clone(),
            });
        };
        let reason = parsed
            .get("reason")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                if flag {
                    format!("The image shows {}.", self.subject)
                } else {
                    format!("The image does not clearly show {}.", self.subject)
                }
            });
        Ok(if flag {
            ValidationVerdict::accepted(reason)
        } else {
            ValidationVerdict::rejected(reason)
        })
    }

    /// Fail-closed wrapper: any [`GateFailure`] becomes a rejected verdict
    /// with a generic reason; the detail is only logged.
    pub fn validate(
        &self,
        model: &dyn GenerativeEndpoint,
        image: &ImageAsset,
        credential: &str,
    ) -> ValidationVerdict {
        match self.evaluate(model, image, credential) {
            Ok(verdict) => verdict,
            Err(failure) => {
                log::warn!("subject gate fail-closed: {failure:?}");
                ValidationVerdict::rejected(format!(
                    "The image could not be verified as {}. \
                     Please upload a clearer picture.",
                    self.subject
                ))
            }
        }
    }
}

fn advisory_instruction(prediction: &Prediction) -> String {
    format!(
        "An AI system analyzed an image of crop leaves and identified the disease as \
         {label} with a confidence of {confidence:.2}%.\n\n\
         Provide a structured, farmer-friendly advisory report covering:\n\
         - Visible signs and symptoms\n\
         - Cause of the disease\n\
         - How it spreads\n\
         - Symptoms at different stages\n\
         - Preventive measures suitable for African farmers\n\
         - Practical control or treatment actions\n\
         - What farmers should monitor in the future\n\n\
         Do NOT use conversational language or self-references.",
        label = prediction.label,
        confidence = prediction.confidence,
    )
}

pub fn compose_advisory(
    model: &dyn GenerativeEndpoint,
    image: &ImageAsset,
    prediction: &Prediction,
    credential: &str,
) -> Result<Advisory, AdvisoryFailure> {
    let reply = model
        .generate(&advisory_instruction(prediction), image, credential)
        .map_err(AdvisoryFailure::Endpoint)?;
    let text = reply.trim();
    if text.is_empty() {
        return Err(AdvisoryFailure::EmptyReply);
    }
    Ok(Advisory::generated(text))
}

/// Best-effort wrapper: the advisory never blocks the primary deliverable,
/// so every failure collapses into the fixed fallback text.
pub fn request_advisory(
    model: &dyn GenerativeEndpoint,
    image: &ImageAsset,
    prediction: &Prediction,
    credential: &str,
) -> Advisory {
    compose_advisory(model, image, prediction, credential).unwrap_or_else(|failure| {
        log::warn!("advisory generation fell back: {failure:?}");
        Advisory::fallback()
    })
}

pub struct PipelineRequest {
    pub image: ImageAsset,
    pub classifier_credential: String,
    pub generative_credential: String,
}

/// Sequences gate -> classifier -> advisory. Stateless across invocations.
pub struct Pipeline<'a> {
    classifier: &'a dyn ClassifierEndpoint,
    generative: &'a dyn GenerativeEndpoint,
    gate: Option<SubjectGate>,
}

impl<'a> Pipeline<'a> {
    pub fn new(classifier: &'a dyn ClassifierEndpoint, generative: &'a dyn GenerativeEndpoint) -> Self {
        Self {
            classifier,
            generative,
            gate: None,
        }
    }

    pub fn with_gate(mut self, gate: SubjectGate) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Input errors abort before any network call; a rejected gate or a
    /// classifier failure short-circuits; an advisory failure never does.
    pub fn run(&self, request: PipelineRequest) -> Result<PipelineResult, InputError> {
        if request.image.is_empty() {
            return Err(InputError::MissingImage);
        }
        if request.classifier_credential.trim().is_empty() {
            return Err(InputError::MissingCredential("classifier"));
        }
        if request.generative_credential.trim().is_empty() {
            return Err(InputError::MissingCredential("generative"));
        }

        let meta = ImageMeta::of(&request.image);

        let verdict = self.gate.as_ref().map(|gate| {
            gate.validate(
                self.generative,
                &request.image,
                &request.generative_credential,
            )
        });
        if let Some(verdict) = &verdict {
            if !verdict.accepted {
                return Ok(PipelineResult::rejected(meta, verdict.clone()));
            }
        }

        let prediction = match self
            .classifier
            .classify(&request.image, &request.classifier_credential)
        {
            Ok(prediction) => prediction,
            Err(failure) => {
                log::warn!("classification failed: {}", failure.detail);
                return Ok(PipelineResult::classifier_failed(
                    meta,
                    verdict,
                    failure.user_message,
                ));
            }
        };

        let advisory = request_advisory(
            self.generative,
            &request.image,
            &prediction,
            &request.generative_credential,
        );
        Ok(PipelineResult::ok(meta, verdict, prediction, advisory))
    }
}

fn transport_detail(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {err}")
    } else {
        err.to_string()
    }
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest);
    let body = rest.strip_suffix("```").unwrap_or(rest);
    body.trim().to_string()
}
