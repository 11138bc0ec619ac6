use std::env;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use valley_contracts::jobs::{Attribution, ImageRef, TransformOutput};

use super::{StyleTransformer, TransformRequest};
use crate::error::truncate_text;

const DEFAULT_TIMEOUT_S: f64 = 120.0;

#[derive(Debug, Clone, PartialEq)]
pub struct HttpTransformerConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

impl HttpTransformerConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            timeout: Duration::from_secs_f64(DEFAULT_TIMEOUT_S),
        }
    }

    /// `None` when `VALLEY_TRANSFORM_ENDPOINT` is unset.
    pub fn from_env() -> Result<Option<Self>> {
        let Some(endpoint) = non_empty_env("VALLEY_TRANSFORM_ENDPOINT") else {
            return Ok(None);
        };
        Ok(Some(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: non_empty_env("VALLEY_TRANSFORM_API_KEY"),
            timeout: timeout_from_value(non_empty_env("VALLEY_TRANSFORM_TIMEOUT").as_deref())?,
        }))
    }
}

/// Seconds, clamped to 10..=600. Non-finite values are refused.
fn timeout_from_value(raw: Option<&str>) -> Result<Duration> {
    let Some(raw) = raw else {
        return Ok(Duration::from_secs_f64(DEFAULT_TIMEOUT_S));
    };
    let seconds = raw
        .parse::<f64>()
        .with_context(|| format!("VALLEY_TRANSFORM_TIMEOUT is not a number: {raw}"))?;
    if !seconds.is_finite() {
        bail!("VALLEY_TRANSFORM_TIMEOUT must be a finite number of seconds: {raw}");
    }
    Ok(Duration::from_secs_f64(seconds.clamp(10.0, 600.0)))
}

/// Posts the photo to a remote style-transfer endpoint.
///
/// Request body: `{ image, mimeType, selectedStyle }` with the photo base64
/// encoded. The endpoint answers with either `resultUrl` or a base64 `image`,
/// plus optional `aiSelectedArtist` / `selected_work`.
pub struct HttpTransformer {
    config: HttpTransformerConfig,
    http: HttpClient,
}

impl HttpTransformer {
    pub fn new(config: HttpTransformerConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.timeout)
            .build()
            .context("failed building http client")?;
        Ok(Self { config, http })
    }
}

impl StyleTransformer for HttpTransformer {
    fn name(&self) -> &str {
        "http"
    }

    fn transform(&self, request: &TransformRequest) -> Result<TransformOutput> {
        let payload = json!({
            "image": BASE64.encode(request.photo.bytes()),
            "mimeType": request.photo.mime(),
            "selectedStyle": request.style_id,
        });
        let mut call = self.http.post(&self.config.endpoint).json(&payload);
        if let Some(api_key) = self.config.api_key.as_deref() {
            call = call.bearer_auth(api_key);
        }
        let response = call
            .send()
            .with_context(|| format!("transform request failed ({})", self.config.endpoint))?;
        let body = response_json_or_error(response)?;
        parse_transform_response(&body)
    }
}

fn response_json_or_error(response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .context("transform response body read failed")?;
    if !status.is_success() {
        bail!("transform request failed ({code}): {}", truncate_text(&body, 512));
    }
    serde_json::from_str(&body).context("transform endpoint returned invalid JSON payload")
}

pub(crate) fn parse_transform_response(body: &Value) -> Result<TransformOutput> {
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("remote rejected the transform");
        bail!("{message}");
    }

    let url = ["resultUrl", "result_url", "url"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let image = if let Some(url) = url {
        ImageRef::Url(url.to_string())
    } else if let Some(encoded) = body.get("image").and_then(Value::as_str) {
        let data = BASE64
            .decode(encoded.trim())
            .context("transform image is not valid base64")?;
        let mime = body
            .get("mimeType")
            .and_then(Value::as_str)
            .unwrap_or("image/png");
        ImageRef::inline(mime, data)
    } else {
        bail!("transform response carried no image");
    };

    let text = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    let attribution = Attribution {
        artist: text("aiSelectedArtist"),
        work: text("selected_work"),
    };

    Ok(TransformOutput {
        image,
        attribution: (!attribution.is_empty()).then_some(attribution),
    })
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
