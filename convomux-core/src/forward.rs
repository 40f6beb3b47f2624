//! Proxy forwarder
//!
//! Forwards an intercepted call to the upstream provider: translates the
//! proxy's provider-agnostic paths into the upstream's concrete routes,
//! strips headers down to content-type in both directions, injects the
//! provider credential, and applies a narrow path-keyed content patch on
//! the way back.
//!
//! The forwarder never writes to the store. Callers record the call before
//! and after forwarding, so a failure mid-forward leaves a call row with
//! null response fields -- a deliberately observable "in-flight or failed"
//! state.

use crate::config::UpstreamConfig;
use crate::error::{Error, Result};
use crate::types::RawBody;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;

// ============================================
// Path translation and content patches
// ============================================

/// Proxy path -> upstream route suffix
const PATH_TRANSLATIONS: &[(&str, &str)] = &[
    ("api/v0/chat/completions", "/v1/chat/completions"),
    ("api/v0/models", "/v1/models"),
];

type ContentPatch = fn(&[u8]) -> Result<Vec<u8>>;

/// Proxy path -> pure transform applied to the successful response body
const CONTENT_PATCHES: &[(&str, ContentPatch)] = &[("api/v0/models", patch_models_listing)];

/// Annotate each listed model with the compatibility metadata the Letta
/// LM Studio client expects.
fn patch_models_listing(body: &[u8]) -> Result<Vec<u8>> {
    let mut data: serde_json::Value = serde_json::from_slice(body)?;
    if let Some(models) = data.get_mut("data").and_then(|d| d.as_array_mut()) {
        for model in models {
            if let Some(obj) = model.as_object_mut() {
                obj.insert("type".to_string(), serde_json::json!("llm"));
                obj.insert("compatibility_type".to_string(), serde_json::json!("gguf"));
            }
        }
    }
    Ok(serde_json::to_vec(&data)?)
}

fn content_patch(path: &str) -> Option<ContentPatch> {
    CONTENT_PATCHES
        .iter()
        .find(|(p, _)| *p == path)
        .map(|(_, patch)| *patch)
}

// ============================================
// Forwarder
// ============================================

/// Outcome of a successful forward
#[derive(Debug, Clone)]
pub struct ForwardOutcome {
    /// Upstream status code
    pub status: u16,
    /// Response body, after any content patch
    pub body: RawBody,
    /// Response content-type, the only header passed back
    pub content_type: Option<String>,
}

/// HTTP forwarder to the upstream LLM provider
pub struct Forwarder {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl Forwarder {
    /// Create a forwarder from upstream configuration.
    ///
    /// Fails if no provider credential can be resolved.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let base_url = config.base_url.trim_end_matches('/').to_string();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
            api_key,
        })
    }

    /// Translate a proxy path into the upstream's concrete URL.
    ///
    /// Fails with [`Error::UnsupportedPath`] for paths outside the table.
    pub fn translate_path(&self, path: &str) -> Result<String> {
        PATH_TRANSLATIONS
            .iter()
            .find(|(p, _)| *p == path)
            .map(|(_, suffix)| format!("{}{}", self.base_url, suffix))
            .ok_or_else(|| Error::UnsupportedPath(path.to_string()))
    }

    /// Forward one intercepted call to the upstream provider.
    ///
    /// Inbound headers are narrowed to content-type; the provider credential
    /// is injected. A non-success upstream status is an error
    /// ([`Error::UpstreamStatus`]) carrying the upstream's status and body so
    /// the caller can surface them verbatim; the call row stays unfinished.
    pub async fn forward(
        &self,
        path: &str,
        method: &str,
        headers: &[(String, String)],
        body: RawBody,
    ) -> Result<ForwardOutcome> {
        let target_url = self.translate_path(path)?;
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|e| Error::Upstream(format!("invalid method: {}", e)))?;

        let response = self
            .http_client
            .request(method, &target_url)
            .headers(self.forward_headers(headers))
            .body(body.into_string())
            .send()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Error::Upstream(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::UpstreamStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let patched = match content_patch(path) {
            Some(patch) => patch(&bytes)?,
            None => bytes.to_vec(),
        };

        Ok(ForwardOutcome {
            status: status.as_u16(),
            body: RawBody::new(String::from_utf8_lossy(&patched).into_owned()),
            content_type,
        })
    }

    /// Strip inbound headers to content-type and inject the credential
    fn forward_headers(&self, headers: &[(String, String)]) -> HeaderMap {
        let mut out = HeaderMap::new();
        for (key, value) in headers {
            if key.eq_ignore_ascii_case("content-type") {
                if let Ok(v) = HeaderValue::from_str(value) {
                    out.insert(CONTENT_TYPE, v);
                }
            }
        }
        if let Ok(auth) = HeaderValue::from_str(&format!("Bearer {}", self.api_key)) {
            out.insert(AUTHORIZATION, auth);
        }
        out
    }
}

/// Structured 501 body for unsupported paths, shaped like an OpenAI error
/// object so provider-side clients can parse it.
pub fn unsupported_path_body(path: &str) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": format!("Path translation for {} not implemented", path),
            "type": "not_implemented_error",
            "param": null,
            "code": null
        }
    })
}
