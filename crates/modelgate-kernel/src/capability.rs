//! Capability-tagged request/response variants.
//!
//! Design Note (spec §9): duck-typed request dictionaries are replaced by an
//! explicit, capability-tagged variant per request kind. Decoding is total:
//! malformed input produces [`DispatchError::InvalidRequest`] carrying the
//! offending field path rather than panicking deep in a handler.

use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use unicode_normalization::UnicodeNormalization;

/// The kind of work a backend can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    LlmCompletion,
    LlmChat,
    VisionAnalyze,
    NlpAnalyze,
    DataProcess,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::LlmCompletion => "llm_completion",
            Capability::LlmChat => "llm_chat",
            Capability::VisionAnalyze => "vision_analyze",
            Capability::NlpAnalyze => "nlp_analyze",
            Capability::DataProcess => "data_process",
        }
    }

    pub fn from_str_ci(s: &str) -> Option<Self> {
        match s {
            "llm_completion" => Some(Capability::LlmCompletion),
            "llm_chat" => Some(Capability::LlmChat),
            "vision_analyze" => Some(Capability::VisionAnalyze),
            "nlp_analyze" => Some(Capability::NlpAnalyze),
            "data_process" => Some(Capability::DataProcess),
            _ => None,
        }
    }

    pub fn all() -> [Capability; 5] {
        [
            Capability::LlmCompletion,
            Capability::LlmChat,
            Capability::VisionAnalyze,
            Capability::NlpAnalyze,
            Capability::DataProcess,
        ]
    }

    /// Whether requests of this capability are eligible for the batcher.
    /// Non-batchable capabilities bypass the batcher entirely (spec §4.4).
    pub fn is_batchable(&self) -> bool {
        matches!(self, Capability::LlmCompletion | Capability::LlmChat)
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────
// Per-capability request bodies
// ─────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmCompletionRequest {
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionAnalyzeRequest {
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub image_base64: Option<String>,
    pub task: String,
    #[serde(default)]
    pub options: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NlpProcessRequest {
    pub text: String,
    pub task: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataProcessRequest {
    pub operation: String,
    pub data: Value,
    #[serde(default)]
    pub options: Value,
}

/// A capability-tagged request body, decoded totally at the HTTP boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "capability", rename_all = "snake_case")]
pub enum CapabilityRequest {
    LlmCompletion(LlmCompletionRequest),
    LlmChat(LlmChatRequest),
    VisionAnalyze(VisionAnalyzeRequest),
    NlpAnalyze(NlpProcessRequest),
    DataProcess(DataProcessRequest),
}

impl CapabilityRequest {
    pub fn capability(&self) -> Capability {
        match self {
            CapabilityRequest::LlmCompletion(_) => Capability::LlmCompletion,
            CapabilityRequest::LlmChat(_) => Capability::LlmChat,
            CapabilityRequest::VisionAnalyze(_) => Capability::VisionAnalyze,
            CapabilityRequest::NlpAnalyze(_) => Capability::NlpAnalyze,
            CapabilityRequest::DataProcess(_) => Capability::DataProcess,
        }
    }

    /// Total, field-path-reporting validation run before a Job is created.
    pub fn validate(&self) -> Result<(), DispatchError> {
        match self {
            CapabilityRequest::LlmCompletion(r) => {
                if r.prompt.trim().is_empty() {
                    return Err(DispatchError::InvalidRequest("prompt: must not be empty".into()));
                }
                if let Some(t) = r.temperature {
                    if !(0.0..=2.0).contains(&t) {
                        return Err(DispatchError::InvalidRequest(
                            "temperature: must be within [0.0, 2.0]".into(),
                        ));
                    }
                }
            }
            CapabilityRequest::LlmChat(r) => {
                if r.messages.is_empty() {
                    return Err(DispatchError::InvalidRequest("messages: must not be empty".into()));
                }
                for (i, m) in r.messages.iter().enumerate() {
                    if m.content.trim().is_empty() {
                        return Err(DispatchError::InvalidRequest(format!(
                            "messages[{i}].content: must not be empty"
                        )));
                    }
                }
            }
            CapabilityRequest::VisionAnalyze(r) => {
                if r.image_url.is_none() && r.image_base64.is_none() {
                    return Err(DispatchError::InvalidRequest(
                        "image_url|image_base64: exactly one must be set".into(),
                    ));
                }
                if r.task.trim().is_empty() {
                    return Err(DispatchError::InvalidRequest("task: must not be empty".into()));
                }
            }
            CapabilityRequest::NlpAnalyze(r) => {
                if r.text.trim().is_empty() {
                    return Err(DispatchError::InvalidRequest("text: must not be empty".into()));
                }
                if r.task.trim().is_empty() {
                    return Err(DispatchError::InvalidRequest("task: must not be empty".into()));
                }
            }
            CapabilityRequest::DataProcess(r) => {
                if r.operation.trim().is_empty() {
                    return Err(DispatchError::InvalidRequest("operation: must not be empty".into()));
                }
            }
        }
        Ok(())
    }

    /// Whether this *particular* request is pure (stable under replay, no
    /// client-observable side effect) and therefore eligible for caching and
    /// single-flight de-duplication.
    ///
    /// Open Question resolution (spec §9): `llm_completion`/`llm_chat` with
    /// `temperature > 0` is non-deterministic and therefore non-pure unless
    /// the caller explicitly opted in with `allow_cache=true` — that opt-in
    /// is applied by the dispatcher, not here; this method reports the
    /// capability-intrinsic default.
    pub fn is_pure_by_default(&self) -> bool {
        match self {
            CapabilityRequest::LlmCompletion(r) => r.temperature.unwrap_or(0.0) == 0.0,
            CapabilityRequest::LlmChat(r) => r.temperature.unwrap_or(0.0) == 0.0,
            CapabilityRequest::VisionAnalyze(_) => true,
            CapabilityRequest::NlpAnalyze(_) => true,
            CapabilityRequest::DataProcess(_) => true,
        }
    }

    /// The bucket key used by the batcher: the subset of parameters that
    /// must be identical for two Jobs to share a backend call (spec §4.4).
    pub fn bucket_key(&self) -> String {
        match self {
            CapabilityRequest::LlmCompletion(r) => format!(
                "{}|{}",
                r.model.as_deref().unwrap_or("default"),
                temperature_tier(r.temperature)
            ),
            CapabilityRequest::LlmChat(r) => format!(
                "{}|{}",
                r.model.as_deref().unwrap_or("default"),
                temperature_tier(r.temperature)
            ),
            _ => "default".to_string(),
        }
    }

    /// Canonical, normalized key/value pairs used to build the cache
    /// fingerprint: stable field order, trimmed/NFC text, quantized floats.
    pub fn canonical_fields(&self) -> BTreeMap<String, String> {
        let mut m = BTreeMap::new();
        match self {
            CapabilityRequest::LlmCompletion(r) => {
                m.insert("prompt".into(), normalize_text(&r.prompt));
                m.insert("model".into(), r.model.clone().unwrap_or_default());
                m.insert(
                    "temperature".into(),
                    quantize(r.temperature.unwrap_or(0.0)),
                );
                if let Some(mt) = r.max_tokens {
                    m.insert("max_tokens".into(), mt.to_string());
                }
            }
            CapabilityRequest::LlmChat(r) => {
                for (i, msg) in r.messages.iter().enumerate() {
                    m.insert(format!("msg[{i}].role"), msg.role.clone());
                    m.insert(format!("msg[{i}].content"), normalize_text(&msg.content));
                }
                m.insert("model".into(), r.model.clone().unwrap_or_default());
                m.insert(
                    "temperature".into(),
                    quantize(r.temperature.unwrap_or(0.0)),
                );
            }
            CapabilityRequest::VisionAnalyze(r) => {
                m.insert(
                    "image".into(),
                    r.image_url.clone().or_else(|| r.image_base64.clone()).unwrap_or_default(),
                );
                m.insert("task".into(), normalize_text(&r.task));
            }
            CapabilityRequest::NlpAnalyze(r) => {
                m.insert("text".into(), normalize_text(&r.text));
                m.insert("task".into(), normalize_text(&r.task));
            }
            CapabilityRequest::DataProcess(r) => {
                m.insert("operation".into(), normalize_text(&r.operation));
                m.insert("data".into(), r.data.to_string());
            }
        }
        m
    }
}

/// Trim trailing whitespace and apply Unicode NFC normalization so
/// semantically equivalent prompts collide under fingerprinting.
pub fn normalize_text(s: &str) -> String {
    s.trim_end().nfc().collect::<String>()
}

/// Quantize a floating-point parameter to a fixed precision so that e.g.
/// `0.70000001` and `0.7` collide.
pub fn quantize(v: f64) -> String {
    format!("{:.3}", v)
}

fn temperature_tier(t: Option<f64>) -> &'static str {
    match t.unwrap_or(0.0) {
        x if x <= 0.0 => "deterministic",
        x if x < 1.0 => "low",
        _ => "high",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_prompt() {
        let r = CapabilityRequest::LlmCompletion(LlmCompletionRequest {
            prompt: "   ".into(),
            max_tokens: None,
            temperature: None,
            model: None,
        });
        assert!(r.validate().is_err());
    }

    #[test]
    fn canonical_fields_normalize_whitespace() {
        let a = CapabilityRequest::LlmCompletion(LlmCompletionRequest {
            prompt: "hello   \n".into(),
            max_tokens: None,
            temperature: Some(0.0),
            model: None,
        });
        let b = CapabilityRequest::LlmCompletion(LlmCompletionRequest {
            prompt: "hello".into(),
            max_tokens: None,
            temperature: Some(0.0000001),
            model: None,
        });
        assert_eq!(a.canonical_fields()["prompt"], b.canonical_fields()["prompt"]);
        assert_eq!(a.canonical_fields()["temperature"], b.canonical_fields()["temperature"]);
    }

    #[test]
    fn nonzero_temperature_is_not_pure_by_default() {
        let r = CapabilityRequest::LlmCompletion(LlmCompletionRequest {
            prompt: "hi".into(),
            max_tokens: None,
            temperature: Some(0.7),
            model: None,
        });
        assert!(!r.is_pure_by_default());
    }
}
