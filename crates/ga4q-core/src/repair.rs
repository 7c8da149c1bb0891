//! Repair oracle: proposes a corrected candidate for a rejected query.
//!
//! Oracles are untrusted. Their output is parsed strictly here and
//! re-validated by the loop; a candidate never reaches the caller without
//! passing the rule engine.

use crate::error::{RepairError, ValidationError};
use crate::llm::{CompletionRequest, FinishReason, LLMProvider};
use crate::metadata::PropertyMetadata;
use crate::QueryCandidate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Everything an oracle gets to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairRequest {
    pub reason: String,
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
    pub valid_metrics: Vec<String>,
    pub valid_dimensions: Vec<String>,
}

impl RepairRequest {
    /// Vocabulary comes from the metadata of the failing pass, sorted.
    pub fn from_error(error: &ValidationError, metadata: &PropertyMetadata) -> Self {
        Self {
            reason: error.reason.clone(),
            metrics: error.metrics.clone(),
            dimensions: error.dimensions.clone(),
            valid_metrics: metadata.metric_names(),
            valid_dimensions: metadata.dimension_names(),
        }
    }
}

/// A proposed replacement candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairedCandidate {
    pub metrics: Vec<String>,
    pub dimensions: Vec<String>,
}

impl RepairedCandidate {
    pub fn into_candidate(self) -> QueryCandidate {
        QueryCandidate {
            metrics: self.metrics,
            dimensions: self.dimensions,
        }
    }
}

/// Can propose a repaired candidate.
#[async_trait]
pub trait RepairOracle: Send + Sync {
    async fn repair(&self, request: &RepairRequest) -> Result<RepairedCandidate, RepairError>;
}

/// Oracle for runs without repair: every call is a transport failure.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRepairOracle;

#[async_trait]
impl RepairOracle for NoRepairOracle {
    async fn repair(&self, _request: &RepairRequest) -> Result<RepairedCandidate, RepairError> {
        Err(RepairError::Transport("repair is disabled".to_string()))
    }
}

// ============================================================================
// Prompt
// ============================================================================

pub fn build_repair_prompt(request: &RepairRequest) -> String {
    fn list(items: &[String]) -> String {
        serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
    }

    format!(
        r#"You are an analytics report query repair agent.

The query below is INVALID.

Reason:
{reason}

Metrics:
{metrics}

Dimensions:
{dimensions}

VALID METRICS:
{valid_metrics}

VALID DIMENSIONS:
{valid_dimensions}

Rules:
- Use ONLY valid metrics and dimensions
- Ensure compatibility
- Preserve original intent
- Prefer removing invalid dimensions over changing metrics

Return STRICT JSON ONLY.

Format:
{{
  "metrics": [...],
  "dimensions": [...]
}}
"#,
        reason = request.reason,
        metrics = list(&request.metrics),
        dimensions = list(&request.dimensions),
        valid_metrics = list(&request.valid_metrics),
        valid_dimensions = list(&request.valid_dimensions),
    )
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parse an oracle's text answer into a candidate.
///
/// Accepts bare JSON or JSON embedded in prose/markdown (first balanced
/// object). Both lists must be present and hold only non-empty strings, and
/// at least one metric is required.
pub fn parse_repair_response(text: &str) -> Result<RepairedCandidate, RepairError> {
    let object = extract_json_object(text)?;
    let candidate: RepairedCandidate = serde_json::from_str(object)
        .map_err(|e| RepairError::Malformed(format!("unexpected JSON shape: {e}")))?;

    let clean = |items: Vec<String>, what: &str| -> Result<Vec<String>, RepairError> {
        items
            .into_iter()
            .map(|s| {
                let s = s.trim().to_string();
                if s.is_empty() {
                    Err(RepairError::Malformed(format!("empty {what} name")))
                } else {
                    Ok(s)
                }
            })
            .collect()
    };

    let metrics = clean(candidate.metrics, "metric")?;
    let dimensions = clean(candidate.dimensions, "dimension")?;
    if metrics.is_empty() {
        return Err(RepairError::Malformed("no metrics proposed".to_string()));
    }

    Ok(RepairedCandidate {
        metrics,
        dimensions,
    })
}

fn extract_json_object(text: &str) -> Result<&str, RepairError> {
    let trimmed = text.trim();
    let Some(start) = trimmed.find('{') else {
        return Err(RepairError::Malformed("no JSON object found".to_string()));
    };

    // Brace balancing outside strings; rfind('}') can land on an inner brace.
    let mut depth: i64 = 0;
    let mut in_string = false;
    let mut escape = false;

    for (idx, ch) in trimmed.char_indices().skip_while(|(i, _)| *i < start) {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            match ch {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(&trimmed[start..=idx]);
                }
            }
            _ => {}
        }
    }

    Err(RepairError::Malformed("unterminated JSON object".to_string()))
}

// ============================================================================
// LLM-backed oracle
// ============================================================================

const REPAIR_SYSTEM_PROMPT: &str =
    "You repair analytics report queries. Reply with one JSON object and nothing else.";

/// Repair through any chat-completion backend.
///
/// JSON mode is requested only from backends that support it. A reply cut
/// short by the backend counts as malformed, even if it happens to parse.
pub struct LlmRepairOracle<P> {
    provider: P,
}

impl<P: LLMProvider> LlmRepairOracle<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: LLMProvider> RepairOracle for LlmRepairOracle<P> {
    async fn repair(&self, request: &RepairRequest) -> Result<RepairedCandidate, RepairError> {
        let info = self.provider.model_info();
        tracing::debug!(model = %info.name, reason = %request.reason, "requesting query repair");

        let mut completion = CompletionRequest::json_prompt(build_repair_prompt(request))
            .with_system(REPAIR_SYSTEM_PROMPT);
        completion.json_mode = info.supports_json_mode;

        let response = self
            .provider
            .complete(completion)
            .await
            .map_err(|e| {
                if e.is_bad_output() {
                    RepairError::Malformed(e.to_string())
                } else {
                    RepairError::Transport(e.to_string())
                }
            })?;

        tracing::debug!(
            model = %response.model,
            prompt_tokens = response.usage.prompt_tokens,
            completion_tokens = response.usage.completion_tokens,
            "repair response received"
        );
        if response.finish_reason != FinishReason::Stop {
            return Err(RepairError::Malformed(format!(
                "response ended early ({:?})",
                response.finish_reason
            )));
        }

        parse_repair_response(&response.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionResponse, LLMError, ModelInfo, Role, Usage};
    use crate::metadata::ScopeTag;
    use parking_lot::Mutex;

    fn request() -> RepairRequest {
        let meta = PropertyMetadata::new()
            .with_metric("sessions", ScopeTag::Session)
            .with_metric("eventCount", ScopeTag::Event)
            .with_dimension("eventName")
            .with_dimension("date");
        let err = ValidationError::new(
            "Session metrics cannot be broken down by event dimensions",
            &["sessions".to_string()],
            &["eventName".to_string()],
        );
        RepairRequest::from_error(&err, &meta)
    }

    #[test]
    fn request_carries_sorted_vocabulary() {
        let req = request();
        assert_eq!(req.valid_metrics, vec!["eventCount", "sessions"]);
        assert_eq!(req.valid_dimensions, vec!["date", "eventName"]);
        assert_eq!(req.metrics, vec!["sessions"]);
    }

    #[test]
    fn prompt_mentions_reason_and_vocabulary() {
        let prompt = build_repair_prompt(&request());
        assert!(prompt.contains("event dimensions"));
        assert!(prompt.contains(r#"["eventCount","sessions"]"#));
        assert!(prompt.contains(r#"["date","eventName"]"#));
        assert!(prompt.contains("Prefer removing invalid dimensions"));
    }

    #[test]
    fn parses_bare_json() {
        let c = parse_repair_response(r#"{"metrics": ["sessions"], "dimensions": ["date"]}"#)
            .unwrap();
        assert_eq!(c.metrics, vec!["sessions"]);
        assert_eq!(c.dimensions, vec!["date"]);
    }

    #[test]
    fn parses_json_wrapped_in_markdown() {
        let text = "Sure! Here you go:\n```json\n{\"metrics\": [\" sessions \"], \"dimensions\": [], \"note\": \"dropped {eventName}\"}\n```\nDone.";
        let c = parse_repair_response(text).unwrap();
        assert_eq!(c.metrics, vec!["sessions"]);
        assert!(c.dimensions.is_empty());
    }

    #[test]
    fn rejects_unusable_output() {
        for text in [
            "I cannot help with that.",
            r#"{"metrics": ["sessions"]"#,
            r#"{"metrics": ["sessions"]}"#,
            r#"{"metrics": "sessions", "dimensions": []}"#,
            r#"{"metrics": [1, 2], "dimensions": []}"#,
            r#"{"metrics": [], "dimensions": ["date"]}"#,
            r#"{"metrics": ["  "], "dimensions": []}"#,
            r#"["sessions"]"#,
        ] {
            assert!(
                matches!(parse_repair_response(text), Err(RepairError::Malformed(_))),
                "accepted: {text}"
            );
        }
    }

    struct ScriptedLlm {
        replies: Mutex<Vec<Result<String, LLMError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<String, LLMError>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMProvider for ScriptedLlm {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LLMError> {
            let prompt = request.messages.last().map(|m| m.content.clone());
            self.prompts.lock().push(prompt.unwrap_or_default());
            let reply = self.replies.lock().remove(0)?;
            Ok(CompletionResponse {
                content: reply,
                finish_reason: FinishReason::Stop,
                usage: Usage::default(),
                model: "scripted".to_string(),
            })
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                name: "scripted".to_string(),
                supports_json_mode: true,
            }
        }
    }

    #[tokio::test]
    async fn llm_oracle_maps_outcomes() {
        let oracle = LlmRepairOracle::new(ScriptedLlm::new(vec![
            Ok(r#"{"metrics": ["sessions"], "dimensions": ["date"]}"#.to_string()),
            Ok("no idea".to_string()),
            Err(LLMError::InvalidResponse("missing content".into())),
            Err(LLMError::Network("connection refused".into())),
        ]));
        let req = request();

        let fixed = oracle.repair(&req).await.unwrap();
        assert_eq!(fixed.dimensions, vec!["date"]);

        assert!(matches!(oracle.repair(&req).await, Err(RepairError::Malformed(_))));
        assert!(matches!(oracle.repair(&req).await, Err(RepairError::Malformed(_))));
        assert!(matches!(oracle.repair(&req).await, Err(RepairError::Transport(_))));

        let prompts = oracle.provider.prompts.lock();
        assert_eq!(prompts.len(), 4);
        assert!(prompts[0].contains("Session metrics"));
    }

    struct TruncatingLlm {
        seen: Mutex<Vec<CompletionRequest>>,
    }

    #[async_trait]
    impl LLMProvider for TruncatingLlm {
        async fn complete(
            &self,
            request: CompletionRequest,
        ) -> Result<CompletionResponse, LLMError> {
            self.seen.lock().push(request);
            Ok(CompletionResponse {
                content: r#"{"metrics": ["sessions"], "dimensions": ["date"]}"#.to_string(),
                finish_reason: FinishReason::Length,
                usage: Usage::default(),
                model: "local".to_string(),
            })
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                name: "local".to_string(),
                supports_json_mode: false,
            }
        }
    }

    #[tokio::test]
    async fn truncated_reply_is_malformed() {
        let oracle = LlmRepairOracle::new(TruncatingLlm {
            seen: Mutex::new(Vec::new()),
        });

        assert!(matches!(
            oracle.repair(&request()).await,
            Err(RepairError::Malformed(_))
        ));

        let seen = oracle.provider.seen.lock();
        assert!(!seen[0].json_mode);
        assert_eq!(seen[0].messages[0].role, Role::System);
        assert!(seen[0].messages[1].content.contains("VALID METRICS"));
    }

    #[tokio::test]
    async fn no_repair_oracle_always_fails() {
        assert!(matches!(
            NoRepairOracle.repair(&request()).await,
            Err(RepairError::Transport(_))
        ));
    }
}
