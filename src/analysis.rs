//! Client for the hosted model that transcribes and evaluates a recorded
//! session.
//!
//! The service takes one audio payload as a base64 data URI and answers with
//! `{ transcript, evaluation }`. Both fields are required.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;

use crate::config::AnalysisConfig;
use crate::models::SessionReport;
use crate::session::AudioPayload;

const ANALYSIS_PROMPT: &str = r#"You are an expert English teacher's assistant. Your task is to analyze an audio recording of a teaching session between a teacher and a student. Your goal is to create a detailed "study guide" from the conversation.

First, transcribe the entire conversation accurately. Label the speakers as "Teacher:" and "Student:".

Second, using the transcript, generate a comprehensive study guide under the title "Organizing the contents of the class". The guide is for the student to review what they learned. Keep it well-structured and easy to read, and focus on the core concepts rather than repeating the transcript. Include these sections:
1. **Learning Topic**: the main topic of the lesson.
2. **Key Concepts**: the rules or concepts the teacher explained, synthesized into clear points.
3. **Q&A Breakdown**: for each question the teacher asked, state the question, the student's answer, whether it was correct, a short analysis of why, and a better alternative when the answer could be improved.

Respond with JSON containing a "transcript" field and an "evaluation" field holding the study guide."#;

/// Errors from the analysis service layer.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The model API returned a non-2xx status code.
    #[error("analysis API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The response did not contain the structured output we asked for.
    #[error("malformed analysis response: {0}")]
    Malformed(String),

    /// One of the required fields was missing or empty.
    #[error("analysis response is missing {0}")]
    Incomplete(&'static str),
}

#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn analyze(&self, payload: &AudioPayload) -> Result<SessionReport, AnalysisError>;
}

pub fn to_data_uri(payload: &AudioPayload) -> String {
    format!(
        "data:{};base64,{}",
        payload.mime_type,
        STANDARD.encode(&payload.bytes)
    )
}

/// Splits `data:<mime>;base64,<data>` into its MIME type and encoded body.
pub fn split_data_uri(uri: &str) -> Option<(&str, &str)> {
    let rest = uri.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    if mime_type.is_empty() {
        return None;
    }
    Some((mime_type, data))
}

#[derive(Debug, Deserialize)]
struct AnalysisOutput {
    transcript: Option<String>,
    evaluation: Option<String>,
}

/// Checks the model's JSON text against the `{ transcript, evaluation }`
/// contract.
pub fn parse_output(text: &str) -> Result<SessionReport, AnalysisError> {
    let output: AnalysisOutput =
        serde_json::from_str(text).map_err(|e| AnalysisError::Malformed(e.to_string()))?;

    let transcript = output
        .transcript
        .filter(|value| !value.trim().is_empty())
        .ok_or(AnalysisError::Incomplete("transcript"))?;
    let evaluation = output
        .evaluation
        .filter(|value| !value.trim().is_empty())
        .ok_or(AnalysisError::Incomplete("evaluation"))?;

    Ok(SessionReport {
        transcript,
        evaluation,
    })
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

fn first_text(response: GenerateResponse) -> Option<String> {
    response
        .candidates
        .into_iter()
        .filter_map(|candidate| candidate.content)
        .flat_map(|content| content.parts)
        .find_map(|part| part.text)
}

/// HTTP client for the Gemini `generateContent` endpoint.
pub struct GeminiAnalysis {
    client: reqwest::Client,
    config: AnalysisConfig,
}

impl GeminiAnalysis {
    pub fn new(config: AnalysisConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn request_body(data_uri: &str) -> Result<serde_json::Value, AnalysisError> {
        let (mime_type, data) = split_data_uri(data_uri)
            .ok_or_else(|| AnalysisError::Malformed("audio payload is not a data URI".into()))?;

        Ok(serde_json::json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": ANALYSIS_PROMPT },
                    { "inline_data": { "mime_type": mime_type, "data": data } }
                ]
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "transcript": { "type": "STRING" },
                        "evaluation": { "type": "STRING" }
                    },
                    "required": ["transcript", "evaluation"]
                }
            }
        }))
    }
}

#[async_trait]
impl AnalysisService for GeminiAnalysis {
    async fn analyze(&self, payload: &AudioPayload) -> Result<SessionReport, AnalysisError> {
        let data_uri = to_data_uri(payload);
        let body = Self::request_body(&data_uri)?;
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        );

        tracing::info!(
            model = %self.config.model,
            payload_bytes = payload.bytes.len(),
            "submitting session for analysis"
        );

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AnalysisError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let generated: GenerateResponse = response.json().await?;
        let text = first_text(generated)
            .ok_or_else(|| AnalysisError::Malformed("model returned no output".into()))?;
        parse_output(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn data_uri_round_trips_through_split() {
        let payload = AudioPayload {
            mime_type: "audio/webm".to_string(),
            bytes: b"hello".to_vec(),
        };
        let uri = to_data_uri(&payload);
        assert_eq!(uri, "data:audio/webm;base64,aGVsbG8=");
        assert_eq!(split_data_uri(&uri), Some(("audio/webm", "aGVsbG8=")));
    }

    #[test]
    fn split_rejects_non_base64_uris() {
        assert_eq!(split_data_uri("data:audio/webm,raw"), None);
        assert_eq!(split_data_uri("https://example.com/a.webm"), None);
        assert_eq!(split_data_uri("data:;base64,AAAA"), None);
    }

    #[test]
    fn output_requires_both_fields() {
        let report = parse_output(r#"{"transcript":"T","evaluation":"E"}"#).expect("complete");
        assert_eq!(report.transcript, "T");
        assert_eq!(report.evaluation, "E");

        assert_matches!(
            parse_output(r#"{"transcript":"T"}"#),
            Err(AnalysisError::Incomplete("evaluation"))
        );
        assert_matches!(
            parse_output(r#"{"transcript":"","evaluation":"E"}"#),
            Err(AnalysisError::Incomplete("transcript"))
        );
        assert_matches!(parse_output("not json"), Err(AnalysisError::Malformed(_)));
    }

    #[test]
    fn first_text_skips_empty_candidates() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [
                { "finishReason": "SAFETY" },
                { "content": { "parts": [ { "text": "{\"transcript\":\"T\",\"evaluation\":\"E\"}" } ] } }
            ]
        }))
        .expect("valid response");
        let text = first_text(response).expect("text part");
        assert!(text.contains("transcript"));
    }

    #[test]
    fn request_body_inlines_audio() {
        let body = GeminiAnalysis::request_body("data:audio/webm;base64,AAAA").expect("body");
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[1]["inline_data"]["mime_type"], "audio/webm");
        assert_eq!(parts[1]["inline_data"]["data"], "AAAA");
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
    }
}
