/// Automated first responder for support chat.
///
/// A message only reaches the language model when it mentions one of the
/// admission keywords. The model is grounded with the course catalog and a
/// fixed instruction keeping it on admission topics.

use crate::config::GeminiSettings;
use crate::db::models::Course;
use crate::error::{AppError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

pub const ADMISSION_KEYWORDS: [&str; 10] = [
    "admission",
    "course",
    "fees",
    "faculty",
    "scholarship",
    "eligibility",
    "application",
    "documents",
    "deadline",
    "qualification",
];

/// Stored instead of an empty model reply.
pub const EMPTY_REPLY_FALLBACK: &str = "I couldn't generate a response. Please try again.";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

pub fn is_admission_topic(message: &str) -> bool {
    let lower = message.to_lowercase();
    ADMISSION_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

fn or_dash(value: &Option<String>) -> &str {
    value.as_deref().filter(|v| !v.is_empty()).unwrap_or("-")
}

pub fn build_system_instruction(courses: &[Course]) -> String {
    let catalog = courses
        .iter()
        .map(|course| {
            format!(
                "Course: {} ({})\nDegree: {}\nDuration: {}\nDescription: {}",
                course.name,
                course.code,
                or_dash(&course.degree),
                or_dash(&course.duration),
                or_dash(&course.description)
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "You are a helpful college admission advisor. You help prospective students with \
         questions about the admissions process, courses and programs, fees, faculty, \
         scholarships, eligibility requirements and application procedures.\n\n\
         Rules:\n\
         1. Only answer questions about admissions, courses, fees, faculty and scholarships.\n\
         2. Politely decline anything else and steer back to admission topics.\n\
         3. Use the course information below for accurate answers.\n\
         4. Keep answers to two or three sentences.\n\
         5. If you do not know, suggest contacting the admission office.\n\n\
         COLLEGE COURSES:\n{}",
        if catalog.is_empty() {
            "(no courses published yet)".to_string()
        } else {
            catalog
        }
    )
}

#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate_reply(&self, system_instruction: &str, message: &str) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
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

impl GenerateContentResponse {
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

/// Google Generative Language API client (`models/{model}:generateContent`).
pub struct GeminiReplyGenerator {
    http_client: reqwest::Client,
    settings: GeminiSettings,
}

impl GeminiReplyGenerator {
    pub fn new(settings: GeminiSettings) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                log::error!("Failed to create HTTP client for Gemini, using default: {}", e);
                reqwest::Client::default()
            });

        GeminiReplyGenerator {
            http_client,
            settings,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.settings.base_url, self.settings.model
        )
    }
}

#[async_trait]
impl ReplyGenerator for GeminiReplyGenerator {
    async fn generate_reply(&self, system_instruction: &str, message: &str) -> Result<String> {
        let body = json!({
            "systemInstruction": { "parts": [{ "text": system_instruction }] },
            "contents": [{ "role": "user", "parts": [{ "text": message }] }]
        });

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.settings.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::Upstream(format!(
                "Gemini returned {}: {}",
                status, error_text
            )));
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse Gemini response: {}", e)))?;

        Ok(parsed.text())
    }
}

/// Used when no API key is configured.
pub struct DisabledReplyGenerator;

#[async_trait]
impl ReplyGenerator for DisabledReplyGenerator {
    async fn generate_reply(&self, _system_instruction: &str, _message: &str) -> Result<String> {
        Err(AppError::Upstream("language model not configured".to_string()))
    }
}
