// ABOUTME: Language-model classification of an ambiguous pane screen (waiting on the user vs idle)
//
// The classifier only talks to the `PaneAnalyzer` trait. `ClaudeAnalyzer`
// sends the screen excerpt to the Anthropic messages API and expects a small
// JSON object back.

use crate::agents::AgentKind;
use crate::models::{OptionChoice, PotentialHarm, WaitingPrompt};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("analyzer not configured (set ANTHROPIC_API_KEY)")]
    NotConfigured,
    #[error("analyzer request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("analyzer API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("analyzer returned malformed response: {0}")]
    Malformed(String),
    #[error("analyzer timed out")]
    Timeout,
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub agent: Option<AgentKind>,
    pub excerpt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzedState {
    Waiting,
    Idle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisVerdict {
    pub state: AnalyzedState,
    pub prompt: WaitingPrompt,
}

impl AnalysisVerdict {
    pub fn idle() -> Self {
        Self {
            state: AnalyzedState::Idle,
            prompt: WaitingPrompt::default(),
        }
    }

    pub fn waiting(prompt: WaitingPrompt) -> Self {
        Self {
            state: AnalyzedState::Waiting,
            prompt,
        }
    }
}

#[async_trait]
pub trait PaneAnalyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisVerdict, AnalyzerError>;
}

/// Used when no API key is available; every escalation resolves to idle with a visible error
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledAnalyzer;

#[async_trait]
impl PaneAnalyzer for DisabledAnalyzer {
    async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisVerdict, AnalyzerError> {
        Err(AnalyzerError::NotConfigured)
    }
}

const SYSTEM_PROMPT: &str = "You look at the bottom of a terminal running an AI coding agent \
and decide whether the agent is blocked waiting for the user or has finished and is idle. \
Answer with JSON only: {\"state\": \"waiting\" | \"idle\", \"question\": string or null, \
\"options\": [{\"action\": string, \"keys\": [string]}], \
\"potential_harm\": {\"has_risk\": bool, \"description\": string or null} or null}. \
Use tmux send-keys names for keys (e.g. \"1\", \"y\", \"Enter\"). \
Only report options that are visible on screen.";

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    state: AnalyzedState,
    question: Option<String>,
    #[serde(default)]
    options: Vec<OptionChoice>,
    potential_harm: Option<PotentialHarm>,
}

#[derive(Debug, Clone)]
pub struct ClaudeAnalyzer {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl ClaudeAnalyzer {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, AnalyzerError> {
        let client = Client::builder()
            .user_agent(concat!("panekeeper/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            max_tokens: 512,
        })
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl PaneAnalyzer for ClaudeAnalyzer {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisVerdict, AnalyzerError> {
        let agent = request
            .agent
            .map_or_else(|| "an unknown agent".to_string(), |a| a.to_string());
        let body = MessagesRequest {
            model: &self.model,
            max_tokens: self.max_tokens,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: format!(
                    "Terminal running {}:\n<terminal>\n{}\n</terminal>",
                    agent, request.excerpt
                ),
            }],
        };

        debug!("Sending {} byte excerpt to analyzer", request.excerpt.len());
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AnalyzerError::Api { status, body });
        }

        let parsed: MessagesResponse = response.json().await?;
        let text = parsed
            .content
            .first()
            .map(|c| c.text.as_str())
            .ok_or_else(|| AnalyzerError::Malformed("empty content".into()))?;
        parse_verdict(text)
    }
}

/// Extract the JSON verdict from model text, tolerating prose or code fences around it
pub fn parse_verdict(text: &str) -> Result<AnalysisVerdict, AnalyzerError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if e > s => &text[s..=e],
        _ => return Err(AnalyzerError::Malformed(truncate(text, 200))),
    };

    let raw: RawVerdict =
        serde_json::from_str(json).map_err(|e| AnalyzerError::Malformed(e.to_string()))?;

    Ok(match raw.state {
        AnalyzedState::Idle => AnalysisVerdict::idle(),
        AnalyzedState::Waiting => AnalysisVerdict::waiting(WaitingPrompt {
            question: raw.question.filter(|q| !q.trim().is_empty()),
            options: raw.options,
            potential_harm: raw.potential_harm,
        }),
    })
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
