use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

use super::{BackendReview, ReviewBackend};
use crate::error::{Error, Result};

const REVIEW_PROMPT: &str = r#"You are an academic reviewer evaluating a research paper. Write your review in third person,
starting with "The reviewer has evaluated this paper based on the given criteria and arrived
at the following conclusions:"

Evaluate each criterion from 0-100%:

1. Methodology (20% of total): Evaluate the research methodology, experimental design, and validation
2. Novelty (20% of total): Assess the innovation and original contribution to the field
3. Technical Depth (15% of total): Examine technical accuracy, depth of analysis, and rigor
4. Clarity (15% of total): Evaluate writing quality, organization, and presentation
5. Literature Review (15% of total): Assess coverage and understanding of related work
6. Impact (15% of total): Consider potential influence on the field and practical applications

For each criterion, the reviewer should:
- Begin with positive aspects before addressing issues
- Provide constructive suggestions for improvement
- Assign a percentage score (aim to be generous in assessment)
- Highlight strengths more prominently than weaknesses
- Be generous in scoring - when in doubt, round up not down

The reviewer will calculate the weighted final score based on the criteria weights.

Recommendation threshold (more lenient standards):
- Accept (>60%): Good paper that contributes to the field
- Accept with Minor Revision (50-60%): Promising work needing minor improvements
- Accept with Major Revision (40-50%): Valuable contribution requiring significant changes
- Reject (<40%): Does not meet basic publication standards

IMPORTANT: The conference values inclusivity and diverse perspectives. Papers should generally
be accepted unless there are serious, unfixable flaws. The default stance should be acceptance rather than rejection.

The review concludes with:
1. Final weighted score
2. Summary of major strengths first, then minor weaknesses
3. Constructive suggestions for improvement
4. End with one of these exact phrases on a new line:
   - "FINAL DECISION: **ACCEPTED**"
   - "FINAL DECISION: **ACCEPTED WITH MINOR REVISION REQUIRED**"
   - "FINAL DECISION: **ACCEPTED WITH MAJOR REVISION REQUIRED**"
   - "FINAL DECISION: **REJECTED**"

Always maintain third-person perspective throughout the review."#;

// Ordered by preference; the agent falls down the list on rate limits and
// retired model ids.
const CLAUDE_MODELS: &[&str] = &[
    "claude-3-5-sonnet-20240620",
    "claude-3-opus-20240229",
    "claude-3-sonnet-20240229",
    "claude-3-haiku-20240307",
];

const MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClaudeApiError {
    message: Option<String>,
}

/// Reviewer backend speaking the Anthropic messages API.
pub struct ClaudeAgent {
    client: Client,
    api_key: String,
}

impl ClaudeAgent {
    pub fn new(api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, api_key })
    }

    async fn call_model(&self, model: &str, paper_text: &str) -> Result<String> {
        let body = ClaudeRequest {
            model: model.to_string(),
            max_tokens: 4000,
            system: REVIEW_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: paper_text.to_string(),
            }],
        };

        let response = self
            .client
            .post(MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Backend(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Backend(format!("response read failed: {e}")))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ClaudeApiError>(&text)
                .ok()
                .and_then(|e| e.message)
                .unwrap_or(text);
            return Err(Error::Backend(format!("{status}: {message}")));
        }

        let parsed: ClaudeResponse = serde_json::from_str(&text)
            .map_err(|e| Error::Backend(format!("parse error: {e}")))?;

        parsed
            .content
            .first()
            .and_then(|block| block.text.clone())
            .ok_or_else(|| Error::Backend("no text in response".to_string()))
    }
}

#[async_trait]
impl ReviewBackend for ClaudeAgent {
    async fn review_paper(&self, paper_text: &str) -> Result<BackendReview> {
        let max_retries = 3;
        let mut model_index = 0;
        let mut retry_count = 0;
        let mut backoff = 2u64;

        loop {
            let model = CLAUDE_MODELS[model_index];
            info!(
                "Generating review with model {} (paper length: {} chars)",
                model,
                paper_text.len()
            );

            match self.call_model(model, paper_text).await {
                Ok(text) => {
                    info!("Successfully generated review with model {}", model);
                    return Ok(BackendReview {
                        text,
                        model: model.to_string(),
                    });
                }
                Err(e) => {
                    let msg = e.to_string();
                    // Rate-limited or retired model: fall to the next one.
                    if (msg.contains("429") || msg.contains("404"))
                        && model_index < CLAUDE_MODELS.len() - 1
                    {
                        warn!("Model {} unavailable ({}), falling back", model, msg);
                        model_index += 1;
                        retry_count = 0;
                        continue;
                    }

                    if retry_count >= max_retries {
                        return Err(Error::Backend(format!(
                            "AI service error after {max_retries} attempts: {msg}"
                        )));
                    }

                    warn!("Review attempt failed ({}), retrying in {}s", msg, backoff);
                    retry_count += 1;
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff *= 2;
                }
            }
        }
    }
}
