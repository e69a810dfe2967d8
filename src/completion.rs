//! Completion model clients.
//!
//! - **[`OpenAICompletion`]**: `POST /v1/chat/completions` with
//!   `response_format = json_object` on the grounded path.
//! - **[`ExtractiveCompletion`]**: no model at all; answers with the best
//!   excerpt verbatim and cites every context. General chat is rejected.
//! - **[`DisabledCompletion`]**: rejects every request.

use std::sync::Arc;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;

use marble_core::completion::{
    grounded_prompt, parse_model_answer, CompletionModel, ModelAnswer, GENERAL_SYSTEM_PROMPT,
    GROUNDED_SYSTEM_PROMPT,
};
use marble_core::error::{Error, Result, Service};
use marble_core::models::{Citation, SourceContext};

use crate::config::CompletionConfig;
use crate::http_retry::{client, send_json};

pub fn create_completion(config: &CompletionConfig) -> anyhow::Result<Arc<dyn CompletionModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledCompletion)),
        "extractive" => Ok(Arc::new(ExtractiveCompletion)),
        "openai" => Ok(Arc::new(OpenAICompletion::new(config)?)),
        other => bail!("Unknown completion provider: {}", other),
    }
}

pub struct DisabledCompletion;

#[async_trait]
impl CompletionModel for DisabledCompletion {
    async fn answer(&self, _question: &str, _contexts: &[SourceContext]) -> Result<ModelAnswer> {
        Err(Error::validation("completion model is disabled"))
    }

    async fn chat(&self, _message: &str) -> Result<String> {
        Err(Error::validation("completion model is disabled"))
    }
}

pub struct ExtractiveCompletion;

#[async_trait]
impl CompletionModel for ExtractiveCompletion {
    async fn answer(&self, _question: &str, contexts: &[SourceContext]) -> Result<ModelAnswer> {
        let best = contexts
            .first()
            .ok_or_else(|| Error::validation("no context to answer from"))?;

        let mut citations: Vec<Citation> = Vec::new();
        for ctx in contexts {
            let citation = Citation {
                folder: ctx.folder_name.clone(),
                file: ctx.file_name.clone(),
                lines: [ctx.start_line, ctx.end_line],
            };
            if !citations.contains(&citation) {
                citations.push(citation);
            }
        }

        Ok(ModelAnswer {
            answer: best.content.trim().to_string(),
            citations,
        })
    }

    async fn chat(&self, _message: &str) -> Result<String> {
        Err(Error::validation(
            "general chat needs a completion model; ask with knowledge mode instead",
        ))
    }
}

pub struct OpenAICompletion {
    client: reqwest::Client,
    model: String,
    url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow!("completion.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self {
            client: client(config.timeout_secs)?,
            model,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            max_retries: config.max_retries,
        })
    }

    async fn complete(&self, body: Value) -> Result<String> {
        let endpoint = format!("{}/v1/chat/completions", self.url);
        let json = send_json(
            Service::CompletionModel,
            "OpenAI chat completions",
            self.max_retries,
            || {
                self.client
                    .post(&endpoint)
                    .bearer_auth(&self.api_key)
                    .json(&body)
            },
        )
        .await?;
        message_content(&json)
    }
}

/// `choices[0].message.content` of a chat completion response.
fn message_content(json: &Value) -> Result<String> {
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            Error::upstream(
                Service::CompletionModel,
                "response has no choices[0].message.content",
            )
        })
}

#[async_trait]
impl CompletionModel for OpenAICompletion {
    async fn answer(&self, question: &str, contexts: &[SourceContext]) -> Result<ModelAnswer> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.1,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": GROUNDED_SYSTEM_PROMPT },
                { "role": "user", "content": grounded_prompt(question, contexts) },
            ],
        });
        let content = self.complete(body).await?;
        parse_model_answer(&content)
    }

    async fn chat(&self, message: &str) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": GENERAL_SYSTEM_PROMPT },
                { "role": "user", "content": message },
            ],
        });
        self.complete(body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(file: &str, lines: (i64, i64), content: &str) -> SourceContext {
        SourceContext {
            chunk_id: format!("c-{}", file),
            file_id: file.into(),
            folder_name: "Docs".into(),
            file_name: file.into(),
            start_line: lines.0,
            end_line: lines.1,
            score: 0.8,
            content: content.into(),
        }
    }

    #[tokio::test]
    async fn extractive_cites_every_context_once() {
        let contexts = vec![
            ctx("a.txt", (1, 1), "  Marble lets teams chat with files.\n"),
            ctx("b.txt", (3, 9), "Other"),
            ctx("b.txt", (3, 9), "Other"),
        ];
        let reply = ExtractiveCompletion.answer("q", &contexts).await.unwrap();
        assert_eq!(reply.answer, "Marble lets teams chat with files.");
        assert_eq!(reply.citations.len(), 2);
        assert_eq!(reply.citations[0].lines, [1, 1]);
        assert!(ExtractiveCompletion.chat("hi").await.is_err());
    }

    #[test]
    fn reads_message_content() {
        let json = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{\"answer\":\"x\"}" } }]
        });
        assert_eq!(message_content(&json).unwrap(), "{\"answer\":\"x\"}");
        assert!(message_content(&serde_json::json!({"choices": []})).is_err());
    }
}
