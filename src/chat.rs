//! `marble ask`: one question from the command line.

use anyhow::Result;

use marble_core::retrieval::{ChatRequest, ChatResponse};
use marble_core::search::Scope;

use crate::config::Config;
use crate::services::Services;

pub struct AskOptions<'a> {
    pub question: &'a str,
    pub user_id: &'a str,
    pub organization_id: &'a str,
    pub scope: Scope,
    pub general: bool,
    pub json: bool,
}

pub async fn run_ask(config: &Config, opts: AskOptions<'_>) -> Result<()> {
    let services = Services::build(config).await?;
    let principal = services
        .principal(opts.user_id, opts.organization_id)
        .await?;

    let request = ChatRequest {
        message: opts.question.to_string(),
        knowledge_mode: !opts.general,
        scope: opts.scope,
    };
    let response = services.engine.answer(&principal, &request).await?;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print!("{}", render(&response));
    }
    Ok(())
}

/// Human-readable answer followed by its citations.
pub fn render(response: &ChatResponse) -> String {
    let mut out = format!("{}\n", response.answer.trim_end());
    if !response.citations.is_empty() {
        out.push_str("\nSources:\n");
        for c in &response.citations {
            out.push_str(&format!(
                "  - {}/{} (lines {}-{})\n",
                c.folder, c.file, c.lines[0], c.lines[1]
            ));
        }
    }
    out
}
