//! Completion model contract.
//!
//! The retrieval engine hands the completion model the question plus the
//! ordered, hydrated contexts and expects strict JSON back:
//!
//! ```json
//! { "answer": "...", "citations": [ { "folder": "Handbook", "file": "intro.txt", "lines": [1, 4] } ] }
//! ```
//!
//! [`grounded_prompt`] renders the instruction and [`parse_model_answer`]
//! reads the reply; HTTP-backed models in the app crate only move bytes.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result, Service};
use crate::models::{Citation, SourceContext};

/// System instruction for the knowledge-grounded path.
pub const GROUNDED_SYSTEM_PROMPT: &str = "You answer questions using only the provided context \
excerpts from the user's documents. If the context does not contain the answer, say so. \
Respond with a JSON object: {\"answer\": string, \"citations\": [{\"folder\": string, \
\"file\": string, \"lines\": [startLine, endLine]}]}. Cite only excerpts you used, copying \
folder, file, and line numbers exactly as given.";

/// System instruction for general chat without retrieval.
pub const GENERAL_SYSTEM_PROMPT: &str = "You are a helpful assistant for members of an \
organization. Answer concisely.";

/// Parsed reply of the completion model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Answer strictly from `contexts`, citing them.
    async fn answer(&self, question: &str, contexts: &[SourceContext]) -> Result<ModelAnswer>;

    /// Plain conversational reply, no retrieval involved.
    async fn chat(&self, message: &str) -> Result<String>;
}

/// Render the user turn for the grounded path: numbered excerpts followed
/// by the question.
pub fn grounded_prompt(question: &str, contexts: &[SourceContext]) -> String {
    let mut out = String::from("Context excerpts:\n\n");
    for (i, ctx) in contexts.iter().enumerate() {
        out.push_str(&format!(
            "[{}] folder: {} | file: {} | lines: [{}, {}]\n{}\n\n",
            i + 1,
            ctx.folder_name,
            ctx.file_name,
            ctx.start_line,
            ctx.end_line,
            ctx.content
        ));
    }
    out.push_str("Question: ");
    out.push_str(question);
    out
}

/// Parse the model's JSON reply.
///
/// Tolerates a fenced code block around the JSON and citations that give
/// their range as `startLine`/`endLine` (or snake case) instead of `lines`.
/// Citations missing a folder, file, or range are dropped.
pub fn parse_model_answer(raw: &str) -> Result<ModelAnswer> {
    let body = strip_code_fence(raw.trim());
    let json: Value = serde_json::from_str(body).map_err(|e| {
        Error::upstream(
            Service::CompletionModel,
            format!("reply is not valid JSON: {}", e),
        )
    })?;

    let answer = json
        .get("answer")
        .and_then(|a| a.as_str())
        .ok_or_else(|| Error::upstream(Service::CompletionModel, "reply has no answer field"))?
        .to_string();

    let citations = json
        .get("citations")
        .and_then(|c| c.as_array())
        .map(|items| items.iter().filter_map(parse_citation).collect())
        .unwrap_or_default();

    Ok(ModelAnswer { answer, citations })
}

fn parse_citation(item: &Value) -> Option<Citation> {
    let folder = item.get("folder")?.as_str()?.to_string();
    let file = item.get("file")?.as_str()?.to_string();

    let lines = match item.get("lines").and_then(|l| l.as_array()) {
        Some(pair) if pair.len() == 2 => [pair[0].as_i64()?, pair[1].as_i64()?],
        _ => {
            let start = item
                .get("startLine")
                .or_else(|| item.get("start_line"))?
                .as_i64()?;
            let end = item
                .get("endLine")
                .or_else(|| item.get("end_line"))?
                .as_i64()?;
            [start, end]
        }
    };

    Some(Citation {
        folder,
        file,
        lines,
    })
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_strict_reply() {
        let raw = r#"{"answer":"It lets teams chat with files.","citations":[{"folder":"Docs","file":"marble.txt","lines":[1,1]}]}"#;
        let parsed = parse_model_answer(raw).unwrap();
        assert_eq!(parsed.answer, "It lets teams chat with files.");
        assert_eq!(parsed.citations[0].lines, [1, 1]);
    }

    #[test]
    fn tolerates_fences_and_split_ranges() {
        let raw = "```json\n{\"answer\":\"a\",\"citations\":[{\"folder\":\"F\",\"file\":\"x.md\",\"startLine\":3,\"end_line\":9},{\"folder\":\"F\"}]}\n```";
        let parsed = parse_model_answer(raw).unwrap();
        assert_eq!(parsed.citations.len(), 1);
        assert_eq!(parsed.citations[0].lines, [3, 9]);
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_model_answer("Sure! Here is your answer."),
            Err(Error::Upstream {
                service: Service::CompletionModel,
                ..
            })
        ));
        assert!(parse_model_answer(r#"{"citations": []}"#).is_err());
    }

    #[test]
    fn prompt_lists_contexts_in_order() {
        let ctx = |name: &str, line: i64| SourceContext {
            chunk_id: format!("c-{}", name),
            file_id: "f".into(),
            folder_name: "Docs".into(),
            file_name: name.into(),
            start_line: line,
            end_line: line,
            score: 0.5,
            content: format!("content of {}", name),
        };
        let prompt = grounded_prompt("why?", &[ctx("a.txt", 1), ctx("b.txt", 7)]);
        let a = prompt.find("a.txt").unwrap();
        let b = prompt.find("b.txt").unwrap();
        assert!(a < b);
        assert!(prompt.contains("lines: [7, 7]"));
        assert!(prompt.ends_with("Question: why?"));
    }
}
