//! Conversation transcript rendering
//!
//! Reflection and rubric generation feed real traffic back into prompts.
//! A transcript is the readable form of one logged request: the message
//! turns, the assistant's reply, and the structural constraints of the call
//! (tool names, response-format schema). Sampling parameters never appear —
//! they belong to the arm under test, not to the conversation.

use serde_json::Value;

use skillopt_core::RequestRecord;

/// Per-turn content budget inside a rendered transcript.
const TURN_CONTENT_LIMIT: usize = 600;

/// Truncate on a char boundary, appending an ellipsis when content was cut.
pub fn truncate_for_prompt(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let cut: String = text.chars().take(limit).collect();
    format!("{cut}…")
}

/// Pull the assistant's text out of an upstream response body.
///
/// Understands the chat-completion shape (`choices[0].message.content`) and
/// the model-response shape (`output_text`); anything else renders as
/// compact JSON.
pub fn response_text(response: &Value) -> String {
    if let Some(content) = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        return content.to_string();
    }
    if let Some(content) = response.get("output_text").and_then(Value::as_str) {
        return content.to_string();
    }
    if response.is_null() {
        return String::new();
    }
    response.to_string()
}

/// Render one logged request as a readable conversation transcript.
pub fn render_transcript(record: &RequestRecord) -> String {
    let mut lines = Vec::new();

    for message in &record.input_messages {
        let role = match message.role.as_str() {
            "system" => "System",
            "user" => "User",
            "assistant" => "Assistant",
            "tool" => "Tool",
            other => other,
        };
        lines.push(format!(
            "{role}: {}",
            truncate_for_prompt(&message.content, TURN_CONTENT_LIMIT)
        ));
    }

    let reply = response_text(&record.response);
    if !reply.is_empty() {
        lines.push(format!(
            "Assistant: {}",
            truncate_for_prompt(&reply, TURN_CONTENT_LIMIT)
        ));
    }

    if !record.tools.is_empty() {
        let names: Vec<&str> = record
            .tools
            .iter()
            .filter_map(|tool| {
                tool.pointer("/function/name")
                    .or_else(|| tool.get("name"))
                    .and_then(Value::as_str)
            })
            .collect();
        if !names.is_empty() {
            lines.push(format!("[available tools: {}]", names.join(", ")));
        }
    }

    if let Some(format) = &record.response_format {
        lines.push(format!("[response format: {format}]"));
    }

    lines.join("\n")
}

/// Render a batch of records as numbered example conversations.
pub fn render_examples(records: &[RequestRecord]) -> String {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| format!("### Example {}\n{}", i + 1, render_transcript(record)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// First response-format schema present in a batch of records, if any.
pub fn detect_response_format(records: &[RequestRecord]) -> Option<Value> {
    records
        .iter()
        .find_map(|record| record.response_format.clone())
}
