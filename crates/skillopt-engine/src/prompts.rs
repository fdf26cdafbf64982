//! Prompt builders for system-prompt synthesis
//!
//! Three generation flavors: reflective rewrites of a proven prompt,
//! traffic-grounded seed prompts, and description-only variants for fresh
//! arm sets. All of them return plain text; `clean_prompt_text` strips the
//! wrappers models like to add.

use serde_json::Value;

/// Prompt asking the reflector to improve on the best-performing system
/// prompt, grounded in recent real conversations.
pub(crate) fn reflect_prompt(
    best_prompt: &str,
    examples: &str,
    agent_description: &str,
    skill_description: &str,
) -> String {
    format!(
        r#"You improve system prompts for an LLM gateway.

## Agent
{agent_description}

## Skill
{skill_description}

## Best-performing system prompt so far
{best_prompt}

## Recent conversations handled by this skill
{examples}

Rewrite the system prompt to handle conversations like these better. Keep
what evidently works, fix what the examples show going wrong, and stay
faithful to the agent and skill descriptions. Return only the improved system prompt
text, with no commentary and no surrounding quotes."#
    )
}

/// Prompt asking for a fresh seed system prompt grounded in real traffic.
pub(crate) fn seed_prompt(
    agent_description: &str,
    skill_description: &str,
    examples: &str,
    response_format: Option<&Value>,
) -> String {
    let format_block = match response_format {
        Some(format) => format!(
            "\n## Response format\nReplies must match this schema:\n{format}\n"
        ),
        None => String::new(),
    };

    format!(
        r#"You write system prompts for an LLM gateway.

## Agent
{agent_description}

## Skill
{skill_description}

## Real conversations handled by this skill
{examples}
{format_block}
Write the system prompt this skill should run with, grounded in what these
conversations actually require. Return only the system prompt text, with no
commentary and no surrounding quotes."#
    )
}

/// Prompt asking for one of several distinct system-prompt variants,
/// derived from the descriptions alone.
pub(crate) fn variant_prompt(
    agent_description: &str,
    skill_description: &str,
    index: usize,
    total: usize,
) -> String {
    format!(
        r#"You write system prompts for an LLM gateway.

## Agent
{agent_description}

## Skill
{skill_description}

Write system prompt variant {current} of {total} for this skill. Each
variant should take a meaningfully different approach (tone, structure,
level of detail) while staying faithful to the descriptions. Return only
the system prompt text, with no commentary and no surrounding quotes."#,
        current = index + 1,
    )
}

/// Strip markdown fences and surrounding quotes from generated prompt text.
pub(crate) fn clean_prompt_text(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        let body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest,
        };
        text = body.strip_suffix("```").unwrap_or(body).trim();
    }

    if text.len() >= 2 && text.starts_with('"') && text.ends_with('"') {
        text = &text[1..text.len() - 1];
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reflect_prompt_contents() {
        let prompt = reflect_prompt("Be terse.", "### Example 1\nUser: hi", "An agent", "A skill");
        assert!(prompt.contains("Be terse."));
        assert!(prompt.contains("### Example 1"));
        assert!(prompt.contains("Return only the improved system prompt"));
    }

    #[test]
    fn test_seed_prompt_with_format() {
        let format = json!({"type": "json_object"});
        let prompt = seed_prompt("An agent", "A skill", "examples", Some(&format));
        assert!(prompt.contains("json_object"));

        let without = seed_prompt("An agent", "A skill", "examples", None);
        assert!(!without.contains("Response format"));
    }

    #[test]
    fn test_variant_prompt_numbers_from_one() {
        let prompt = variant_prompt("An agent", "A skill", 0, 3);
        assert!(prompt.contains("variant 1 of 3"));
    }

    #[test]
    fn test_clean_prompt_text() {
        assert_eq!(clean_prompt_text("  plain text  "), "plain text");
        assert_eq!(clean_prompt_text("```\nfenced\n```"), "fenced");
        assert_eq!(clean_prompt_text("```text\nfenced\n```"), "fenced");
        assert_eq!(clean_prompt_text("\"quoted\""), "quoted");
        assert_eq!(clean_prompt_text("```\n\"both\"\n```"), "both");
    }
}
