//! Prompt assembly.
//!
//! A deterministic, pure function of the persona, its bound tools, the input
//! data and the credential hints. Sections are emitted in a fixed order and
//! omitted when their inputs are absent.
//!
//! The protocol paragraphs are load-bearing: the worker parses the marker
//! lines they describe out of the CLI stream, so their text is pinned
//! byte-for-byte by the tests here. Do not reword them casually.

use serde::Deserialize;

use troupe_core::{Persona, ToolDefinition};

/// Static description of the worker-side shell environment.
pub const EXECUTION_ENVIRONMENT: &str = "## Execution Environment\n\
You are running inside a sandboxed worker shell. The standard toolbox is \
available: bash, curl, jq, git and python3. Files you create under the \
working directory are discarded when the execution ends. Network access \
goes through the worker host.";

/// The communication protocol paragraphs, pinned byte-for-byte.
pub const COMMUNICATION_PROTOCOLS: &str = "## Communication Protocols\n\
To send a message to a user, print a line starting with [USER_MESSAGE] \
followed by the message text.\n\
To record an action you have taken, print [PERSONA_ACTION] followed by a \
JSON object {\"action\": \"...\", \"detail\": \"...\"}.\n\
To publish an event for other personas, print [EMIT_EVENT] followed by a \
JSON object {\"event_type\": \"...\", \"payload\": {...}}.\n\
To store a durable memory for future executions, print [AGENT_MEMORY] \
followed by a JSON object {\"title\": \"...\", \"content\": \"...\"}.\n\
To request a human review before proceeding, print [MANUAL_REVIEW] \
followed by a JSON object {\"title\": \"...\", \"description\": \"...\"}.\n\
To report progress through a multi-step task, print [EXECUTION_FLOW] \
followed by a JSON object {\"step\": \"...\", \"status\": \"...\"}.\n\
When you finish, print [OUTCOME_ASSESSMENT] followed by a JSON object \
{\"outcome\": \"success\" or \"failure\", \"summary\": \"...\"}.";

/// The closing paragraph of every assembled prompt.
pub const EXECUTE_NOW: &str = "Work autonomously from the information above. \
Follow the communication protocols exactly. Do not ask for input. \
EXECUTE NOW.";

/// Parsed form of a persona's structured prompt blob.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct StructuredPrompt {
    identity: Option<String>,
    instructions: Option<String>,
    tool_guidance: Option<String>,
    examples: Option<String>,
    error_handling: Option<String>,
    custom_sections: Vec<CustomSection>,
    web_search: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct CustomSection {
    title: String,
    content: String,
}

/// Assemble the final prompt string.
pub fn assemble(
    persona: &Persona,
    tools: &[ToolDefinition],
    input_data: Option<&serde_json::Value>,
    credential_hints: &[String],
) -> String {
    let mut sections: Vec<String> = Vec::new();

    sections.push(format!("# Persona: {}", persona.name));
    if let Some(description) = &persona.description {
        sections.push(description.clone());
    }

    let structured = persona
        .structured_prompt
        .as_deref()
        .and_then(|raw| serde_json::from_str::<StructuredPrompt>(raw).ok());

    match structured {
        Some(sp) => {
            let identity = sp.identity.unwrap_or_else(|| persona.system_prompt.clone());
            sections.push(format!("## Identity\n{identity}"));
            if let Some(instructions) = sp.instructions {
                sections.push(format!("## Instructions\n{instructions}"));
            }
            if let Some(guidance) = sp.tool_guidance {
                sections.push(format!("## Tool Guidance\n{guidance}"));
            }
            if let Some(examples) = sp.examples {
                sections.push(format!("## Examples\n{examples}"));
            }
            if let Some(error_handling) = sp.error_handling {
                sections.push(format!("## Error Handling\n{error_handling}"));
            }
            for custom in sp.custom_sections {
                sections.push(format!("## {}\n{}", custom.title, custom.content));
            }
            if sp.web_search == Some(true) {
                sections.push(
                    "## Web Search\nWeb search is available; use it for current information."
                        .to_string(),
                );
            }
        }
        None => {
            sections.push(format!("## Identity\n{}", persona.system_prompt));
        }
    }

    if !tools.is_empty() {
        let mut block = String::from("## Available Tools");
        for tool in tools {
            block.push_str(&format!(
                "\n\n### {} ({})\n{}",
                tool.name, tool.category, tool.description
            ));
            match &tool.implementation_guide {
                Some(guide) => block.push_str(&format!("\n{guide}")),
                None => block.push_str(&format!("\nScript: {}", tool.script_path)),
            }
            if let Some(schema) = &tool.input_schema {
                block.push_str(&format!("\nInput schema: {schema}"));
            }
            if let Some(credential) = &tool.requires_credential_type {
                block.push_str(&format!("\nRequires credential: {credential}"));
            }
        }
        sections.push(block);
    }

    sections.push(EXECUTION_ENVIRONMENT.to_string());

    if !credential_hints.is_empty() {
        let mut block = String::from(
            "## Available Credentials\nThese connector credentials are exported as environment variables:",
        );
        for hint in credential_hints {
            block.push_str(&format!("\n- {hint}"));
        }
        sections.push(block);
    }

    sections.push(COMMUNICATION_PROTOCOLS.to_string());

    if let Some(data) = input_data {
        if let Some(use_case) = data.get("_use_case").and_then(|v| v.as_str()) {
            sections.push(format!("## Use Case\n{use_case}"));
        }
        if let Some(time_filter) = data.get("_time_filter").and_then(|v| v.as_str()) {
            sections.push(format!(
                "## Time Filter\nOnly consider items newer than {time_filter}."
            ));
        }
        let pretty = serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string());
        sections.push(format!("## Input Data\n```json\n{pretty}\n```"));
    }

    sections.push(EXECUTE_NOW.to_string());

    sections.join("\n\n")
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
