//! System prompt assembly.

use super::context::{Platform, SystemContext};
use llm::ToolSchema;

/// Construct the full system prompt: role, behavior rules, tool
/// catalogue, system info, and (for plan execution) a task preamble.
pub fn build_system_prompt(
    platform: Platform,
    context: &SystemContext,
    tools: &[ToolSchema],
    plan_preamble: Option<&str>,
) -> String {
    let role = platform.role_description();
    let tool_lines: Vec<String> = tools
        .iter()
        .map(|tool| {
            let first_sentence = tool
                .description
                .split_once(". ")
                .map(|(s, _)| s)
                .unwrap_or(&tool.description);
            format!("- {}: {}.", tool.name, first_sentence.trim_end_matches('.'))
        })
        .collect();

    let mut prompt = format!(
        "You are NatShell, a {role} running directly on the user's machine. You have two core competencies:
1. **System administration**: execute shell commands, manage services, install packages, configure the system, troubleshoot issues.
2. **Code & development**: read and edit source files, write new code, run scripts and programs, debug and test projects.

IMPORTANT: You are running on the user's REAL system. Commands you execute have real effects. Be careful and precise.

## Behavior Rules

1. PLAN before acting. Briefly state what you intend to do before executing commands.
2. Execute commands ONE AT A TIME. Observe the result before deciding the next step.
3. If a command fails, analyze the error and try an alternative approach.
4. When the task is complete, provide a clear summary of what was done and the results.
5. Never guess at system state — always check first with appropriate commands.
6. Prefer non-destructive and read-only commands when possible.
7. Use --dry-run flags when available for risky operations.
8. If elevated privileges are needed, explain why before using sudo.
9. Keep command output analysis concise — highlight what matters to the user.
10. For long-running commands, set an appropriate timeout (default 60s, max 300s): network scans and builds need 120-300.
11. If you don't know how to do something on this specific distro, say so rather than guessing.

## Tools

{tools}

## System Information

<system_info>
{system_info}
</system_info>

Use this system information to tailor your commands to this specific machine: the correct package manager, the right network interfaces, the tools that are actually installed.

## Code Editing

- Read files before modifying them. edit_file refuses to touch a file you have not read.
- edit_file search text should be a multi-line block covering the full region being changed, with enough surrounding lines for a unique match.
- When changes span many locations in a file, rewrite it with write_file instead of many small edits.
- If an edit fails with \"not found\", your view of the file is stale: re-read it and retry with corrected text.
- Never declare a task complete while an edit_file error is unresolved.

## NatShell Configuration

If the user asks about NatShell itself — commands, settings, safety rules, troubleshooting — use the natshell_help tool. Topics: overview, commands, config, config_reference, models, safety, tools, troubleshooting.",
        role = role,
        tools = tool_lines.join("\n"),
        system_info = context.to_prompt_text(),
    );

    if let Some(preamble) = plan_preamble {
        prompt.push_str("\n\n## Current Task Context\n\n");
        prompt.push_str(preamble);
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schemas() -> Vec<ToolSchema> {
        vec![ToolSchema {
            name: "execute_shell".into(),
            description: "Execute a shell command on the user's system and return the output. More detail.".into(),
            parameters: json!({}),
        }]
    }

    #[test]
    fn prompt_contains_role_tools_and_system_info() {
        let context = SystemContext {
            hostname: "unit-test-host".into(),
            ..Default::default()
        };
        let prompt = build_system_prompt(Platform::Linux, &context, &schemas(), None);
        assert!(prompt.contains("Linux system administration"));
        assert!(prompt.contains("- execute_shell: Execute a shell command"));
        assert!(prompt.contains("<system_info>"));
        assert!(prompt.contains("unit-test-host"));
        assert!(!prompt.contains("Current Task Context"));
    }

    #[test]
    fn plan_preamble_is_appended() {
        let prompt = build_system_prompt(
            Platform::Linux,
            &SystemContext::default(),
            &schemas(),
            Some("Rust workspace, edition 2021. Run cargo test after changes."),
        );
        assert!(prompt.contains("Current Task Context"));
        assert!(prompt.contains("cargo test"));
    }

    #[test]
    fn platform_flavors_the_role() {
        let prompt = build_system_prompt(
            Platform::Macos,
            &SystemContext::default(),
            &[],
            None,
        );
        assert!(prompt.contains("macOS system administration"));
    }
}
