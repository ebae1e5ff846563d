//! Slash-command parsing.
//!
//! The front-end hands raw `/…` lines to the orchestrator; this module
//! turns them into typed commands. Execution lives in the orchestrator.

#[derive(Debug, Clone, PartialEq)]
pub enum SlashCommand {
    Help,
    Clear,
    Cmd(String),
    Model(ModelAction),
    Compact,
    Plan(String),
    ExePlan { run: bool, file: String },
    Undo(Option<String>),
    Save(Option<String>),
    Load(String),
    Sessions,
    Keys,
    History,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelAction {
    Info,
    List,
    Use(String),
    Switch(String),
    Local,
    Default(String),
}

/// Parse a slash command line. Errors are user-facing usage messages.
pub fn parse(input: &str) -> Result<SlashCommand, String> {
    let trimmed = input.trim();
    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };

    match command {
        "/help" => Ok(SlashCommand::Help),
        "/clear" => Ok(SlashCommand::Clear),
        "/cmd" => {
            if rest.is_empty() {
                Err("Usage: /cmd <command>".to_string())
            } else {
                Ok(SlashCommand::Cmd(rest.to_string()))
            }
        }
        "/model" => parse_model(rest),
        "/compact" => Ok(SlashCommand::Compact),
        "/plan" => {
            if rest.is_empty() {
                Err("Usage: /plan <description>".to_string())
            } else {
                Ok(SlashCommand::Plan(rest.to_string()))
            }
        }
        "/exeplan" => parse_exeplan(rest),
        "/undo" => Ok(SlashCommand::Undo(if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        })),
        "/save" => Ok(SlashCommand::Save(if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        })),
        "/load" => {
            if rest.is_empty() {
                Err("Usage: /load <session-id>".to_string())
            } else {
                Ok(SlashCommand::Load(rest.to_string()))
            }
        }
        "/sessions" => Ok(SlashCommand::Sessions),
        "/keys" => Ok(SlashCommand::Keys),
        "/history" => Ok(SlashCommand::History),
        other => Err(format!(
            "Unknown command: {other}. Type /help for available commands."
        )),
    }
}

fn parse_model(rest: &str) -> Result<SlashCommand, String> {
    let (action, argument) = match rest.split_once(char::is_whitespace) {
        Some((action, argument)) => (action, argument.trim()),
        None => (rest, ""),
    };
    let action = match action {
        "" => ModelAction::Info,
        "list" => ModelAction::List,
        "local" => ModelAction::Local,
        "use" => {
            if argument.is_empty() {
                return Err("Usage: /model use <name>".to_string());
            }
            ModelAction::Use(argument.to_string())
        }
        "switch" => {
            if argument.is_empty() {
                return Err("Usage: /model switch <path-to-model-file>".to_string());
            }
            ModelAction::Switch(argument.to_string())
        }
        "default" => {
            if argument.is_empty() {
                return Err("Usage: /model default <name>".to_string());
            }
            ModelAction::Default(argument.to_string())
        }
        other => {
            return Err(format!(
                "Unknown /model action: {other}. Actions: list, use, switch, local, default."
            ))
        }
    };
    Ok(SlashCommand::Model(action))
}

fn parse_exeplan(rest: &str) -> Result<SlashCommand, String> {
    match rest.split_once(char::is_whitespace) {
        Some(("run", file)) if !file.trim().is_empty() => Ok(SlashCommand::ExePlan {
            run: true,
            file: file.trim().to_string(),
        }),
        _ if !rest.is_empty() && !rest.starts_with("run") => Ok(SlashCommand::ExePlan {
            run: false,
            file: rest.to_string(),
        }),
        _ => Err("Usage: /exeplan <file> to preview, /exeplan run <file> to execute".to_string()),
    }
}

/// Static help text shown for `/help`.
pub const HELP_TEXT: &str = "Available commands:
  /help                  Show this help message
  /clear                 Clear chat and model context
  /cmd <command>         Execute a shell command directly
  /model                 Show current engine/model info
  /model list            List models on the remote server
  /model use <name>      Switch to a remote model
  /model switch <path>   Switch to a different local model file
  /model local           Switch back to the local model
  /model default <name>  Save default remote model to config
  /compact               Compact context, keeping key facts
  /plan <description>    Generate a multi-step plan
  /exeplan <file>        Preview a multi-step plan
  /exeplan run <file>    Execute all plan steps
  /undo                  Undo last file edit or write
  /save [name]           Save current session
  /load <id>             Load a saved session
  /sessions              List saved sessions
  /keys                  Show keyboard shortcuts
  /history               Show conversation context size

Tip: use /cmd when you know the exact command to run.";

/// Static keybinding reference for `/keys`.
pub const KEYS_TEXT: &str = "Keyboard shortcuts:
  Enter       Send message
  Ctrl+C      Cancel the current request (press twice to quit)
  Ctrl+D      Quit
  Up / Down   Browse input history";
