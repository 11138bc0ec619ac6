use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, NOTE_COMMAND, NO_ARG_COMMANDS, RAW_ARG_COMMANDS, SINGLE_PATH_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: impl Into<String>) -> Self {
        self.command_args
            .insert(key.to_string(), Value::String(value.into()));
        self
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

fn find_spec(command: &str, specs: &[CommandSpec]) -> Option<CommandSpec> {
    specs.iter().find(|spec| spec.command == command).copied()
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    parse_path_args(arg).join(" ")
}

/// `KEY rest of the note` -> (`KEY`, `rest of the note`).
fn split_key_and_text(arg: &str) -> (String, String) {
    let trimmed = arg.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((key, text)) => (key.to_string(), text.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
                let key = spec.arg_key.unwrap_or("arg");
                return Intent::new(spec.action, text).with_arg(key, arg);
            }

            if let Some(spec) = find_spec(&command, SINGLE_PATH_COMMANDS) {
                let key = spec.arg_key.unwrap_or("path");
                return Intent::new(spec.action, text).with_arg(key, parse_single_path_arg(arg));
            }

            if command == NOTE_COMMAND.command {
                let (key, note) = split_key_and_text(arg);
                return Intent::new(NOTE_COMMAND.action, text)
                    .with_arg("key", key)
                    .with_arg(NOTE_COMMAND.arg_key.unwrap_or("text"), note);
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action, text);
            }

            return Intent::new("unknown", text)
                .with_arg("command", command)
                .with_arg("arg", arg);
        }
    }

    // Free text is a chat line addressed to the focused result.
    Intent::new("chat", text).with_arg("text", raw_trimmed)
}
