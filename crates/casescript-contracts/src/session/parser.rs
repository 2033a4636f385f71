use std::collections::BTreeMap;

use serde_json::Value;

use super::commands::{
    CommandSpec, NO_ARG_COMMANDS, PASSES_COMMAND, PICK_COMMAND, RAW_ARG_COMMANDS, THUMB_COMMAND,
    WORDS_COMMAND,
};

/// One parsed line of the interactive session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionCommand {
    pub action: String,
    pub raw: String,
    pub args: BTreeMap<String, Value>,
}

impl SessionCommand {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            args: BTreeMap::new(),
        }
    }

    fn invalid(raw: &str, message: String) -> Self {
        let mut command = Self::new("invalid", raw);
        command
            .args
            .insert("message".to_string(), Value::String(message));
        command
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        self.args.get(key).and_then(Value::as_u64)
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

fn parse_count(raw: &str, text: &str, what: &str) -> Result<u64, SessionCommand> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| SessionCommand::invalid(text, format!("{what} must be a whole number")))
}

pub fn parse_command(text: &str) -> SessionCommand {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return SessionCommand::new("noop", text);
    }

    let Some(slash_tail) = trimmed.strip_prefix('/') else {
        return SessionCommand::invalid(text, "commands start with '/'; try /help".to_string());
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return SessionCommand::new(action, text);
    }

    if let Some((spec, key)) = RAW_ARG_COMMANDS
        .iter()
        .find(|(spec, _)| spec.command == command)
    {
        if arg.is_empty() {
            return SessionCommand::invalid(text, format!("/{} needs a value", spec.command));
        }
        let mut parsed = SessionCommand::new(spec.action, text);
        parsed
            .args
            .insert((*key).to_string(), Value::String(arg.to_string()));
        return parsed;
    }

    if command == THUMB_COMMAND.command {
        let mut parts = split_args(arg).into_iter();
        let Some(path) = parts.next() else {
            return SessionCommand::invalid(text, "/thumb needs an image path".to_string());
        };
        let hint = parts.collect::<Vec<String>>().join(" ");
        let mut parsed = SessionCommand::new(THUMB_COMMAND.action, text);
        parsed.args.insert("path".to_string(), Value::String(path));
        parsed.args.insert("hint".to_string(), Value::String(hint));
        return parsed;
    }

    if command == PICK_COMMAND.command || command == PASSES_COMMAND.command {
        let (spec, key, what) = if command == PICK_COMMAND.command {
            (PICK_COMMAND, "index", "candidate number")
        } else {
            (PASSES_COMMAND, "passes", "pass count")
        };
        return match parse_count(arg, text, what) {
            Ok(value) => {
                let mut parsed = SessionCommand::new(spec.action, text);
                parsed.args.insert(key.to_string(), Value::from(value));
                parsed
            }
            Err(invalid) => invalid,
        };
    }

    if command == WORDS_COMMAND.command {
        let parts = split_args(arg);
        if parts.len() != 2 {
            return SessionCommand::invalid(text, "/words needs <min> <max>".to_string());
        }
        let min = match parse_count(&parts[0], text, "min words") {
            Ok(value) => value,
            Err(invalid) => return invalid,
        };
        let max = match parse_count(&parts[1], text, "max words") {
            Ok(value) => value,
            Err(invalid) => return invalid,
        };
        let mut parsed = SessionCommand::new(WORDS_COMMAND.action, text);
        parsed.args.insert("min".to_string(), Value::from(min));
        parsed.args.insert("max".to_string(), Value::from(max));
        return parsed;
    }

    let mut parsed = SessionCommand::new("unknown", text);
    parsed
        .args
        .insert("command".to_string(), Value::String(command));
    parsed
        .args
        .insert("arg".to_string(), Value::String(arg.to_string()));
    parsed
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_command;

    #[test]
    fn blank_line_is_noop() {
        assert_eq!(parse_command("   ").action, "noop");
    }

    #[test]
    fn step_commands_map_to_actions() {
        assert_eq!(parse_command("/brief").action, "build_brief");
        assert_eq!(parse_command("/research").action, "find_cases");
        assert_eq!(parse_command("  /PATCH ").action, "patch_acts");
        assert_eq!(parse_command("/exit").action, "quit");
    }

    #[test]
    fn thumb_takes_quoted_path_and_free_hint() {
        let command = parse_command("/thumb \"/tmp/my thumb.png\" clown face paint in court");
        assert_eq!(command.action, "set_thumbnail");
        assert_eq!(command.args["path"], json!("/tmp/my thumb.png"));
        assert_eq!(command.args["hint"], json!("clown face paint in court"));
    }

    #[test]
    fn thumb_without_path_is_invalid() {
        let command = parse_command("/thumb");
        assert_eq!(command.action, "invalid");
        assert_eq!(command.arg_str("message"), Some("/thumb needs an image path"));
    }

    #[test]
    fn pick_and_passes_parse_numbers() {
        assert_eq!(parse_command("/pick 3").arg_u64("index"), Some(3));
        assert_eq!(parse_command("/passes 0").arg_u64("passes"), Some(0));
        assert_eq!(parse_command("/pick two").action, "invalid");
    }

    #[test]
    fn words_needs_two_numbers() {
        let command = parse_command("/words 6000 9000");
        assert_eq!(command.action, "set_word_range");
        assert_eq!(command.arg_u64("min"), Some(6000));
        assert_eq!(command.arg_u64("max"), Some(9000));
        assert_eq!(parse_command("/words 6000").action, "invalid");
    }

    #[test]
    fn tone_keeps_whole_argument() {
        let command = parse_command("/tone Hard Cliffhanger");
        assert_eq!(command.action, "set_tone");
        assert_eq!(command.arg_str("tone"), Some("Hard Cliffhanger"));
    }

    #[test]
    fn unknown_command_reports_name_and_arg() {
        let command = parse_command("/magic foo bar");
        assert_eq!(command.action, "unknown");
        assert_eq!(command.args["command"], json!("magic"));
        assert_eq!(command.args["arg"], json!("foo bar"));
    }

    #[test]
    fn bare_text_is_rejected_with_hint() {
        let command = parse_command("make it scarier");
        assert_eq!(command.action, "invalid");
    }
}
