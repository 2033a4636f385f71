mod commands;
mod parser;

pub use commands::SESSION_HELP_COMMANDS;
pub use parser::{parse_command, SessionCommand};
