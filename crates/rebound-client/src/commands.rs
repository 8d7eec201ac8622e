//! Command parsing for the line-based client.

/// Parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Send a `message` frame.
    Message {
        /// Message content.
        content: String,
    },

    /// Dial now instead of waiting for the reconnect delay.
    Reconnect,

    /// List the available commands.
    Help,

    /// Tear the client down and exit.
    Quit,

    /// Unknown command.
    Unknown {
        /// The original input.
        input: String,
    },
}

/// Text printed for [`Command::Help`].
pub const HELP: &str = "/reconnect  dial now\n/help       show this list\n/quit       disconnect and exit\nanything else is sent as a message";

/// Parse a line of user input.
///
/// Commands start with `/`. Anything else is treated as a message.
pub fn parse(input: &str) -> Command {
    let input = input.trim();

    let Some(cmd_str) = input.strip_prefix('/') else {
        return Command::Message { content: input.to_string() };
    };

    match cmd_str.split_whitespace().next().unwrap_or("") {
        "reconnect" | "r" => Command::Reconnect,
        "help" | "h" | "?" => Command::Help,
        "quit" | "q" | "exit" => Command::Quit,
        _ => Command::Unknown { input: input.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message() {
        assert_eq!(parse("hello world"), Command::Message { content: "hello world".into() });
    }

    #[test]
    fn parse_trims_message() {
        assert_eq!(parse("  ping \n"), Command::Message { content: "ping".into() });
    }

    #[test]
    fn parse_reconnect() {
        assert_eq!(parse("/reconnect"), Command::Reconnect);
        assert_eq!(parse("/r"), Command::Reconnect);
    }

    #[test]
    fn parse_help() {
        assert_eq!(parse("/help"), Command::Help);
        assert_eq!(parse("/?"), Command::Help);
    }

    #[test]
    fn parse_quit() {
        assert_eq!(parse("/quit"), Command::Quit);
        assert_eq!(parse("/q"), Command::Quit);
    }

    #[test]
    fn parse_unknown_command() {
        assert_eq!(parse("/dance now"), Command::Unknown { input: "/dance now".into() });
        assert!(matches!(parse("/"), Command::Unknown { .. }));
    }

    #[test]
    fn parse_empty() {
        assert_eq!(parse(""), Command::Message { content: String::new() });
    }
}
