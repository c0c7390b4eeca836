#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    New,
    Open(String),
    History,
    Delete(String),
    Idea,
    Retry,
    Quit,
    /// Known command missing its argument.
    Usage(&'static str),
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
/new            start a new conversation
/open <id>      resume a stored conversation
/history        list stored conversations
/delete <id>    delete a stored conversation
/idea           convert this conversation into an idea
/retry          retry loading the conversation
/quit           exit";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let mut parts = trimmed.split_whitespace();
    let command = parts.next().unwrap_or(trimmed);
    let argument = parts.next().map(str::to_string);

    let parsed = match (command, argument) {
        ("/help", _) => SlashCommand::Help,
        ("/new", _) => SlashCommand::New,
        ("/open", Some(id)) => SlashCommand::Open(id),
        ("/open", None) => SlashCommand::Usage("/open <id>"),
        ("/history", _) => SlashCommand::History,
        ("/delete", Some(id)) => SlashCommand::Delete(id),
        ("/delete", None) => SlashCommand::Usage("/delete <id>"),
        ("/idea", _) => SlashCommand::Idea,
        ("/retry", _) => SlashCommand::Retry,
        ("/quit" | "/exit", _) => SlashCommand::Quit,
        (other, _) => SlashCommand::Unknown(other.to_string()),
    };

    Some(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        assert_eq!(parse_slash_command("hello there"), None);
        assert_eq!(parse_slash_command(""), None);
    }

    #[test]
    fn commands_take_their_argument() {
        assert_eq!(
            parse_slash_command("  /open chat-7 "),
            Some(SlashCommand::Open("chat-7".to_string()))
        );
        assert_eq!(
            parse_slash_command("/delete chat-7"),
            Some(SlashCommand::Delete("chat-7".to_string()))
        );
        assert_eq!(parse_slash_command("/quit"), Some(SlashCommand::Quit));
    }

    #[test]
    fn missing_argument_reports_usage() {
        assert_eq!(
            parse_slash_command("/open"),
            Some(SlashCommand::Usage("/open <id>"))
        );
    }

    #[test]
    fn unknown_commands_are_reported() {
        assert_eq!(
            parse_slash_command("/bogus arg"),
            Some(SlashCommand::Unknown("/bogus".to_string()))
        );
    }
}
