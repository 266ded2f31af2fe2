//! FTP Command parsing
//!
//! Turns raw control lines into [`Command`] values.

use crate::protocol::commands::{Command, CommandCode};

/// Parse a control line into a command.
///
/// Unknown verbs yield [`CommandCode::Unknown`] with the verb preserved for the reply.
pub fn parse_command(raw: &str) -> Command {
    let (verb, arg) = split_line(raw);
    Command::new(CommandCode::from_verb(&verb), verb, arg)
}

/// Parse the argument of a SITE command as a command line of its own.
pub fn parse_site_command(arg: &str) -> Command {
    let (verb, arg) = split_line(arg);
    Command::new(CommandCode::from_site_verb(&verb), verb, arg)
}

fn split_line(raw: &str) -> (String, String) {
    let trimmed = raw.trim_matches(|c: char| c == '\r' || c == '\n' || c == ' ');
    let mut parts = trimmed.splitn(2, char::is_whitespace);
    let verb = parts.next().unwrap_or("").to_ascii_uppercase();
    let arg = parts.next().unwrap_or("").trim().to_string();
    (verb, arg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verb_and_argument() {
        let cmd = parse_command("retr  my file.txt\r\n");
        assert_eq!(cmd.code(), CommandCode::Retr);
        assert_eq!(cmd.verb(), "RETR");
        assert_eq!(cmd.arg(), "my file.txt");
    }

    #[test]
    fn unknown_verb_kept() {
        let cmd = parse_command("XYZZY plugh");
        assert_eq!(cmd.code(), CommandCode::Unknown);
        assert_eq!(cmd.verb(), "XYZZY");
    }

    #[test]
    fn empty_line_is_unknown() {
        assert_eq!(parse_command("").code(), CommandCode::Unknown);
    }

    #[test]
    fn site_argument_parsed_as_extension() {
        let cmd = parse_site_command("limitbandwidth 100 200");
        assert_eq!(cmd.code(), CommandCode::LimitBandwidth);
        assert_eq!(cmd.args(), ["100", "200"]);
    }
}
