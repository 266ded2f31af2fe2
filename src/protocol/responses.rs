//! FTP Response handling
//!
//! Defines FTP reply codes and the single/multi-line reply wire format.

use std::fmt;

/// Standard FTP reply codes used by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ReplyCode {
    DataConnectionAlreadyOpen = 125,
    FileStatusOkay = 150,

    CommandOkay = 200,
    CommandSuperfluous = 202,
    SystemStatus = 211,
    FileStatus = 213,
    HelpMessage = 214,
    SystemType = 215,
    ServiceReady = 220,
    ClosingControlConnection = 221,
    ClosingDataConnection = 226,
    EnteringPassiveMode = 227,
    EnteringExtendedPassiveMode = 229,
    UserLoggedIn = 230,
    AuthOkay = 234,
    FileActionOkay = 250,
    PathCreated = 257,

    NeedPassword = 331,
    NeedAccount = 332,
    FileActionPending = 350,

    ServiceNotAvailable = 421,
    CantOpenDataConnection = 425,
    ConnectionClosed = 426,
    NeedSecurityResource = 431,
    FileActionNotTaken = 450,
    LocalError = 451,
    InsufficientStorage = 452,

    CommandSyntaxError = 500,
    ParameterSyntaxError = 501,
    CommandNotImplemented = 502,
    BadCommandSequence = 503,
    NotImplementedForParameter = 504,
    UnsupportedNetworkProtocol = 522,
    NotLoggedIn = 530,
    NeedAccountForStoring = 532,
    RequestDenied = 534,
    FileUnavailable = 550,
    PageTypeUnknown = 551,
    ExceededStorageAllocation = 552,
    FileNameNotAllowed = 553,
}

impl ReplyCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// 4xx and 5xx replies
    pub fn is_negative(self) -> bool {
        self.as_u16() >= 400
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

/// A reply to the control connection: one code and one or more text lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    code: ReplyCode,
    lines: Vec<String>,
}

impl Reply {
    /// Embedded newlines turn the reply into a multi-line one.
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        let text = text.into();
        let lines = text
            .split('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect();
        Self { code, lines }
    }

    pub fn multiline<I, S>(code: ReplyCode, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut lines: Vec<String> = lines.into_iter().map(Into::into).collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        Self { code, lines }
    }

    pub fn code(&self) -> ReplyCode {
        self.code
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Text of the reply, lines joined with `\n`
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// Wire representation, CRLF terminated
    pub fn to_wire(&self) -> String {
        format_response(self.code.as_u16(), &self.lines)
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text())
    }
}

/// Format an FTP reply.
///
/// Multi-line replies open with `CODE-` and close with `CODE SP`; continuation
/// lines whose first token is a number are indented by two spaces so a client
/// cannot mistake them for the closing line.
pub fn format_response(code: u16, lines: &[String]) -> String {
    match lines {
        [] => format!("{code} \r\n"),
        [only] => format!("{code} {only}\r\n"),
        [first, middle @ .., last] => {
            let mut out = format!("{code}-{first}\r\n");
            for line in middle {
                if starts_with_number(line) {
                    out.push_str("  ");
                }
                out.push_str(line);
                out.push_str("\r\n");
            }
            out.push_str(&format!("{code} {last}\r\n"));
            out
        }
    }
}

fn starts_with_number(line: &str) -> bool {
    line.split_whitespace()
        .next()
        .is_some_and(|token| token.parse::<i64>().is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_reply() {
        let reply = Reply::new(ReplyCode::NeedPassword, "User alice OK, need password");
        assert_eq!(reply.to_wire(), "331 User alice OK, need password\r\n");
    }

    #[test]
    fn multi_line_reply_framing() {
        let reply = Reply::multiline(
            ReplyCode::SystemStatus,
            ["Features:", "PASV", "226 looks like a code", "End"],
        );
        assert_eq!(
            reply.to_wire(),
            "211-Features:\r\nPASV\r\n  226 looks like a code\r\n211 End\r\n"
        );
    }

    #[test]
    fn embedded_newlines_split_lines() {
        let reply = Reply::new(ReplyCode::HelpMessage, "first\r\nsecond");
        assert_eq!(reply.lines(), ["first", "second"]);
        assert_eq!(reply.to_wire(), "214-first\r\n214 second\r\n");
    }

    #[test]
    fn negative_codes() {
        assert!(ReplyCode::BadCommandSequence.is_negative());
        assert!(!ReplyCode::ClosingDataConnection.is_negative());
    }
}
