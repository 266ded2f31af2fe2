//! Module `commands`
//!
//! Command codes and the command value handed to the dispatcher.
//!
//! Every code carries its static follow-set: the codes that may legally come
//! next. An empty follow-set means "anything may follow".

use std::fmt;

/// Closed set of command kinds known to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandCode {
    /// Pseudo-command current on a freshly opened (or reinitialised) session
    Connection,

    // Access control
    User,
    Pass,
    Acct,
    Cwd,
    Cdup,
    Rein,
    Quit,

    // Transfer parameters
    Port,
    Pasv,
    Eprt,
    Epsv,
    Type,
    Stru,
    Mode,

    // Service commands
    Retr,
    Stor,
    Stou,
    Appe,
    Allo,
    Rest,
    Rnfr,
    Rnto,
    Abor,
    Dele,
    Rmd,
    Mkd,
    Pwd,
    List,
    Nlst,
    Size,
    Site,
    Syst,
    Stat,
    Help,
    Noop,
    Feat,
    Opts,

    // RFC 4217
    Auth,
    Pbsz,
    Prot,
    Ccc,

    // SITE extensions
    InternalShutdown,
    LimitBandwidth,
    SiteHelp,

    /// Verb the server does not know
    Unknown,
    /// Stand-in recorded when a command arrives out of order
    IncorrectSequence,
}

use CommandCode::*;

const DATA_TRANSFER_FOLLOWERS: &[CommandCode] = &[Retr, Stor, Stou, Appe];

impl CommandCode {
    /// Resolve a top-level verb. SITE extensions are not reachable this way.
    pub fn from_verb(verb: &str) -> Self {
        match verb.to_ascii_uppercase().as_str() {
            "USER" => User,
            "PASS" => Pass,
            "ACCT" => Acct,
            "CWD" | "XCWD" => Cwd,
            "CDUP" | "XCUP" => Cdup,
            "REIN" => Rein,
            "QUIT" => Quit,
            "PORT" => Port,
            "PASV" => Pasv,
            "EPRT" => Eprt,
            "EPSV" => Epsv,
            "TYPE" => Type,
            "STRU" => Stru,
            "MODE" => Mode,
            "RETR" => Retr,
            "STOR" => Stor,
            "STOU" => Stou,
            "APPE" => Appe,
            "ALLO" => Allo,
            "REST" => Rest,
            "RNFR" => Rnfr,
            "RNTO" => Rnto,
            "ABOR" => Abor,
            "DELE" => Dele,
            "RMD" | "XRMD" => Rmd,
            "MKD" | "XMKD" => Mkd,
            "PWD" | "XPWD" => Pwd,
            "LIST" => List,
            "NLST" => Nlst,
            "SIZE" => Size,
            "SITE" => Site,
            "SYST" => Syst,
            "STAT" => Stat,
            "HELP" => Help,
            "NOOP" => Noop,
            "FEAT" => Feat,
            "OPTS" => Opts,
            "AUTH" => Auth,
            "PBSZ" => Pbsz,
            "PROT" => Prot,
            "CCC" => Ccc,
            _ => Unknown,
        }
    }

    /// Resolve the first word of a SITE argument
    pub fn from_site_verb(verb: &str) -> Self {
        match verb.to_ascii_uppercase().as_str() {
            "INTERNALSHUTDOWN" => InternalShutdown,
            "LIMITBANDWIDTH" => LimitBandwidth,
            "HELP" => SiteHelp,
            _ => Unknown,
        }
    }

    /// Canonical verb as sent on the wire
    pub fn verb(self) -> &'static str {
        match self {
            Connection => "Connection",
            User => "USER",
            Pass => "PASS",
            Acct => "ACCT",
            Cwd => "CWD",
            Cdup => "CDUP",
            Rein => "REIN",
            Quit => "QUIT",
            Port => "PORT",
            Pasv => "PASV",
            Eprt => "EPRT",
            Epsv => "EPSV",
            Type => "TYPE",
            Stru => "STRU",
            Mode => "MODE",
            Retr => "RETR",
            Stor => "STOR",
            Stou => "STOU",
            Appe => "APPE",
            Allo => "ALLO",
            Rest => "REST",
            Rnfr => "RNFR",
            Rnto => "RNTO",
            Abor => "ABOR",
            Dele => "DELE",
            Rmd => "RMD",
            Mkd => "MKD",
            Pwd => "PWD",
            List => "LIST",
            Nlst => "NLST",
            Size => "SIZE",
            Site => "SITE",
            Syst => "SYST",
            Stat => "STAT",
            Help => "HELP",
            Noop => "NOOP",
            Feat => "FEAT",
            Opts => "OPTS",
            Auth => "AUTH",
            Pbsz => "PBSZ",
            Prot => "PROT",
            Ccc => "CCC",
            InternalShutdown => "INTERNALSHUTDOWN",
            LimitBandwidth => "LIMITBANDWIDTH",
            SiteHelp => "HELP",
            Unknown => "Unknown",
            IncorrectSequence => "IncorrectSequence",
        }
    }

    /// Codes allowed to follow this one. Empty means unrestricted.
    pub fn next_valids(self) -> &'static [CommandCode] {
        match self {
            Connection | Rein => &[User, Auth],
            User => &[Pass],
            Auth => &[User, Pbsz],
            Pbsz => &[Prot],
            Rest => DATA_TRANSFER_FOLLOWERS,
            Rnfr => &[Rnto],
            _ => &[],
        }
    }

    /// Always legal regardless of the current command
    pub fn is_special(self) -> bool {
        matches!(self, Abor | Quit | Stat | Noop)
    }

    /// Only reachable through SITE
    pub fn is_extension(self) -> bool {
        matches!(self, InternalShutdown | LimitBandwidth | SiteHelp)
    }

    /// Rejections following these revert the session instead of re-arming NOOP
    pub fn is_identity_critical(self) -> bool {
        matches!(self, Connection | User | Pass)
    }

    /// Commands refused with 530 until the session is identified
    pub fn requires_login(self) -> bool {
        !matches!(
            self,
            Connection
                | User
                | Pass
                | Acct
                | Auth
                | Pbsz
                | Prot
                | Ccc
                | Quit
                | Noop
                | Syst
                | Help
                | Feat
                | Stat
                | Opts
                | Rein
                | Unknown
                | IncorrectSequence
        )
    }

    /// Commands that move bytes over a data connection
    pub fn is_transfer(self) -> bool {
        matches!(self, Retr | Stor | Stou | Appe | List | Nlst)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Legality of `next` after `current`, given an optional one-shot override.
///
/// Pure: the caller is responsible for consuming the override.
pub fn is_next_command_valid(
    current: CommandCode,
    next: CommandCode,
    extra_next: Option<CommandCode>,
) -> bool {
    if next.is_special() {
        return true;
    }
    let follow = current.next_valids();
    if let Some(extra) = extra_next {
        return next == extra || follow.contains(&next);
    }
    follow.is_empty() || follow.contains(&next)
}

/// A parsed command line. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    code: CommandCode,
    verb: String,
    arg: String,
    args: Vec<String>,
}

impl Command {
    pub fn new(code: CommandCode, verb: impl Into<String>, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        let args = arg.split_whitespace().map(str::to_string).collect();
        Self {
            code,
            verb: verb.into(),
            arg,
            args,
        }
    }

    /// Argument-less command carrying the canonical verb
    pub fn synthetic(code: CommandCode) -> Self {
        Self::new(code, code.verb(), "")
    }

    pub fn code(&self) -> CommandCode {
        self.code
    }

    /// Verb as received, upper-cased
    pub fn verb(&self) -> &str {
        &self.verb
    }

    /// Raw argument with surrounding whitespace removed
    pub fn arg(&self) -> &str {
        &self.arg
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn has_arg(&self) -> bool {
        !self.arg.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_commands_always_legal() {
        for special in [Abor, Quit, Stat, Noop] {
            assert!(is_next_command_valid(Rnfr, special, None));
            assert!(is_next_command_valid(Pbsz, special, Some(Prot)));
        }
    }

    #[test]
    fn empty_follow_set_is_open() {
        assert!(is_next_command_valid(Pwd, Retr, None));
        assert!(is_next_command_valid(Pass, Cwd, None));
    }

    #[test]
    fn follow_set_restricts() {
        assert!(is_next_command_valid(Connection, User, None));
        assert!(!is_next_command_valid(Connection, Pass, None));
        assert!(is_next_command_valid(Rnfr, Rnto, None));
        assert!(!is_next_command_valid(Rnfr, Dele, None));
        assert!(is_next_command_valid(Rest, Stor, None));
        assert!(!is_next_command_valid(Rest, List, None));
    }

    #[test]
    fn override_wins_then_falls_back_to_static_set() {
        // PASS armed ACCT; PASS itself has an open follow-set
        assert!(is_next_command_valid(Pass, Acct, Some(Acct)));
        assert!(!is_next_command_valid(Pass, Cwd, Some(Acct)));
        // AUTH static set still applies alongside an override
        assert!(is_next_command_valid(Auth, Pbsz, Some(Prot)));
        assert!(is_next_command_valid(Auth, Prot, Some(Prot)));
        assert!(!is_next_command_valid(Auth, Retr, Some(Prot)));
    }

    #[test]
    fn check_is_pure() {
        for _ in 0..2 {
            assert!(!is_next_command_valid(User, Retr, None));
            assert!(is_next_command_valid(User, Pass, None));
        }
    }

    #[test]
    fn login_gating_set() {
        assert!(!User.requires_login());
        assert!(!Feat.requires_login());
        assert!(Retr.requires_login());
        assert!(Site.requires_login());
        assert!(LimitBandwidth.requires_login());
    }

    #[test]
    fn site_verbs_only_resolve_extensions() {
        assert_eq!(CommandCode::from_site_verb("internalshutdown"), InternalShutdown);
        assert_eq!(CommandCode::from_site_verb("RETR"), Unknown);
        assert_eq!(CommandCode::from_verb("INTERNALSHUTDOWN"), Unknown);
        assert!(CommandCode::from_site_verb("help").is_extension());
    }

    #[test]
    fn command_splits_arguments() {
        let cmd = Command::new(LimitBandwidth, "LIMITBANDWIDTH", "1000 2000");
        assert_eq!(cmd.args(), ["1000", "2000"]);
        assert!(cmd.has_arg());
        assert!(!Command::synthetic(Noop).has_arg());
    }
}
