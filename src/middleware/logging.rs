//! Logging middleware
//!
//! Connection and command logging with credential masking.

use log::{debug, info};
use std::net::SocketAddr;

use crate::protocol::{Command, CommandCode, Reply};

/// Log a client connection
pub fn log_connection(peer: SocketAddr, active_sessions: usize) {
    info!("Client connected: {} ({} active)", peer, active_sessions);
}

/// Log a received command; passwords never reach the log.
pub fn log_command(peer: SocketAddr, command: &Command) {
    info!("Received from {}: {}", peer, loggable_line(command));
}

pub fn log_reply(peer: SocketAddr, reply: &Reply) {
    debug!("Sending response to client {}: {}", peer, reply);
}

/// The command line as it may appear in logs
pub fn loggable_line(command: &Command) -> String {
    let masked = matches!(command.code(), CommandCode::Pass | CommandCode::InternalShutdown)
        || (command.code() == CommandCode::Site
            && command
                .arg()
                .to_ascii_uppercase()
                .starts_with("INTERNALSHUTDOWN"));
    match (masked, command.has_arg()) {
        (_, false) => command.verb().to_string(),
        (true, true) => format!("{} ****", command.verb()),
        (false, true) => format!("{} {}", command.verb(), command.arg()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_command;

    #[test]
    fn masks_secrets() {
        assert_eq!(loggable_line(&parse_command("PASS hunter2")), "PASS ****");
        assert_eq!(
            loggable_line(&parse_command("SITE INTERNALSHUTDOWN pw")),
            "SITE ****"
        );
        assert_eq!(loggable_line(&parse_command("RETR a.txt")), "RETR a.txt");
        assert_eq!(loggable_line(&parse_command("PWD")), "PWD");
    }
}
