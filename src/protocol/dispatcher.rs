//! Command dispatcher
//!
//! Every command line goes through here: SITE sub-dispatch, the sequencing
//! check against the current command, the login gate, the business hooks and
//! finally the handler. Errors never leave this module unconverted; each
//! command produces at least one reply.

use log::{debug, warn};

use crate::auth::AuthPhase;
use crate::client::Session;
use crate::error::{AuthError, CommandError, ProtocolError, error_to_reply};
use crate::middleware::logging::{log_command, log_reply};
use crate::protocol::handlers::handle_command;
use crate::protocol::parser::parse_site_command;
use crate::protocol::results::CommandResult;
use crate::protocol::{Command, CommandCode, Reply, ReplyCode};
use crate::server::ServerContext;

/// Dispatch one parsed command line.
pub async fn dispatch(session: &mut Session, ctx: &ServerContext, command: Command) -> CommandResult {
    log_command(session.peer(), &command);

    let command = match resolve_site(session, command) {
        Ok(command) => command,
        Err(err) => return finish(session, error_to_reply(&err)),
    };
    let code = command.code();

    if code == CommandCode::Unknown {
        let err: CommandError = ProtocolError::UnknownCommand(command.verb().to_string()).into();
        return finish(session, error_to_reply(&err));
    }

    if !session.is_next_command_valid(code) {
        return incorrect_sequence(session, &command);
    }
    session.set_next_command(command.clone());

    let result = match run(session, ctx, &command).await {
        Ok(result) => result,
        Err(err) => {
            restore_after_failure(session, code, &err);
            CommandResult::from_reply(error_to_reply(&err))
        }
    };

    if let Some(reply) = result.last_reply() {
        ctx.business.after_run_command(session, &command, reply);
        session.set_last_reply(reply.clone());
    }
    for reply in &result.replies {
        log_reply(session.peer(), reply);
    }
    result
}

/// Replace `SITE <sub>` with the sub-command so its own sequencing rules apply.
fn resolve_site(session: &Session, command: Command) -> Result<Command, CommandError> {
    if command.code() != CommandCode::Site {
        return Ok(command);
    }
    if !command.has_arg() {
        return Err(ProtocolError::MissingArgument("SITE".into()).into());
    }
    let inner = parse_site_command(command.arg());
    if !inner.code().is_extension() {
        return Err(ProtocolError::NotImplemented(format!("SITE {}", inner.verb())).into());
    }
    if session.transfer.is_executing() {
        return Err(ProtocolError::BadSequence(format!(
            "SITE {} during a transfer",
            inner.verb()
        ))
        .into());
    }
    debug!("SITE resolved to {} for {}", inner.code(), session.peer());
    Ok(inner)
}

/// Login gate and business hook, then the handler itself.
async fn run(session: &mut Session, ctx: &ServerContext, command: &Command) -> Result<CommandResult, CommandError> {
    if command.code().requires_login() && !session.auth.is_identified() {
        let err = match session.auth.phase() {
            AuthPhase::PasswordGiven => AuthError::AccountRequired,
            _ => AuthError::NotLoggedIn,
        };
        return Err(err.into());
    }
    ctx.business.before_run_command(session, command)?;
    handle_command(session, ctx, command).await
}

/// 503, then either revert to the identity-critical predecessor (dropping any
/// restart marker) or re-arm NOOP so the next command is judged afresh.
fn incorrect_sequence(session: &mut Session, command: &Command) -> CommandResult {
    warn!(
        "Out of sequence {} after {} from {}",
        command.verb(),
        session.current_command().code(),
        session.peer()
    );
    session.set_next_command(Command::synthetic(CommandCode::IncorrectSequence));
    if session.previous_command().code().is_identity_critical() {
        session.set_previous_as_current();
        session.restart.clear();
    } else {
        session.set_next_command(Command::synthetic(CommandCode::Noop));
    }
    let reply = Reply::new(
        ReplyCode::BadCommandSequence,
        format!("Bad sequence of commands: {} not expected here", command.verb()),
    );
    finish(session, reply)
}

/// A failed command does not count as executed. A rejected login step also
/// restarts the handshake so that USER is accepted again.
fn restore_after_failure(session: &mut Session, code: CommandCode, err: &CommandError) {
    let login_step = matches!(code, CommandCode::User | CommandCode::Pass | CommandCode::Acct);
    if login_step && err.code() == ReplyCode::NotLoggedIn {
        session.set_next_command(Command::synthetic(CommandCode::Connection));
    } else {
        session.set_previous_as_current();
    }
}

fn finish(session: &mut Session, reply: Reply) -> CommandResult {
    log_reply(session.peer(), &reply);
    session.set_last_reply(reply.clone());
    CommandResult::from_reply(reply)
}
