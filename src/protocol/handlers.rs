//! Command handlers module for wharf-ftpd.
//!
//! One handler per command code. Handlers run after the dispatcher has checked
//! sequencing and login; they either produce a [`CommandResult`] or fail with a
//! [`CommandError`] that the dispatcher turns into the reply.

use log::{info, warn};
use std::net::IpAddr;

use crate::auth::AuthStep;
use crate::client::Session;
use crate::error::{AuthError, CommandError, ProtocolError, StorageError, TlsError, TransferError};
use crate::protocol::results::{CommandResult, ControlAction};
use crate::protocol::{Command, CommandCode, Reply, ReplyCode};
use crate::server::ServerContext;
use crate::storage::OpenMode;
use crate::storage::validation::file_name;
use crate::transfer::address::{
    EpsvRequest, format_epsv_port, format_pasv_address, parse_epsv_argument, parse_eprt_argument,
    parse_port_argument,
};
use crate::transfer::{DataSource, TransferJob, TransferMode, TransferStructure, TransferType};

type HandlerResult = Result<CommandResult, CommandError>;

const FEATURES: &[&str] = &[
    " AUTH TLS",
    " EPRT",
    " EPSV",
    " PBSZ",
    " PROT",
    " REST STREAM",
    " SIZE",
    " UTF8",
];

/// Run the handler of `command`.
pub async fn handle_command(
    session: &mut Session,
    ctx: &ServerContext,
    command: &Command,
) -> HandlerResult {
    use CommandCode::*;

    match command.code() {
        User => handle_cmd_user(session, ctx, command).await,
        Pass => handle_cmd_pass(session, ctx, command).await,
        Acct => handle_cmd_acct(session, ctx, command).await,
        Cwd => handle_cmd_cwd(session, command).await,
        Cdup => handle_cmd_cdup(session).await,
        Rein => handle_cmd_rein(session, ctx).await,
        Quit => handle_cmd_quit(session).await,
        Port | Eprt => handle_cmd_port(session, command),
        Pasv => handle_cmd_pasv(session, ctx).await,
        Epsv => handle_cmd_epsv(session, ctx, command).await,
        Type => handle_cmd_type(session, command),
        Stru => handle_cmd_stru(session, command),
        Mode => handle_cmd_mode(session, command),
        Retr => handle_cmd_retr(session, ctx, command).await,
        Stor | Appe => handle_cmd_stor(session, ctx, command).await,
        Stou => handle_cmd_stou(session, ctx, command).await,
        List | Nlst => handle_cmd_list(session, ctx, command).await,
        Allo => handle_cmd_allo(session, command).await,
        Rest => handle_cmd_rest(session, command),
        Rnfr => handle_cmd_rnfr(session, command).await,
        Rnto => handle_cmd_rnto(session, command).await,
        Abor => handle_cmd_abor(session).await,
        Dele => {
            let path = session.directory.delete_file(require_arg(command)?).await?;
            Ok(CommandResult::reply(
                ReplyCode::FileActionOkay,
                format!("Deleted {path}"),
            ))
        }
        Rmd => {
            let path = session.directory.remove_directory(require_arg(command)?).await?;
            Ok(CommandResult::reply(
                ReplyCode::FileActionOkay,
                format!("Removed directory {path}"),
            ))
        }
        Mkd => {
            let path = session.directory.make_directory(require_arg(command)?).await?;
            Ok(CommandResult::reply(
                ReplyCode::PathCreated,
                format!("\"{}\" created", quote_path(&path)),
            ))
        }
        Pwd => Ok(CommandResult::reply(
            ReplyCode::PathCreated,
            format!("\"{}\" is the current directory", quote_path(&session.directory.pwd())),
        )),
        Size => {
            let size = session.directory.size(require_arg(command)?).await?;
            Ok(CommandResult::reply(ReplyCode::FileStatus, size.to_string()))
        }
        Syst => Ok(CommandResult::reply(ReplyCode::SystemType, "UNIX Type: L8")),
        Stat => handle_cmd_stat(session, ctx, command).await,
        Help | SiteHelp => {
            let topic = if command.code() == SiteHelp { "SITE" } else { command.arg() };
            Ok(CommandResult::from_reply(Reply::multiline(
                ReplyCode::HelpMessage,
                ctx.business.help_message(topic),
            )))
        }
        Noop => Ok(CommandResult::reply(ReplyCode::CommandOkay, "NOOP ok")),
        Feat => {
            let lines = std::iter::once("Extensions supported:")
                .chain(FEATURES.iter().copied())
                .chain(std::iter::once("End"));
            Ok(CommandResult::from_reply(Reply::multiline(
                ReplyCode::SystemStatus,
                lines,
            )))
        }
        Opts => handle_cmd_opts(command),
        Auth => handle_cmd_auth(session, ctx, command).await,
        Pbsz => handle_cmd_pbsz(session, command),
        Prot => handle_cmd_prot(session, ctx, command),
        Ccc => handle_cmd_ccc(session, ctx),
        InternalShutdown => handle_site_shutdown(session, ctx, command),
        LimitBandwidth => handle_site_limit_bandwidth(session, ctx, command).await,
        Site => Err(ProtocolError::MissingArgument("SITE".into()).into()),
        Unknown => Err(ProtocolError::UnknownCommand(command.verb().to_string()).into()),
        Connection | IncorrectSequence => {
            Err(ProtocolError::BadSequence(command.verb().to_string()).into())
        }
    }
}

fn require_arg(command: &Command) -> Result<&str, CommandError> {
    if command.has_arg() {
        Ok(command.arg())
    } else {
        Err(ProtocolError::MissingArgument(command.verb().to_string()).into())
    }
}

/// RFC 959 quoting for 257 replies
fn quote_path(path: &str) -> String {
    path.replace('"', "\"\"")
}

// --------------------
// Access control
// --------------------

/// Post-identification: root the directory view and report 230.
async fn complete_login(session: &mut Session) -> HandlerResult {
    let root = session.auth.root().unwrap_or("/").to_string();
    if let Err(e) = session.directory.initialize(&root).await {
        warn!("Cannot prepare root {} for {}: {}", root, session.peer(), e);
        session.auth.clear();
        return Err(e.into());
    }
    let user = session.auth.user().unwrap_or_default().to_string();
    info!("User {} logged in from {}", user, session.peer());
    Ok(CommandResult::reply(
        ReplyCode::UserLoggedIn,
        format!("User {user} logged in"),
    ))
}

/// Handles the USER command: restarts the login handshake for a new user.
async fn handle_cmd_user(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    let user = require_arg(command)?;
    match session.auth.set_user(ctx.business.as_ref(), user)? {
        AuthStep::Identified => complete_login(session).await,
        step => Ok(CommandResult::reply(
            step.reply_code(),
            format!("User {user} OK. Password required"),
        )),
    }
}

/// Handles the PASS command. A pending account arms ACCT as the only follower.
async fn handle_cmd_pass(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    match session.auth.set_password(ctx.business.as_ref(), command.arg())? {
        AuthStep::Identified => complete_login(session).await,
        step => {
            session.set_extra_next_command(CommandCode::Acct);
            Ok(CommandResult::reply(
                step.reply_code(),
                "Password OK. Account required",
            ))
        }
    }
}

/// Handles the ACCT command.
async fn handle_cmd_acct(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    let account = require_arg(command)?;
    session.auth.set_account(ctx.business.as_ref(), account)?;
    complete_login(session).await
}

async fn handle_cmd_cwd(session: &mut Session, command: &Command) -> HandlerResult {
    let path = session.directory.change_directory(require_arg(command)?).await?;
    Ok(CommandResult::reply(
        ReplyCode::FileActionOkay,
        format!("Directory changed to {path}"),
    ))
}

async fn handle_cmd_cdup(session: &mut Session) -> HandlerResult {
    let path = session.directory.change_parent().await?;
    Ok(CommandResult::reply(
        ReplyCode::FileActionOkay,
        format!("Directory changed to {path}"),
    ))
}

/// Handles the REIN command: aborts any transfer and forgets the login.
async fn handle_cmd_rein(session: &mut Session, ctx: &ServerContext) -> HandlerResult {
    let aborted = session.transfer.abort(false).await;
    session.reinit(ctx);
    Ok(CommandResult::from_replies(aborted)
        .then(Reply::new(ReplyCode::ServiceReady, "Service ready for new user")))
}

/// Handles the QUIT command: aborts any transfer and closes the connection.
async fn handle_cmd_quit(session: &mut Session) -> HandlerResult {
    let aborted = session.transfer.abort(false).await;
    info!("Client {} requested to quit", session.peer());
    Ok(CommandResult::from_replies(aborted)
        .then(Reply::new(ReplyCode::ClosingControlConnection, "Goodbye"))
        .with_action(ControlAction::Close))
}

// --------------------
// Transfer parameters
// --------------------

/// Handles PORT and EPRT.
fn handle_cmd_port(session: &mut Session, command: &Command) -> HandlerResult {
    let arg = require_arg(command)?;
    let remote = if command.code() == CommandCode::Eprt {
        parse_eprt_argument(arg)?
    } else {
        parse_port_argument(arg)?
    };
    session.data.set_active(remote)?;
    Ok(CommandResult::reply(
        ReplyCode::CommandOkay,
        format!("{} command successful", command.code()),
    ))
}

async fn handle_cmd_pasv(session: &mut Session, ctx: &ServerContext) -> HandlerResult {
    let parent = session.cancel_token().clone();
    let passive = session.data.set_passive(&ctx.data, &parent, false).await?;
    let IpAddr::V4(ip) = passive.published.ip().to_canonical() else {
        session.data.clear();
        return Err(TransferError::DataChannelSetupFailed(
            "PASV needs an IPv4 address, use EPSV".into(),
        )
        .into());
    };
    Ok(CommandResult::reply(
        ReplyCode::EnteringPassiveMode,
        format!(
            "Entering Passive Mode ({})",
            format_pasv_address(ip, passive.published.port())
        ),
    ))
}

async fn handle_cmd_epsv(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    match parse_epsv_argument(command.arg())? {
        EpsvRequest::All => {
            session.data.set_epsv_all();
            return Ok(CommandResult::reply(
                ReplyCode::CommandOkay,
                "EPSV ALL command successful",
            ));
        }
        EpsvRequest::Protocol(proto) => {
            let family = if session.local().ip().to_canonical().is_ipv4() { 1 } else { 2 };
            if proto != family {
                return Err(TransferError::UnsupportedNetworkProtocol.into());
            }
        }
        EpsvRequest::Any => {}
    }
    let parent = session.cancel_token().clone();
    let passive = session.data.set_passive(&ctx.data, &parent, true).await?;
    Ok(CommandResult::reply(
        ReplyCode::EnteringExtendedPassiveMode,
        format!(
            "Entering Extended Passive Mode {}",
            format_epsv_port(passive.published.port())
        ),
    ))
}

/// Handles the TYPE command. ASCII is recorded but data is moved unconverted.
fn handle_cmd_type(session: &mut Session, command: &Command) -> HandlerResult {
    let transfer_type = TransferType::parse(command.arg())?;
    session.data.set_transfer_type(transfer_type);
    Ok(CommandResult::reply(
        ReplyCode::CommandOkay,
        format!("Type set to {transfer_type}"),
    ))
}

fn handle_cmd_stru(session: &mut Session, command: &Command) -> HandlerResult {
    let structure = TransferStructure::parse(command.arg())?;
    session.data.set_structure(structure);
    Ok(CommandResult::reply(
        ReplyCode::CommandOkay,
        format!("Structure set to {structure}"),
    ))
}

fn handle_cmd_mode(session: &mut Session, command: &Command) -> HandlerResult {
    let mode = TransferMode::parse(command.arg())?;
    session.data.set_mode(mode);
    Ok(CommandResult::reply(
        ReplyCode::CommandOkay,
        format!("Mode set to {mode}"),
    ))
}

// --------------------
// Transfers
// --------------------

fn ensure_data_configured(session: &Session) -> Result<(), CommandError> {
    if session.data.is_configured() {
        Ok(())
    } else {
        Err(TransferError::NoDataConnection.into())
    }
}

/// Hand `job` to a transfer task and announce it with 150.
///
/// The task establishes the data connection itself, so the control loop keeps
/// reading commands meanwhile and ABOR can cancel the wait. A connection that
/// never comes up ends the transfer with 425; the closing 226/426 comes from
/// the control loop when the task finishes.
async fn start_transfer(
    session: &mut Session,
    ctx: &ServerContext,
    job: TransferJob,
    announcement: String,
) -> HandlerResult {
    let pending = session.data.take_pending(&ctx.data)?;
    let limits = *ctx.runtime.read().await;
    let shaper = session.traffic_shaper(ctx, limits.session_read_limit, limits.session_write_limit);
    let parent = session.cancel_token().clone();
    let peer = session.peer();
    session
        .transfer
        .start(job, DataSource::Pending(pending), shaper, ctx.config.block_size, &parent, peer);
    Ok(CommandResult::reply(ReplyCode::FileStatusOkay, announcement))
}

/// Release the pending data addressing when a transfer command fails early.
fn abandon_data<T>(session: &mut Session, err: StorageError) -> Result<T, CommandError> {
    session.data.clear();
    Err(err.into())
}

fn opening_message(session: &Session, what: &str) -> String {
    format!(
        "Opening {} mode data connection for {}",
        session.data.transfer_type(),
        what
    )
}

/// Handles the RETR command, honouring a pending restart marker.
async fn handle_cmd_retr(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    let path = require_arg(command)?;
    ensure_data_configured(session)?;
    let offset = session.restart.take();
    let file = match session.directory.open_file(path, OpenMode::Read, offset).await {
        Ok(file) => file,
        Err(e) => return abandon_data(session, e),
    };
    let message = opening_message(session, file.path());
    start_transfer(session, ctx, TransferJob::Retrieve(file), message).await
}

/// Handles STOR and APPE. A restart marker turns either into an offset write.
async fn handle_cmd_stor(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    let path = require_arg(command)?;
    ensure_data_configured(session)?;
    let offset = session.restart.take();
    let mode = match (command.code(), offset) {
        (CommandCode::Appe, 0) => OpenMode::Append,
        _ => OpenMode::Write,
    };
    let file = match session.directory.open_file(path, mode, offset).await {
        Ok(file) => file,
        Err(e) => return abandon_data(session, e),
    };
    let message = opening_message(session, file.path());
    start_transfer(session, ctx, TransferJob::Store(file), message).await
}

/// Handles the STOU command: the generated name is part of the 150 reply.
async fn handle_cmd_stou(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    ensure_data_configured(session)?;
    session.restart.clear();
    let hint = command.has_arg().then(|| command.arg());
    let file = match session.directory.unique_file(hint).await {
        Ok(file) => file,
        Err(e) => return abandon_data(session, e),
    };
    let name = file_name(file.path()).to_string();
    start_transfer(session, ctx, TransferJob::Store(file), format!("FILE: {name}")).await
}

/// Handles LIST and NLST. `ls`-style flags in the argument are ignored.
async fn handle_cmd_list(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    ensure_data_configured(session)?;
    let path = command
        .args()
        .iter()
        .find(|arg| !arg.starts_with('-'))
        .map(String::as_str);
    let listed = if command.code() == CommandCode::Nlst {
        session.directory.list(path).await
    } else {
        session.directory.list_full(path).await
    };
    let lines = match listed {
        Ok(lines) => lines,
        Err(e) => return abandon_data(session, e),
    };
    let message = format!("Opening ASCII mode data connection for file list ({} entries)", lines.len());
    start_transfer(session, ctx, TransferJob::Listing(lines), message).await
}

/// Handles the ALLO command against the free space the directory reports.
async fn handle_cmd_allo(session: &mut Session, command: &Command) -> HandlerResult {
    let requested: u64 = command
        .args()
        .first()
        .ok_or_else(|| ProtocolError::MissingArgument("ALLO".into()))?
        .parse()
        .map_err(|_| ProtocolError::InvalidArgument(command.arg().to_string()))?;
    match session.directory.free_space().await? {
        Some(free) if requested > free => Err(StorageError::InsufficientStorage.into()),
        Some(_) => Ok(CommandResult::reply(
            ReplyCode::CommandOkay,
            "ALLO command successful",
        )),
        None => Ok(CommandResult::reply(
            ReplyCode::CommandSuperfluous,
            "No storage allocation necessary",
        )),
    }
}

fn handle_cmd_rest(session: &mut Session, command: &Command) -> HandlerResult {
    let offset: u64 = require_arg(command)?
        .parse()
        .map_err(|_| ProtocolError::InvalidArgument(command.arg().to_string()))?;
    session
        .restart
        .set_marker(offset, session.data.mode(), session.data.structure())?;
    Ok(CommandResult::reply(
        ReplyCode::FileActionPending,
        format!("Restarting at {offset}. Send STORE or RETRIEVE"),
    ))
}

async fn handle_cmd_rnfr(session: &mut Session, command: &Command) -> HandlerResult {
    let path = session.directory.existing(require_arg(command)?).await?;
    session.set_rename_from(Some(path));
    Ok(CommandResult::reply(
        ReplyCode::FileActionPending,
        "File exists, ready for destination name",
    ))
}

async fn handle_cmd_rnto(session: &mut Session, command: &Command) -> HandlerResult {
    let to = require_arg(command)?;
    let from = session
        .take_rename_from()
        .ok_or_else(|| ProtocolError::BadSequence("RNFR required first".into()))?;
    let renamed = session.directory.rename(&from, to).await?;
    Ok(CommandResult::reply(
        ReplyCode::FileActionOkay,
        format!("Renamed {from} to {renamed}"),
    ))
}

/// Handles the ABOR command: 426 for the interrupted transfer, then 226.
async fn handle_cmd_abor(session: &mut Session) -> HandlerResult {
    let replies = session.transfer.abort(true).await;
    session.data.clear();
    session.restart.clear();
    Ok(CommandResult::from_replies(replies))
}

// --------------------
// Informational
// --------------------

/// Handles the STAT command: session status, or a listing when given a path.
async fn handle_cmd_stat(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    if command.has_arg() {
        if !session.auth.is_identified() {
            return Err(AuthError::NotLoggedIn.into());
        }
        let mut lines = vec![format!("Status of {}:", command.arg())];
        lines.extend(session.directory.list_full(Some(command.arg())).await?);
        lines.push("End of status".to_string());
        return Ok(CommandResult::from_reply(Reply::multiline(
            ReplyCode::FileStatus,
            lines,
        )));
    }

    let login = match session.auth.user() {
        Some(user) if session.auth.is_identified() => format!("Logged in as {user}"),
        _ => "Not logged in".to_string(),
    };
    let channel = if session.data.is_passive() {
        "passive"
    } else if session.data.is_active() {
        "active"
    } else {
        "not configured"
    };
    let monitor = session.monitor();
    let lines = vec![
        "wharf-ftpd status:".to_string(),
        format!("Connected to {}", session.peer()),
        login,
        format!(
            "TYPE: {}, STRUcture: {}, MODE: {}",
            session.data.transfer_type(),
            session.data.structure(),
            session.data.mode()
        ),
        format!(
            "Data connection: {}, protection: {}",
            channel,
            if session.data.tls_required() { "private" } else { "clear" }
        ),
        format!("Transfer state: {:?}", session.transfer.state()),
        format!(
            "Session rates: read {} B/s, write {} B/s",
            monitor.last_read_rate(),
            monitor.last_write_rate()
        ),
        format!(
            "Server rates: read {} B/s, write {} B/s",
            ctx.global_monitor.last_read_rate(),
            ctx.global_monitor.last_write_rate()
        ),
        "End of status".to_string(),
    ];
    Ok(CommandResult::from_reply(Reply::multiline(
        ReplyCode::SystemStatus,
        lines,
    )))
}

fn handle_cmd_opts(command: &Command) -> HandlerResult {
    let upper = command.arg().to_ascii_uppercase();
    match upper.split_whitespace().collect::<Vec<_>>()[..] {
        ["UTF8", "ON"] | ["UTF8"] => Ok(CommandResult::reply(
            ReplyCode::CommandOkay,
            "Always in UTF8 mode",
        )),
        [] => Err(ProtocolError::MissingArgument("OPTS".into()).into()),
        _ => Err(ProtocolError::UnsupportedParameter(command.arg().to_string()).into()),
    }
}

// --------------------
// Security extensions
// --------------------

/// Handles the AUTH command: resets the session, then the control loop
/// performs the handshake after the 234 is flushed.
async fn handle_cmd_auth(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    let mechanism = require_arg(command)?.to_ascii_uppercase();
    if !matches!(mechanism.as_str(), "TLS" | "SSL" | "TLS-C" | "TLS-P") {
        return Err(ProtocolError::UnsupportedParameter(mechanism).into());
    }
    if ctx.tls.is_none() {
        return Err(TlsError::NotConfigured.into());
    }
    if session.is_control_tls() {
        return Err(TlsError::AlreadyActive.into());
    }
    session.transfer.abort(false).await;
    session.reinit(ctx);
    Ok(
        CommandResult::reply(ReplyCode::AuthOkay, format!("AUTH {mechanism} successful"))
            .with_action(ControlAction::UpgradeTls),
    )
}

fn handle_cmd_pbsz(session: &mut Session, command: &Command) -> HandlerResult {
    if !session.is_control_tls() {
        return Err(ProtocolError::BadSequence("PBSZ requires AUTH first".into()).into());
    }
    require_arg(command)?
        .parse::<u64>()
        .map_err(|_| ProtocolError::InvalidArgument(command.arg().to_string()))?;
    session.set_pbsz_done();
    Ok(CommandResult::reply(ReplyCode::CommandOkay, "PBSZ=0"))
}

fn handle_cmd_prot(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    if !session.is_pbsz_done() {
        return Err(TlsError::PbszRequired.into());
    }
    match require_arg(command)?.to_ascii_uppercase().as_str() {
        "P" => {
            if ctx.tls.is_none() {
                return Err(TlsError::NotConfigured.into());
            }
            session.data.set_tls_required(true);
        }
        "C" => session.data.set_tls_required(false),
        other => return Err(ProtocolError::UnsupportedParameter(other.to_string()).into()),
    }
    Ok(CommandResult::reply(
        ReplyCode::CommandOkay,
        format!("Protection level set to {}", command.arg().to_ascii_uppercase()),
    ))
}

fn handle_cmd_ccc(session: &mut Session, ctx: &ServerContext) -> HandlerResult {
    if !session.is_control_tls() {
        return Err(ProtocolError::BadSequence("control connection is not protected".into()).into());
    }
    if !ctx.config.allow_ccc {
        return Err(TlsError::CccRefused.into());
    }
    Ok(
        CommandResult::reply(ReplyCode::CommandOkay, "Control connection reverted to cleartext")
            .with_action(ControlAction::DowngradeTls),
    )
}

// --------------------
// SITE extensions
// --------------------

fn require_admin(session: &Session) -> Result<(), CommandError> {
    if session.auth.is_admin() {
        Ok(())
    } else {
        Err(AuthError::NotAdmin.into())
    }
}

/// SITE INTERNALSHUTDOWN: admin plus the configured shutdown password.
fn handle_site_shutdown(session: &mut Session, ctx: &ServerContext, command: &Command) -> HandlerResult {
    require_admin(session)?;
    let Some(expected) = ctx.config.admin_password.as_deref() else {
        return Err(CommandError::new(
            ReplyCode::RequestDenied,
            "Shutdown is disabled on this server",
        ));
    };
    if command.arg() != expected {
        warn!("Rejected shutdown request from {}", session.peer());
        return Err(CommandError::new(
            ReplyCode::NotLoggedIn,
            "Invalid shutdown password",
        ));
    }
    info!(
        "Shutdown requested by {} from {}",
        session.auth.user().unwrap_or("-"),
        session.peer()
    );
    Ok(
        CommandResult::reply(ReplyCode::ClosingControlConnection, "Server shutting down")
            .with_action(ControlAction::Shutdown),
    )
}

/// SITE LIMITBANDWIDTH `[<write> <read> [<session write> <session read>]]`
///
/// No arguments restores the limits loaded at startup.
async fn handle_site_limit_bandwidth(
    session: &mut Session,
    ctx: &ServerContext,
    command: &Command,
) -> HandlerResult {
    require_admin(session)?;
    let values = command
        .args()
        .iter()
        .map(|arg| {
            arg.parse::<i64>()
                .map_err(|_| ProtocolError::InvalidArgument(arg.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut runtime = ctx.runtime.write().await;
    match values[..] {
        [] => *runtime = ctx.runtime_defaults,
        [write, read] => {
            runtime.global_write_limit = write;
            runtime.global_read_limit = read;
        }
        [write, read, session_write, session_read] => {
            runtime.global_write_limit = write;
            runtime.global_read_limit = read;
            runtime.session_write_limit = session_write;
            runtime.session_read_limit = session_read;
        }
        _ => {
            return Err(ProtocolError::InvalidArgument(format!(
                "expected 0, 2 or 4 values, got {}",
                values.len()
            ))
            .into());
        }
    }
    ctx.global_monitor
        .configure(runtime.global_read_limit, runtime.global_write_limit);
    session
        .monitor()
        .configure(runtime.session_read_limit, runtime.session_write_limit);
    info!(
        "Bandwidth limits changed by {}: global write {} read {}, session write {} read {}",
        session.peer(),
        runtime.global_write_limit,
        runtime.global_read_limit,
        runtime.session_write_limit,
        runtime.session_read_limit
    );
    Ok(CommandResult::reply(
        ReplyCode::CommandOkay,
        format!(
            "Bandwidth limits: global write {}, read {}; session write {}, read {}",
            runtime.global_write_limit,
            runtime.global_read_limit,
            runtime.session_write_limit,
            runtime.session_read_limit
        ),
    ))
}
