//! Module `state`
//!
//! Defines the `Session` struct: everything one control connection owns,
//! including its command history, login state, directory view, data connection
//! settings and the transfer in progress.

use log::debug;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::auth::Authentication;
use crate::middleware::rate_limit::DEFAULT_CHECK_INTERVAL;
use crate::middleware::{ThroughputMonitor, TrafficShaper};
use crate::protocol::{Command, CommandCode, Reply, is_next_command_valid};
use crate::server::ServerContext;
use crate::storage::FtpDirectory;
use crate::transfer::{DataConnection, Restart, TransferControl};

/// State of one control connection.
///
/// `previous` always holds the command that was current before `current`.
pub struct Session {
    id: u64,
    peer: SocketAddr,
    local: SocketAddr,
    current: Command,
    previous: Command,
    extra_next: Option<CommandCode>,
    last_reply: Option<Reply>,
    pub auth: Authentication,
    pub directory: Box<dyn FtpDirectory>,
    pub data: DataConnection,
    pub restart: Restart,
    pub transfer: TransferControl,
    rename_from: Option<String>,
    control_tls: bool,
    pbsz_done: bool,
    monitor: Arc<ThroughputMonitor>,
    cancel: CancellationToken,
}

impl Session {
    /// Fresh session whose current command is the `Connection` pseudo-command.
    pub fn new(id: u64, local: SocketAddr, peer: SocketAddr, ctx: &ServerContext) -> Self {
        let cancel = ctx.force_shutdown.child_token();
        let monitor = Arc::new(ThroughputMonitor::unlimited(format!("session-{id}")));
        monitor.spawn_reset_task(DEFAULT_CHECK_INTERVAL, cancel.clone());
        Self {
            id,
            peer,
            local,
            current: Command::synthetic(CommandCode::Connection),
            previous: Command::synthetic(CommandCode::Connection),
            extra_next: None,
            last_reply: None,
            auth: ctx.business.new_authentication(),
            directory: ctx.business.new_directory(),
            data: DataConnection::new(id, local, peer),
            restart: ctx.business.new_restart(),
            transfer: TransferControl::new(),
            rename_from: None,
            control_tls: false,
            pbsz_done: false,
            monitor,
            cancel,
        }
    }

    // --------------------
    // Command sequencing
    // --------------------

    pub fn current_command(&self) -> &Command {
        &self.current
    }

    pub fn previous_command(&self) -> &Command {
        &self.previous
    }

    /// Make `command` current; the old current becomes previous.
    pub fn set_next_command(&mut self, command: Command) {
        self.previous = std::mem::replace(&mut self.current, command);
    }

    /// Undo the last `set_next_command`.
    pub fn set_previous_as_current(&mut self) {
        self.current = self.previous.clone();
    }

    /// Arm a one-shot override for the next sequencing check.
    pub fn set_extra_next_command(&mut self, code: CommandCode) {
        self.extra_next = Some(code);
    }

    pub fn extra_next_command(&self) -> Option<CommandCode> {
        self.extra_next
    }

    /// Whether `next` may follow the current command.
    ///
    /// Special commands pass without touching the override; anything else
    /// consumes it.
    pub fn is_next_command_valid(&mut self, next: CommandCode) -> bool {
        if next.is_special() {
            return true;
        }
        let extra = self.extra_next.take();
        is_next_command_valid(self.current.code(), next, extra)
    }

    pub fn last_reply(&self) -> Option<&Reply> {
        self.last_reply.as_ref()
    }

    pub fn set_last_reply(&mut self, reply: Reply) {
        self.last_reply = Some(reply);
    }

    // --------------------
    // Identity and addresses
    // --------------------

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local(&self) -> SocketAddr {
        self.local
    }

    /// Parent token for everything this session spawns
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // --------------------
    // Rename and TLS state
    // --------------------

    pub fn set_rename_from(&mut self, path: Option<String>) {
        self.rename_from = path;
    }

    pub fn take_rename_from(&mut self) -> Option<String> {
        self.rename_from.take()
    }

    pub fn is_control_tls(&self) -> bool {
        self.control_tls
    }

    pub fn set_control_tls(&mut self, active: bool) {
        self.control_tls = active;
        if !active {
            self.pbsz_done = false;
        }
    }

    pub fn is_pbsz_done(&self) -> bool {
        self.pbsz_done
    }

    pub fn set_pbsz_done(&mut self) {
        self.pbsz_done = true;
    }

    // --------------------
    // Throughput
    // --------------------

    pub fn monitor(&self) -> &Arc<ThroughputMonitor> {
        &self.monitor
    }

    /// Shaper for the next transfer, picking up the current session limits.
    pub fn traffic_shaper(&self, ctx: &ServerContext, read_limit: i64, write_limit: i64) -> TrafficShaper {
        self.monitor.configure(read_limit, write_limit);
        TrafficShaper::new(Arc::clone(&self.monitor), Arc::clone(&ctx.global_monitor))
    }

    // --------------------
    // Lifecycle
    // --------------------

    /// REIN and AUTH: back to the pre-login state. The command history is kept
    /// so the reinitialising command stays current.
    pub fn reinit(&mut self, ctx: &ServerContext) {
        debug!("Reinitialising session {} for {}", self.id, self.peer);
        self.auth.clear();
        self.directory = ctx.business.new_directory();
        self.data.reinit();
        self.restart = ctx.business.new_restart();
        self.rename_from = None;
        self.extra_next = None;
        self.pbsz_done = false;
    }

    /// Control connection closing: abort the transfer and release every
    /// data-side resource.
    pub async fn close(&mut self) {
        self.transfer.abort(false).await;
        self.data.clear();
        self.auth.clear();
        self.restart.clear();
        self.rename_from = None;
        self.cancel.cancel();
    }
}
