//! Shared server state
//!
//! Everything a control connection needs from the process: configuration,
//! the data-connection resources, the global throughput monitor, the business
//! handler and the shutdown tokens.

use log::info;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;

use crate::auth::BusinessHandler;
use crate::config::{RuntimeConfig, SharedRuntimeConfig, StartupConfig};
use crate::middleware::ThroughputMonitor;
use crate::transfer::DataResources;

pub struct ServerContext {
    pub config: StartupConfig,
    pub runtime: SharedRuntimeConfig,
    /// Limits as loaded at startup; `SITE LIMITBANDWIDTH` without arguments restores them
    pub runtime_defaults: RuntimeConfig,
    pub data: DataResources,
    pub global_monitor: Arc<ThroughputMonitor>,
    pub business: Arc<dyn BusinessHandler>,
    pub tls: Option<TlsAcceptor>,
    /// Stop accepting and close idle sessions
    pub shutdown: CancellationToken,
    /// Close everything now, running transfers included
    pub force_shutdown: CancellationToken,
    active_sessions: AtomicUsize,
    next_session_id: AtomicU64,
}

impl ServerContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: StartupConfig,
        runtime: SharedRuntimeConfig,
        runtime_defaults: RuntimeConfig,
        data: DataResources,
        global_monitor: Arc<ThroughputMonitor>,
        business: Arc<dyn BusinessHandler>,
        tls: Option<TlsAcceptor>,
        shutdown: CancellationToken,
    ) -> Self {
        let force_shutdown = CancellationToken::new();
        Self {
            config,
            runtime,
            runtime_defaults,
            data,
            global_monitor,
            business,
            tls,
            shutdown,
            force_shutdown,
            active_sessions: AtomicUsize::new(0),
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Claim a session slot, or `None` when `max_clients` are already connected.
    pub fn open_session(self: &Arc<Self>) -> Option<SessionSlot> {
        let max = self.config.max_clients;
        self.active_sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(SessionSlot {
            id: self.next_session_id.fetch_add(1, Ordering::Relaxed),
            ctx: Arc::clone(self),
        })
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Acquire)
    }

    /// Begin the two-phase shutdown
    pub fn request_shutdown(&self, reason: &str) {
        if !self.shutdown.is_cancelled() {
            info!("Shutdown requested: {}", reason);
            self.shutdown.cancel();
        }
    }
}

/// A counted session; the slot is released on drop.
pub struct SessionSlot {
    id: u64,
    ctx: Arc<ServerContext>,
}

impl SessionSlot {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        self.ctx.active_sessions.fetch_sub(1, Ordering::AcqRel);
    }
}
