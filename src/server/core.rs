use anyhow::Context;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::auth::{BusinessHandler, DefaultBusinessHandler};
use crate::client::handle_client;
use crate::config::ServerConfig;
use crate::middleware::ThroughputMonitor;
use crate::middleware::rate_limit::DEFAULT_CHECK_INTERVAL;
use crate::server::context::ServerContext;
use crate::server::tls::load_tls_acceptor;
use crate::transfer::{DataResources, PassivePortAllocator, SessionReferenceTable};

pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    tracker: TaskTracker,
}

impl Server {
    /// Validate the configuration, prepare the shared resources and bind the
    /// control listener.
    pub async fn bind(config: ServerConfig) -> anyhow::Result<Self> {
        let business = Arc::new(DefaultBusinessHandler::new(
            &config.startup.users,
            config.startup.server_root_path(),
        ));
        Self::with_business(config, business).await
    }

    /// Same as [`Server::bind`] with a caller-supplied policy handler.
    pub async fn with_business(config: ServerConfig, business: Arc<dyn BusinessHandler>) -> anyhow::Result<Self> {
        config.validate()?;
        let (startup, runtime) = config.split();
        let runtime_defaults = *runtime.read().await;

        let root = startup.server_root_path();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("cannot create server root {}", root.display()))?;
        info!("Server root directory: {}", root.display());

        let tls = match (&startup.tls_cert_file, &startup.tls_key_file) {
            (Some(cert), Some(key)) => {
                let acceptor = load_tls_acceptor(cert, key)
                    .with_context(|| format!("cannot load TLS material from {}", cert.display()))?;
                info!("TLS enabled with certificate {}", cert.display());
                Some(acceptor)
            }
            _ => None,
        };

        let data = DataResources {
            ports: Arc::new(PassivePortAllocator::new(
                startup.passive_port_min,
                startup.passive_port_max,
            )?),
            references: Arc::new(SessionReferenceTable::new()),
            passive_address: startup.passive_address,
            data_timeout: startup.data_timeout(),
            tls: tls.clone(),
        };

        let global_monitor = Arc::new(ThroughputMonitor::new(
            "global",
            runtime_defaults.global_read_limit,
            runtime_defaults.global_write_limit,
        ));

        let socket = startup.control_socket();
        let listener = TcpListener::bind(&socket)
            .await
            .with_context(|| format!("failed to bind control socket {socket}"))?;
        info!("Server bound to {}", listener.local_addr()?);

        let ctx = Arc::new(ServerContext::new(
            startup,
            runtime,
            runtime_defaults,
            data,
            global_monitor,
            business,
            tls,
            CancellationToken::new(),
        ));

        Ok(Self {
            listener,
            ctx,
            tracker: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Cancelling this token starts the graceful shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.shutdown.clone()
    }

    /// Accept control connections until shutdown is requested, then drain.
    ///
    /// Idle sessions close at once; running transfers get the configured grace
    /// period before everything is cancelled.
    pub async fn run(self) -> anyhow::Result<()> {
        let Self {
            listener,
            ctx,
            tracker,
        } = self;

        ctx.global_monitor
            .spawn_reset_task(DEFAULT_CHECK_INTERVAL, ctx.force_shutdown.clone());

        info!(
            "Starting wharf-ftpd on {} (max {} clients)",
            listener.local_addr()?,
            ctx.config.max_clients
        );

        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracker.spawn(handle_client(stream, peer, Arc::clone(&ctx)));
                    }
                    Err(e) => error!("Error accepting connection: {}", e),
                },
            }
        }

        drop(listener);
        tracker.close();
        info!("Listener closed, waiting for {} sessions", ctx.active_sessions());

        let grace = ctx.config.shutdown_grace();
        if tokio::time::timeout(grace, tracker.wait()).await.is_err() {
            warn!(
                "{} sessions still running after {:?}, forcing shutdown",
                ctx.active_sessions(),
                grace
            );
            ctx.force_shutdown.cancel();
            tracker.wait().await;
        }
        ctx.force_shutdown.cancel();
        info!("Server stopped");
        Ok(())
    }
}
