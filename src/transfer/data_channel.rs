//! Data connection management
//!
//! Owns the MODE/TYPE/STRU/PROT state of a session and the active or passive
//! addressing of its next data connection. Passive listeners run as their own
//! task and hand the first connection from the control peer's IP back through
//! the session reference table.

use log::{debug, info, warn};
use std::io;
use std::mem;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::TransferError;
use crate::transfer::modes::{TransferMode, TransferStructure, TransferType};
use crate::transfer::port_allocator::PassivePortAllocator;
use crate::transfer::results::PassiveModeResult;
use crate::transfer::session_reference::{Registration, SessionKey, SessionRef, SessionReferenceTable};

/// Bind attempts per PASV/EPSV before giving up with 425
pub const PASSIVE_BIND_ATTEMPTS: usize = 3;

/// Anything a transfer can move bytes over: plain TCP or TLS
pub trait DataIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DataIo for T {}

pub type DataStream = Box<dyn DataIo>;

/// Process-wide resources data connections draw on
#[derive(Clone)]
pub struct DataResources {
    pub ports: Arc<PassivePortAllocator>,
    pub references: Arc<SessionReferenceTable>,
    pub passive_address: Option<IpAddr>,
    pub data_timeout: Duration,
    pub tls: Option<TlsAcceptor>,
}

enum DataChannel {
    None,
    Active {
        remote: SocketAddr,
    },
    Passive {
        registration: Registration,
        receiver: oneshot::Receiver<TcpStream>,
        _listener: DropGuard,
    },
}

pub struct DataConnection {
    session_id: u64,
    control_local: SocketAddr,
    control_peer: SocketAddr,
    mode: TransferMode,
    transfer_type: TransferType,
    structure: TransferStructure,
    tls_required: bool,
    epsv_all: bool,
    channel: DataChannel,
}

impl DataConnection {
    pub fn new(session_id: u64, control_local: SocketAddr, control_peer: SocketAddr) -> Self {
        Self {
            session_id,
            control_local,
            control_peer,
            mode: TransferMode::default(),
            transfer_type: TransferType::default(),
            structure: TransferStructure::default(),
            tls_required: false,
            epsv_all: false,
            channel: DataChannel::None,
        }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TransferMode) {
        self.mode = mode;
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    pub fn set_transfer_type(&mut self, transfer_type: TransferType) {
        self.transfer_type = transfer_type;
    }

    pub fn structure(&self) -> TransferStructure {
        self.structure
    }

    pub fn set_structure(&mut self, structure: TransferStructure) {
        self.structure = structure;
    }

    pub fn tls_required(&self) -> bool {
        self.tls_required
    }

    pub fn set_tls_required(&mut self, required: bool) {
        self.tls_required = required;
    }

    pub fn epsv_all(&self) -> bool {
        self.epsv_all
    }

    pub fn set_epsv_all(&mut self) {
        self.epsv_all = true;
    }

    pub fn control_peer(&self) -> SocketAddr {
        self.control_peer
    }

    pub fn is_passive(&self) -> bool {
        matches!(self.channel, DataChannel::Passive { .. })
    }

    pub fn is_active(&self) -> bool {
        matches!(self.channel, DataChannel::Active { .. })
    }

    /// Whether PORT/EPRT or PASV/EPSV was issued since the last transfer
    pub fn is_configured(&self) -> bool {
        !matches!(self.channel, DataChannel::None)
    }

    /// PORT/EPRT: remember the client's data address after checking it.
    pub fn set_active(&mut self, remote: SocketAddr) -> Result<(), TransferError> {
        if self.epsv_all {
            return Err(TransferError::ExtendedPassiveOnly);
        }
        let expected = self.control_peer.ip().to_canonical();
        let provided = remote.ip().to_canonical();
        if expected != provided {
            warn!(
                "Client {} asked for a data connection to foreign address {}",
                self.control_peer, remote
            );
            return Err(TransferError::IpMismatch { expected, provided });
        }
        if remote.port() < 1024 {
            return Err(TransferError::PrivilegedPort(remote.port()));
        }

        self.clear();
        self.channel = DataChannel::Active { remote };
        info!("Client {} set active data address {}", self.control_peer, remote);
        Ok(())
    }

    /// PASV/EPSV: bind a listener and register it for the control peer's IP.
    pub async fn set_passive(
        &mut self,
        resources: &DataResources,
        parent: &CancellationToken,
        extended: bool,
    ) -> Result<PassiveModeResult, TransferError> {
        if self.epsv_all && !extended {
            return Err(TransferError::ExtendedPassiveOnly);
        }
        self.clear();

        let bind_ip = self.control_local.ip().to_canonical();
        let published_ip = resources.passive_address.unwrap_or(bind_ip);
        if !extended && !published_ip.is_ipv4() {
            return Err(TransferError::DataChannelSetupFailed(
                "PASV needs an IPv4 address, use EPSV".into(),
            ));
        }

        let mut last_error = None;
        for attempt in 1..=PASSIVE_BIND_ATTEMPTS {
            let candidate = SocketAddr::new(bind_ip, resources.ports.next_port());
            let listener = match TcpListener::bind(candidate).await {
                Ok(listener) => listener,
                Err(e) => {
                    warn!(
                        "Passive bind {} failed (attempt {}/{}): {}",
                        candidate, attempt, PASSIVE_BIND_ATTEMPTS, e
                    );
                    last_error = Some(TransferError::PortBindingFailed(candidate, e));
                    continue;
                }
            };
            let bound = listener
                .local_addr()
                .map_err(|e| TransferError::PortBindingFailed(candidate, e))?;

            let (session, receiver) = SessionRef::new(self.session_id, self.control_peer);
            let registration = resources
                .references
                .register(self.control_peer.ip(), bound, session);
            let cancel = parent.child_token();
            tokio::spawn(run_passive_listener(
                listener,
                Arc::clone(&resources.references),
                registration.key(),
                cancel.clone(),
            ));

            self.channel = DataChannel::Passive {
                registration,
                receiver,
                _listener: cancel.drop_guard(),
            };
            info!(
                "Client {} bound to data socket {} in passive mode",
                self.control_peer, bound
            );
            return Ok(PassiveModeResult {
                bound,
                published: SocketAddr::new(published_ip, bound.port()),
            });
        }

        Err(last_error.unwrap_or(TransferError::NoAvailablePort(PASSIVE_BIND_ATTEMPTS)))
    }

    /// Drop any pending addressing, closing a passive listener and its registration.
    pub fn clear(&mut self) {
        if let DataChannel::Passive { registration, .. } =
            mem::replace(&mut self.channel, DataChannel::None)
        {
            debug!("Closing passive listener {}", registration.key().server_socket());
        }
    }

    /// Session (re)initialisation: defaults and no pending addressing
    pub fn reinit(&mut self) {
        self.clear();
        self.mode = TransferMode::default();
        self.transfer_type = TransferType::default();
        self.structure = TransferStructure::default();
        self.tls_required = false;
        self.epsv_all = false;
    }

    /// Hand the addressing of the next transfer over to whoever establishes
    /// the connection. Fails with `NoDataConnection` when none was set up.
    pub fn take_pending(&mut self, resources: &DataResources) -> Result<PendingData, TransferError> {
        let channel = mem::replace(&mut self.channel, DataChannel::None);
        if matches!(channel, DataChannel::None) {
            return Err(TransferError::NoDataConnection);
        }
        Ok(PendingData {
            channel,
            session_id: self.session_id,
            control_local: self.control_local,
            control_peer: self.control_peer,
            tls_required: self.tls_required,
            resources: resources.clone(),
        })
    }
}

/// The addressing of one transfer, detached from its session.
///
/// Dropping it before [`connect`](PendingData::connect) finishes closes the
/// passive listener and removes the registration.
pub struct PendingData {
    channel: DataChannel,
    session_id: u64,
    control_local: SocketAddr,
    control_peer: SocketAddr,
    tls_required: bool,
    resources: DataResources,
}

impl PendingData {
    /// Establish the data connection, waiting at most the data timeout.
    pub async fn connect(self) -> Result<DataStream, TransferError> {
        let Self {
            channel,
            session_id,
            control_local,
            control_peer,
            tls_required,
            resources,
        } = self;

        let stream = match channel {
            DataChannel::None => return Err(TransferError::NoDataConnection),
            DataChannel::Active { remote } => {
                connect_active(session_id, control_local, control_peer, remote, &resources).await?
            }
            DataChannel::Passive {
                registration,
                receiver,
                _listener,
            } => match timeout(resources.data_timeout, receiver).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(_)) => {
                    return Err(TransferError::DataChannelSetupFailed(
                        "passive listener closed".into(),
                    ));
                }
                Err(_) => {
                    warn!(
                        "Client {} never connected to {}",
                        control_peer,
                        registration.key().server_socket()
                    );
                    return Err(TransferError::ConnectionTimeout(resources.data_timeout));
                }
            },
        };

        if !tls_required {
            return Ok(Box::new(stream));
        }
        let acceptor = resources
            .tls
            .clone()
            .ok_or_else(|| TransferError::DataTls(io::Error::other("TLS not configured")))?;
        match timeout(resources.data_timeout, acceptor.accept(stream)).await {
            Ok(Ok(tls)) => Ok(Box::new(tls)),
            Ok(Err(e)) => Err(TransferError::DataTls(e)),
            Err(_) => Err(TransferError::ConnectionTimeout(resources.data_timeout)),
        }
    }
}

async fn connect_active(
    session_id: u64,
    control_local: SocketAddr,
    control_peer: SocketAddr,
    remote: SocketAddr,
    resources: &DataResources,
) -> Result<TcpStream, TransferError> {
    let setup = |e: io::Error| TransferError::DataChannelSetupFailed(e.to_string());
    let socket = if remote.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(setup)?;
    socket
        .bind(SocketAddr::new(local_bind_ip(control_local.ip(), remote), 0))
        .map_err(setup)?;
    let local = socket.local_addr().map_err(setup)?;

    let (session, receiver) = SessionRef::new(session_id, control_peer);
    let _registration = resources.references.register(remote.ip(), local, session);

    let stream = match timeout(resources.data_timeout, socket.connect(remote)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(setup(e)),
        Err(_) => return Err(TransferError::ConnectionTimeout(resources.data_timeout)),
    };

    let (local, peer) = (
        stream.local_addr().map_err(setup)?,
        stream.peer_addr().map_err(setup)?,
    );
    let Some(session) = resources.references.take_for_connection(local, peer) else {
        return Err(TransferError::DataChannelSetupFailed(
            "active registration lost".into(),
        ));
    };
    session
        .deliver(stream)
        .map_err(|_| TransferError::DataChannelSetupFailed("session not waiting".into()))?;
    let stream = receiver
        .await
        .map_err(|_| TransferError::DataChannelSetupFailed("session not waiting".into()))?;
    info!("Connected to client {} data port {}", control_peer, remote);
    Ok(stream)
}

/// Local address for an outbound data connection: the control connection's
/// interface, unless its family differs from the target's.
fn local_bind_ip(control_local: IpAddr, remote: SocketAddr) -> IpAddr {
    let local = control_local.to_canonical();
    match (local, remote) {
        (IpAddr::V4(_), SocketAddr::V4(_)) | (IpAddr::V6(_), SocketAddr::V6(_)) => local,
        (_, SocketAddr::V4(_)) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        (_, SocketAddr::V6(_)) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}

/// Accept loop of one passive listener.
///
/// The first connection from the registered client IP is handed over and the
/// listener closes; anything else is dropped with a warning.
async fn run_passive_listener(
    listener: TcpListener,
    references: Arc<SessionReferenceTable>,
    key: SessionKey,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Passive listener {} failed: {}", key.server_socket(), e);
                break;
            }
        };
        let local = match stream.local_addr() {
            Ok(local) => local,
            Err(e) => {
                warn!("Dropping data connection from {}: {}", peer, e);
                continue;
            }
        };

        match references.take_for_connection(local, peer) {
            Some(session) => {
                info!(
                    "Data connection from {} claimed by session {}",
                    peer,
                    session.session_id()
                );
                if session.deliver(stream).is_err() {
                    warn!(
                        "Session {} stopped waiting for its data connection",
                        session.session_id()
                    );
                }
                break;
            }
            None => warn!(
                "Rejected data connection from {} on {}: no matching session",
                peer, local
            ),
        }
    }
    debug!("Passive listener {} closed", key.server_socket());
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn resources(min: u16, max: u16) -> DataResources {
        DataResources {
            ports: Arc::new(PassivePortAllocator::new(min, max).unwrap()),
            references: Arc::new(SessionReferenceTable::new()),
            passive_address: None,
            data_timeout: Duration::from_secs(2),
            tls: None,
        }
    }

    fn local_control() -> (SocketAddr, SocketAddr) {
        (
            "127.0.0.1:2121".parse().unwrap(),
            "127.0.0.1:40000".parse().unwrap(),
        )
    }

    #[test]
    fn active_rejects_foreign_ip_and_privileged_port() {
        let (local, peer) = local_control();
        let mut data = DataConnection::new(1, local, peer);
        assert!(matches!(
            data.set_active("10.9.9.9:5000".parse().unwrap()),
            Err(TransferError::IpMismatch { .. })
        ));
        assert!(matches!(
            data.set_active("127.0.0.1:21".parse().unwrap()),
            Err(TransferError::PrivilegedPort(21))
        ));
        assert!(data.set_active("127.0.0.1:5000".parse().unwrap()).is_ok());
        assert!(data.is_active());
    }

    #[tokio::test]
    async fn passive_round_trip_and_single_registration() {
        let res = resources(41100, 41120);
        let (local, peer) = local_control();
        let cancel = CancellationToken::new();
        let mut data = DataConnection::new(1, local, peer);

        data.set_passive(&res, &cancel, false).await.unwrap();
        let second = data.set_passive(&res, &cancel, false).await.unwrap();
        assert_eq!(res.references.len(), 1);
        assert_eq!(second.published.ip(), local.ip());

        let mut client = TcpStream::connect(second.bound).await.unwrap();
        let mut server = data.take_pending(&res).unwrap().connect().await.unwrap();
        assert!(res.references.is_empty());
        assert!(!data.is_configured());

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn foreign_connection_is_not_claimed() {
        let res = resources(41150, 41160);
        let local: SocketAddr = "127.0.0.1:2121".parse().unwrap();
        // The control client sits on 127.0.0.2; a connection from 127.0.0.1 is a stranger
        let mut data = DataConnection::new(1, local, "127.0.0.2:40000".parse().unwrap());
        let cancel = CancellationToken::new();
        let passive = data.set_passive(&res, &cancel, true).await.unwrap();
        let pending = tokio::spawn(data.take_pending(&res).unwrap().connect());

        let mut stranger = TcpStream::connect(passive.bound).await.unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(stranger.read(&mut buf).await.unwrap_or(0), 0);
        assert_eq!(res.references.len(), 1);
        assert!(!pending.is_finished());

        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.2:0".parse().unwrap()).unwrap();
        let mut client = socket.connect(passive.bound).await.unwrap();
        let mut server = pending.await.unwrap().unwrap();
        assert!(res.references.is_empty());

        client.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 2];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }

    #[tokio::test]
    async fn dropping_pending_wait_releases_registration() {
        let res = resources(41170, 41180);
        let (local, peer) = local_control();
        let cancel = CancellationToken::new();
        let mut data = DataConnection::new(1, local, peer);
        let passive = data.set_passive(&res, &cancel, true).await.unwrap();

        let pending = tokio::spawn(data.take_pending(&res).unwrap().connect());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(res.references.len(), 1);
        pending.abort();
        assert!(matches!(pending.await, Err(e) if e.is_cancelled()));
        assert!(res.references.is_empty());

        // The listener went away with the wait
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(TcpStream::connect(passive.bound).await.is_err());
    }

    #[tokio::test]
    async fn passive_wait_times_out() {
        let mut res = resources(41200, 41220);
        res.data_timeout = Duration::from_millis(100);
        let (local, peer) = local_control();
        let cancel = CancellationToken::new();
        let mut data = DataConnection::new(1, local, peer);
        data.set_passive(&res, &cancel, true).await.unwrap();
        assert!(matches!(
            data.take_pending(&res).unwrap().connect().await,
            Err(TransferError::ConnectionTimeout(_))
        ));
        assert!(res.references.is_empty());
    }

    #[tokio::test]
    async fn nothing_pending_without_setup() {
        let res = resources(41190, 41195);
        let (local, peer) = local_control();
        let mut data = DataConnection::new(1, local, peer);
        assert!(matches!(
            data.take_pending(&res),
            Err(TransferError::NoDataConnection)
        ));
    }

    #[tokio::test]
    async fn active_connects_out() {
        let res = resources(41300, 41310);
        let client = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();
        let (local, _) = local_control();
        let mut data = DataConnection::new(1, local, "127.0.0.1:40001".parse().unwrap());

        data.set_active(client_addr).unwrap();
        let accept = tokio::spawn(async move { client.accept().await.unwrap() });
        let mut server = data.take_pending(&res).unwrap().connect().await.unwrap();
        let (mut accepted, _) = accept.await.unwrap();

        server.write_all(b"pong").await.unwrap();
        server.flush().await.unwrap();
        let mut buf = [0u8; 4];
        accepted.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
        assert!(res.references.is_empty());
    }

    #[tokio::test]
    async fn epsv_all_locks_out_other_modes() {
        let res = resources(41400, 41410);
        let (local, peer) = local_control();
        let cancel = CancellationToken::new();
        let mut data = DataConnection::new(1, local, peer);
        data.set_epsv_all();
        assert!(matches!(
            data.set_active("127.0.0.1:5000".parse().unwrap()),
            Err(TransferError::ExtendedPassiveOnly)
        ));
        assert!(matches!(
            data.set_passive(&res, &cancel, false).await,
            Err(TransferError::ExtendedPassiveOnly)
        ));
        assert!(data.set_passive(&res, &cancel, true).await.is_ok());
        data.reinit();
        assert!(!data.epsv_all());
        assert!(res.references.is_empty());
    }
}
