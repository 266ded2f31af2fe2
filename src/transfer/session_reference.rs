//! Session reference table
//!
//! Correlates an anonymously arriving data connection with the control session
//! that asked for it. Entries are keyed by the client IP and the server-side
//! socket of the data connection, captured as plain values at registration.
//!
//! Both modes look at the data connection from the server side: for passive
//! mode the server accepted it, for active mode the server initiated it. Either
//! way the client is the remote end and the server socket the local end, so one
//! canonical key serves both.

use dashmap::DashMap;
use log::{debug, warn};
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    client_ip: IpAddr,
    server_socket: SocketAddr,
}

impl SessionKey {
    pub fn new(client_ip: IpAddr, server_socket: SocketAddr) -> Self {
        Self {
            client_ip: client_ip.to_canonical(),
            server_socket: SocketAddr::new(server_socket.ip().to_canonical(), server_socket.port()),
        }
    }

    /// Key for a data connection as seen from its server-side endpoint
    pub fn from_server_side(local: SocketAddr, remote: SocketAddr) -> Self {
        Self::new(remote.ip(), local)
    }

    pub fn client_ip(&self) -> IpAddr {
        self.client_ip
    }

    pub fn server_socket(&self) -> SocketAddr {
        self.server_socket
    }
}

/// Table value: the rendezvous point of one control session
#[derive(Debug)]
pub struct SessionRef {
    session_id: u64,
    control_peer: SocketAddr,
    slot: Mutex<Option<oneshot::Sender<TcpStream>>>,
}

impl SessionRef {
    /// A reference plus the receiving half the session awaits.
    pub fn new(session_id: u64, control_peer: SocketAddr) -> (Arc<Self>, oneshot::Receiver<TcpStream>) {
        let (tx, rx) = oneshot::channel();
        let session = Arc::new(Self {
            session_id,
            control_peer,
            slot: Mutex::new(Some(tx)),
        });
        (session, rx)
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn control_peer(&self) -> SocketAddr {
        self.control_peer
    }

    /// Hand the data connection to the waiting session. Works once.
    pub fn deliver(&self, stream: TcpStream) -> Result<(), TcpStream> {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => sender.send(stream),
            None => Err(stream),
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionReferenceTable {
    entries: DashMap<SessionKey, Arc<SessionRef>>,
}

impl SessionReferenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` for the next data connection from `client_ip` on `server_socket`.
    pub fn put(
        &self,
        client_ip: IpAddr,
        server_socket: SocketAddr,
        session: Arc<SessionRef>,
    ) -> SessionKey {
        let key = SessionKey::new(client_ip, server_socket);
        if let Some(previous) = self.entries.insert(key, session) {
            warn!(
                "Replaced stale registration of session {} for {:?}",
                previous.session_id(),
                key
            );
        }
        debug!("Registered data rendezvous {:?}", key);
        key
    }

    /// Like [`put`](Self::put), but the entry is removed again when the
    /// returned guard drops without the entry having been claimed.
    pub fn register(
        self: &Arc<Self>,
        client_ip: IpAddr,
        server_socket: SocketAddr,
        session: Arc<SessionRef>,
    ) -> Registration {
        let key = self.put(client_ip, server_socket, Arc::clone(&session));
        Registration {
            table: Arc::clone(self),
            key,
            session,
        }
    }

    /// Claim the entry for an established data connection.
    ///
    /// Passive connections are accepted by the server and active ones are
    /// initiated by it, so in both modes `local` is the server socket and
    /// `remote` the client. The same canonical key therefore matches either
    /// registration.
    pub fn take_for_connection(&self, local: SocketAddr, remote: SocketAddr) -> Option<Arc<SessionRef>> {
        self.take(&SessionKey::from_server_side(local, remote))
    }

    fn take(&self, key: &SessionKey) -> Option<Arc<SessionRef>> {
        self.entries.remove(key).map(|(_, session)| session)
    }

    /// Non-destructive lookup
    pub fn peek(&self, key: &SessionKey) -> Option<Arc<SessionRef>> {
        self.entries.get(key).map(|entry| Arc::clone(entry.value()))
    }

    /// Remove a registration without claiming it. Returns whether one existed.
    pub fn delete(&self, key: &SessionKey) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A registration owned by the session that made it. Dropping it removes the
/// entry unless it was claimed, or replaced by another session's.
#[derive(Debug)]
pub struct Registration {
    table: Arc<SessionReferenceTable>,
    key: SessionKey,
    session: Arc<SessionRef>,
}

impl Registration {
    pub fn key(&self) -> SessionKey {
        self.key
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        let removed = self
            .table
            .entries
            .remove_if(&self.key, |_, current| Arc::ptr_eq(current, &self.session));
        if removed.is_some() {
            debug!("Removed unclaimed registration {:?}", self.key);
        }
    }
}
