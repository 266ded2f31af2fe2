use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use wharf_ftpd::config::UserConfig;
use wharf_ftpd::{Server, ServerConfig};

const WAIT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

fn users() -> Vec<UserConfig> {
    vec![
        UserConfig {
            name: "alice".into(),
            password: "secret".into(),
            accounts: vec!["acc1".into()],
            ..Default::default()
        },
        UserConfig {
            name: "bob".into(),
            password: "hunter2".into(),
            admin: true,
            ..Default::default()
        },
    ]
}

/// Start a server on an ephemeral control port. Each test passes its own
/// passive range so parallel tests never compete for data ports.
async fn start_server(root: &Path, passive_min: u16, tweak: impl FnOnce(&mut ServerConfig)) -> TestServer {
    let mut config = ServerConfig::default();
    config.startup.control_port = 0;
    config.startup.passive_port_min = passive_min;
    config.startup.passive_port_max = passive_min + 9;
    config.startup.server_root = root.to_string_lossy().into_owned();
    config.startup.shutdown_grace_secs = 1;
    config.startup.admin_password = Some("changeme".into());
    config.startup.users = users();
    tweak(&mut config);

    let server = Server::bind(config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_token();
    let handle = tokio::spawn(server.run());
    TestServer {
        addr,
        shutdown,
        handle,
    }
}

struct Control<S> {
    stream: BufReader<S>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Control<S> {
    fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    /// Read one (possibly multi-line) reply: code and the full text.
    async fn reply(&mut self) -> (u16, String) {
        let mut text = String::new();
        let mut line = String::new();
        timeout(WAIT, self.stream.read_line(&mut line))
            .await
            .expect("reply timed out")
            .unwrap();
        assert!(line.len() >= 4, "short reply line {line:?}");
        let code: u16 = line[..3].parse().unwrap();
        text.push_str(&line);
        if line.as_bytes()[3] == b'-' {
            let end = format!("{code} ");
            loop {
                line.clear();
                timeout(WAIT, self.stream.read_line(&mut line))
                    .await
                    .expect("reply timed out")
                    .unwrap();
                text.push_str(&line);
                if line.starts_with(&end) {
                    break;
                }
            }
        }
        (code, text)
    }

    /// The server closed the connection without sending anything more.
    async fn expect_closed(&mut self) {
        let mut line = String::new();
        let read = timeout(WAIT, self.stream.read_line(&mut line))
            .await
            .expect("connection not closed");
        assert!(matches!(read, Ok(0) | Err(_)), "unexpected line {line:?}");
    }

    async fn send(&mut self, line: &str) {
        let stream = self.stream.get_mut();
        stream.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
        stream.flush().await.unwrap();
    }

    async fn cmd(&mut self, line: &str) -> (u16, String) {
        self.send(line).await;
        self.reply().await
    }

    async fn code(&mut self, line: &str) -> u16 {
        self.cmd(line).await.0
    }
}

async fn connect(addr: SocketAddr) -> Control<TcpStream> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let mut control = Control::new(stream);
    assert_eq!(control.reply().await.0, 220);
    control
}

async fn login_bob(control: &mut Control<TcpStream>) {
    assert_eq!(control.code("USER bob").await, 331);
    assert_eq!(control.code("PASS hunter2").await, 230);
}

/// PASV and return the announced port.
async fn passive_port<S: AsyncRead + AsyncWrite + Unpin>(control: &mut Control<S>) -> u16 {
    let (code, text) = control.cmd("PASV").await;
    assert_eq!(code, 227, "{text}");
    let start = text.find('(').unwrap() + 1;
    let end = text.find(')').unwrap();
    let fields: Vec<u16> = text[start..end].split(',').map(|f| f.parse().unwrap()).collect();
    fields[4] * 256 + fields[5]
}

/// PASV and connect to the announced port.
async fn passive_data(control: &mut Control<TcpStream>) -> TcpStream {
    let port = passive_port(control).await;
    TcpStream::connect(("127.0.0.1", port)).await.unwrap()
}

fn bob_file(root: &Path, name: &str) -> std::path::PathBuf {
    root.join("bob").join(name)
}

#[tokio::test]
async fn login_with_account_step() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41000, |_| {}).await;
    let mut control = connect(server.addr).await;

    assert_eq!(control.code("USER alice").await, 331);
    assert_eq!(control.code("PASS secret").await, 332);
    assert_eq!(control.code("PWD").await, 503);
    assert_eq!(control.code("ACCT acc1").await, 230);

    let (code, text) = control.cmd("PWD").await;
    assert_eq!(code, 257);
    assert!(text.contains("\"/\""), "{text}");
    assert!(root.path().join("alice").join("acc1").is_dir());

    assert_eq!(control.code("QUIT").await, 221);
    server.shutdown.cancel();
}

#[tokio::test]
async fn login_sequence_is_enforced() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41010, |_| {}).await;
    let mut control = connect(server.addr).await;

    assert_eq!(control.code("PASS hunter2").await, 503);
    assert_eq!(control.code("FROB").await, 500);
    assert_eq!(control.code("NOOP").await, 200);

    assert_eq!(control.code("USER bob").await, 331);
    assert_eq!(control.code("PASS wrong").await, 530);
    // A rejected password restarts the handshake
    assert_eq!(control.code("PASS hunter2").await, 503);
    login_bob(&mut control).await;
    assert_eq!(control.code("SYST").await, 215);
    server.shutdown.cancel();
}

#[tokio::test]
async fn passive_store_retrieve_and_list() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41020, |_| {}).await;
    let mut control = connect(server.addr).await;
    login_bob(&mut control).await;

    let mut data = passive_data(&mut control).await;
    assert_eq!(control.code("STOR hello.txt").await, 150);
    data.write_all(b"hello wharf").await.unwrap();
    data.shutdown().await.unwrap();
    drop(data);
    assert_eq!(control.reply().await.0, 226);
    assert_eq!(
        std::fs::read(root.path().join("bob").join("hello.txt")).unwrap(),
        b"hello wharf"
    );

    let mut data = passive_data(&mut control).await;
    assert_eq!(control.code("RETR hello.txt").await, 150);
    let mut received = Vec::new();
    timeout(WAIT, data.read_to_end(&mut received)).await.unwrap().unwrap();
    assert_eq!(received, b"hello wharf");
    assert_eq!(control.reply().await.0, 226);

    let mut data = passive_data(&mut control).await;
    assert_eq!(control.code("NLST").await, 150);
    let mut listing = String::new();
    timeout(WAIT, data.read_to_string(&mut listing)).await.unwrap().unwrap();
    assert_eq!(listing, "hello.txt\r\n");
    assert_eq!(control.reply().await.0, 226);

    let (code, text) = control.cmd("SIZE hello.txt").await;
    assert_eq!((code, text.trim_end()), (213, "213 11"));
    server.shutdown.cancel();
}

#[tokio::test]
async fn transfer_without_data_setup_is_refused() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41030, |_| {}).await;
    let mut control = connect(server.addr).await;
    login_bob(&mut control).await;

    assert_eq!(control.code("RETR missing.txt").await, 425);
    let _data = passive_data(&mut control).await;
    assert_eq!(control.code("RETR missing.txt").await, 550);
    server.shutdown.cancel();
}

#[tokio::test]
async fn abort_interrupts_throttled_retrieve() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41040, |config| {
        config.startup.block_size = 1024;
        config.runtime.session_write_limit = 1024;
    })
    .await;
    std::fs::create_dir_all(root.path().join("bob")).unwrap();
    std::fs::write(root.path().join("bob").join("big.bin"), vec![7u8; 64 * 1024]).unwrap();

    let mut control = connect(server.addr).await;
    login_bob(&mut control).await;
    let _data = passive_data(&mut control).await;
    assert_eq!(control.code("RETR big.bin").await, 150);

    assert_eq!(control.code("ABOR").await, 426);
    assert_eq!(control.reply().await.0, 226);

    // Nothing left running: a second ABOR only acknowledges
    let (code, text) = control.cmd("ABOR").await;
    assert_eq!(code, 226);
    assert!(text.contains("No transfer"), "{text}");
    server.shutdown.cancel();
}

#[tokio::test]
async fn site_commands_are_admin_only() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41050, |_| {}).await;

    let mut alice = connect(server.addr).await;
    assert_eq!(alice.code("USER alice").await, 331);
    assert_eq!(alice.code("PASS secret").await, 332);
    assert_eq!(alice.code("ACCT acc1").await, 230);
    assert_eq!(alice.code("SITE LIMITBANDWIDTH 1000 1000").await, 530);
    assert_eq!(alice.code("SITE").await, 501);
    assert_eq!(alice.code("SITE CHMOD 755 x").await, 502);
    assert_eq!(alice.code("SITE HELP").await, 214);

    let mut bob = connect(server.addr).await;
    login_bob(&mut bob).await;
    assert_eq!(bob.code("SITE LIMITBANDWIDTH 1000 2000").await, 200);
    assert_eq!(bob.code("SITE LIMITBANDWIDTH").await, 200);
    server.shutdown.cancel();
}

#[tokio::test]
async fn site_shutdown_stops_the_server() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41060, |_| {}).await;

    let mut idle = connect(server.addr).await;
    let mut admin = connect(server.addr).await;
    login_bob(&mut admin).await;
    assert_eq!(admin.code("SITE INTERNALSHUTDOWN nope").await, 530);
    assert_eq!(admin.code("SITE INTERNALSHUTDOWN changeme").await, 221);

    // Idle sessions are told the service is going away
    assert_eq!(idle.reply().await.0, 421);
    timeout(WAIT, server.handle).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn client_limit_is_enforced() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41070, |config| config.startup.max_clients = 1).await;

    let _first = connect(server.addr).await;
    let mut second = Control::new(TcpStream::connect(server.addr).await.unwrap());
    assert_eq!(second.reply().await.0, 421);
    server.shutdown.cancel();
}

struct TlsMaterial {
    _dir: tempfile::TempDir,
    cert_path: std::path::PathBuf,
    key_path: std::path::PathBuf,
    cert: rcgen::Certificate,
}

fn tls_material() -> TlsMaterial {
    let dir = tempfile::tempdir().unwrap();
    let key_pair = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec!["localhost".to_string()]).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, cert.pem()).unwrap();
    std::fs::write(&key_path, key_pair.serialize_pem()).unwrap();
    TlsMaterial {
        _dir: dir,
        cert_path,
        key_path,
        cert,
    }
}

async fn start_tls_server(root: &Path, passive_min: u16, material: &TlsMaterial) -> TestServer {
    let (cert, key) = (material.cert_path.clone(), material.key_path.clone());
    start_server(root, passive_min, |config| {
        config.startup.tls_cert_file = Some(cert);
        config.startup.tls_key_file = Some(key);
    })
    .await
}

/// Send AUTH TLS and run the client side of the handshake.
async fn secure(
    mut control: Control<TcpStream>,
    material: &TlsMaterial,
) -> Control<tokio_rustls::client::TlsStream<TcpStream>> {
    use tokio_rustls::TlsConnector;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    assert_eq!(control.code("AUTH TLS").await, 234);
    let mut roots = RootCertStore::empty();
    roots.add(material.cert.der().clone()).unwrap();
    let client_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(client_config));
    let tcp = control.stream.into_inner();
    let tls = connector
        .connect(ServerName::try_from("localhost").unwrap(), tcp)
        .await
        .unwrap();
    Control::new(tls)
}

#[tokio::test]
async fn auth_tls_secures_the_control_connection() {
    let root = tempfile::tempdir().unwrap();
    let material = tls_material();
    let server = start_tls_server(root.path(), 41080, &material).await;

    let mut control = connect(server.addr).await;
    assert_eq!(control.code("PBSZ 0").await, 503);
    let mut control = secure(control, &material).await;

    assert_eq!(control.code("PBSZ 0").await, 200);
    assert_eq!(control.code("PROT P").await, 200);
    assert_eq!(control.code("USER bob").await, 331);
    assert_eq!(control.code("PASS hunter2").await, 230);
    assert_eq!(control.code("AUTH TLS").await, 534);
    assert_eq!(control.code("CCC").await, 534);
    server.shutdown.cancel();
}

#[tokio::test]
async fn pbsz_must_be_followed_by_prot() {
    let root = tempfile::tempdir().unwrap();
    let material = tls_material();
    let server = start_tls_server(root.path(), 41160, &material).await;

    let control = connect(server.addr).await;
    let mut control = secure(control, &material).await;
    assert_eq!(control.code("PBSZ 0").await, 200);
    assert_eq!(control.code("USER bob").await, 503);
    assert_eq!(control.code("PROT C").await, 200);
    assert_eq!(control.code("USER bob").await, 331);
    assert_eq!(control.code("PASS hunter2").await, 230);
    server.shutdown.cancel();
}

#[tokio::test]
async fn auth_without_tls_material_is_refused() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41090, |_| {}).await;
    let mut control = connect(server.addr).await;
    assert_eq!(control.code("AUTH TLS").await, 431);
    assert_eq!(control.code("AUTH KERBEROS").await, 504);
    server.shutdown.cancel();
}

#[tokio::test]
async fn abort_cancels_the_wait_for_a_data_connection() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41100, |config| config.startup.data_timeout_secs = 4).await;
    let mut control = connect(server.addr).await;
    login_bob(&mut control).await;
    std::fs::write(bob_file(root.path(), "waiting.txt"), b"never sent").unwrap();

    // The client never connects to the announced port
    let port = passive_port(&mut control).await;
    assert_eq!(control.code("RETR waiting.txt").await, 150);

    let started = std::time::Instant::now();
    let (code, text) = control.cmd("ABOR").await;
    assert_eq!(code, 226, "{text}");
    assert!(started.elapsed() < Duration::from_secs(2));

    // No late 425 is queued behind the abort
    assert_eq!(control.code("NOOP").await, 200);
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());

    // The session is usable for the next transfer
    let mut data = passive_data(&mut control).await;
    assert_eq!(control.code("RETR waiting.txt").await, 150);
    let mut received = Vec::new();
    timeout(WAIT, data.read_to_end(&mut received)).await.unwrap().unwrap();
    assert_eq!(received, b"never sent");
    assert_eq!(control.reply().await.0, 226);
    server.shutdown.cancel();
}

#[tokio::test]
async fn missing_data_connection_ends_with_425() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41110, |config| config.startup.data_timeout_secs = 1).await;
    let mut control = connect(server.addr).await;
    login_bob(&mut control).await;

    passive_port(&mut control).await;
    assert_eq!(control.code("NLST").await, 150);
    assert_eq!(control.reply().await.0, 425);
    assert_eq!(control.code("NOOP").await, 200);
    server.shutdown.cancel();
}

#[tokio::test]
async fn idle_control_connection_is_closed() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41120, |config| config.startup.idle_timeout_secs = 1).await;
    let mut control = connect(server.addr).await;
    login_bob(&mut control).await;

    let (code, text) = control.reply().await;
    assert_eq!(code, 421, "{text}");
    control.expect_closed().await;
    server.shutdown.cancel();
}

#[tokio::test]
async fn restart_offsets_apply_to_retrieve_and_store() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41130, |_| {}).await;
    let mut control = connect(server.addr).await;
    login_bob(&mut control).await;
    std::fs::write(bob_file(root.path(), "digits.txt"), b"0123456789").unwrap();

    let mut data = passive_data(&mut control).await;
    assert_eq!(control.code("REST 5").await, 350);
    assert_eq!(control.code("RETR digits.txt").await, 150);
    let mut received = Vec::new();
    timeout(WAIT, data.read_to_end(&mut received)).await.unwrap().unwrap();
    assert_eq!(received, b"56789");
    assert_eq!(control.reply().await.0, 226);

    let mut data = passive_data(&mut control).await;
    assert_eq!(control.code("REST 4").await, 350);
    assert_eq!(control.code("STOR digits.txt").await, 150);
    data.write_all(b"XYZ").await.unwrap();
    data.shutdown().await.unwrap();
    drop(data);
    assert_eq!(control.reply().await.0, 226);
    assert_eq!(std::fs::read(bob_file(root.path(), "digits.txt")).unwrap(), b"0123XYZ");

    // Only stream mode can restart
    assert_eq!(control.code("MODE B").await, 200);
    assert_eq!(control.code("REST 2").await, 504);
    assert_eq!(control.code("MODE S").await, 200);

    // REST must be followed by a file transfer
    let _data = passive_data(&mut control).await;
    assert_eq!(control.code("REST 2").await, 350);
    assert_eq!(control.code("LIST").await, 503);
    server.shutdown.cancel();
}

#[tokio::test]
async fn active_mode_transfers_and_address_checks() {
    use tokio::net::TcpListener;

    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41140, |_| {}).await;
    let mut control = connect(server.addr).await;
    login_bob(&mut control).await;
    std::fs::write(bob_file(root.path(), "active.txt"), b"sent by the server").unwrap();

    assert_eq!(control.code("PORT 10,0,0,9,19,136").await, 501);
    assert_eq!(control.code("PORT 127,0,0,1,0,21").await, 501);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let command = format!("PORT 127,0,0,1,{},{}", port / 256, port % 256);
    assert_eq!(control.code(&command).await, 200);
    assert_eq!(control.code("RETR active.txt").await, 150);
    let (mut data, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut received = Vec::new();
    timeout(WAIT, data.read_to_end(&mut received)).await.unwrap().unwrap();
    assert_eq!(received, b"sent by the server");
    assert_eq!(control.reply().await.0, 226);

    let command = format!("EPRT |1|127.0.0.1|{port}|");
    assert_eq!(control.code(&command).await, 200);
    assert_eq!(control.code("NLST").await, 150);
    let (mut data, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    let mut listing = String::new();
    timeout(WAIT, data.read_to_string(&mut listing)).await.unwrap().unwrap();
    assert_eq!(listing, "active.txt\r\n");
    assert_eq!(control.reply().await.0, 226);
    server.shutdown.cancel();
}

#[tokio::test]
async fn epsv_all_refuses_other_data_setups() {
    let root = tempfile::tempdir().unwrap();
    let server = start_server(root.path(), 41150, |_| {}).await;
    let mut control = connect(server.addr).await;
    login_bob(&mut control).await;

    assert_eq!(control.code("EPSV ALL").await, 200);
    assert_eq!(control.code("PASV").await, 503);
    assert_eq!(control.code("PORT 127,0,0,1,200,0").await, 503);
    assert_eq!(control.code("EPRT |1|127.0.0.1|51200|").await, 503);
    let (code, text) = control.cmd("EPSV").await;
    assert_eq!(code, 229, "{text}");
    server.shutdown.cancel();
}
