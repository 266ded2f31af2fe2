//! Control connection loop
//!
//! One task per control connection. Commands are processed one at a time; a
//! running transfer is raced against new input so ABOR, STAT, NOOP and QUIT
//! stay responsive, while any other command waits for the transfer to finish.

use futures_util::{SinkExt, StreamExt};
use log::{error, info, warn};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, FramedParts};

use crate::client::state::Session;
use crate::client::stream::ControlStream;
use crate::error::{ProtocolError, error_to_reply};
use crate::middleware::logging::{log_connection, log_reply};
use crate::protocol::{
    CommandCode, CommandResult, ControlAction, ControlLine, FtpCodec, Reply, ReplyCode, dispatch,
    parse_command,
};
use crate::server::ServerContext;

type ControlFramed = Framed<ControlStream, FtpCodec>;

enum Event {
    Line(ControlLine),
    Closed,
    ReadFailed(io::Error),
    TransferFinished(Reply),
    IdleTimeout,
    Shutdown,
    ForcedShutdown,
}

/// Serve one control connection until it closes.
pub async fn handle_client(stream: TcpStream, peer: SocketAddr, ctx: Arc<ServerContext>) {
    let local = match stream.local_addr() {
        Ok(local) => local,
        Err(e) => {
            error!("Cannot read local address for {}: {}", peer, e);
            return;
        }
    };
    let mut framed = Framed::new(
        ControlStream::Plain(stream),
        FtpCodec::new(ctx.config.max_command_length),
    );

    let Some(slot) = ctx.open_session() else {
        warn!("Refusing {}: {} clients connected", peer, ctx.config.max_clients);
        let reply = Reply::new(
            ReplyCode::ServiceNotAvailable,
            "Too many connections. Try again later",
        );
        let _ = send(&mut framed, peer, reply).await;
        return;
    };
    log_connection(peer, ctx.active_sessions());

    let greeting = Reply::new(ReplyCode::ServiceReady, "Welcome to wharf-ftpd");
    if let Err(e) = send(&mut framed, peer, greeting).await {
        warn!("Failed to greet {}: {}", peer, e);
        return;
    }

    let mut session = Session::new(slot.id(), local, peer, &ctx);
    if let Err(e) = serve(framed, &mut session, &ctx).await {
        warn!("Control connection {} failed: {}", peer, e);
    }
    session.close().await;
    info!("Client {} disconnected", peer);
}

async fn serve(mut framed: ControlFramed, session: &mut Session, ctx: &ServerContext) -> io::Result<()> {
    let peer = session.peer();
    loop {
        let executing = session.transfer.is_executing();
        let event = tokio::select! {
            biased;
            _ = ctx.force_shutdown.cancelled() => Event::ForcedShutdown,
            _ = ctx.shutdown.cancelled(), if !executing => Event::Shutdown,
            reply = session.transfer.wait_finished() => Event::TransferFinished(reply),
            _ = tokio::time::sleep(ctx.config.idle_timeout()), if !executing => Event::IdleTimeout,
            line = framed.next() => match line {
                Some(Ok(line)) => Event::Line(line),
                Some(Err(e)) => Event::ReadFailed(e),
                None => Event::Closed,
            },
        };

        match event {
            Event::Line(ControlLine::TooLong) => {
                let reply = error_to_reply(&ProtocolError::LineTooLong.into());
                send(&mut framed, peer, reply).await?;
            }
            Event::Line(ControlLine::Command(line)) => {
                if let Some(action) = process_line(&mut framed, session, ctx, &line).await? {
                    match action {
                        ControlAction::Close => return Ok(()),
                        ControlAction::Shutdown => {
                            ctx.request_shutdown(&format!("SITE INTERNALSHUTDOWN from {peer}"));
                            return Ok(());
                        }
                        ControlAction::UpgradeTls => framed = upgrade_tls(framed, session, ctx).await?,
                        ControlAction::DowngradeTls => framed = downgrade_tls(framed, session, ctx).await?,
                        ControlAction::None => {}
                    }
                }
            }
            Event::TransferFinished(reply) => send(&mut framed, peer, reply).await?,
            Event::IdleTimeout => {
                info!("Closing idle control connection {}", peer);
                let reply = Reply::new(ReplyCode::ServiceNotAvailable, "Idle timeout, closing control connection");
                return send(&mut framed, peer, reply).await;
            }
            Event::Shutdown => {
                let reply = Reply::new(ReplyCode::ServiceNotAvailable, "Server shutting down");
                return send(&mut framed, peer, reply).await;
            }
            Event::ForcedShutdown => {
                for reply in session.transfer.abort(false).await {
                    send(&mut framed, peer, reply).await?;
                }
                let reply = Reply::new(ReplyCode::ServiceNotAvailable, "Server shutting down");
                return send(&mut framed, peer, reply).await;
            }
            Event::Closed => {
                info!("Connection closed by client {}", peer);
                return Ok(());
            }
            Event::ReadFailed(e) => return Err(e),
        }
    }
}

/// Run one command line; `None` when the connection was forced closed meanwhile.
async fn process_line(
    framed: &mut ControlFramed,
    session: &mut Session,
    ctx: &ServerContext,
    line: &str,
) -> io::Result<Option<ControlAction>> {
    let command = parse_command(line);
    let code = command.code();

    // Anything but the always-legal commands (and SITE, which refuses itself)
    // runs after the current transfer.
    if session.transfer.is_executing() && !code.is_special() && code != CommandCode::Site {
        let reply = tokio::select! {
            _ = ctx.force_shutdown.cancelled() => return Ok(None),
            reply = session.transfer.wait_finished() => reply,
        };
        send(framed, session.peer(), reply).await?;
    }

    let CommandResult { replies, action } = dispatch(session, ctx, command).await;
    for reply in replies {
        send_quiet(framed, reply).await?;
    }
    Ok(Some(action))
}

async fn upgrade_tls(
    framed: ControlFramed,
    session: &mut Session,
    ctx: &ServerContext,
) -> io::Result<ControlFramed> {
    let Some(acceptor) = ctx.tls.as_ref() else {
        return Err(io::Error::other("TLS requested without an acceptor"));
    };
    let framed = reframe(framed, ctx, |io| io.upgrade(acceptor)).await?;
    session.set_control_tls(true);
    info!("Control connection {} secured with TLS", session.peer());
    Ok(framed)
}

async fn downgrade_tls(
    framed: ControlFramed,
    session: &mut Session,
    ctx: &ServerContext,
) -> io::Result<ControlFramed> {
    let framed = reframe(framed, ctx, ControlStream::downgrade).await?;
    session.set_control_tls(false);
    info!("Control connection {} reverted to cleartext", session.peer());
    Ok(framed)
}

/// Swap the transport under the codec. Bytes read ahead on the old
/// transport are dropped; a client may not pipeline across a TLS switch.
async fn reframe<F, Fut>(framed: ControlFramed, ctx: &ServerContext, switch: F) -> io::Result<ControlFramed>
where
    F: FnOnce(ControlStream) -> Fut,
    Fut: Future<Output = io::Result<ControlStream>>,
{
    let parts = framed.into_parts();
    let io = switch(parts.io).await?;
    Ok(Framed::from_parts(FramedParts::new::<Reply>(
        io,
        FtpCodec::new(ctx.config.max_command_length),
    )))
}

async fn send(framed: &mut ControlFramed, peer: SocketAddr, reply: Reply) -> io::Result<()> {
    log_reply(peer, &reply);
    framed.send(reply).await
}

/// Dispatcher replies are logged by the dispatcher itself
async fn send_quiet(framed: &mut ControlFramed, reply: Reply) -> io::Result<()> {
    framed.send(reply).await
}
