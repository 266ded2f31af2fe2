//! Transfer execution
//!
//! The block loop run by a transfer task: one block is read, accounted,
//! written and flushed before the next read starts, so a slow peer bounds
//! memory use. Every await, including the wait for the data connection, is
//! raced against the abort token.

use log::{info, warn};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::error::{CommandError, StorageError, TransferError};
use crate::middleware::TrafficShaper;
use crate::protocol::{Reply, ReplyCode};
use crate::storage::FtpFile;
use crate::transfer::data_channel::{DataStream, PendingData};
use crate::transfer::operations::{SharedTransferState, TransferState};
use crate::transfer::results::TransferReport;

/// What a transfer moves
pub enum TransferJob {
    /// Server → client (RETR)
    Retrieve(Box<dyn FtpFile>),
    /// Client → server (STOR, STOU, APPE)
    Store(Box<dyn FtpFile>),
    /// Directory listing lines (LIST, NLST)
    Listing(Vec<String>),
}

impl TransferJob {
    fn describe(&self) -> String {
        match self {
            TransferJob::Retrieve(file) => format!("download of {}", file.path()),
            TransferJob::Store(file) => format!("upload of {}", file.path()),
            TransferJob::Listing(lines) => format!("listing of {} entries", lines.len()),
        }
    }
}

/// Where a transfer gets its data connection from
pub enum DataSource {
    Open(DataStream),
    /// Connected by the task itself, so the wait can be aborted
    Pending(PendingData),
}

/// How a transfer task ended
#[derive(Debug)]
pub enum TransferOutcome {
    Completed(TransferReport),
    Aborted,
    /// Aborted before the data connection existed
    Cancelled,
    Failed(CommandError),
}

impl TransferOutcome {
    /// The reply the control connection owes the client
    pub fn into_reply(self) -> Reply {
        match self {
            TransferOutcome::Completed(_) => {
                Reply::new(ReplyCode::ClosingDataConnection, "Transfer complete")
            }
            TransferOutcome::Aborted | TransferOutcome::Cancelled => Reply::new(
                ReplyCode::ConnectionClosed,
                TransferError::Aborted.to_string(),
            ),
            TransferOutcome::Failed(err) => Reply::new(err.code(), err.message()),
        }
    }
}

enum Failure {
    Aborted,
    Setup(TransferError),
    Storage(StorageError),
    Connection(io::Error),
}

impl From<Failure> for TransferOutcome {
    fn from(failure: Failure) -> Self {
        match failure {
            Failure::Aborted => TransferOutcome::Aborted,
            Failure::Setup(e) => TransferOutcome::Failed(e.into()),
            Failure::Storage(e) => TransferOutcome::Failed(e.into()),
            Failure::Connection(e) => TransferOutcome::Failed(TransferError::ConnectionLost(e).into()),
        }
    }
}

/// Everything a transfer task owns
pub struct TransferTask {
    pub job: TransferJob,
    pub source: DataSource,
    pub shaper: TrafficShaper,
    pub block_size: usize,
    pub cancel: CancellationToken,
    pub state: SharedTransferState,
    pub peer: SocketAddr,
}

async fn or_abort<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, Failure>
where
    F: Future<Output = Result<T, Failure>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Failure::Aborted),
        result = fut => result,
    }
}

pub async fn run_transfer(task: TransferTask) -> TransferOutcome {
    let TransferTask {
        mut job,
        source,
        shaper,
        block_size,
        cancel,
        state,
        peer,
    } = task;
    let description = job.describe();

    let connected = match source {
        DataSource::Open(stream) => Ok(stream),
        DataSource::Pending(pending) => {
            state.set(TransferState::AwaitingDataChannel);
            or_abort(&cancel, async { pending.connect().await.map_err(Failure::Setup) }).await
        }
    };
    let mut stream = match connected {
        Ok(stream) => stream,
        Err(failure) => {
            if let TransferJob::Retrieve(file) | TransferJob::Store(file) = &mut job {
                file.abort().await;
            }
            return match failure {
                Failure::Aborted => {
                    state.set(TransferState::Aborted);
                    info!("{} for {} cancelled before the data connection opened", description, peer);
                    TransferOutcome::Cancelled
                }
                failure => {
                    state.set(TransferState::Idle);
                    if let Failure::Setup(e) = &failure {
                        warn!("No data connection for {} ({}): {}", peer, description, e);
                    }
                    failure.into()
                }
            };
        }
    };

    state.set(TransferState::Executing);
    let started = Instant::now();
    info!("Starting {} for {}", description, peer);

    let moved = match &mut job {
        TransferJob::Retrieve(file) => {
            send_file(file.as_mut(), &mut stream, &shaper, block_size, &cancel).await
        }
        TransferJob::Store(file) => {
            receive_file(file.as_mut(), &mut stream, &shaper, block_size, &cancel).await
        }
        TransferJob::Listing(lines) => {
            send_listing(lines, &mut stream, &shaper, block_size, &cancel).await
        }
    };

    let finished = match moved {
        Ok(bytes) => {
            state.set(TransferState::PreEndOfTransfer);
            finish(&mut job, &mut stream).await.map(|_| bytes)
        }
        Err(failure) => Err(failure),
    };

    match finished {
        Ok(bytes) => {
            let report = TransferReport {
                bytes,
                elapsed: started.elapsed(),
            };
            info!(
                "Completed {} for {}: {} bytes ({} B/s)",
                description,
                peer,
                bytes,
                report.rate()
            );
            TransferOutcome::Completed(report)
        }
        Err(failure) => {
            state.set(TransferState::Aborted);
            if let TransferJob::Retrieve(file) | TransferJob::Store(file) = &mut job {
                file.abort().await;
            }
            match &failure {
                Failure::Aborted => info!("Aborted {} for {}", description, peer),
                Failure::Setup(e) => warn!("{} for {} failed: {}", description, peer, e),
                Failure::Storage(e) => warn!("{} for {} failed: {}", description, peer, e),
                Failure::Connection(e) => {
                    warn!("{} for {} lost its data connection: {}", description, peer, e)
                }
            }
            failure.into()
        }
    }
}

async fn finish(job: &mut TransferJob, stream: &mut DataStream) -> Result<(), Failure> {
    if let TransferJob::Retrieve(file) | TransferJob::Store(file) = job {
        file.close().await.map_err(Failure::Storage)?;
    }
    stream.shutdown().await.map_err(Failure::Connection)
}

async fn write_block(
    stream: &mut DataStream,
    block: &[u8],
    shaper: &TrafficShaper,
    cancel: &CancellationToken,
) -> Result<(), Failure> {
    or_abort(cancel, async {
        shaper.after_write(block.len()).await;
        Ok(())
    })
    .await?;
    or_abort(cancel, async {
        stream.write_all(block).await.map_err(Failure::Connection)?;
        stream.flush().await.map_err(Failure::Connection)
    })
    .await
}

async fn send_file(
    file: &mut dyn FtpFile,
    stream: &mut DataStream,
    shaper: &TrafficShaper,
    block_size: usize,
    cancel: &CancellationToken,
) -> Result<u64, Failure> {
    let mut total = 0u64;
    loop {
        let block = or_abort(cancel, async {
            file.read_block(block_size).await.map_err(Failure::Storage)
        })
        .await?;
        let Some(block) = block else {
            return Ok(total);
        };
        write_block(stream, &block, shaper, cancel).await?;
        total += block.len() as u64;
    }
}

async fn receive_file(
    file: &mut dyn FtpFile,
    stream: &mut DataStream,
    shaper: &TrafficShaper,
    block_size: usize,
    cancel: &CancellationToken,
) -> Result<u64, Failure> {
    let mut total = 0u64;
    let mut buf = vec![0u8; block_size];
    loop {
        or_abort(cancel, async {
            shaper.read_allowed().await;
            Ok(())
        })
        .await?;
        let n = or_abort(cancel, async {
            stream.read(&mut buf).await.map_err(Failure::Connection)
        })
        .await?;
        if n == 0 {
            return Ok(total);
        }
        or_abort(cancel, async {
            shaper.after_read(n).await;
            file.write_block(&buf[..n]).await.map_err(Failure::Storage)
        })
        .await?;
        total += n as u64;
    }
}

async fn send_listing(
    lines: &[String],
    stream: &mut DataStream,
    shaper: &TrafficShaper,
    block_size: usize,
    cancel: &CancellationToken,
) -> Result<u64, Failure> {
    let mut payload = String::new();
    for line in lines {
        payload.push_str(line);
        payload.push_str("\r\n");
    }
    for block in payload.as_bytes().chunks(block_size.max(1)) {
        write_block(stream, block, shaper, cancel).await?;
    }
    Ok(payload.len() as u64)
}
