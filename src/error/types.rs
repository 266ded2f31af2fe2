//! Error types
//!
//! Defines domain-specific error types for each module of the FTP server,
//! and the dispatcher-facing [`CommandError`] that every one of them folds into.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

use crate::protocol::ReplyCode;

/// Authentication module errors
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unknown user: {0}")]
    UserNotFound(String),
    #[error("Invalid password for user: {0}")]
    InvalidPassword(String),
    #[error("Account {account} not allowed for user {user}")]
    InvalidAccount { user: String, account: String },
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Need account for this command")]
    AccountRequired,
    #[error("Bad sequence of commands: {0}")]
    InvalidState(String),
    #[error("Administrator privilege required")]
    NotAdmin,
}

/// Storage module errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Invalid path: {0}")]
    InvalidPath(String),
    #[error("File already exists: {0}")]
    FileAlreadyExists(String),
    #[error("Not a directory: {0}")]
    NotADirectory(String),
    #[error("Not a plain file: {0}")]
    NotAFile(String),
    #[error("Path traversal attempt: {0}")]
    PathTraversal(String),
    #[error("File busy: {0}")]
    FileBusy(String),
    #[error("Insufficient storage space")]
    InsufficientStorage,
    #[error("Restart offset {0} beyond end of file")]
    InvalidRestartOffset(u64),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Transfer module errors
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Use PORT or PASV first")]
    NoDataConnection,
    #[error("Failed to bind data port {0}: {1}")]
    PortBindingFailed(SocketAddr, #[source] io::Error),
    #[error("No passive port available after {0} attempts")]
    NoAvailablePort(usize),
    #[error("Invalid passive port range {0}-{1}")]
    InvalidPortRange(u16, u16),
    #[error("Data connection not established within {0:?}")]
    ConnectionTimeout(Duration),
    #[error("Cannot open data connection: {0}")]
    DataChannelSetupFailed(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("Address {provided} does not match control connection {expected}")]
    IpMismatch { expected: IpAddr, provided: IpAddr },
    #[error("Refusing privileged data port {0}")]
    PrivilegedPort(u16),
    #[error("Network protocol not supported, use (1,2)")]
    UnsupportedNetworkProtocol,
    #[error("Only EPSV is accepted after EPSV ALL")]
    ExtendedPassiveOnly,
    #[error("Restart not supported for this mode or structure")]
    RestartNotSupported,
    #[error("Data channel TLS negotiation failed: {0}")]
    DataTls(#[source] io::Error),
    #[error("Connection closed; transfer aborted")]
    Aborted,
    #[error("Data connection lost: {0}")]
    ConnectionLost(#[source] io::Error),
}

/// Command-line level protocol errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Command line too long")]
    LineTooLong,
    #[error("Command not implemented: {0}")]
    NotImplemented(String),
    #[error("Missing argument for {0}")]
    MissingArgument(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Command not implemented for parameter {0}")]
    UnsupportedParameter(String),
    #[error("Bad sequence of commands: {0}")]
    BadSequence(String),
}

/// TLS setup and negotiation errors
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("TLS not available on this server")]
    NotConfigured,
    #[error("Already in a TLS session")]
    AlreadyActive,
    #[error("CCC not allowed by server policy")]
    CccRefused,
    #[error("Protected data channel requires PBSZ 0 first")]
    PbszRequired,
    #[error("Failed to load certificate from {0}: {1}")]
    CertificateLoad(String, String),
    #[error("Failed to load private key from {0}: {1}")]
    KeyLoad(String, String),
    #[error("Invalid TLS configuration: {0}")]
    Config(String),
}

/// Startup configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Error raised by a command handler, carrying the reply code it maps to.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code} {message}")]
pub struct CommandError {
    code: ReplyCode,
    message: String,
}

impl CommandError {
    pub fn new(code: ReplyCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ReplyCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<AuthError> for CommandError {
    fn from(error: AuthError) -> Self {
        let code = match &error {
            AuthError::MalformedInput(_) => ReplyCode::ParameterSyntaxError,
            AuthError::InvalidState(_) => ReplyCode::BadCommandSequence,
            AuthError::AccountRequired => ReplyCode::NeedAccountForStoring,
            AuthError::UserNotFound(_)
            | AuthError::InvalidPassword(_)
            | AuthError::InvalidAccount { .. }
            | AuthError::NotLoggedIn
            | AuthError::NotAdmin => ReplyCode::NotLoggedIn,
        };
        // Never tell a client which half of the credentials was wrong.
        let message = match &error {
            AuthError::UserNotFound(_) | AuthError::InvalidPassword(_) => {
                "Login incorrect".to_string()
            }
            _ => error.to_string(),
        };
        Self::new(code, message)
    }
}

impl From<StorageError> for CommandError {
    fn from(error: StorageError) -> Self {
        let code = match &error {
            StorageError::FileNotFound(_)
            | StorageError::DirectoryNotFound(_)
            | StorageError::PermissionDenied(_)
            | StorageError::FileAlreadyExists(_)
            | StorageError::NotADirectory(_)
            | StorageError::NotAFile(_) => ReplyCode::FileUnavailable,
            StorageError::InvalidPath(_) | StorageError::PathTraversal(_) => {
                ReplyCode::FileNameNotAllowed
            }
            StorageError::FileBusy(_) => ReplyCode::FileActionNotTaken,
            StorageError::InsufficientStorage => ReplyCode::InsufficientStorage,
            StorageError::InvalidRestartOffset(_) => ReplyCode::PageTypeUnknown,
            StorageError::Io(_) => ReplyCode::LocalError,
        };
        Self::new(code, error.to_string())
    }
}

impl From<TransferError> for CommandError {
    fn from(error: TransferError) -> Self {
        let code = match &error {
            TransferError::NoDataConnection
            | TransferError::PortBindingFailed(..)
            | TransferError::NoAvailablePort(_)
            | TransferError::InvalidPortRange(..)
            | TransferError::ConnectionTimeout(_)
            | TransferError::DataChannelSetupFailed(_)
            | TransferError::DataTls(_) => ReplyCode::CantOpenDataConnection,
            TransferError::InvalidAddress(_)
            | TransferError::IpMismatch { .. }
            | TransferError::PrivilegedPort(_) => ReplyCode::ParameterSyntaxError,
            TransferError::UnsupportedNetworkProtocol => ReplyCode::UnsupportedNetworkProtocol,
            TransferError::ExtendedPassiveOnly => ReplyCode::BadCommandSequence,
            TransferError::RestartNotSupported => ReplyCode::NotImplementedForParameter,
            TransferError::Aborted | TransferError::ConnectionLost(_) => {
                ReplyCode::ConnectionClosed
            }
        };
        Self::new(code, error.to_string())
    }
}

impl From<ProtocolError> for CommandError {
    fn from(error: ProtocolError) -> Self {
        let code = match &error {
            ProtocolError::UnknownCommand(_) | ProtocolError::LineTooLong => {
                ReplyCode::CommandSyntaxError
            }
            ProtocolError::NotImplemented(_) => ReplyCode::CommandNotImplemented,
            ProtocolError::MissingArgument(_) | ProtocolError::InvalidArgument(_) => {
                ReplyCode::ParameterSyntaxError
            }
            ProtocolError::UnsupportedParameter(_) => ReplyCode::NotImplementedForParameter,
            ProtocolError::BadSequence(_) => ReplyCode::BadCommandSequence,
        };
        Self::new(code, error.to_string())
    }
}

impl From<TlsError> for CommandError {
    fn from(error: TlsError) -> Self {
        let code = match &error {
            TlsError::NotConfigured | TlsError::CertificateLoad(..) | TlsError::KeyLoad(..) => {
                ReplyCode::NeedSecurityResource
            }
            TlsError::PbszRequired => ReplyCode::BadCommandSequence,
            TlsError::AlreadyActive | TlsError::CccRefused | TlsError::Config(_) => {
                ReplyCode::RequestDenied
            }
        };
        Self::new(code, error.to_string())
    }
}

impl From<io::Error> for CommandError {
    fn from(error: io::Error) -> Self {
        Self::new(ReplyCode::LocalError, format!("Local error: {error}"))
    }
}
