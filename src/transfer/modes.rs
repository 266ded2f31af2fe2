//! FTP transfer parameters
//!
//! MODE, TYPE and STRU settings of a data connection.

use std::fmt;

use crate::error::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    #[default]
    Stream,
    Block,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferType {
    #[default]
    Ascii,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferStructure {
    #[default]
    File,
    Record,
}

impl TransferMode {
    pub fn parse(arg: &str) -> Result<Self, ProtocolError> {
        match arg.trim().to_ascii_uppercase().as_str() {
            "S" => Ok(Self::Stream),
            "B" => Ok(Self::Block),
            "C" => Err(ProtocolError::UnsupportedParameter(arg.to_string())),
            "" => Err(ProtocolError::MissingArgument("MODE".into())),
            _ => Err(ProtocolError::InvalidArgument(arg.to_string())),
        }
    }
}

impl TransferType {
    /// `A`, `A N`, `I`, `L 8`; EBCDIC and other byte sizes are refused.
    pub fn parse(arg: &str) -> Result<Self, ProtocolError> {
        let upper = arg.trim().to_ascii_uppercase();
        let mut parts = upper.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("A"), None | Some("N")) => Ok(Self::Ascii),
            (Some("I"), None) | (Some("L"), Some("8")) => Ok(Self::Image),
            (Some("A" | "E" | "L"), Some(_)) | (Some("E"), None) => {
                Err(ProtocolError::UnsupportedParameter(arg.to_string()))
            }
            (None, _) => Err(ProtocolError::MissingArgument("TYPE".into())),
            _ => Err(ProtocolError::InvalidArgument(arg.to_string())),
        }
    }
}

impl TransferStructure {
    pub fn parse(arg: &str) -> Result<Self, ProtocolError> {
        match arg.trim().to_ascii_uppercase().as_str() {
            "F" => Ok(Self::File),
            "R" => Ok(Self::Record),
            "P" => Err(ProtocolError::UnsupportedParameter(arg.to_string())),
            "" => Err(ProtocolError::MissingArgument("STRU".into())),
            _ => Err(ProtocolError::InvalidArgument(arg.to_string())),
        }
    }
}

impl fmt::Display for TransferMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stream => "STREAM",
            Self::Block => "BLOCK",
        })
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ascii => "ASCII",
            Self::Image => "BINARY",
        })
    }
}

impl fmt::Display for TransferStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "FILE",
            Self::Record => "RECORD",
        })
    }
}
