//! FTP Protocol implementation
//!
//! Command codes and their sequencing rules, line parsing, reply formatting,
//! the control-connection codec and the dispatcher that ties them to handlers.

pub mod codec;
pub mod commands;
pub mod dispatcher;
pub mod handlers;
pub mod parser;
pub mod responses;
pub mod results;

pub use codec::{ControlLine, FtpCodec};
pub use commands::{Command, CommandCode, is_next_command_valid};
pub use dispatcher::dispatch;
pub use parser::{parse_command, parse_site_command};
pub use responses::{Reply, ReplyCode, format_response};
pub use results::{CommandResult, ControlAction};
