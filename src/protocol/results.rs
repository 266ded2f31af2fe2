//! Command result types
//!
//! What a command handler hands back to the control connection.

use crate::protocol::{Reply, ReplyCode};

/// Follow-up the control connection performs once the replies are flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlAction {
    #[default]
    None,
    /// QUIT and shutdown: close this control connection
    Close,
    /// AUTH: TLS handshake on the control connection
    UpgradeTls,
    /// CCC: back to cleartext
    DowngradeTls,
    /// SITE INTERNALSHUTDOWN: stop the server, then close
    Shutdown,
}

/// Replies of one command, in wire order, plus the follow-up action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub replies: Vec<Reply>,
    pub action: ControlAction,
}

impl CommandResult {
    pub fn reply(code: ReplyCode, text: impl Into<String>) -> Self {
        Self::from_reply(Reply::new(code, text))
    }

    pub fn from_reply(reply: Reply) -> Self {
        Self {
            replies: vec![reply],
            action: ControlAction::None,
        }
    }

    pub fn from_replies(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            action: ControlAction::None,
        }
    }

    pub fn with_action(mut self, action: ControlAction) -> Self {
        self.action = action;
        self
    }

    /// Queue a reply after the ones already present
    pub fn then(mut self, reply: Reply) -> Self {
        self.replies.push(reply);
        self
    }

    /// The reply that concludes this command
    pub fn last_reply(&self) -> Option<&Reply> {
        self.replies.last()
    }
}
