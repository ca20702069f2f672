use std::io;

use thiserror::Error;

use crate::credentials::ReceivePhase;

/// Failures of the credential channel that abort the current operation.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("activating socket option for receiving credentials failed: {0}")]
    Activate(#[source] io::Error),

    #[error("deactivating socket option for receiving credentials failed: {0}")]
    Deactivate(#[source] io::Error),

    #[error("querying socket option for receiving credentials failed: {0}")]
    Query(#[source] io::Error),

    #[error("sending credentials failed: {0}")]
    Send(#[source] io::Error),

    #[error("receiving credentials failed while {phase}: {source}")]
    Receive {
        phase:  ReceivePhase,
        #[source]
        source: io::Error,
    },

    #[error(
        "peer closed the connection while {phase}: received {received} of {expected} bytes"
    )]
    UnexpectedEof {
        phase:    ReceivePhase,
        expected: usize,
        received: usize,
    },
}

impl ChannelError {
    /// The receive phase the failure occurred in, if it came from a receive
    pub fn phase(&self) -> Option<ReceivePhase> {
        match self {
            ChannelError::Receive { phase, .. } | ChannelError::UnexpectedEof { phase, .. } => {
                Some(*phase)
            }
            _ => None,
        }
    }
}

/// Reasons a kernel credential could not be taken from the control data.
///
/// These never fail a receive. The record falls back to
/// [`KernelIdentity::UNKNOWN`](crate::record::KernelIdentity::UNKNOWN).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialIssue {
    #[error("no credential control message was received")]
    Missing,

    #[error("control data was truncated by the kernel")]
    Truncated,

    #[error("unexpected control message (level {level}, type {kind})")]
    WrongKind { level: libc::c_int, kind: libc::c_int },

    #[error("credential control message has length {actual}, expected {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("credential structure could not be read")]
    Unreadable,
}
