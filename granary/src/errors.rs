// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Grain runtime error types

use std::fmt::Display;

/// Represents a grain's internal processing error
pub type GrainProcessingErr = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors starting the sharded executor
#[derive(Debug)]
pub enum ShardErr {
    /// The shard's runtime or thread failed to start
    StartupFailed(std::io::Error),
}

impl std::error::Error for ShardErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::StartupFailed(inner) => Some(inner),
        }
    }
}

impl Display for ShardErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartupFailed(err) => write!(f, "Shard failed to start '{err}'"),
        }
    }
}

/// A messaging error has occurred while passing work between shards
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MessagingErr {
    /// The shard you're trying to submit work to has stopped
    SendErr,
    /// The reply channel was dropped before a reply was produced. This
    /// happens when the shard stops while the work is in flight
    ChannelClosed,
}

impl std::error::Error for MessagingErr {}

impl Display for MessagingErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SendErr => write!(f, "Send failed, the shard is stopped"),
            Self::ChannelClosed => write!(f, "Reply channel closed"),
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MessagingErr {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Self::SendErr
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for MessagingErr {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}

/// Failure to convert a value to or from its byte representation
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SerializationErr {
    type_name: &'static str,
    reason: String,
}

impl SerializationErr {
    /// Create a new error for the given type
    pub fn new(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            type_name,
            reason: reason.into(),
        }
    }

    /// The type which failed to decode
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::error::Error for SerializationErr {}

impl Display for SerializationErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Failed to decode '{}': {}", self.type_name, self.reason)
    }
}

/// Coarse classification of a failure reported by a remote node
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum RemoteFailure {
    /// The node could not be reached, or the connection was lost mid-call
    Unreachable,
    /// The grain's handler returned an error or panicked on the remote node
    Processing,
    /// The remote node could not decode the invocation
    Serialization,
    /// The remote node has no handler registered for the invocation
    UnknownHandler,
    /// Anything else the remote node rejected the invocation for
    Other,
}

impl Display for RemoteFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Unreachable => "unreachable",
            Self::Processing => "processing",
            Self::Serialization => "serialization",
            Self::UnknownHandler => "unknown handler",
            Self::Other => "other",
        };
        write!(f, "{kind}")
    }
}

/// Errors surfaced to the caller of a grain operation
#[derive(Debug)]
pub enum GrainErr {
    /// The work could not reach, or return from, the owning shard
    Messaging(MessagingErr),
    /// The grain's handler returned an error or panicked
    Processing(GrainProcessingErr),
    /// The owning remote node reported a failure, or could not be reached
    Remote {
        /// The remote node's identity
        node: String,
        /// What kind of failure the node reported
        kind: RemoteFailure,
        /// Description of the failure
        reason: String,
    },
    /// A message, key, or reply could not be decoded
    Serialization(SerializationErr),
    /// An incoming invocation named a grain and handler pair that was never registered
    UnknownHandler {
        /// The grain type name
        grain: String,
        /// The handler identifier
        handler: String,
    },
    /// The operation didn't complete within the requested duration
    Timeout,
}

impl std::error::Error for GrainErr {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self {
            Self::Messaging(inner) => Some(inner),
            Self::Processing(inner) => Some(inner.as_ref()),
            Self::Serialization(inner) => Some(inner),
            _ => None,
        }
    }
}

impl Display for GrainErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Messaging(err) => write!(f, "Messaging failure '{err}'"),
            Self::Processing(err) => {
                if f.alternate() {
                    write!(f, "Grain failed processing '{err:#}'")
                } else {
                    write!(f, "Grain failed processing '{err}'")
                }
            }
            Self::Remote { node, kind, reason } => {
                write!(f, "Remote node {node} failed ({kind}): {reason}")
            }
            Self::Serialization(err) => write!(f, "{err}"),
            Self::UnknownHandler { grain, handler } => {
                write!(f, "No handler '{handler}' registered for grain '{grain}'")
            }
            Self::Timeout => write!(f, "Grain operation timed out"),
        }
    }
}

impl GrainErr {
    /// How this error is reported to a remote caller
    pub fn remote_failure(&self) -> RemoteFailure {
        match self {
            Self::Processing(_) => RemoteFailure::Processing,
            Self::Serialization(_) => RemoteFailure::Serialization,
            Self::UnknownHandler { .. } => RemoteFailure::UnknownHandler,
            Self::Remote { kind, .. } => *kind,
            Self::Messaging(_) | Self::Timeout => RemoteFailure::Other,
        }
    }
}

impl From<MessagingErr> for GrainErr {
    fn from(value: MessagingErr) -> Self {
        Self::Messaging(value)
    }
}

impl From<SerializationErr> for GrainErr {
    fn from(value: SerializationErr) -> Self {
        Self::Serialization(value)
    }
}

impl From<crate::concurrency::Timeout> for GrainErr {
    fn from(_: crate::concurrency::Timeout) -> Self {
        Self::Timeout
    }
}
