// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Protobuf specifications for over-the-wire intercommuncation
//! between nodes. Generated via [prost]

use granary::RemoteFailure;

/// Request/response framing
pub(crate) mod frame {
    #![allow(unreachable_pub)]
    include!(concat!(env!("OUT_DIR"), "/frame.rs"));
}

/// Membership handshakes and departures
pub mod membership {
    #![allow(unreachable_pub)]
    #![allow(missing_docs)]
    include!(concat!(env!("OUT_DIR"), "/membership.rs"));
}

/// Remote grain invocations
pub(crate) mod grain {
    #![allow(unreachable_pub)]
    include!(concat!(env!("OUT_DIR"), "/grain.rs"));
}

pub(crate) use frame::Envelope;

impl From<crate::transport::HandlerErr> for frame::Failure {
    fn from(value: crate::transport::HandlerErr) -> Self {
        let kind = match value.kind {
            RemoteFailure::Processing => frame::FailureKind::Processing,
            RemoteFailure::Serialization => frame::FailureKind::Serialization,
            RemoteFailure::UnknownHandler => frame::FailureKind::UnknownHandler,
            RemoteFailure::Unreachable | RemoteFailure::Other => frame::FailureKind::Other,
        };
        let mut failure = Self {
            kind: 0,
            reason: value.reason,
        };
        failure.set_kind(kind);
        failure
    }
}

impl From<frame::Failure> for crate::transport::HandlerErr {
    fn from(value: frame::Failure) -> Self {
        let kind = match value.kind() {
            frame::FailureKind::Processing => RemoteFailure::Processing,
            frame::FailureKind::Serialization => RemoteFailure::Serialization,
            frame::FailureKind::UnknownHandler => RemoteFailure::UnknownHandler,
            frame::FailureKind::Other => RemoteFailure::Other,
        };
        Self::new(kind, value.reason)
    }
}

impl From<granary::remote::Invocation> for grain::Invocation {
    fn from(value: granary::remote::Invocation) -> Self {
        Self {
            grain: value.grain,
            key: value.key,
            handler: value.handler,
            args: value.args,
            packed: value.packed,
        }
    }
}

impl From<grain::Invocation> for granary::remote::Invocation {
    fn from(value: grain::Invocation) -> Self {
        Self {
            grain: value.grain,
            key: value.key,
            handler: value.handler,
            args: value.args,
            packed: value.packed,
        }
    }
}
