// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Reply ports used to hand results from a shard back to the submitting task

use tokio::sync::oneshot;

use crate::MessagingErr;

/// A one-use reply port. Wrapper of [tokio::sync::oneshot::Sender] with a
/// consistent error type
#[derive(Debug)]
pub struct RpcReplyPort<TMsg> {
    port: oneshot::Sender<TMsg>,
}

impl<TMsg> RpcReplyPort<TMsg> {
    /// Send a message to the reply port. This consumes the port
    ///
    /// * `msg` - The message to send
    ///
    /// Returns [Ok(())] if the message send was successful, [Err(MessagingErr)] otherwise
    pub fn send(self, msg: TMsg) -> Result<(), MessagingErr> {
        self.port.send(msg).map_err(|_| MessagingErr::ChannelClosed)
    }

    /// Determine if the port is closed (i.e. the receiver has been dropped)
    pub fn is_closed(&self) -> bool {
        self.port.is_closed()
    }
}

impl<TMsg> From<oneshot::Sender<TMsg>> for RpcReplyPort<TMsg> {
    fn from(value: oneshot::Sender<TMsg>) -> Self {
        Self { port: value }
    }
}
