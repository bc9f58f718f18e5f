// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! TCP Server to accept incoming sessions and dispatch their requests

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use granary::concurrency::{mpsc_unbounded, spawn, JoinHandle, MpscUnboundedReceiver};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};

use super::tcp::{read_frame, write_frame};
use granary::RemoteFailure;

use super::{HandlerErr, HandlerId, RequestHandler};
use crate::protocol::frame::{envelope, response, Request, Response};
use crate::protocol::Envelope;

type Handlers = Arc<HashMap<HandlerId, Arc<dyn RequestHandler>>>;
type Sessions = Arc<Mutex<Vec<JoinHandle<()>>>>;

/// Accepts connections and serves requests against registered handlers
#[derive(Default)]
pub struct RpcServer {
    handlers: HashMap<HandlerId, Arc<dyn RequestHandler>>,
}

impl RpcServer {
    /// Create a server with no handlers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `id`, replacing any previous registration
    pub fn register_handler(&mut self, id: HandlerId, handler: Arc<dyn RequestHandler>) {
        self.handlers.insert(id, handler);
    }

    /// Start accepting sessions on `listener`
    pub fn serve(self, listener: TcpListener) -> std::io::Result<ServerHandle> {
        let local_addr = listener.local_addr()?;
        let handlers: Handlers = Arc::new(self.handlers);
        let sessions: Sessions = Arc::default();
        let accept = spawn(accept_loop(listener, handlers, sessions.clone()));
        log::info!("Node server listening on {local_addr}");
        Ok(ServerHandle {
            local_addr,
            accept,
            sessions,
        })
    }
}

async fn accept_loop(listener: TcpListener, handlers: Handlers, sessions: Sessions) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                log::info!("TCP Session opened for {addr}");
                let session = spawn(serve_session(stream, addr, handlers.clone()));
                let mut sessions = sessions.lock().unwrap_or_else(PoisonError::into_inner);
                sessions.retain(|session| !session.is_finished());
                sessions.push(session);
            }
            Err(socket_accept_error) => {
                log::warn!("Error accepting socket {socket_accept_error} on Node server");
            }
        }
    }
}

async fn serve_session(stream: TcpStream, peer: SocketAddr, handlers: Handlers) {
    if let Err(err) = stream.set_nodelay(true) {
        log::debug!("Failed to disable nagle for {peer} '{err}'");
    }
    let (mut read, write) = stream.into_split();
    let (responses, responses_rx) = mpsc_unbounded();
    let writer = spawn(write_responses(write, responses_rx, peer));

    loop {
        match read_frame(&mut read).await {
            Ok(Envelope {
                msg: Some(envelope::Msg::Request(request)),
            }) => {
                let handlers = handlers.clone();
                let responses = responses.clone();
                // requests are handled concurrently, responses are matched by tag
                spawn(async move {
                    let response = handle_request(&handlers, peer, request).await;
                    let _ = responses.send(Envelope {
                        msg: Some(envelope::Msg::Response(response)),
                    });
                });
            }
            Ok(other) => log::trace!("Discarding unexpected frame {other:?} from {peer}"),
            Err(err) => {
                log::debug!("Incoming session from {peer} ended ({err})");
                break;
            }
        }
    }
    writer.abort();
    log::info!("TCP Session closed for {peer}");
}

async fn handle_request(handlers: &Handlers, peer: SocketAddr, request: Request) -> Response {
    let Request {
        tag,
        handler,
        payload,
    } = request;
    let outcome = match handlers.get(&handler) {
        Some(target) => match target.handle(peer, payload).await {
            Ok(reply) => response::Outcome::Ok(reply),
            Err(err) => response::Outcome::Error(err.into()),
        },
        None => {
            log::warn!("Request from {peer} for unknown handler {handler}");
            let err = HandlerErr::new(RemoteFailure::UnknownHandler, format!("handler {handler}"));
            response::Outcome::Error(err.into())
        }
    };
    Response {
        tag,
        outcome: Some(outcome),
    }
}

async fn write_responses(
    mut stream: OwnedWriteHalf,
    mut responses: MpscUnboundedReceiver<Envelope>,
    peer: SocketAddr,
) {
    while let Some(frame) = responses.recv().await {
        if let Err(write_err) = write_frame(&mut stream, &frame).await {
            log::warn!("Error writing to the stream of {peer} '{write_err}'");
            break;
        }
    }
}

/// A running [RpcServer]
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
    sessions: Sessions,
}

impl ServerHandle {
    /// The address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and close every incoming session
    pub fn stop(&self) {
        self.accept.abort();
        let sessions = {
            let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *sessions)
        };
        for session in sessions {
            session.abort();
        }
        log::info!("Node server on {} stopped", self.local_addr);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.accept.abort();
    }
}
