//! Server network layer: websocket accept loop and relay event loop

use crate::config::ServerConfig;
use crate::dispatcher::RelayDispatcher;
use crate::lifecycle::{Expiry, ExpiryScheduler};
use crate::registry::ConnectionId;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, sleep, Instant, Sleep};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

/// Events delivered to the main loop by connection tasks and expiry timers
#[derive(Debug)]
pub enum ServerEvent {
    Connected {
        addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    MessageReceived {
        connection_id: ConnectionId,
        message: Message,
    },
    Disconnected {
        connection_id: ConnectionId,
    },
    PollExpired {
        poll_id: String,
    },
    Shutdown,
}

/// Stops a running [`Server`] from another task
#[derive(Clone)]
pub struct ShutdownHandle {
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        if self.events.send(ServerEvent::Shutdown).is_err() {
            debug!("Server already stopped");
        }
    }
}

const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Pauses accepting after a listener error while the event loop keeps running
struct AcceptBackoff {
    timer: Pin<Box<Sleep>>,
    paused: bool,
}

impl AcceptBackoff {
    fn new() -> Self {
        Self {
            timer: Box::pin(sleep(Duration::ZERO)),
            paused: false,
        }
    }

    fn pause(&mut self, delay: Duration) {
        self.timer.as_mut().reset(Instant::now() + delay);
        self.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    async fn resumed(&mut self) {
        self.timer.as_mut().await;
        self.paused = false;
    }
}

/// Relay server: accepts websocket clients and runs every state change on
/// one event loop, so the registry and poll store need no locking
pub struct Server {
    listener: TcpListener,
    dispatcher: RelayDispatcher,
    path: Arc<str>,
    outbound_buffer: usize,

    // Communication channels
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub async fn new(config: &ServerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        config.validate()?;

        let listener = TcpListener::bind(config.bind_addr()).await?;
        let path: Arc<str> = Arc::from(config.upgrade_path());
        info!("Relay listening on ws://{}{}", listener.local_addr()?, path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatcher =
            RelayDispatcher::new(config.max_connections, ExpiryScheduler::new(event_tx.clone()));

        Ok(Server {
            listener,
            dispatcher,
            path,
            outbound_buffer: config.outbound_buffer,
            event_tx,
            event_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            events: self.event_tx.clone(),
        }
    }

    /// Spawns the task that upgrades and services one client socket
    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let path = Arc::clone(&self.path);
        let events = self.event_tx.clone();
        let outbound_buffer = self.outbound_buffer;

        tokio::spawn(async move {
            serve_connection(stream, addr, path, outbound_buffer, events).await;
        });
    }

    /// Applies one event. Returns false once the server should stop.
    fn handle_event(&mut self, event: ServerEvent) -> bool {
        match event {
            ServerEvent::Connected {
                addr,
                outbound,
                reply,
            } => {
                let connection_id = self.dispatcher.on_open(addr, outbound);
                if reply.send(connection_id).is_err() {
                    // Handshake task is gone; drop the registration it never saw
                    if let Some(id) = connection_id {
                        self.dispatcher.on_close(id);
                    }
                }
            }
            ServerEvent::MessageReceived {
                connection_id,
                message,
            } => {
                self.dispatcher.on_message(connection_id, message);
            }
            ServerEvent::Disconnected { connection_id } => {
                self.dispatcher.on_close(connection_id);
            }
            ServerEvent::PollExpired { poll_id } => {
                if let Expiry::Closed { delivered, .. } = self.dispatcher.on_poll_expired(&poll_id) {
                    debug!("Closure for poll {} sent to {} connections", poll_id, delivered);
                }
            }
            ServerEvent::Shutdown => {
                info!("Server shutting down");
                return false;
            }
        }
        true
    }

    /// Main server loop coordinating all operations
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut status_interval = interval(Duration::from_secs(60));
        let mut backoff = AcceptBackoff::new();

        info!("Server started successfully");

        loop {
            tokio::select! {
                accepted = self.listener.accept(), if !backoff.is_paused() => {
                    match accepted {
                        Ok((stream, addr)) => self.spawn_connection(stream, addr),
                        Err(e) => {
                            error!("Error accepting connection: {}", e);
                            backoff.pause(ACCEPT_BACKOFF);
                        }
                    }
                },

                _ = backoff.resumed(), if backoff.is_paused() => {},

                event = self.event_rx.recv() => {
                    match event {
                        Some(event) => {
                            if !self.handle_event(event) {
                                break;
                            }
                        }
                        None => break,
                    }
                },

                _ = status_interval.tick() => {
                    let connections = self.dispatcher.registry().len();
                    if connections > 0 {
                        debug!("{} connections, {} active polls",
                               connections, self.dispatcher.polls().len());
                    }
                },
            }
        }

        Ok(())
    }
}

/// Upgrades the socket, registers it, then pumps frames until either side closes
async fn serve_connection(
    stream: TcpStream,
    addr: SocketAddr,
    path: Arc<str>,
    outbound_buffer: usize,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    let websocket = match tokio_tungstenite::accept_hdr_async(
        stream,
        |request: &Request, response: Response| check_upgrade_path(&path, request, response),
    )
    .await
    {
        Ok(websocket) => websocket,
        Err(e) => {
            debug!("Websocket handshake with {} failed: {}", addr, e);
            return;
        }
    };

    let (mut sink, mut frames) = websocket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(outbound_buffer);
    let (reply_tx, reply_rx) = oneshot::channel();

    if events
        .send(ServerEvent::Connected {
            addr,
            outbound: outbound_tx,
            reply: reply_tx,
        })
        .is_err()
    {
        return;
    }

    let connection_id = match reply_rx.await {
        Ok(Some(id)) => id,
        _ => {
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    // Writer ends when the registry drops this connection's sender
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!("Write to connection {} failed: {}", connection_id, e);
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Message::Close(_)) => break,
            Ok(message @ (Message::Text(_) | Message::Binary(_))) => {
                if events
                    .send(ServerEvent::MessageReceived {
                        connection_id,
                        message,
                    })
                    .is_err()
                {
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Connection {} read error: {}", connection_id, e);
                break;
            }
        }
    }

    let _ = events.send(ServerEvent::Disconnected { connection_id });
    writer.abort();
}

/// Only upgrades on the configured path; anything else gets a 404
fn check_upgrade_path(
    path: &str,
    request: &Request,
    response: Response,
) -> Result<Response, ErrorResponse> {
    if request.uri().path() == path {
        return Ok(response);
    }

    debug!("Refusing websocket upgrade on {}", request.uri().path());
    let mut rejection = ErrorResponse::new(Some(format!(
        "no relay at {}",
        request.uri().path()
    )));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}
