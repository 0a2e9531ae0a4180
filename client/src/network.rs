use crate::input::{encode, Action, InputError, InputManager, HELP};
use crate::polls::{ClientPollState, VoteRejection};
use crate::rendering::{self, Renderer};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use shared::{
    decode_client_message, decode_server_message, get_timestamp, ClientMessage, ServerMessage,
};
use std::io::{Stdout, Write};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, WebSocketStream};

const PRUNE_INTERVAL: Duration = Duration::from_secs(5);

/// How a connected session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Quit,
    Disconnected,
}

/// Terminal viewer that connects to the relay, joins and reconnects when dropped
pub struct Client<W: Write = Stdout> {
    url: String,
    input: InputManager,
    polls: ClientPollState,
    renderer: Renderer<W>,
    reconnect_delay: Duration,
}

impl Client<Stdout> {
    pub fn new(url: &str, player_id: impl Into<String>, reconnect_delay: Duration) -> Self {
        Self::with_renderer(url, player_id, reconnect_delay, Renderer::new())
    }
}

impl<W: Write> Client<W> {
    pub fn with_renderer(
        url: &str,
        player_id: impl Into<String>,
        reconnect_delay: Duration,
        renderer: Renderer<W>,
    ) -> Self {
        Self {
            url: url.to_string(),
            input: InputManager::new(player_id),
            polls: ClientPollState::new(),
            renderer,
            reconnect_delay,
        }
    }

    pub fn polls(&self) -> &ClientPollState {
        &self.polls
    }

    /// Runs until the user quits or stdin closes
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let mut lines = spawn_stdin_reader();
        self.renderer.print(&[HELP.to_string()])?;

        loop {
            info!("Connecting to {}...", self.url);
            match connect_async(self.url.as_str()).await {
                Ok((socket, _)) => {
                    info!("Connected as player {}", self.input.player_id());
                    if self.session(socket, &mut lines).await? == SessionEnd::Quit {
                        info!("Leaving the relay");
                        return Ok(());
                    }
                    warn!("Disconnected from relay");
                }
                Err(e) => warn!("Connection to {} failed: {}", self.url, e),
            }

            info!("Reconnecting in {:?}", self.reconnect_delay);
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    /// Drives one connection: announces the player, then interleaves relay
    /// frames with typed input until either side goes away
    pub async fn session<S>(
        &mut self,
        socket: WebSocketStream<S>,
        lines: &mut mpsc::Receiver<String>,
    ) -> Result<SessionEnd, Box<dyn std::error::Error>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (mut sink, mut frames) = socket.split();
        let join = encode(&self.input.join(), self.input.player_id(), get_timestamp())?;
        sink.send(Message::text(join)).await?;

        let mut prune = tokio::time::interval(PRUNE_INTERVAL);

        loop {
            tokio::select! {
                frame = frames.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        let output = self.handle_incoming(text.as_str(), get_timestamp());
                        self.renderer.print(&output)?;
                    }
                    Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Disconnected),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Connection error: {}", e);
                        return Ok(SessionEnd::Disconnected);
                    }
                },

                line = lines.recv() => {
                    let Some(line) = line else {
                        let _ = sink.close().await;
                        return Ok(SessionEnd::Quit);
                    };

                    let now = get_timestamp();
                    match self.input.handle_line(&line, now) {
                        Ok(Action::Send(message)) => match self.prepare_outgoing(&message) {
                            Ok(output) => {
                                let text = encode(&message, self.input.player_id(), now)?;
                                if let Err(e) = sink.send(Message::text(text)).await {
                                    warn!("Failed to send message: {}", e);
                                    return Ok(SessionEnd::Disconnected);
                                }
                                self.renderer.print(&output)?;
                            }
                            Err(rejection) => self.renderer.print(&[rejection.to_string()])?,
                        },
                        Ok(Action::ListPolls) => {
                            let output = rendering::open_poll_lines(&self.polls.open_polls(), now);
                            self.renderer.print(&output)?;
                        }
                        Ok(Action::Help) => self.renderer.print(&[HELP.to_string()])?,
                        Ok(Action::Quit) => {
                            let _ = sink.close().await;
                            return Ok(SessionEnd::Quit);
                        }
                        Err(InputError::Empty) => {}
                        Err(e) => self.renderer.print(&[e.to_string()])?,
                    }
                }

                _ = prune.tick() => {
                    let dropped = self.polls.prune(get_timestamp());
                    if dropped > 0 {
                        debug!("Dropped {} polls that never closed", dropped);
                    }
                }
            }
        }
    }

    /// Updates local poll state from a relay frame and returns the lines to show
    fn handle_incoming(&mut self, text: &str, now: u64) -> Vec<String> {
        match decode_server_message(text) {
            Ok(ServerMessage::Poll(poll)) => {
                let output = rendering::poll_lines(&poll, now);
                if self.polls.on_announcement(poll) {
                    return output;
                }
                return Vec::new();
            }
            Ok(ServerMessage::VoteClosure(closure)) => {
                let tracked = self.polls.on_closure(&closure);
                return rendering::closure_lines(
                    &closure,
                    tracked.as_ref().map(|poll| &poll.announcement),
                );
            }
            Err(_) => {}
        }

        match decode_client_message(text) {
            Ok(ClientMessage::Message(chat)) => rendering::chat_line(&chat).into_iter().collect(),
            Ok(ClientMessage::Vote(vote)) => {
                debug!("Player {} voted in poll {}", vote.player_id, vote.poll_id);
                Vec::new()
            }
            Ok(other) => {
                debug!("Ignoring {:?}", other);
                Vec::new()
            }
            Err(e) => {
                debug!("Unrecognized frame: {}", e);
                Vec::new()
            }
        }
    }

    /// Applies a message locally before it is sent. Votes the client already
    /// cast, or that cannot match a known option, are refused here.
    fn prepare_outgoing(&mut self, message: &ClientMessage) -> Result<Vec<String>, VoteRejection> {
        match message {
            ClientMessage::Vote(vote) => {
                self.polls.mark_voted(&vote.poll_id, &vote.option_id)?;
                Ok(vec![format!(
                    "Voted for option {} in poll {}",
                    vote.option_id, vote.poll_id
                )])
            }
            // The relay never echoes our own poll back
            ClientMessage::Poll(poll) => {
                let output = rendering::poll_lines(poll, poll.timestamp);
                self.polls.on_announcement(poll.clone());
                Ok(output)
            }
            ClientMessage::Message(chat) if chat.player_id == self.input.player_id() => {
                Ok(vec![rendering::own_line(&chat.message)])
            }
            _ => Ok(Vec::new()),
        }
    }
}

fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    });

    rx
}
