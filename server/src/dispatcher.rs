//! Per-message routing for the relay
//!
//! Every inbound payload takes two independent paths:
//! 1. If it decodes as a typed message, it is applied to the poll store
//!    (`poll`, `vote`) or answered directly (`join`).
//! 2. It is relayed verbatim to every other connection. `join` is the one
//!    exception: it is private to the sender.
//!
//! Failures on the first path are logged and never stop the second.

use crate::lifecycle::{Expiry, ExpiryScheduler, PollLifecycle};
use crate::poll_store::{Poll, PollError, PollStore};
use crate::registry::{ConnectionId, ConnectionRegistry};
use log::{debug, info, warn};
use shared::{
    decode_client_message, get_timestamp, ClientMessage, DecodeError, PollAnnouncement,
    ServerMessage, VoteCast,
};
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Owns all relay state: connection membership, active polls and expiry.
pub struct RelayDispatcher {
    registry: ConnectionRegistry,
    polls: PollStore,
    lifecycle: PollLifecycle,
}

impl RelayDispatcher {
    pub fn new(max_connections: usize, scheduler: ExpiryScheduler) -> Self {
        Self::with_lifecycle(max_connections, PollLifecycle::new(scheduler))
    }

    pub fn with_lifecycle(max_connections: usize, lifecycle: PollLifecycle) -> Self {
        Self {
            registry: ConnectionRegistry::new(max_connections),
            polls: PollStore::new(),
            lifecycle,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn polls(&self) -> &PollStore {
        &self.polls
    }

    /// Registers a freshly upgraded channel. None means the server is full.
    pub fn on_open(
        &mut self,
        addr: SocketAddr,
        outbound: mpsc::Sender<Message>,
    ) -> Option<ConnectionId> {
        let id = self.registry.register(addr, outbound);
        if id.is_none() {
            warn!("Rejecting connection from {}: server full", addr);
        }
        id
    }

    pub fn on_close(&mut self, connection_id: ConnectionId) {
        self.registry.unregister(&connection_id);
    }

    /// Handles one inbound frame from `from`
    pub fn on_message(&mut self, from: ConnectionId, message: Message) {
        let (text, relay) = match message {
            Message::Text(text) => {
                let relay = Message::Text(text.clone());
                (Some(text.as_str().to_owned()), relay)
            }
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => (Some(text.to_owned()), Message::text(text.to_owned())),
                Err(_) => (None, Message::Binary(data)),
            },
            // Control frames are answered by the websocket layer
            _ => return,
        };

        let private = match text {
            Some(payload) => self.dispatch(from, &payload),
            None => {
                warn!("Connection {} sent a non-text frame, relaying as-is", from);
                false
            }
        };

        if !private {
            let delivered = self.registry.broadcast_except(from, &relay);
            debug!("Relayed message from {} to {} connections", from, delivered);
        }
    }

    /// Applies the typed side effect of a payload.
    /// Returns true when the payload must not be relayed.
    fn dispatch(&mut self, from: ConnectionId, payload: &str) -> bool {
        match decode_client_message(payload) {
            Ok(ClientMessage::Join(join)) => {
                self.replay_polls(from, &join.player_id);
                true
            }
            Ok(ClientMessage::Poll(announcement)) => {
                self.create_poll(announcement);
                false
            }
            Ok(ClientMessage::Vote(vote)) => {
                self.record_vote(vote);
                false
            }
            Ok(ClientMessage::Message(_)) => false,
            Err(DecodeError::UnknownType(kind)) => {
                debug!("No handler for `{}` message from {}", kind, from);
                false
            }
            Err(DecodeError::InvalidFields { kind, source }) if kind == "join" => {
                warn!("Ignoring malformed join from {}: {}", from, source);
                true
            }
            Err(e) if e.is_opaque() => {
                warn!("Relaying unparsed message from {}: {}", from, e);
                false
            }
            Err(e) => {
                warn!("Ignoring message from {}: {}", from, e);
                false
            }
        }
    }

    /// Sends the joining player every active poll they have not voted in
    fn replay_polls(&self, to: ConnectionId, player_id: &str) {
        for announcement in self.polls.unvoted_by(player_id) {
            let poll_id = announcement.id.clone();
            let text = match serde_json::to_string(&ServerMessage::Poll(announcement)) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode poll {}: {}", poll_id, e);
                    continue;
                }
            };

            if let Err(e) = self.registry.send_to(to, Message::text(text)) {
                debug!("Could not replay poll {}: {}", poll_id, e);
            }
        }
    }

    fn create_poll(&mut self, announcement: PollAnnouncement) {
        let poll = Poll::from_announcement(announcement);
        let now = get_timestamp();

        match self.polls.create(poll.clone()) {
            Ok(()) => {
                self.lifecycle.track(&poll, now);
            }
            Err(PollError::DuplicateId(id)) => {
                info!("Poll {} already active, creation skipped", id);
            }
            Err(e) => warn!("Poll creation failed: {}", e),
        }
    }

    fn record_vote(&mut self, vote: VoteCast) {
        match self
            .polls
            .record_vote(&vote.poll_id, &vote.option_id, &vote.player_id)
        {
            Ok(votes) => debug!(
                "Player {} voted {} in poll {} ({} votes)",
                vote.player_id, vote.option_id, vote.poll_id, votes
            ),
            Err(PollError::OptionNotFound { option_id, .. }) => {
                warn!("Invalid option received - {}", option_id);
            }
            Err(e) => warn!("Vote dropped: {}", e),
        }
    }

    /// Handles a fired expiry timer
    pub fn on_poll_expired(&mut self, poll_id: &str) -> Expiry {
        self.expire_at(poll_id, get_timestamp())
    }

    pub fn expire_at(&mut self, poll_id: &str, now: u64) -> Expiry {
        self.lifecycle
            .expire(poll_id, &mut self.polls, &self.registry, now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::ServerEvent;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::{json, Value};

    struct Harness {
        dispatcher: RelayDispatcher,
        _events: mpsc::UnboundedReceiver<ServerEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let lifecycle =
                PollLifecycle::with_rng(ExpiryScheduler::new(tx), StdRng::seed_from_u64(11));
            Self {
                dispatcher: RelayDispatcher::with_lifecycle(8, lifecycle),
                _events: rx,
            }
        }

        fn connect(&mut self) -> (ConnectionId, mpsc::Receiver<Message>) {
            let (tx, rx) = mpsc::channel(32);
            let id = self
                .dispatcher
                .on_open("127.0.0.1:9000".parse().unwrap(), tx)
                .unwrap();
            (id, rx)
        }

        fn send(&mut self, from: ConnectionId, value: Value) -> String {
            let text = value.to_string();
            self.dispatcher.on_message(from, Message::text(text.clone()));
            text
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Message>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message.to_text().unwrap().to_string());
        }
        out
    }

    fn poll_json(id: &str, end_time: u64) -> Value {
        json!({
            "type": "poll",
            "id": id,
            "title": "Where next?",
            "options": [{"id": "a", "name": "A"}, {"id": "b", "name": "B"}],
            "endTime": end_time,
            "timestamp": get_timestamp(),
            "playerId": 1
        })
    }

    fn vote_json(poll_id: &str, option_id: &str, player_id: &str) -> Value {
        json!({
            "type": "vote",
            "pollId": poll_id,
            "optionId": option_id,
            "playerId": player_id,
            "timestamp": 0
        })
    }

    #[tokio::test]
    async fn test_chat_relayed_to_others_only() {
        let mut harness = Harness::new();
        let (c1, mut rx1) = harness.connect();
        let (_c2, mut rx2) = harness.connect();

        let sent = harness.send(c1, json!({"type": "message", "message": "hi", "playerId": 5}));

        assert_eq!(drain(&mut rx2), vec![sent]);
        assert!(drain(&mut rx1).is_empty());
    }

    #[tokio::test]
    async fn test_unparsed_payload_still_relayed() {
        let mut harness = Harness::new();
        let (c1, _rx1) = harness.connect();
        let (_c2, mut rx2) = harness.connect();

        harness
            .dispatcher
            .on_message(c1, Message::text("Hi Unity, I'm Bun!".to_string()));

        assert_eq!(drain(&mut rx2), vec!["Hi Unity, I'm Bun!".to_string()]);
        assert!(harness.dispatcher.polls().is_empty());
    }

    #[tokio::test]
    async fn test_utf8_binary_relayed_as_text() {
        let mut harness = Harness::new();
        let (c1, _rx1) = harness.connect();
        let (_c2, mut rx2) = harness.connect();

        let payload = poll_json("bin", get_timestamp() + 60_000).to_string();
        harness
            .dispatcher
            .on_message(c1, Message::binary(payload.clone().into_bytes()));

        let relayed = rx2.try_recv().unwrap();
        assert!(relayed.is_text());
        assert_eq!(relayed.to_text().unwrap(), payload);
        assert!(harness.dispatcher.polls().find_by_id("bin").is_some());
    }

    #[tokio::test]
    async fn test_non_utf8_binary_relayed_as_binary() {
        let mut harness = Harness::new();
        let (c1, _rx1) = harness.connect();
        let (_c2, mut rx2) = harness.connect();

        harness
            .dispatcher
            .on_message(c1, Message::binary(vec![0xff, 0xfe, 0x00]));

        let relayed = rx2.try_recv().unwrap();
        assert!(relayed.is_binary());
        assert_eq!(relayed.into_data().to_vec(), vec![0xff, 0xfe, 0x00]);
    }

    #[tokio::test]
    async fn test_poll_creation_resets_counts_and_relays() {
        let mut harness = Harness::new();
        let (c1, _rx1) = harness.connect();
        let (_c2, mut rx2) = harness.connect();

        let mut payload = poll_json("p1", get_timestamp() + 60_000);
        payload["options"][0]["votes"] = json!(42);
        let sent = harness.send(c1, payload);

        let poll = harness.dispatcher.polls().find_by_id("p1").unwrap();
        assert!(poll.options.iter().all(|option| option.votes == 0));
        assert_eq!(drain(&mut rx2), vec![sent]);
    }

    #[tokio::test]
    async fn test_duplicate_poll_still_relayed() {
        let mut harness = Harness::new();
        let (c1, _rx1) = harness.connect();
        let (_c2, mut rx2) = harness.connect();

        let end_time = get_timestamp() + 60_000;
        harness.send(c1, poll_json("p1", end_time));
        let mut duplicate = poll_json("p1", end_time + 5_000);
        duplicate["title"] = json!("Impostor");
        harness.send(c1, duplicate);

        assert_eq!(drain(&mut rx2).len(), 2);
        assert_eq!(harness.dispatcher.polls().len(), 1);
        assert_eq!(
            harness.dispatcher.polls().find_by_id("p1").unwrap().title,
            "Where next?"
        );
    }

    #[tokio::test]
    async fn test_votes_counted_and_relayed() {
        let mut harness = Harness::new();
        let (c1, _rx1) = harness.connect();
        let (c2, mut rx2) = harness.connect();
        let (_c3, mut rx3) = harness.connect();

        harness.send(c1, poll_json("p1", get_timestamp() + 60_000));
        harness.send(c2, vote_json("p1", "a", "v1"));
        harness.send(c2, vote_json("p1", "a", "v2"));
        harness.send(c2, vote_json("p1", "zzz", "v3"));
        harness.send(c2, vote_json("missing", "a", "v4"));

        let poll = harness.dispatcher.polls().find_by_id("p1").unwrap();
        assert_eq!(poll.options[0].votes, 2);
        assert_eq!(poll.options[1].votes, 0);

        // Poll creation reached c2; every vote (even rejected ones) reached c3
        assert_eq!(drain(&mut rx2).len(), 1);
        assert_eq!(drain(&mut rx3).len(), 5);
    }

    #[tokio::test]
    async fn test_double_vote_counts_once() {
        let mut harness = Harness::new();
        let (c1, _rx1) = harness.connect();

        harness.send(c1, poll_json("p1", get_timestamp() + 60_000));
        harness.send(c1, vote_json("p1", "a", "v1"));
        harness.send(c1, vote_json("p1", "b", "v1"));

        let poll = harness.dispatcher.polls().find_by_id("p1").unwrap();
        assert_eq!(poll.options[0].votes, 1);
        assert_eq!(poll.options[1].votes, 0);
    }

    #[tokio::test]
    async fn test_join_replies_privately_with_unvoted_polls() {
        let mut harness = Harness::new();
        let (creator, _rx_creator) = harness.connect();
        let (joiner, mut rx_joiner) = harness.connect();
        let (_other, mut rx_other) = harness.connect();

        let end_time = get_timestamp() + 60_000;
        harness.send(creator, poll_json("p1", end_time));
        harness.send(creator, poll_json("p2", end_time));
        harness.send(creator, vote_json("p1", "b", "42"));
        drain(&mut rx_joiner);
        drain(&mut rx_other);

        // Numeric and string player ids refer to the same voter
        harness.send(joiner, json!({"type": "join", "playerId": 42, "message": "Join|42"}));

        let replies = drain(&mut rx_joiner);
        assert_eq!(replies.len(), 1);
        let reply: Value = serde_json::from_str(&replies[0]).unwrap();
        assert_eq!(reply["type"], "poll");
        assert_eq!(reply["id"], "p2");
        assert_eq!(reply["endTime"], end_time);
        assert_eq!(reply["options"][1]["name"], "B");
        assert!(reply["options"][0].get("votes").is_none());

        assert!(drain(&mut rx_other).is_empty());
    }

    #[tokio::test]
    async fn test_join_with_no_polls_sends_nothing() {
        let mut harness = Harness::new();
        let (joiner, mut rx_joiner) = harness.connect();
        let (_other, mut rx_other) = harness.connect();

        harness.send(joiner, json!({"type": "join", "playerId": "x"}));

        assert!(drain(&mut rx_joiner).is_empty());
        assert!(drain(&mut rx_other).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_join_stays_private() {
        let mut harness = Harness::new();
        let (joiner, mut rx_joiner) = harness.connect();
        let (_other, mut rx_other) = harness.connect();
        harness.send(joiner, poll_json("p1", get_timestamp() + 60_000));
        drain(&mut rx_other);

        harness.send(joiner, json!({"type": "join"}));
        harness.send(joiner, json!({"type": "join", "playerId": {"nested": true}}));

        assert!(drain(&mut rx_joiner).is_empty());
        assert!(drain(&mut rx_other).is_empty());
    }

    #[tokio::test]
    async fn test_missing_fields_no_store_effect_but_relayed() {
        let mut harness = Harness::new();
        let (c1, _rx1) = harness.connect();
        let (_c2, mut rx2) = harness.connect();

        harness.send(c1, json!({"type": "poll", "id": "p1", "title": "No options"}));

        assert!(harness.dispatcher.polls().is_empty());
        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[tokio::test]
    async fn test_expiry_scenario() {
        let mut harness = Harness::new();
        let (c1, mut rx1) = harness.connect();
        let (c2, mut rx2) = harness.connect();

        let end_time = get_timestamp() + 30_000;
        harness.send(c1, poll_json("p1", end_time));
        for voter in ["v1", "v2", "v3"] {
            harness.send(c2, vote_json("p1", "a", voter));
        }
        harness.send(c2, vote_json("p1", "b", "v4"));
        drain(&mut rx1);
        drain(&mut rx2);

        let expiry = harness.dispatcher.expire_at("p1", end_time);
        assert!(matches!(expiry, Expiry::Closed { delivered: 2, .. }));

        // Both connections, creator included, get exactly one closure
        for rx in [&mut rx1, &mut rx2] {
            let messages = drain(rx);
            assert_eq!(messages.len(), 1);
            let closure: Value = serde_json::from_str(&messages[0]).unwrap();
            assert_eq!(closure["type"], "voteClosure");
            assert_eq!(closure["pollId"], "p1");
            assert_eq!(
                closure["results"],
                json!([{"optionId": "a", "votes": 3}, {"optionId": "b", "votes": 1}])
            );
            assert_eq!(closure["reason"], "Poll closed with winner A! Please focus on the show!");
        }

        // Late vote after closure is dropped, duplicate timer is silent
        harness.send(c2, vote_json("p1", "a", "v5"));
        assert_eq!(
            harness.dispatcher.expire_at("p1", end_time + 1),
            Expiry::AlreadyClosed
        );
        assert!(drain(&mut rx2).is_empty());
        assert_eq!(drain(&mut rx1).len(), 1);
    }

    #[tokio::test]
    async fn test_closed_connection_is_unregistered() {
        let mut harness = Harness::new();
        let (c1, _rx1) = harness.connect();
        let (c2, mut rx2) = harness.connect();

        harness.dispatcher.on_close(c2);
        harness.dispatcher.on_close(c2);
        harness.send(c1, json!({"type": "message", "message": "anyone?", "playerId": 1}));

        assert!(!harness.dispatcher.registry().contains(&c2));
        assert!(drain(&mut rx2).is_empty());
    }
}
