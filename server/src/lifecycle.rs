//! Poll expiry: scheduling, winner resolution and closure broadcast
//!
//! Each poll moves Active -> Resolving -> Closed. Every creation arms exactly
//! one timer task that reports the poll id back to the server event loop at
//! its end time. The event loop then calls [`PollLifecycle::expire`], which
//! re-checks that the poll is still present and due before resolving it, so a
//! duplicate or early timer never produces a second or premature closure.

use crate::network::ServerEvent;
use crate::poll_store::{Poll, PollOption, PollStore};
use crate::registry::ConnectionRegistry;
use log::{debug, error, info};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use shared::{ServerMessage, VoteClosure};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Arms one-shot expiry timers that feed the server event loop
#[derive(Clone)]
pub struct ExpiryScheduler {
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl ExpiryScheduler {
    pub fn new(events: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self { events }
    }

    /// Spawns a timer that reports `poll_id` once `end_time` is reached.
    /// Returns the delay the timer was armed with.
    pub fn schedule(&self, poll_id: &str, end_time: u64, now: u64) -> Duration {
        let delay = Duration::from_millis(end_time.saturating_sub(now));
        let events = self.events.clone();
        let poll_id = poll_id.to_string();

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if events
                .send(ServerEvent::PollExpired {
                    poll_id: poll_id.clone(),
                })
                .is_err()
            {
                debug!("Server stopped before poll {} expired", poll_id);
            }
        });

        delay
    }
}

/// What happened when an expiry timer fired
#[derive(Debug, PartialEq, Eq)]
pub enum Expiry {
    /// Poll removed and its closure broadcast to `delivered` connections
    Closed {
        closure: VoteClosure,
        delivered: usize,
    },
    /// Timer fired before the end time; re-armed for the remainder
    NotDue { remaining: Duration },
    /// Poll was already gone, nothing sent
    AlreadyClosed,
}

/// Owns poll expiry: the only component that reads the poll store and writes
/// into the registry's broadcast path
pub struct PollLifecycle {
    scheduler: ExpiryScheduler,
    rng: StdRng,
}

impl PollLifecycle {
    pub fn new(scheduler: ExpiryScheduler) -> Self {
        Self::with_rng(scheduler, StdRng::from_entropy())
    }

    pub fn with_rng(scheduler: ExpiryScheduler, rng: StdRng) -> Self {
        Self { scheduler, rng }
    }

    /// Arms the expiry timer for a freshly created poll
    pub fn track(&self, poll: &Poll, now: u64) -> Duration {
        let delay = self.scheduler.schedule(&poll.id, poll.end_time, now);
        info!(
            "Poll {} closes in {:.1}s",
            poll.id,
            delay.as_secs_f32()
        );
        delay
    }

    /// Resolves and closes `poll_id` if it is still active and due
    pub fn expire(
        &mut self,
        poll_id: &str,
        polls: &mut PollStore,
        registry: &ConnectionRegistry,
        now: u64,
    ) -> Expiry {
        let end_time = match polls.find_by_id(poll_id) {
            Some(poll) => poll.end_time,
            None => {
                debug!("Expiry for poll {} ignored, already closed", poll_id);
                return Expiry::AlreadyClosed;
            }
        };

        if now < end_time {
            let remaining = self.scheduler.schedule(poll_id, end_time, now);
            debug!("Poll {} not due yet, re-armed for {:?}", poll_id, remaining);
            return Expiry::NotDue { remaining };
        }

        let Some(poll) = polls.remove_by_id(poll_id) else {
            return Expiry::AlreadyClosed;
        };

        let winner = resolve_winner(&poll.options, &mut self.rng);
        match winner {
            Some(option) => info!(
                "\"{}\" Poll ended with winner \"{}\"",
                poll.title, option.name
            ),
            None => info!("\"{}\" Poll ended without options", poll.title),
        }

        let closure = VoteClosure {
            poll_id: poll.id.clone(),
            results: poll.results(),
            reason: closure_reason(winner),
        };

        let delivered = match serde_json::to_string(&ServerMessage::VoteClosure(closure.clone())) {
            Ok(text) => registry.broadcast_all(&Message::text(text)),
            Err(e) => {
                error!("Failed to encode closure for poll {}: {}", poll.id, e);
                0
            }
        };

        Expiry::Closed { closure, delivered }
    }
}

/// Picks the option with the most votes, breaking ties uniformly at random.
///
/// With all counters at zero every option is tied. Returns None only when
/// there are no options at all.
pub fn resolve_winner<'a, R>(options: &'a [PollOption], rng: &mut R) -> Option<&'a PollOption>
where
    R: Rng + ?Sized,
{
    let mut tied: Vec<&PollOption> = Vec::new();
    let mut best = 0;

    for option in options {
        if tied.is_empty() || option.votes > best {
            best = option.votes;
            tied.clear();
            tied.push(option);
        } else if option.votes == best {
            tied.push(option);
        }
    }

    tied.choose(rng).copied()
}

pub fn closure_reason(winner: Option<&PollOption>) -> String {
    match winner {
        Some(option) => format!(
            "Poll closed with winner {}! Please focus on the show!",
            option.name
        ),
        None => "Poll closed with no options to choose from.".to_string(),
    }
}
