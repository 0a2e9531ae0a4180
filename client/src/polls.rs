//! Client-side view of open polls

use shared::{PollAnnouncement, VoteClosure};
use std::collections::HashMap;
use thiserror::Error;

/// How long after its end time a poll is kept while waiting for a closure
pub const CLOSURE_GRACE_MS: u64 = 5_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VoteRejection {
    #[error("unknown poll {0}")]
    UnknownPoll(String),

    #[error("poll {0} has no option {1}")]
    UnknownOption(String, String),

    #[error("you already voted in poll {0}")]
    AlreadyVoted(String),
}

#[derive(Debug, Clone)]
pub struct TrackedPoll {
    pub announcement: PollAnnouncement,
    pub voted: bool,
}

impl TrackedPoll {
    /// Whole seconds left before the poll closes
    pub fn remaining_secs(&self, now: u64) -> u64 {
        self.announcement.end_time.saturating_sub(now) / 1000
    }
}

#[derive(Debug, Default)]
pub struct ClientPollState {
    polls: HashMap<String, TrackedPoll>,
}

impl ClientPollState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an announced poll. Returns false if it was already known.
    pub fn on_announcement(&mut self, announcement: PollAnnouncement) -> bool {
        if self.polls.contains_key(&announcement.id) {
            return false;
        }
        self.polls.insert(
            announcement.id.clone(),
            TrackedPoll {
                announcement,
                voted: false,
            },
        );
        true
    }

    pub fn on_closure(&mut self, closure: &VoteClosure) -> Option<TrackedPoll> {
        self.polls.remove(&closure.poll_id)
    }

    /// Marks a local ballot; each poll accepts one vote from this client
    pub fn mark_voted(&mut self, poll_id: &str, option_id: &str) -> Result<(), VoteRejection> {
        let poll = self
            .polls
            .get_mut(poll_id)
            .ok_or_else(|| VoteRejection::UnknownPoll(poll_id.to_string()))?;

        if poll.voted {
            return Err(VoteRejection::AlreadyVoted(poll_id.to_string()));
        }
        if !poll
            .announcement
            .options
            .iter()
            .any(|option| option.id == option_id)
        {
            return Err(VoteRejection::UnknownOption(
                poll_id.to_string(),
                option_id.to_string(),
            ));
        }

        poll.voted = true;
        Ok(())
    }

    /// Drops polls whose closure never arrived (e.g. while disconnected)
    pub fn prune(&mut self, now: u64) -> usize {
        let before = self.polls.len();
        self.polls
            .retain(|_, poll| poll.announcement.end_time.saturating_add(CLOSURE_GRACE_MS) > now);
        before - self.polls.len()
    }

    /// Open polls, soonest to close first
    pub fn open_polls(&self) -> Vec<&TrackedPoll> {
        let mut polls: Vec<&TrackedPoll> = self.polls.values().collect();
        polls.sort_by_key(|poll| poll.announcement.end_time);
        polls
    }

    pub fn get(&self, poll_id: &str) -> Option<&TrackedPoll> {
        self.polls.get(poll_id)
    }

    pub fn len(&self) -> usize {
        self.polls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }
}
