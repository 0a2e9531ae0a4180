//! In-memory store of active polls
//!
//! The store exclusively owns poll and option data. It is driven from the
//! server event loop only, so every mutation is serialized without a lock.

use log::info;
use shared::{OptionResult, OptionSpec, PollAnnouncement};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("poll `{0}` is already active")]
    DuplicateId(String),

    #[error("no active poll `{0}`")]
    PollNotFound(String),

    #[error("poll `{poll_id}` has no option `{option_id}`")]
    OptionNotFound { poll_id: String, option_id: String },

    #[error("player `{player_id}` already voted in poll `{poll_id}`")]
    AlreadyVoted { poll_id: String, player_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOption {
    pub id: String,
    pub name: String,
    pub votes: u32,
}

/// A time-bounded multiple-choice vote
#[derive(Debug, Clone)]
pub struct Poll {
    pub id: String,
    pub title: String,
    /// Display order; resolution does not depend on it
    pub options: Vec<PollOption>,
    /// Expiry instant, epoch milliseconds. Fixed at creation.
    pub end_time: u64,
    /// Creation instant, epoch milliseconds
    pub created_at: u64,
    voters: HashSet<String>,
}

impl Poll {
    /// Builds a fresh poll with every counter at zero
    pub fn from_announcement(announcement: PollAnnouncement) -> Self {
        Self {
            id: announcement.id,
            title: announcement.title,
            options: announcement
                .options
                .into_iter()
                .map(|option| PollOption {
                    id: option.id,
                    name: option.name,
                    votes: 0,
                })
                .collect(),
            end_time: announcement.end_time,
            created_at: announcement.timestamp,
            voters: HashSet::new(),
        }
    }

    pub fn has_voted(&self, player_id: &str) -> bool {
        self.voters.contains(player_id)
    }

    pub fn voter_count(&self) -> usize {
        self.voters.len()
    }

    pub fn is_due(&self, now: u64) -> bool {
        now >= self.end_time
    }

    /// Public view without tallies or voters
    pub fn announcement(&self) -> PollAnnouncement {
        PollAnnouncement {
            id: self.id.clone(),
            title: self.title.clone(),
            options: self
                .options
                .iter()
                .map(|option| OptionSpec {
                    id: option.id.clone(),
                    name: option.name.clone(),
                })
                .collect(),
            end_time: self.end_time,
            timestamp: self.created_at,
        }
    }

    /// Final tallies in display order
    pub fn results(&self) -> Vec<OptionResult> {
        self.options
            .iter()
            .map(|option| OptionResult {
                option_id: option.id.clone(),
                votes: option.votes,
            })
            .collect()
    }
}

/// Active polls in creation order
#[derive(Debug, Default)]
pub struct PollStore {
    polls: Vec<Poll>,
}

impl PollStore {
    pub fn new() -> Self {
        Self { polls: Vec::new() }
    }

    pub fn create(&mut self, poll: Poll) -> Result<(), PollError> {
        if self.find_by_id(&poll.id).is_some() {
            return Err(PollError::DuplicateId(poll.id));
        }

        info!(
            "Poll \"{}\" ({}) created with {} options",
            poll.title,
            poll.id,
            poll.options.len()
        );
        self.polls.push(poll);
        Ok(())
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Poll> {
        self.polls.iter().find(|poll| poll.id == id)
    }

    /// Counts one vote. The first vote from a player in a poll wins; later
    /// votes from the same player are rejected without touching any counter.
    pub fn record_vote(
        &mut self,
        poll_id: &str,
        option_id: &str,
        player_id: &str,
    ) -> Result<u32, PollError> {
        let poll = self
            .polls
            .iter_mut()
            .find(|poll| poll.id == poll_id)
            .ok_or_else(|| PollError::PollNotFound(poll_id.to_string()))?;

        if poll.voters.contains(player_id) {
            return Err(PollError::AlreadyVoted {
                poll_id: poll_id.to_string(),
                player_id: player_id.to_string(),
            });
        }

        let option = poll
            .options
            .iter_mut()
            .find(|option| option.id == option_id)
            .ok_or_else(|| PollError::OptionNotFound {
                poll_id: poll_id.to_string(),
                option_id: option_id.to_string(),
            })?;

        option.votes += 1;
        let votes = option.votes;
        poll.voters.insert(player_id.to_string());

        Ok(votes)
    }

    /// Removes a poll, returning it if it was still active
    pub fn remove_by_id(&mut self, id: &str) -> Option<Poll> {
        let index = self.polls.iter().position(|poll| poll.id == id)?;
        Some(self.polls.remove(index))
    }

    /// Snapshot of every active poll at call time
    pub fn list_active(&self) -> impl Iterator<Item = Poll> {
        self.polls.clone().into_iter()
    }

    /// Public views of the active polls `player_id` has not voted in
    pub fn unvoted_by<'a>(
        &'a self,
        player_id: &'a str,
    ) -> impl Iterator<Item = PollAnnouncement> + 'a {
        self.polls
            .iter()
            .filter(move |poll| !poll.has_voted(player_id))
            .map(Poll::announcement)
    }

    pub fn len(&self) -> usize {
        self.polls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement(id: &str, options: &[(&str, &str)]) -> PollAnnouncement {
        PollAnnouncement {
            id: id.to_string(),
            title: format!("Poll {}", id),
            options: options
                .iter()
                .map(|(id, name)| OptionSpec {
                    id: id.to_string(),
                    name: name.to_string(),
                })
                .collect(),
            end_time: 1_000_030_000,
            timestamp: 1_000_000_000,
        }
    }

    fn store_with_poll() -> PollStore {
        let mut store = PollStore::new();
        store
            .create(Poll::from_announcement(announcement(
                "p1",
                &[("a", "A"), ("b", "B")],
            )))
            .unwrap();
        store
    }

    #[test]
    fn test_create_starts_at_zero() {
        let store = store_with_poll();
        let poll = store.find_by_id("p1").unwrap();

        assert_eq!(poll.options.len(), 2);
        assert!(poll.options.iter().all(|option| option.votes == 0));
        assert_eq!(poll.voter_count(), 0);
        assert_eq!(poll.created_at, 1_000_000_000);
        assert_eq!(poll.end_time, 1_000_030_000);
    }

    #[test]
    fn test_create_duplicate_id() {
        let mut store = store_with_poll();
        let result = store.create(Poll::from_announcement(announcement("p1", &[("z", "Z")])));

        assert_eq!(result, Err(PollError::DuplicateId("p1".to_string())));
        assert_eq!(store.len(), 1);
        // Original poll untouched
        assert_eq!(store.find_by_id("p1").unwrap().options[0].id, "a");
    }

    #[test]
    fn test_find_missing_poll() {
        let store = store_with_poll();
        assert!(store.find_by_id("nope").is_none());
    }

    #[test]
    fn test_record_vote_counts() {
        let mut store = store_with_poll();

        assert_eq!(store.record_vote("p1", "a", "v1"), Ok(1));
        assert_eq!(store.record_vote("p1", "a", "v2"), Ok(2));
        assert_eq!(store.record_vote("p1", "b", "v3"), Ok(1));

        let poll = store.find_by_id("p1").unwrap();
        assert_eq!(poll.options[0].votes, 2);
        assert_eq!(poll.options[1].votes, 1);
        assert!(poll.has_voted("v1"));
        assert!(!poll.has_voted("v4"));
    }

    #[test]
    fn test_record_vote_unknown_poll() {
        let mut store = store_with_poll();
        assert_eq!(
            store.record_vote("p9", "a", "v1"),
            Err(PollError::PollNotFound("p9".to_string()))
        );
    }

    #[test]
    fn test_record_vote_unknown_option_changes_nothing() {
        let mut store = store_with_poll();

        assert_eq!(
            store.record_vote("p1", "c", "v1"),
            Err(PollError::OptionNotFound {
                poll_id: "p1".to_string(),
                option_id: "c".to_string(),
            })
        );

        let poll = store.find_by_id("p1").unwrap();
        assert!(poll.options.iter().all(|option| option.votes == 0));
        // A rejected vote does not spend the player's ballot
        assert!(!poll.has_voted("v1"));
        assert_eq!(store.record_vote("p1", "a", "v1"), Ok(1));
    }

    #[test]
    fn test_second_vote_rejected() {
        let mut store = store_with_poll();

        assert_eq!(store.record_vote("p1", "a", "v1"), Ok(1));
        assert_eq!(
            store.record_vote("p1", "b", "v1"),
            Err(PollError::AlreadyVoted {
                poll_id: "p1".to_string(),
                player_id: "v1".to_string(),
            })
        );

        let poll = store.find_by_id("p1").unwrap();
        assert_eq!(poll.options[0].votes, 1);
        assert_eq!(poll.options[1].votes, 0);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut store = store_with_poll();

        let removed = store.remove_by_id("p1").unwrap();
        assert_eq!(removed.id, "p1");
        assert!(store.remove_by_id("p1").is_none());
        assert!(store.is_empty());
        assert_eq!(
            store.record_vote("p1", "a", "v1"),
            Err(PollError::PollNotFound("p1".to_string()))
        );
    }

    #[test]
    fn test_list_active_is_a_snapshot() {
        let mut store = store_with_poll();
        store
            .create(Poll::from_announcement(announcement("p2", &[("x", "X")])))
            .unwrap();

        let snapshot: Vec<Poll> = store.list_active().collect();
        store.remove_by_id("p1");

        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "p1");
        assert_eq!(snapshot[1].id, "p2");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unvoted_by_filters_voted_polls() {
        let mut store = store_with_poll();
        store
            .create(Poll::from_announcement(announcement("p2", &[("x", "X")])))
            .unwrap();
        store.record_vote("p1", "a", "v1").unwrap();

        let pending: Vec<PollAnnouncement> = store.unvoted_by("v1").collect();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "p2");

        let fresh: Vec<PollAnnouncement> = store.unvoted_by("v2").collect();
        assert_eq!(fresh.len(), 2);
    }

    #[test]
    fn test_unvoted_by_yields_public_views_in_creation_order() {
        let mut store = store_with_poll();
        store
            .create(Poll::from_announcement(announcement("p2", &[("x", "X")])))
            .unwrap();
        for voter in 0..100 {
            store.record_vote("p2", "x", &voter.to_string()).unwrap();
        }

        let pending: Vec<PollAnnouncement> = store.unvoted_by("newcomer").collect();
        assert_eq!(pending[0], store.find_by_id("p1").unwrap().announcement());
        assert_eq!(pending[1], store.find_by_id("p2").unwrap().announcement());
        assert_eq!(store.find_by_id("p2").unwrap().voter_count(), 100);
    }

    #[test]
    fn test_announcement_and_results_keep_order() {
        let mut store = store_with_poll();
        store.record_vote("p1", "b", "v1").unwrap();
        let poll = store.find_by_id("p1").unwrap();

        let view = poll.announcement();
        assert_eq!(view, announcement("p1", &[("a", "A"), ("b", "B")]));

        let results = poll.results();
        assert_eq!(results[0].option_id, "a");
        assert_eq!(results[0].votes, 0);
        assert_eq!(results[1].option_id, "b");
        assert_eq!(results[1].votes, 1);
    }

    #[test]
    fn test_is_due() {
        let store = store_with_poll();
        let poll = store.find_by_id("p1").unwrap();
        assert!(!poll.is_due(1_000_029_999));
        assert!(poll.is_due(1_000_030_000));
        assert!(poll.is_due(1_000_030_001));
    }
}
