//! Text rendering of relay traffic for the terminal

use crate::polls::TrackedPoll;
use shared::{ChatMessage, PollAnnouncement, VoteClosure, HIDDEN_MESSAGES, SYSTEM_PLAYER_ID};
use std::io::{self, Stdout, Write};

pub struct Renderer<W: Write = Stdout> {
    out: W,
}

impl Renderer<Stdout> {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for Renderer<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Renderer<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }

    pub fn print(&mut self, lines: &[String]) -> io::Result<()> {
        for line in lines {
            writeln!(self.out, "{}", line)?;
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Chat from other players. System and control messages are not shown.
pub fn chat_line(chat: &ChatMessage) -> Option<String> {
    if chat.player_id == SYSTEM_PLAYER_ID || HIDDEN_MESSAGES.contains(&chat.message.as_str()) {
        return None;
    }
    Some(format!("<{}> {}", chat.player_id, chat.message))
}

pub fn own_line(message: &str) -> String {
    format!("<Me> {}", message)
}

pub fn poll_lines(poll: &PollAnnouncement, now: u64) -> Vec<String> {
    let remaining = poll.end_time.saturating_sub(now) / 1000;
    let mut lines = vec![format!(
        "[poll {}] {} (closing in {}s)",
        poll.id, poll.title, remaining
    )];
    lines.extend(
        poll.options
            .iter()
            .map(|option| format!("    /vote {} {}  ->  {}", poll.id, option.id, option.name)),
    );
    lines
}

pub fn open_poll_lines(polls: &[&TrackedPoll], now: u64) -> Vec<String> {
    if polls.is_empty() {
        return vec!["No open polls".to_string()];
    }

    polls
        .iter()
        .map(|poll| {
            format!(
                "[poll {}] {} - {}s left{}",
                poll.announcement.id,
                poll.announcement.title,
                poll.remaining_secs(now),
                if poll.voted { " (voted)" } else { "" }
            )
        })
        .collect()
}

/// Closure reason, followed by the tallies labelled with option names when known
pub fn closure_lines(closure: &VoteClosure, poll: Option<&PollAnnouncement>) -> Vec<String> {
    let mut lines = vec![format!("<Poll> {}", closure.reason)];
    for result in &closure.results {
        let label = poll
            .and_then(|poll| poll.options.iter().find(|option| option.id == result.option_id))
            .map(|option| option.name.as_str())
            .unwrap_or(result.option_id.as_str());
        lines.push(format!("    {}: {}", label, result.votes));
    }
    lines
}
