//! Terminal input: parses typed lines into protocol messages

use serde_json::Value;
use shared::{
    ChatMessage, ClientMessage, JoinRequest, OptionSpec, PollAnnouncement, VoteCast,
    CUTSCENE_PREFIX, SYSTEM_PLAYER_ID,
};
use std::time::Duration;
use thiserror::Error;

pub const HELP: &str = "Commands: <text> | /poll <seconds> <title> | <option> | <option>... \
| /vote <pollId> <optionId> | /cutscene <name> | /polls | /quit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    CreatePoll {
        title: String,
        options: Vec<String>,
        duration: Duration,
    },
    Vote {
        poll_id: String,
        option_id: String,
    },
    Cutscene(String),
    ListPolls,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("nothing to send")]
    Empty,

    #[error("usage: /poll <seconds> <title> | <option> | <option>...")]
    PollUsage,

    #[error("usage: /vote <pollId> <optionId>")]
    VoteUsage,

    #[error("usage: /cutscene <name>")]
    CutsceneUsage,

    #[error("unknown command /{0}, try /help")]
    UnknownCommand(String),
}

/// What the network loop should do with a line of input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Send(ClientMessage),
    ListPolls,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<Command, InputError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(InputError::Empty);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };

    match name {
        "poll" => parse_poll(args),
        "vote" => {
            let mut parts = args.split_whitespace();
            match (parts.next(), parts.next(), parts.next()) {
                (Some(poll_id), Some(option_id), None) => Ok(Command::Vote {
                    poll_id: poll_id.to_string(),
                    option_id: option_id.to_string(),
                }),
                _ => Err(InputError::VoteUsage),
            }
        }
        "cutscene" if !args.is_empty() => Ok(Command::Cutscene(args.to_string())),
        "cutscene" => Err(InputError::CutsceneUsage),
        "polls" => Ok(Command::ListPolls),
        "help" => Ok(Command::Help),
        "quit" | "exit" => Ok(Command::Quit),
        other => Err(InputError::UnknownCommand(other.to_string())),
    }
}

fn parse_poll(args: &str) -> Result<Command, InputError> {
    let (seconds, rest) = args.split_once(char::is_whitespace).ok_or(InputError::PollUsage)?;
    let seconds: u64 = seconds.parse().map_err(|_| InputError::PollUsage)?;
    if seconds == 0 || seconds.checked_mul(1000).is_none() {
        return Err(InputError::PollUsage);
    }

    let mut fields = rest.split('|').map(str::trim);
    let title = fields
        .next()
        .filter(|title| !title.is_empty())
        .ok_or(InputError::PollUsage)?;
    let options: Vec<String> = fields
        .filter(|option| !option.is_empty())
        .map(str::to_string)
        .collect();

    if options.len() < 2 {
        return Err(InputError::PollUsage);
    }

    Ok(Command::CreatePoll {
        title: title.to_string(),
        options,
        duration: Duration::from_secs(seconds),
    })
}

/// Turns commands into messages stamped with this player's id
pub struct InputManager {
    player_id: String,
    next_sequence: u32,
}

impl InputManager {
    pub fn new(player_id: impl Into<String>) -> Self {
        Self {
            player_id: player_id.into(),
            next_sequence: 1,
        }
    }

    pub fn player_id(&self) -> &str {
        &self.player_id
    }

    pub fn join(&self) -> ClientMessage {
        ClientMessage::Join(JoinRequest {
            player_id: self.player_id.clone(),
        })
    }

    /// Parses a line and builds the resulting action at time `now`
    pub fn handle_line(&mut self, line: &str, now: u64) -> Result<Action, InputError> {
        let action = match parse_command(line)? {
            Command::Say(message) => Action::Send(ClientMessage::Message(ChatMessage {
                message,
                player_id: self.player_id.clone(),
            })),
            Command::CreatePoll {
                title,
                options,
                duration,
            } => Action::Send(ClientMessage::Poll(self.new_poll(title, options, duration, now))),
            Command::Vote { poll_id, option_id } => Action::Send(ClientMessage::Vote(VoteCast {
                poll_id,
                option_id,
                player_id: self.player_id.clone(),
            })),
            Command::Cutscene(name) => Action::Send(ClientMessage::Message(ChatMessage {
                message: format!("{}{}", CUTSCENE_PREFIX, name),
                player_id: SYSTEM_PLAYER_ID.to_string(),
            })),
            Command::ListPolls => Action::ListPolls,
            Command::Help => Action::Help,
            Command::Quit => Action::Quit,
        };
        Ok(action)
    }

    fn new_poll(
        &mut self,
        title: String,
        options: Vec<String>,
        duration: Duration,
        now: u64,
    ) -> PollAnnouncement {
        let id = format!("{}-{}-{}", self.player_id, now, self.next_sequence);
        self.next_sequence += 1;

        PollAnnouncement {
            id,
            title,
            options: options
                .into_iter()
                .enumerate()
                .map(|(index, name)| OptionSpec {
                    id: (index + 1).to_string(),
                    name,
                })
                .collect(),
            end_time: now.saturating_add(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)),
            timestamp: now,
        }
    }
}

/// Serializes a message, filling in the sender and send time where the
/// message has none of its own
pub fn encode(
    message: &ClientMessage,
    player_id: &str,
    now: u64,
) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(message)?;
    if let Value::Object(fields) = &mut value {
        fields
            .entry("playerId")
            .or_insert_with(|| Value::from(player_id));
        fields
            .entry("timestamp")
            .or_insert_with(|| Value::from(now));
    }
    serde_json::to_string(&value)
}
