//! Host-driven session API: SessionCore receives relay packets and user actions, returns actions.
//! The only place vote/hash state changes in response to network input.

use std::path::{Path, PathBuf};

use crate::packet::Packet;
use crate::protocol::{self, Inbound};

/// Sender name used for notices produced by this client.
pub const CLIENT_NAME: &str = "CLIENT";

pub const NOTICE_FILES_MATCH: &str = "Files match!";
pub const NOTICE_FILES_DIFFER: &str = "Files do not match";
pub const NOTICE_WAIT_FOR_VERIFICATION: &str =
    "Please wait for others to select files and server to verify file.";
pub const NOTICE_SELECT_FIRST: &str = "Please select a file before voting";
pub const NOTICE_NO_FILE_TO_PLAY: &str = "Everyone has voted but no file is selected";

/// Vote gating flags. `has_voted` implies `file_selected && hashes_match`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoteState {
    pub file_selected: bool,
    pub hashes_match: bool,
    pub has_voted: bool,
}

/// What the host must do after feeding the core an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send to the relay.
    Send { message: String, for_vlc: bool },
    /// Show a chat line from a participant.
    Chat { from: String, text: String },
    /// Show a protocol or client notice.
    Notice { from: String, text: String },
    /// Start local playback of the selected file.
    BeginPlayback(PathBuf),
    /// Hand a peer's playback directive to the player backend.
    ForwardToPlayer(String),
}

impl SessionAction {
    fn send(message: impl Into<String>) -> Self {
        SessionAction::Send {
            message: message.into(),
            for_vlc: false,
        }
    }

    fn notice(from: impl Into<String>, text: impl Into<String>) -> Self {
        SessionAction::Notice {
            from: from.into(),
            text: text.into(),
        }
    }
}

/// Protocol state for one login cycle. A new core is created for every connection.
#[derive(Debug, Default)]
pub struct SessionCore {
    vote: VoteState,
    selected_path: Option<PathBuf>,
}

impl SessionCore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vote_state(&self) -> VoteState {
        self.vote
    }

    pub fn has_voted(&self) -> bool {
        self.vote.has_voted
    }

    pub fn is_file_selected(&self) -> bool {
        self.vote.file_selected
    }

    pub fn selected_path(&self) -> Option<&Path> {
        self.selected_path.as_deref()
    }

    /// Back to all-false, as at the start of a login cycle.
    pub fn reset(&mut self) {
        self.vote = VoteState::default();
        self.selected_path = None;
    }

    /// Route one inbound packet. Directives bypass classification entirely.
    pub fn on_packet(&mut self, packet: Packet) -> Vec<SessionAction> {
        if packet.for_vlc {
            return vec![SessionAction::ForwardToPlayer(packet.message)];
        }
        match protocol::classify(&packet.message) {
            Inbound::HashesMatch => {
                self.vote.hashes_match = true;
                vec![SessionAction::notice(packet.username, NOTICE_FILES_MATCH)]
            }
            // Only an explicit reset clears the match flag.
            Inbound::HashesDoNotMatch => {
                vec![SessionAction::notice(packet.username, NOTICE_FILES_DIFFER)]
            }
            Inbound::HashReset => {
                self.vote.hashes_match = false;
                self.vote.has_voted = false;
                vec![]
            }
            Inbound::EveryoneVoted => match &self.selected_path {
                Some(path) => vec![SessionAction::BeginPlayback(path.clone())],
                None => vec![SessionAction::notice(CLIENT_NAME, NOTICE_NO_FILE_TO_PLAY)],
            },
            Inbound::Chat => vec![SessionAction::Chat {
                from: packet.username,
                text: packet.message,
            }],
        }
    }

    /// The host computed `digest` for `path`; announce it to the relay.
    pub fn on_file_selected(&mut self, path: PathBuf, digest: &str) -> Vec<SessionAction> {
        let echo = SessionAction::notice("You", format!("Selected {}", path.display()));
        self.selected_path = Some(path);
        self.vote.file_selected = true;
        vec![echo, SessionAction::send(protocol::selected_file_hash(digest))]
    }

    /// Vote or withdraw, in fixed priority order.
    pub fn toggle_vote(&mut self) -> Vec<SessionAction> {
        let v = &mut self.vote;
        if v.file_selected && v.hashes_match && !v.has_voted {
            v.has_voted = true;
            return vec![SessionAction::send(protocol::VOTE)];
        }
        if v.has_voted {
            v.has_voted = false;
            return vec![SessionAction::send(protocol::UNVOTE)];
        }
        if v.file_selected && !v.hashes_match {
            return vec![SessionAction::notice(CLIENT_NAME, NOTICE_WAIT_FOR_VERIFICATION)];
        }
        vec![SessionAction::notice(CLIENT_NAME, NOTICE_SELECT_FIRST)]
    }
}
