//! Session protocol vocabulary: control phrases from the relay, outbound messages, playback directives.

/// Key of the pre-handshake announcement (`HEADER_SIZE=<n>`).
pub const HEADER_SIZE_KEY: &str = "HEADER_SIZE";
/// Phrase the relay's welcome packet must contain.
pub const WELCOME_PHRASE: &str = "Welcome to the server";

pub const HASHES_MATCH: &str = "HASHES MATCH";
pub const HASHES_DO_NOT_MATCH: &str = "HASHES DO NOT MATCH";
pub const HASH_BOOL_RESET: &str = "HASH BOOL RESET";
pub const EVERYONE_HAS_VOTED: &str = "EVERYONE HAS VOTED";

pub const VOTE: &str = "VOTE";
pub const UNVOTE: &str = "UNVOTE";

/// Widest length prefix a relay may announce. A 16 MiB frame needs 8 digits.
pub const MAX_HEADER_SIZE: usize = 20;

/// Parse `HEADER_SIZE=<n>`. Returns None on any other shape, a zero width, or a width
/// above `MAX_HEADER_SIZE`.
pub fn parse_header_announcement(message: &str) -> Option<usize> {
    let (key, value) = message.split_once('=')?;
    if key.trim() != HEADER_SIZE_KEY {
        return None;
    }
    value
        .trim()
        .parse()
        .ok()
        .filter(|n| (1..=MAX_HEADER_SIZE).contains(n))
}

pub fn is_welcome(message: &str) -> bool {
    message.contains(WELCOME_PHRASE)
}

/// Outbound announcement of the locally selected file's digest.
pub fn selected_file_hash(digest: &str) -> String {
    format!("SELECTED FILE HASH={digest}")
}

/// Classification of a non-directive packet from the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    HashesMatch,
    HashesDoNotMatch,
    HashReset,
    EveryoneVoted,
    Chat,
}

/// Classify a chat-channel message. Only a fully upper-case message can confirm a hash match.
pub fn classify(message: &str) -> Inbound {
    if is_upper(message) && message.contains(HASHES_MATCH) {
        Inbound::HashesMatch
    } else if message.contains(HASHES_DO_NOT_MATCH) {
        Inbound::HashesDoNotMatch
    } else if message.contains(HASH_BOOL_RESET) {
        Inbound::HashReset
    } else if message.contains(EVERYONE_HAS_VOTED) {
        Inbound::EveryoneVoted
    } else {
        Inbound::Chat
    }
}

/// At least one cased character and no lower-case ones.
fn is_upper(s: &str) -> bool {
    s.chars().any(char::is_uppercase) && !s.chars().any(char::is_lowercase)
}

/// Playback directive carried by a `for_vlc` packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Jump to an absolute position in seconds.
    Seek(u64),
    /// Anything else (`pause`, `toggle_play`): flip local play/pause.
    TogglePlay,
}

impl Directive {
    pub fn parse(message: &str) -> Result<Self, DirectiveError> {
        let message = message.trim();
        match message.split_once(' ') {
            Some(("seek", arg)) => arg
                .trim()
                .parse()
                .map(Directive::Seek)
                .map_err(|_| DirectiveError::BadSeek(arg.trim().to_string())),
            _ if message == "seek" => Err(DirectiveError::BadSeek(String::new())),
            _ => Ok(Directive::TogglePlay),
        }
    }
}

/// Outbound seek broadcast.
pub fn seek(position: u64) -> String {
    format!("seek {position}")
}

/// Play/pause broadcast of the line-protocol backend.
pub const PAUSE: &str = "pause";
/// Play/pause broadcast of the HTTP backend.
pub const TOGGLE_PLAY: &str = "toggle_play";

#[derive(Debug, thiserror::Error)]
pub enum DirectiveError {
    #[error("malformed seek position {0:?}")]
    BadSeek(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_announcement() {
        assert_eq!(parse_header_announcement("HEADER_SIZE=10"), Some(10));
        assert_eq!(parse_header_announcement("HEADER_SIZE= 8 "), Some(8));
        assert_eq!(parse_header_announcement("HEADER_SIZE=0"), None);
        assert_eq!(parse_header_announcement("HEADER_SIZE=ten"), None);
        assert_eq!(parse_header_announcement("Welcome"), None);
        assert_eq!(parse_header_announcement("HEADER_SIZE=20"), Some(MAX_HEADER_SIZE));
        assert_eq!(parse_header_announcement("HEADER_SIZE=21"), None);
        assert_eq!(
            parse_header_announcement("HEADER_SIZE=18446744073709551615"),
            None
        );
        assert_eq!(
            parse_header_announcement("HEADER_SIZE=99999999999999999999999"),
            None
        );
    }

    #[test]
    fn classify_control_phrases() {
        assert_eq!(classify("HASHES MATCH"), Inbound::HashesMatch);
        assert_eq!(classify("ALL HASHES MATCH!"), Inbound::HashesMatch);
        assert_eq!(classify("HASHES DO NOT MATCH"), Inbound::HashesDoNotMatch);
        assert_eq!(classify("HASH BOOL RESET"), Inbound::HashReset);
        assert_eq!(classify("EVERYONE HAS VOTED"), Inbound::EveryoneVoted);
    }

    #[test]
    fn mixed_case_match_is_chat() {
        assert_eq!(classify("did the HASHES MATCH for you?"), Inbound::Chat);
        assert_eq!(classify("hello"), Inbound::Chat);
    }

    #[test]
    fn selected_hash_message() {
        assert_eq!(selected_file_hash("DEADBEEF"), "SELECTED FILE HASH=DEADBEEF");
    }

    #[test]
    fn directives() {
        assert_eq!(Directive::parse("seek 120").unwrap(), Directive::Seek(120));
        assert_eq!(Directive::parse("pause").unwrap(), Directive::TogglePlay);
        assert_eq!(Directive::parse("toggle_play").unwrap(), Directive::TogglePlay);
        assert!(Directive::parse("seek abc").is_err());
        assert!(Directive::parse("seek").is_err());
    }
}
