/*!
 * Session records and the `add` command.
 */

use std::fmt;
use std::path::PathBuf;

use crate::errors::SessionError;
use crate::transport::UserId;

/// Identity of one conversation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Owner
    pub user_id: UserId,
    /// Random per-session identifier
    pub session_id: String,
}

impl SessionKey {
    pub fn new(user_id: UserId, session_id: impl Into<String>) -> Self {
        Self {
            user_id,
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.session_id)
    }
}

/// Where a session is in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Waiting for an `add` command
    Idle,
    /// Parameters known, waiting for the audio upload
    AwaitFile,
    /// Waiting for the user to confirm the detected language
    ConfirmLanguage,
    /// Job running on the pod
    Dispatching,
    /// Sending the transcript back
    Delivering,
    /// Done; the session is forgotten
    Terminal,
}

/// One user's transcription conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub key: SessionKey,
    pub step: Step,
    pub min_speakers: u32,
    pub max_speakers: u32,
    /// Transcription language; `None` means detect it
    pub language: Option<String>,
    /// Downloaded audio, once uploaded
    pub audio_path: Option<PathBuf>,
}

impl Session {
    /// A fresh session waiting for `add`
    pub fn new(key: SessionKey) -> Self {
        Self {
            key,
            step: Step::Idle,
            min_speakers: 0,
            max_speakers: 0,
            language: None,
            audio_path: None,
        }
    }

    /// Take the parameters of an `add` command and wait for the upload
    pub fn configure(&mut self, command: AddCommand) {
        self.min_speakers = command.min_speakers;
        self.max_speakers = command.max_speakers;
        self.language = command.language;
        self.step = Step::AwaitFile;
    }

    pub fn is_terminal(&self) -> bool {
        self.step == Step::Terminal
    }
}

/// Parsed `add <min> [max] [language]` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddCommand {
    pub min_speakers: u32,
    pub max_speakers: u32,
    pub language: Option<String>,
}

impl AddCommand {
    /// Parse a chat message.
    ///
    /// `Ok(None)` when the text is not an `add` command at all, an error
    /// when it is one but the speaker counts are malformed. A third token
    /// made of digits (optionally signed) is the maximum speaker count,
    /// anything else there is the language code. Codes are lower-cased but
    /// not validated, and `min <= max` is not enforced.
    pub fn parse(text: &str) -> Result<Option<Self>, SessionError> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        if parts.len() < 2 || !parts[0].eq_ignore_ascii_case("add") {
            return Ok(None);
        }

        let min_speakers = parse_count(parts[1])?;
        let (max_speakers, language) = match parts.get(2) {
            Some(third) if looks_numeric(third) => (parse_count(third)?, parts.get(3)),
            third => (min_speakers, third),
        };

        Ok(Some(Self {
            min_speakers,
            max_speakers,
            language: language.map(|l| l.to_lowercase()),
        }))
    }
}

/// Digits with an optional sign, so `-1` is rejected as a count rather
/// than taken for a language code
fn looks_numeric(token: &str) -> bool {
    let digits = token.strip_prefix(['-', '+']).unwrap_or(token);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

fn parse_count(token: &str) -> Result<u32, SessionError> {
    token
        .parse()
        .map_err(|e| SessionError::Parse(format!("'{}' is not a speaker count: {}", token, e)))
}

/// Whether text starts a new session (`add` as first word, any case)
pub fn is_add_command(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .is_some_and(|word| word.eq_ignore_ascii_case("add"))
}
