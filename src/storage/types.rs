use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

/// Opaque conversation identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh, sortable identifier of the form `ch_<ULID>`
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::storage::ConversationId;
    ///
    /// let id = ConversationId::generate();
    /// assert!(id.as_str().starts_with("ch_"));
    /// ```
    pub fn generate() -> Self {
        Self(format!("ch_{}", ulid::Ulid::new()))
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty identifier is a caller error; stores ignore writes to it
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConversationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Turn identifier, unique and increasing within one message store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(pub u64);

impl fmt::Display for TurnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Author of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human author
    User,
    /// Model output
    Assistant,
}

impl Role {
    /// Wire name used by chat backends
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a file attached to a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    /// Display name
    pub name: String,
    /// Location on disk, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl FileRef {
    /// Build a reference from a path, using its final component as the name
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::storage::FileRef;
    ///
    /// let file = FileRef::from_path("docs/notes.md");
    /// assert_eq!(file.name, "notes.md");
    /// assert_eq!(file.path.as_deref(), Some("docs/notes.md"));
    /// ```
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = std::path::Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.clone());
        Self {
            name,
            path: Some(path),
        }
    }
}

/// One message within a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique, increasing identifier
    pub id: TurnId,
    /// Author of the turn
    pub role: Role,
    /// Text content; only grows while `streaming` is true
    pub content: String,
    /// Attached files
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,
    /// True only for an assistant turn currently receiving tokens
    #[serde(default)]
    pub streaming: bool,
    /// Creation time, fixed
    pub created_at: DateTime<Utc>,
    /// Seconds from stream start to finalization, two-decimal precision
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<f64>,
    /// True when the turn was finalized by cancellation instead of completion
    #[serde(default)]
    pub interrupted: bool,
    #[serde(skip)]
    pub(crate) stream_started_at: Option<Instant>,
}

impl Turn {
    /// Creates a user turn
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::storage::{Role, Turn, TurnId};
    ///
    /// let turn = Turn::user(TurnId(1), "Hello");
    /// assert_eq!(turn.role, Role::User);
    /// assert!(!turn.streaming);
    /// ```
    pub fn user(id: TurnId, content: impl Into<String>) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            files: Vec::new(),
            streaming: false,
            created_at: Utc::now(),
            response_time: None,
            interrupted: false,
            stream_started_at: None,
        }
    }

    /// Creates a finished assistant turn
    pub fn assistant(id: TurnId, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            ..Self::user(id, content)
        }
    }

    /// Creates an empty assistant turn that will receive streamed tokens
    pub fn placeholder(id: TurnId, started_at: Instant) -> Self {
        Self {
            streaming: true,
            stream_started_at: Some(started_at),
            ..Self::assistant(id, String::new())
        }
    }

    /// Attach files to this turn
    pub fn with_files(mut self, files: Vec<FileRef>) -> Self {
        self.files = files;
        self
    }

    /// When the stream feeding this turn started, if it was streamed
    pub fn stream_started_at(&self) -> Option<Instant> {
        self.stream_started_at
    }
}

/// Partial update applied to a single turn
///
/// Only the populated fields are applied. Content is appended, never replaced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnPatch {
    /// Text appended to the turn's content
    pub append_content: Option<String>,
    /// New streaming flag
    pub streaming: Option<bool>,
    /// Response time to record; ignored if one is already set
    pub response_time: Option<f64>,
    /// Mark the turn as interrupted
    pub interrupted: Option<bool>,
}

impl TurnPatch {
    /// Patch appending one streamed token
    pub fn token(text: impl Into<String>) -> Self {
        Self {
            append_content: Some(text.into()),
            ..Self::default()
        }
    }

    /// Patch finalizing a completed stream
    pub fn finalize(response_time: f64) -> Self {
        Self {
            streaming: Some(false),
            response_time: Some(response_time),
            ..Self::default()
        }
    }

    /// Patch finalizing a cancelled stream
    pub fn interrupt(response_time: f64) -> Self {
        Self {
            interrupted: Some(true),
            ..Self::finalize(response_time)
        }
    }
}

/// Entry of the recent-conversations listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationSummary {
    /// Conversation identifier
    pub id: ConversationId,
    /// First characters of the first turn, or `Chat N`
    pub title: String,
    /// Number of turns
    pub turn_count: usize,
}

/// Header information for one conversation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationInfo {
    /// Number of turns
    pub turn_count: usize,
    /// Creation time of the first turn
    pub created_at: Option<DateTime<Utc>>,
}
