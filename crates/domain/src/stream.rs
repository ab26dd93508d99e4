use serde::Serialize;

/// Tokens relayed from an agent turn to a transport.
///
/// A streaming request always ends with exactly one terminal token
/// ([`StreamToken::End`] or [`StreamToken::Error`]), however many chunks
/// preceded it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum StreamToken {
    /// An incremental piece of assistant text.
    #[serde(rename = "chunk")]
    Chunk { text: String },

    /// The turn finished; `text` is the full final reply.
    #[serde(rename = "end")]
    End { text: String },

    /// The turn did not finish normally; `kind` says why.
    #[serde(rename = "error")]
    Error {
        kind: StreamErrorKind,
        message: String,
    },
}

impl StreamToken {
    pub fn chunk(text: impl Into<String>) -> Self {
        Self::Chunk { text: text.into() }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Chunk { .. })
    }
}

/// Why a stream ended with an error token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorKind {
    /// The agent core returned an error.
    Producer,
    /// The producer task panicked.
    Panicked,
    /// The producer task was stopped before it settled.
    Cancelled,
    /// The turn ran past the dispatch timeout and was stopped.
    TimedOut,
}

impl std::fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Producer => write!(f, "producer"),
            Self::Panicked => write!(f, "panicked"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}
