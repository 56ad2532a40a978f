//! Error classification — the one place free-text node errors become a
//! closed [`ErrorKind`].
//!
//! Nodes and providers report most failures as strings ("nonce too low",
//! "insufficient funds for gas * price + value", "429 Too Many Requests").
//! Every error entering the core is mapped through [`classify`] exactly once;
//! retry and fallback decisions only ever look at the resulting kind.

use serde::Serialize;

/// What went wrong, as far as retry and fallback decisions care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Sender balance cannot cover value + gas.
    InsufficientFunds,
    /// Signature or recovered sender is invalid.
    InvalidSignature,
    /// Nonce too low / too high / already used.
    NonceConflict,
    /// The node already has this exact transaction.
    AlreadyKnown,
    /// A replacement was sent without a sufficient fee bump.
    ReplacementUnderpriced,
    /// Provider throttled the request.
    RateLimited,
    /// The attempt exceeded its deadline.
    Timeout,
    /// Connection refused/reset, DNS failure, bad gateway.
    Connection,
    /// Block or transaction not yet visible on this node.
    UnknownBlock,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Fatal kinds require the caller to change the request; retrying the
    /// same request cannot succeed.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            Self::InsufficientFunds
                | Self::InvalidSignature
                | Self::NonceConflict
                | Self::AlreadyKnown
                | Self::ReplacementUnderpriced
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InsufficientFunds => "insufficient_funds",
            Self::InvalidSignature => "invalid_signature",
            Self::NonceConflict => "nonce_conflict",
            Self::AlreadyKnown => "already_known",
            Self::ReplacementUnderpriced => "replacement_underpriced",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::UnknownBlock => "unknown_block",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

// Order matters: fatal markers are checked first so that e.g.
// "nonce too low (request timed out upstream)" stays fatal.
const MARKERS: &[(&str, ErrorKind)] = &[
    ("insufficient funds", ErrorKind::InsufficientFunds),
    ("invalid signature", ErrorKind::InvalidSignature),
    ("invalid sender", ErrorKind::InvalidSignature),
    ("replacement transaction underpriced", ErrorKind::ReplacementUnderpriced),
    ("already known", ErrorKind::AlreadyKnown),
    ("known transaction", ErrorKind::AlreadyKnown),
    ("nonce", ErrorKind::NonceConflict),
    ("rate limit", ErrorKind::RateLimited),
    ("ratelimit", ErrorKind::RateLimited),
    ("too many requests", ErrorKind::RateLimited),
    ("timed out", ErrorKind::Timeout),
    ("timeout", ErrorKind::Timeout),
    ("unknown block", ErrorKind::UnknownBlock),
    ("block not found", ErrorKind::UnknownBlock),
    ("header not found", ErrorKind::UnknownBlock),
    ("connection", ErrorKind::Connection),
    ("connect", ErrorKind::Connection),
    ("dns error", ErrorKind::Connection),
];

// Matched only as whole numeric tokens: "HTTP 429" yes, "4290000" no.
const STATUS_CODES: &[(&str, ErrorKind)] = &[
    ("429", ErrorKind::RateLimited),
    ("502", ErrorKind::Connection),
    ("503", ErrorKind::Connection),
    ("504", ErrorKind::Timeout),
];

/// Map a free-text error message to an [`ErrorKind`]. Case-insensitive.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_ascii_lowercase();
    if let Some((_, kind)) = MARKERS.iter().find(|(marker, _)| lower.contains(marker)) {
        return *kind;
    }
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|token| {
            STATUS_CODES
                .iter()
                .find(|(code, _)| *code == token)
                .map(|(_, kind)| *kind)
        })
        .unwrap_or(ErrorKind::Other)
}
