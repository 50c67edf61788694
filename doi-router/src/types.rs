//! Core value types flowing through a batch lookup.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::borrow::Borrow;
use std::fmt;

/// Resolver prefixes stripped before an identifier is sent to the provider.
const DOI_PREFIXES: &[&str] = &[
    "https://doi.org/",
    "http://doi.org/",
    "https://dx.doi.org/",
    "http://dx.doi.org/",
    "doi:",
];

/// A DOI exactly as submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The DOI without surrounding whitespace or a resolver prefix.
    ///
    /// Only used to build the outbound request; results stay keyed by the
    /// identifier as submitted.
    pub fn normalized(&self) -> &str {
        let trimmed = self.0.trim();
        DOI_PREFIXES
            .iter()
            .find_map(|prefix| strip_prefix_ignore_case(trimmed, prefix))
            .unwrap_or(trimmed)
    }

    /// Whether the normalized DOI maps onto its own provider path.
    ///
    /// URL path resolution drops `.` and `..` segments, so such identifiers
    /// would address a different record.
    pub fn is_addressable(&self) -> bool {
        let normalized = self.normalized();
        !normalized.is_empty() && !normalized.split('/').any(|s| s == "." || s == "..")
    }
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &value[prefix.len()..])
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Identifier {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// An ordered list of identifiers that passed validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    identifiers: Vec<Identifier>,
}

impl Batch {
    /// Only the validator builds batches from caller input.
    pub(crate) fn new(identifiers: Vec<Identifier>) -> Self {
        Self { identifiers }
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    pub fn into_identifiers(self) -> Vec<Identifier> {
        self.identifiers
    }
}

/// Why a single lookup did not produce a payload.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupFailure {
    #[error("provider has no record for this identifier")]
    NotFound,

    #[error("provider rate limit exceeded")]
    RateLimited,

    #[error("lookup did not complete in time")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("provider returned HTTP {0}")]
    UpstreamStatus(u16),

    #[error("identifier does not map to a provider path")]
    InvalidIdentifier,

    #[error("lookup task failed: {0}")]
    Internal(String),
}

impl LookupFailure {
    /// Short category reported as the `error` field of a failed entry.
    pub fn category(&self) -> &'static str {
        match self {
            LookupFailure::NotFound => "not found",
            LookupFailure::RateLimited => "rate limited",
            LookupFailure::Timeout => "timeout",
            LookupFailure::Transport(_) => "transport error",
            LookupFailure::MalformedResponse(_) => "malformed response",
            LookupFailure::UpstreamStatus(_) => "http error",
            LookupFailure::InvalidIdentifier => "invalid identifier",
            LookupFailure::Internal(_) => "internal error",
        }
    }
}

/// Result of looking up one identifier.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Success(JsonValue),
    Failure(LookupFailure),
}

impl LookupOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, LookupOutcome::Success(_))
    }

    /// Metric tag value for this outcome.
    pub fn tag(&self) -> &'static str {
        match self {
            LookupOutcome::Success(_) => "success",
            LookupOutcome::Failure(failure) => failure.category(),
        }
    }
}

/// Everything one batch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// Outcome per identifier, in order of first submission.
    pub results: IndexMap<Identifier, LookupOutcome>,
    /// Number of identifiers submitted, duplicates included.
    pub total: usize,
    pub success: usize,
    pub errors: usize,
    /// The batch deadline expired before every lookup finished.
    pub timed_out: bool,
}

impl BatchResult {
    pub fn empty() -> Self {
        Self {
            results: IndexMap::new(),
            total: 0,
            success: 0,
            errors: 0,
            timed_out: false,
        }
    }
}
