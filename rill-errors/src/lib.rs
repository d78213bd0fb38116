//! Error taxonomy for the rill synchronizing relational query engine.
//!
//! Mirrors the way `readyset-errors` centralizes every failure mode the
//! dataflow, replication, and client layers can hit into a single enum, so
//! that callers across crates match on the same `RillError` rather than each
//! crate inventing its own ad-hoc error type.

use std::fmt;

use thiserror::Error;

/// A result type aliased to [`RillError`], for brevity at call sites.
pub type RillResult<T> = Result<T, RillError>;

/// The full error taxonomy described in the design's error-handling section.
///
/// Variants are grouped by the severity class they belong to (invariant
/// violations are always fatal; out-of-order pokes and replication resets
/// are recoverable by the caller; malformed input is fatal to the enclosing
/// transaction; transient errors are retried by the caller and only
/// surfaced once retries are exhausted).
#[derive(Debug, Error)]
pub enum RillError {
    /// The dataflow graph has reached a state that should be unreachable
    /// under the protocol's invariants (duplicate add, missing remove/edit
    /// target, an overlay left set, a primary key missing from an
    /// ordering, a split-edit assertion failing, ...). Always fatal: the
    /// pipeline state is no longer trustworthy and must be aborted rather
    /// than patched over.
    #[error("invariant violation in {context}: {detail}")]
    InvariantViolation {
        /// Which component detected the violation (e.g. `"Source::push"`).
        context: &'static str,
        detail: String,
    },

    /// The server's reported base cookie for a poke did not match the
    /// client's local state. Recoverable: the caller should rebase or
    /// trigger a full resync.
    #[error("out-of-order poke: expected base cookie {expected:?}, local cookie is {actual:?}")]
    OutOfOrderPoke {
        expected: Option<String>,
        actual: Option<String>,
    },

    /// The replicator cannot continue incrementally (upstream corruption,
    /// an unsupported schema migration, ...). The caller must shut down;
    /// on restart with auto-reset the replica is wiped and resynced.
    #[error("replication cannot continue incrementally: {reason}")]
    ReplicationReset { reason: String },

    /// A schema, change-stream tag, or version string failed to parse.
    /// Fatal to the enclosing transaction. Carries a truncated snippet of
    /// the offending input plus the reporting server's version, since a
    /// forward-incompatible deployment is the most common cause.
    #[error("malformed input ({server_version}): {message} (near `{}`)", truncate(.snippet))]
    MalformedInput {
        message: String,
        snippet: String,
        server_version: String,
    },

    /// A retryable I/O failure against the change log / column metadata
    /// store. Not surfaced to the end user unless retries are exhausted.
    #[error("transient storage failure: {0}")]
    Transient(String),
}

impl RillError {
    pub fn invariant(context: &'static str, detail: impl Into<String>) -> Self {
        RillError::InvariantViolation {
            context,
            detail: detail.into(),
        }
    }

    /// Whether the caller should retry this error with backoff rather than
    /// aborting the surrounding transaction.
    pub fn is_transient(&self) -> bool {
        matches!(self, RillError::Transient(_))
    }
}

const SNIPPET_MAX: usize = 200;

fn truncate(s: &str) -> impl fmt::Display + '_ {
    struct Truncated<'a>(&'a str);
    impl fmt::Display for Truncated<'_> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            if self.0.len() <= SNIPPET_MAX {
                write!(f, "{}", self.0)
            } else {
                write!(f, "{}...", &self.0[..SNIPPET_MAX])
            }
        }
    }
    Truncated(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_violation_formats_context_and_detail() {
        let e = RillError::invariant("Source::push", "duplicate add for key [1]");
        assert_eq!(
            e.to_string(),
            "invariant violation in Source::push: duplicate add for key [1]"
        );
    }

    #[test]
    fn malformed_input_truncates_long_snippets() {
        let e = RillError::MalformedInput {
            message: "unknown tag".into(),
            snippet: "x".repeat(300),
            server_version: "1.2.3".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("..."));
        assert!(msg.len() < 300);
    }

    #[test]
    fn transient_is_retryable() {
        assert!(RillError::Transient("disk full".into()).is_transient());
        assert!(!RillError::ReplicationReset {
            reason: "bad schema".into()
        }
        .is_transient());
    }
}
