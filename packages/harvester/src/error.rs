//! Error taxonomy and classification.
//!
//! Errors raised by our own code carry their category directly as a
//! `HarvestError` variant. Errors surfaced by collaborators (the browser
//! driver, the stores, the collector) arrive as opaque `anyhow` chains, so
//! `classify` falls back to substring matching over the rendered message.
//! Classification is the single decision point for whether a failure
//! triggers healing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::AbortContext;

/// Typed errors for failures raised inside the workflow core.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("network failure: {0}")]
    Network(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("automation driver failure: {0}")]
    Driver(String),

    #[error("storage failure: {0}")]
    Database(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("session recovery failed: {0}")]
    RecoveryFailed(String),

    #[error("healing limit reached after {attempts} restarts")]
    HealLimitExceeded { attempts: u32 },

    #[error("security challenge unresolved after {waited_secs}s")]
    ChallengeTimedOut { waited_secs: u64 },
}

/// Systemic batch abort carrying the resume context for the coordinator.
#[derive(Error, Debug)]
#[error("batch aborted at {}/batch {}/index {}: {source}",
    context.category, context.batch, context.index)]
pub struct SystemicAbort {
    pub context: AbortContext,
    /// Batches finished before the abort, including ones completed during
    /// this run. The healing state must not lose them.
    pub completed_batches:
        std::collections::BTreeMap<crate::types::ConnectionCategory, std::collections::BTreeSet<u32>>,
    #[source]
    pub source: anyhow::Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Authentication,
    Network,
    RateLimit,
    AutomationDriver,
    Database,
    Validation,
    Unknown,
}

impl ErrorCategory {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Authentication
                | ErrorCategory::Network
                | ErrorCategory::RateLimit
                | ErrorCategory::AutomationDriver
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Network => "network",
            ErrorCategory::RateLimit => "rate-limit",
            ErrorCategory::AutomationDriver => "automation-driver",
            ErrorCategory::Database => "database",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

/// The classifier's verdict on a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: ErrorCategory,
    pub recoverable: bool,
    pub severity: Severity,
    pub user_message: &'static str,
}

impl Classification {
    fn for_category(category: ErrorCategory) -> Self {
        let severity = match category {
            ErrorCategory::Network | ErrorCategory::RateLimit => Severity::Warning,
            ErrorCategory::Authentication | ErrorCategory::AutomationDriver => Severity::Error,
            ErrorCategory::Database | ErrorCategory::Validation | ErrorCategory::Unknown => {
                Severity::Critical
            }
        };
        Self {
            category,
            recoverable: category.is_recoverable(),
            severity,
            user_message: user_message(category),
        }
    }
}

fn user_message(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Authentication => {
            "Authentication failed. Please verify the stored credentials and try again."
        }
        ErrorCategory::Network => {
            "A network error interrupted processing. The system will recover automatically."
        }
        ErrorCategory::RateLimit => {
            "The remote service is rate limiting requests. The system will back off automatically."
        }
        ErrorCategory::AutomationDriver => {
            "The browser session failed and is being rebuilt. Processing will resume shortly."
        }
        ErrorCategory::Database => "A storage error occurred. Please contact support.",
        ErrorCategory::Validation => "The request was invalid. Please check the submitted fields.",
        ErrorCategory::Unknown => "An unexpected error occurred. Please try again later.",
    }
}

/// Classify any failure into a category, recoverability flag, severity and
/// user-facing message. Deterministic: the same error chain always yields
/// the same classification.
pub fn classify(error: &anyhow::Error) -> Classification {
    // Errors we raised ourselves carry the category in their variant.
    if let Some(harvest) = find_in_chain::<HarvestError>(error) {
        return Classification::for_category(match harvest {
            HarvestError::Authentication(_) | HarvestError::ChallengeTimedOut { .. } => {
                ErrorCategory::Authentication
            }
            HarvestError::Network(_) => ErrorCategory::Network,
            HarvestError::RateLimited(_) => ErrorCategory::RateLimit,
            HarvestError::Driver(_) | HarvestError::RecoveryFailed(_) => {
                ErrorCategory::AutomationDriver
            }
            HarvestError::Database(_) => ErrorCategory::Database,
            HarvestError::Validation(_) => ErrorCategory::Validation,
            HarvestError::HealLimitExceeded { .. } => ErrorCategory::Unknown,
        });
    }

    Classification::for_category(match_message(&lowercase_chain(error)))
}

/// Connection-level failures are counted and skipped rather than healed:
/// the individual profile is gone, private, or unavailable, and retrying
/// cannot change that.
pub fn is_connection_level(error: &anyhow::Error) -> bool {
    let msg = lowercase_chain(error);
    ["not found", "private", "unavailable"]
        .iter()
        .any(|phrase| msg.contains(phrase))
}

fn match_message(msg: &str) -> ErrorCategory {
    // Rate limit before network: "too many requests" also mentions requests.
    if contains_any(msg, &["rate limit", "too many requests", "429"]) {
        return ErrorCategory::RateLimit;
    }
    if contains_any(
        msg,
        &[
            "timeout",
            "timed out",
            "econnreset",
            "econnrefused",
            "socket hang up",
            "dns",
            "network",
        ],
    ) {
        return ErrorCategory::Network;
    }
    if contains_any(
        msg,
        &[
            "login",
            "sign in",
            "authentication",
            "credential",
            "unauthorized",
            "challenge",
            "captcha",
        ],
    ) {
        return ErrorCategory::Authentication;
    }
    if contains_any(
        msg,
        &[
            "browser",
            "session closed",
            "target closed",
            "navigation",
            "selector",
            "detached frame",
            "page crash",
        ],
    ) {
        return ErrorCategory::AutomationDriver;
    }
    if contains_any(msg, &["database", "storage", "constraint", "transaction"]) {
        return ErrorCategory::Database;
    }
    if contains_any(msg, &["validation", "invalid", "missing required"]) {
        return ErrorCategory::Validation;
    }
    ErrorCategory::Unknown
}

fn contains_any(msg: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|p| msg.contains(p))
}

fn lowercase_chain(error: &anyhow::Error) -> String {
    format!("{:#}", error).to_lowercase()
}

fn find_in_chain<E: std::error::Error + Send + Sync + 'static>(
    error: &anyhow::Error,
) -> Option<&E> {
    error.chain().find_map(|cause| cause.downcast_ref::<E>())
}
