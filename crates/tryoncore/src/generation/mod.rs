//! Try-on generation: debit, cleanup, compose, synthesize, settle

pub mod pipeline;
pub mod prompt;

use std::str::FromStr;

use crate::core::error::{AppError, UpstreamError};

pub use pipeline::{GenerationOutcome, GenerationPipeline};

/// Who pays for a failed generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefundPolicy {
    /// Keep the debit on every failure
    Never,
    /// Refund unless the vendor refused the user's content
    #[default]
    SystemFaults,
    Always,
}

impl RefundPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundPolicy::Never => "never",
            RefundPolicy::SystemFaults => "system_faults",
            RefundPolicy::Always => "always",
        }
    }

    /// Credits to give back for a failure of `kind` on an attempt that cost `cost`
    pub fn refund_for(&self, kind: FailureKind, cost: i64) -> i64 {
        match self {
            RefundPolicy::Never => 0,
            RefundPolicy::Always => cost,
            RefundPolicy::SystemFaults if kind == FailureKind::Safety => 0,
            RefundPolicy::SystemFaults => cost,
        }
    }
}

impl FromStr for RefundPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(RefundPolicy::Never),
            "system_faults" => Ok(RefundPolicy::SystemFaults),
            "always" => Ok(RefundPolicy::Always),
            other => Err(format!("Unknown refund policy: {}", other)),
        }
    }
}

/// User-facing classification of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Quota,
    Safety,
    /// A required credential or setting is missing
    Configuration,
    Upstream,
    Storage,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Quota => "quota",
            FailureKind::Safety => "safety",
            FailureKind::Configuration => "configuration",
            FailureKind::Upstream => "upstream",
            FailureKind::Storage => "storage",
            FailureKind::Internal => "internal",
        }
    }

    pub fn from_error(error: &AppError) -> Self {
        match error {
            AppError::Upstream(UpstreamError::QuotaExceeded(_)) => FailureKind::Quota,
            AppError::Upstream(UpstreamError::SafetyRejected(_)) => FailureKind::Safety,
            AppError::Upstream(UpstreamError::MissingCredential(_)) | AppError::Config(_) => FailureKind::Configuration,
            AppError::Upstream(_) => FailureKind::Upstream,
            AppError::Storage(_) | AppError::Io(_) | AppError::Http(_) => FailureKind::Storage,
            _ => FailureKind::Internal,
        }
    }
}
