//! Outcome of a compute pass: a status plus the warnings and errors collected on the way.

use serde::{Deserialize, Serialize};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResultKind {
    #[default]
    InProgress,
    Cancelled,
    Failed,
    SucceededWithWarnings,
    Succeeded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub code: u32,
    pub text: String,
}

impl ResultMessage {
    pub fn new(code: u32, text: impl Into<String>) -> Self {
        Self { code, text: text.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GeometryResult {
    pub kind: ResultKind,
    pub warnings: Vec<ResultMessage>,
    pub errors: Vec<ResultMessage>,
}

impl GeometryResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failed(&mut self, text: impl Into<String>) {
        let text = text.into();
        log::error!("{text}");
        self.errors.push(ResultMessage::new(0, text));
        self.kind = ResultKind::Failed;
    }

    pub fn add_warning(&mut self, code: u32, text: impl Into<String>) {
        let text = text.into();
        log::warn!("{text}");
        self.warnings.push(ResultMessage::new(code, text));
    }

    /// Record an error without changing the status.
    pub fn add_error(&mut self, code: u32, text: impl Into<String>) {
        self.errors.push(ResultMessage::new(code, text));
    }

    /// Finish the pass. Ends up `SucceededWithWarnings` when anything was warned about.
    pub fn set_success(&mut self) {
        self.kind = if self.warnings.is_empty() { ResultKind::Succeeded } else { ResultKind::SucceededWithWarnings };
    }

    pub fn set_cancelled(&mut self) {
        self.kind = ResultKind::Cancelled;
    }

    pub fn has_failed(&self) -> bool {
        self.kind == ResultKind::Failed
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ResultKind::Cancelled
    }

    pub fn has_result(&self) -> bool {
        matches!(self.kind, ResultKind::Succeeded | ResultKind::SucceededWithWarnings)
    }

    /// Take over the messages of another result, keeping this status.
    pub fn append(&mut self, other: &GeometryResult) {
        self.warnings.extend(other.warnings.iter().cloned());
        self.errors.extend(other.errors.iter().cloned());
    }

    /// Fold an error into this result: `Cancelled` cancels, everything else fails.
    pub fn fail_with(&mut self, err: &Error) {
        match err {
            Error::Cancelled => self.set_cancelled(),
            e => self.set_failed(e.to_string()),
        }
    }

    pub fn from_error(err: &Error) -> Self {
        let mut r = Self::new();
        r.fail_with(err);
        r
    }
}
