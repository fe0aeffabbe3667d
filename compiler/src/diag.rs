// diag.rs — Unified diagnostics model
//
// Shared diagnostic types used across all compiler phases. This middle-end
// has no surface syntax, so faults are located at buffer slots rather than
// source spans.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::ir::{BufferId, Rank};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0001`).
///
/// Codes are `&'static str` constants defined in the `codes` module. Once
/// assigned, a code must never be reassigned to a different semantic meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    /// A read-type operation covers a slot that was never written.
    pub const READ_BEFORE_WRITE: DiagCode = DiagCode("E0001");
    /// A reduce-type write covers a slot with no pre-existing writer.
    pub const REDUCE_BEFORE_WRITE: DiagCode = DiagCode("E0002");
    /// An execution unit was registered under two different channels.
    pub const CHANNEL_CONFLICT: DiagCode = DiagCode("E0003");
    /// An execution unit was given conflicting send or recv peer ranks.
    pub const PEER_CONFLICT: DiagCode = DiagCode("E0004");
    /// A chunk references a scratch buffer that was never declared.
    pub const UNDECLARED_SCRATCH: DiagCode = DiagCode("E0005");
    /// A rank outside the compilation's fixed rank range.
    pub const RANK_OUT_OF_RANGE: DiagCode = DiagCode("E0006");
    /// A pairing reference that is not a send-family node.
    pub const BAD_PAIRING: DiagCode = DiagCode("E0007");
    /// Pipeline phases invoked out of their required order.
    pub const PHASE_ORDER: DiagCode = DiagCode("E0100");
    /// A scratch buffer was used before offset assignment.
    pub const UNLOWERED_SCRATCH: DiagCode = DiagCode("E0101");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Slot location ────────────────────────────────────────────────────────

/// The buffer slot a diagnostic refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRef {
    pub rank: Rank,
    pub buffer: BufferId,
    pub index: usize,
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{} {}[{}]", self.rank, self.buffer, self.index)
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any phase.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub message: String,
    pub hint: Option<String>,
    pub slot: Option<SlotRef>,
}

impl Diagnostic {
    /// Create a new error diagnostic with no code, hint, or slot.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: None,
            level: DiagLevel::Error,
            message: message.into(),
            hint: None,
            slot: None,
        }
    }

    /// Attach a stable diagnostic code.
    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    /// Attach a remediation hint.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    /// Attach the offending slot.
    pub fn with_slot(mut self, rank: Rank, buffer: BufferId, index: usize) -> Self {
        self.slot = Some(SlotRef {
            rank,
            buffer,
            index,
        });
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}", level, code, self.message)?;
        } else {
            write!(f, "{}: {}", level, self.message)?;
        }
        if let Some(slot) = &self.slot {
            write!(f, "\n  at slot {}", slot)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

impl std::error::Error for Diagnostic {}
