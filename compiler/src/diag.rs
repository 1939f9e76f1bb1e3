// diag.rs — Unified diagnostics model
//
// Provides the shared diagnostic types used by every compiler pass. Graph
// compilers have no source text, so a diagnostic points at a node and/or pin
// instead of a span.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::{NodeId, PinId};

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0201`, `W0101`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registered diagnostic codes.
pub mod codes {
    use super::DiagCode;

    /// A synthesized connection could not be made and was skipped.
    pub const W0101: DiagCode = DiagCode("W0101");
    /// A single-link input carries more than one link; only the first is honored.
    pub const W0102: DiagCode = DiagCode("W0102");

    /// A linked data pin is still a wildcard after lowering.
    pub const E0201: DiagCode = DiagCode("E0201");
    /// A link joins two pins whose types are incompatible.
    pub const E0202: DiagCode = DiagCode("E0202");
    /// A high-level construct survived lowering.
    pub const E0203: DiagCode = DiagCode("E0203");
    /// A by-reference input is not fed by a variable.
    pub const E0204: DiagCode = DiagCode("E0204");
    /// Generic pin resolution gave up before the types stopped changing.
    pub const E0205: DiagCode = DiagCode("E0205");

    /// Lowering aborted on a structural precondition violation.
    pub const E0301: DiagCode = DiagCode("E0301");
}

// ── Severity level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

// ── Location ─────────────────────────────────────────────────────────────

/// Where in the graph a diagnostic applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub node: Option<NodeId>,
    pub pin: Option<PinId>,
}

impl Location {
    pub fn node(node: NodeId) -> Self {
        Location {
            node: Some(node),
            pin: None,
        }
    }

    pub fn pin(node: NodeId, pin: PinId) -> Self {
        Location {
            node: Some(node),
            pin: Some(pin),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.node, self.pin) {
            (Some(n), Some(p)) => write!(f, "{}:{}", n, p),
            (Some(n), None) => write!(f, "{}", n),
            (None, Some(p)) => write!(f, "{}", p),
            (None, None) => write!(f, "<graph>"),
        }
    }
}

// ── Diagnostic ───────────────────────────────────────────────────────────

/// A compiler diagnostic emitted by any pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    pub location: Location,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    /// Create a new diagnostic with no code or hint.
    pub fn new(level: DiagLevel, location: Location, message: impl Into<String>) -> Self {
        Self {
            code: None,
            level,
            location,
            message: message.into(),
            hint: None,
        }
    }

    pub fn error(location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Error, location, message)
    }

    pub fn warning(location: Location, message: impl Into<String>) -> Self {
        Self::new(DiagLevel::Warning, location, message)
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

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        };
        if let Some(code) = &self.code {
            write!(f, "{}[{}]: {}: {}", level, code, self.location, self.message)?;
        } else {
            write!(f, "{}: {}: {}", level, self.location, self.message)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {}", hint)?;
        }
        Ok(())
    }
}

/// True if any diagnostic in the slice is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}
