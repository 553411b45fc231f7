//! Compile-time diagnostics and runtime trap descriptors.
//!
//! Three strata of error per the design: [`CompileError`] for well-formedness
//! violations that should never reach this backend (fatal, §7.1) and for
//! recognised-but-unimplemented IR shapes (non-fatal, §7.2, paired with a
//! [`Diagnostic`] and a stub body that traps at runtime); [`Trap`] values for
//! the messages baked into emitted code (§7.3). Mirrors the teacher's
//! hand-rolled `Display`/`Error` style (`resource::ResourceError`,
//! `exception_private`) rather than pulling in `thiserror`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where in the source IR a diagnostic points, when the front end supplied one.
///
/// The front end is an external collaborator (§1); this type only carries
/// whatever location information it chose to stamp on the IR it handed us.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CodeRange {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl fmt::Display for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}",
            self.start_line, self.start_col, self.end_line, self.end_col
        )
    }
}

/// Errors that abort compilation outright (§7.1, §7.2).
#[derive(Debug, Clone)]
pub enum CompileError {
    /// A variable reference has no binding in `VarEnv` at the point it is compiled.
    FreeVariable { name: String, at: Option<CodeRange> },
    /// A literal value cannot be represented in any supported runtime encoding
    /// (e.g. a `Nat` literal with more digits than the RTS bignum can parse).
    UnrepresentableLiteral { detail: String, at: Option<CodeRange> },
    /// Duplicate global (static) name registered in `ModuleEnv`.
    DuplicateGlobal { name: String },
    /// Static memory was already frozen via `get_end_of_static_memory`.
    StaticMemoryFrozen,
    /// A function import was added after the first non-import function.
    ImportAfterFunction { module: String, func: String },
    /// A recognised IR shape this backend does not yet lower (§7.2). Compilation
    /// continues: the compile driver emits a stub body that traps at runtime
    /// and records a matching [`Diagnostic`].
    Unimplemented { what: String, at: Option<CodeRange> },
    /// A `CallImport`/`CallImportIndexed` pseudo-instruction named an import
    /// that was never registered in the `rts`/`ic0` catalogues (§6.1, §6.2).
    /// Raised by `ModuleEnv::resolve_call_imports`, which runs once every
    /// function body has been added.
    UnresolvedImport { name: String },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FreeVariable { name, at } => {
                write!(f, "free variable `{name}` has no binding")?;
                write_at(f, at)
            }
            Self::UnrepresentableLiteral { detail, at } => {
                write!(f, "unrepresentable literal: {detail}")?;
                write_at(f, at)
            }
            Self::DuplicateGlobal { name } => write!(f, "duplicate global name `{name}`"),
            Self::StaticMemoryFrozen => write!(f, "static memory allocation after freeze"),
            Self::ImportAfterFunction { module, func } => {
                write!(f, "import `{module}.{func}` added after first non-import function")
            }
            Self::Unimplemented { what, at } => {
                write!(f, "unimplemented: {what}")?;
                write_at(f, at)
            }
            Self::UnresolvedImport { name } => {
                write!(f, "call to unregistered import `{name}`")
            }
        }
    }
}

fn write_at(f: &mut fmt::Formatter<'_>, at: &Option<CodeRange>) -> fmt::Result {
    if let Some(range) = at {
        write!(f, " at {range}")
    } else {
        Ok(())
    }
}

impl std::error::Error for CompileError {}

/// A non-fatal note recorded while compiling, surfaced to the driver's caller.
///
/// Only the `Unimplemented` stratum (§7.2) currently produces these; the field
/// exists on its own (rather than folded into `CompileError`) so the compile
/// driver can keep going and collect every stub it had to emit in one pass.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub message: String,
    pub at: Option<CodeRange>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        write_at(f, &self.at)
    }
}

/// A runtime trap baked into emitted code as a string payload (§7.3, §6.2's `trap` import).
///
/// This is data, not control flow: the compiler never catches a `Trap`, it only
/// describes which message an `unreachable`/`call $trap` sequence should carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trap(pub String);

impl Trap {
    pub fn natural_subtraction_underflow() -> Self {
        Self("Natural subtraction underflow".to_owned())
    }

    pub fn division_by_zero() -> Self {
        Self("division by zero".to_owned())
    }

    pub fn overflow(ty: &str) -> Self {
        Self(format!("arithmetic overflow in {ty}"))
    }

    pub fn pattern_match_failure() -> Self {
        Self("pattern match failure".to_owned())
    }

    pub fn deserialization_error(detail: &str) -> Self {
        Self(format!("IDL error: {detail}"))
    }

    pub fn array_index_out_of_bounds() -> Self {
        Self("array index out of bounds".to_owned())
    }

    pub fn invalid_char_code_point() -> Self {
        Self("invalid Unicode scalar value".to_owned())
    }

    pub fn negative_exponent() -> Self {
        Self("negative exponent on signed type".to_owned())
    }
}

impl fmt::Display for Trap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
