//! The typed, actor-oriented intermediate representation this backend consumes.
//!
//! The IR parser and bi-directional type checker that produce values of these
//! types are external collaborators (§1): this module only defines the
//! *already fully-resolved* shapes they hand over. No parsing or type
//! inference lives here — the shapes are data, the way the teacher's own
//! `object::Object` is a pure data type distinct from the `value::Value`
//! runtime representation it gets compiled down to.

use serde::{Deserialize, Serialize};

use crate::diag::CodeRange;

/// A field name, interned eagerly by the front end into a plain `String` here —
/// the backend re-hashes it (§4.5) rather than relying on any front-end intern table.
pub type Name = String;

/// Source-level types, fully resolved (no polymorphism reaches this backend, §9).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Type {
    Prim(PrimType),
    Array(Box<Type>),
    Tuple(Vec<Type>),
    Object(Vec<FieldType>),
    Variant(Vec<(Name, Type)>),
    Option(Box<Type>),
    Func(FuncType),
    Actor(Vec<(Name, FuncType, Sharing)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimType {
    Null,
    Bool,
    Nat,
    Int,
    Nat8,
    Nat16,
    Nat32,
    Nat64,
    Int8,
    Int16,
    Int32,
    Int64,
    Word8,
    Word16,
    Word32,
    Word64,
    Char,
    Text,
    Blob,
    /// `Any`, AKA `reserved` on the wire (§4.9).
    Any,
    /// The empty / bottom type — no value of this type ever exists at runtime.
    Empty,
}

impl PrimType {
    /// True for the fixed-width `Int*`/`Nat*` family that traps on overflow (§4.3),
    /// as opposed to `Word*` which wraps silently.
    #[must_use]
    pub fn is_checked_fixed_width(self) -> bool {
        matches!(
            self,
            Self::Nat8 | Self::Nat16 | Self::Nat32 | Self::Nat64 | Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64
        )
    }

    #[must_use]
    pub fn bit_width(self) -> Option<u32> {
        match self {
            Self::Nat8 | Self::Int8 | Self::Word8 => Some(8),
            Self::Nat16 | Self::Int16 | Self::Word16 => Some(16),
            Self::Nat32 | Self::Int32 | Self::Word32 => Some(32),
            Self::Nat64 | Self::Int64 | Self::Word64 => Some(64),
            Self::Char => Some(21),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_signed(self) -> bool {
        matches!(self, Self::Int | Self::Int8 | Self::Int16 | Self::Int32 | Self::Int64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldType {
    pub name: Name,
    pub ty: Type,
    pub mutable: bool,
}

/// Whether a function may be called across a message boundary (§6.4 glossary:
/// "shared function"). Only shared functions appear as actor public fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sharing {
    Local,
    Shared(Control),
}

/// How a shared function replies: fire-and-forget vs. an async `Returns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Control {
    Oneway,
    Returns,
}

/// Whether an exported actor method runs in write mode (`canister_update`,
/// triggers GC, §4.11) or query mode (`canister_query`, skips GC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageMode {
    Update,
    Query,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncType {
    pub args: Vec<Type>,
    pub rets: Vec<Type>,
}

/// A literal value occurring in the IR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Lit {
    Null,
    Bool(bool),
    /// Decimal digits of a `Nat`/`Int` literal; kept as text so arbitrarily large
    /// literals can be represented without this crate parsing them into `i64`
    /// prematurely (§4.3 compactification happens at codegen time, not here).
    Int(String),
    Text(String),
    Char(char),
    Blob(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    And,
    Or,
    Xor,
    Shl,
    ShrS,
    ShrU,
    Rotl,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Neg,
    Not,
}

/// A refutable pattern (§4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Pat {
    Wild,
    Var(Name),
    Lit(Lit),
    Option(Box<Pat>),
    Null,
    Variant(Name, Box<Pat>),
    Tuple(Vec<Pat>),
    Object(Vec<(Name, Pat)>),
    Annot(Box<Pat>, Type),
    Or(Box<Pat>, Box<Pat>),
}

/// The `async { ... }` block lowering target (§4.11, §9): a closure stored in the
/// closure table, dispatched via a self-call to the async continuation helper
/// export (see `actor_support::ASYNC_HELPER_EXPORT_NAME`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncBlock {
    pub body: Box<Exp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dec {
    pub kind: DecKind,
    pub at: Option<CodeRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DecKind {
    Let(Pat, Exp),
    Var(Name, Type, Exp),
    Func(FuncDec),
    Actor(ActorDec),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncDec {
    pub name: Name,
    pub sharing: Sharing,
    pub params: Vec<Pat>,
    pub param_tys: Vec<Type>,
    pub ret_tys: Vec<Type>,
    pub body: Exp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorDec {
    pub name: Name,
    /// Private `var`/`let` fields backing the actor's state.
    pub fields: Vec<Dec>,
    /// Public shared functions, each exported per §4.11.
    pub public: Vec<FuncDec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exp {
    pub kind: ExpKind,
    pub ty: Type,
    pub at: Option<CodeRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpKind {
    Lit(Lit),
    Var(Name),
    Prim1(UnOp, Box<Exp>),
    Prim2(BinOp, Box<Exp>, Box<Exp>),
    Tuple(Vec<Exp>),
    Array(Vec<Exp>),
    ArrayIdx(Box<Exp>, Box<Exp>),
    ObjectLit(Vec<(Name, Exp)>),
    Dot(Box<Exp>, Name),
    Variant(Name, Box<Exp>),
    Some(Box<Exp>),
    Null,
    FuncLit(Box<FuncDec>),
    Call(Box<Exp>, Vec<Exp>),
    /// An `await`ed asynchronous call to a (possibly remote) shared function:
    /// callee, method name, argument expressions (§4.11).
    AsyncCall {
        callee: Box<Exp>,
        method: Name,
        args: Vec<Exp>,
    },
    Async(AsyncBlock),
    Block(Vec<Dec>, Box<Exp>),
    If(Box<Exp>, Box<Exp>, Box<Exp>),
    While(Box<Exp>, Box<Exp>),
    Assign(Box<Exp>, Box<Exp>),
    Switch(Box<Exp>, Vec<(Pat, Exp)>),
    Ignore(Box<Exp>),
    Unit,
}

/// A whole compilation unit: top-level declarations ending in (at most) one actor.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Prog {
    pub decs: Vec<Dec>,
}
