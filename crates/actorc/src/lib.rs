#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "word/byte offsets are checked at construction")]
#![expect(clippy::cast_sign_loss, reason = "skewed-pointer arithmetic is intentionally mixed-sign")]
#![expect(clippy::cast_possible_wrap, reason = "tagged-scalar shifts are checked against COMPACT_MAX/MIN upstream")]
#![expect(clippy::too_many_arguments, reason = "codegen helpers mirror the wire shapes they emit")]
#![expect(clippy::unreadable_literal, reason = "skew/tag constants keep their canonical hex/decimal forms")]

pub mod actor_support;
pub mod alloc_how;
pub mod closures;
pub mod compile;
pub mod diag;
pub mod gc;
pub mod heap_model;
pub mod host;
pub mod instr;
pub mod ir;
pub mod module_env;
pub mod numerics;
pub mod patterns;
pub mod rts;
pub mod serialization;
pub mod stack_rep;
pub mod values;
pub mod var_env;

pub use crate::{
    compile::{CompileOptions, compile_program},
    diag::{CodeRange, CompileError, Diagnostic, Trap},
    host::HostMode,
    module_env::ModuleEnv,
};
