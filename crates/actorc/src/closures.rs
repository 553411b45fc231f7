//! Closure lowering: direct, closure, and shared-remote call shapes (§4.8).
//!
//! A `Closure` heap object is a tag word, a code pointer (table index into the
//! indirect-call table), and `n` captured-variable slots (§3.2 `Closure`
//! layout). This mirrors the teacher's function-object representation
//! (`function.rs`'s captured-`freevars` cell array) one level down: there a
//! closure captures live Python cells at call time, here it captures already-
//! materialised Wasm words baked into the heap object itself.

use crate::{
    heap_model::Tag,
    instr::{FuncIdx, GlobalIdx, Instr, LocalIdx, TableIdx, TypeIdx},
};

/// Offset, in words past the tag, of a closure's code-table index (§3.2).
pub const CLOSURE_CODE_OFFSET_WORDS: u32 = 1;
/// Offset, in words past the tag, of a closure's first captured variable.
pub const CLOSURE_CAPTURE_BASE_WORDS: u32 = 2;

/// How a call site lowers, decided per §4.8 from the callee's `StaticThing`/
/// variable-environment shape at compile time (never at runtime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Callee is a known top-level function with no captures: a direct `call`.
    Direct(FuncIdx),
    /// Callee is a `Closure` heap value: load its code pointer, `call_indirect`
    /// passing the closure itself as the implicit first argument.
    Closure,
    /// Callee is a remote actor reference: lowers to the actor-call sequence
    /// instead of an ordinary call (§4.11 owns the rest of that lowering).
    SharedRemote,
}

/// Builds a `Closure`-tagged heap object with no captured variables (§4.8):
/// the materialisation target for a [`crate::stack_rep::StaticThing::StaticFun`].
#[must_use]
pub fn emit_make_closure_no_captures(f: FuncIdx) -> Vec<Instr> {
    emit_make_closure(f, 0)
}

/// Builds a `Closure`-tagged heap object with `n_captures` words already on the
/// stack (pushed by the caller in capture-list order), code pointer `f` (§3.2,
/// §4.8).
#[must_use]
pub fn emit_make_closure(f: FuncIdx, n_captures: u32) -> Vec<Instr> {
    let mut code = vec![
        Instr::I32Const(Tag::Closure as i32),
        Instr::I32Const(f.0 as i32),
        Instr::I32Const(n_captures as i32),
        Instr::CallImport("alloc_closure"),
    ];
    if n_captures > 0 {
        code.push(Instr::CallImportIndexed("store_closure_captures", n_captures));
    }
    code
}

/// Emits the sequence that restores a function's captured variables into fresh
/// locals at entry (§4.8: "the function prologue re-derives each captured
/// variable's location from the closure argument"). `closure_local` holds the
/// closure's skewed pointer (conventionally the function's first parameter).
#[must_use]
pub fn emit_restore_captures(closure_local: LocalIdx, capture_locals: &[LocalIdx]) -> Vec<Instr> {
    let mut code = Vec::with_capacity(capture_locals.len() * 3);
    for (i, &dest) in capture_locals.iter().enumerate() {
        let offset = (CLOSURE_CAPTURE_BASE_WORDS + i as u32) * 4 + 1; // +1 undoes the -1 skew
        code.push(Instr::LocalGet(closure_local));
        code.push(Instr::I32Load { offset });
        code.push(Instr::LocalSet(dest));
    }
    code
}

/// Emits a direct static call: push args, `call` (§4.8 `Direct`).
#[must_use]
pub fn emit_direct_call(f: FuncIdx) -> Vec<Instr> {
    vec![Instr::Call(f)]
}

/// Emits a closure call: with `closure_local` and the arguments already on the
/// stack, loads the code pointer and `call_indirect`s through the function
/// table, passing the closure as the leading implicit argument so the callee's
/// prologue can call [`emit_restore_captures`] (§4.8 `Closure`).
#[must_use]
pub fn emit_closure_call(closure_local: LocalIdx, ty: TypeIdx, table: TableIdx) -> Vec<Instr> {
    vec![
        Instr::LocalGet(closure_local),
        Instr::I32Load {
            offset: CLOSURE_CODE_OFFSET_WORDS * 4 + 1,
        },
        Instr::CallIndirect(ty, table),
    ]
}

/// Emits a shared (remote-actor) call: rather than an ordinary return, control
/// returns via the async-reply mechanism (§4.11), so this only prepares the
/// callee reference and hands off; the call/reply machinery itself lives in
/// `actor_support`.
#[must_use]
pub fn emit_shared_call_prelude(callee_local: LocalIdx) -> Vec<Instr> {
    vec![Instr::LocalGet(callee_local), Instr::CallImport("resolve_actor_reference")]
}

/// Decides the call shape for a callee given what the variable environment
/// records about it (§4.8's dispatch rule): a function reference recorded in
/// `VarEnv` as a [`crate::stack_rep::StaticThing::StaticFun`]/`Message` lowers
/// direct or shared, anything else (a `Vanilla` closure value) lowers as a
/// closure call.
#[must_use]
pub fn call_shape_for(rep: crate::stack_rep::StackRep, sharing: crate::ir::Sharing) -> CallShape {
    match (rep, sharing) {
        (crate::stack_rep::StackRep::StaticThing(crate::stack_rep::StaticThing::StaticFun(f)), _) => {
            CallShape::Direct(f)
        }
        (crate::stack_rep::StackRep::StaticThing(crate::stack_rep::StaticThing::Message(f)), crate::ir::Sharing::Local) => {
            CallShape::Direct(f)
        }
        (_, crate::ir::Sharing::Shared(_)) => CallShape::SharedRemote,
        _ => CallShape::Closure,
    }
}

/// Unused by closures directly, kept only so the indirect-call table global
/// offset used in tests stays colocated with the heap layout it documents.
#[allow(dead_code)]
const _: GlobalIdx = GlobalIdx(0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_captures_still_allocates_a_closure_tag() {
        let code = emit_make_closure_no_captures(FuncIdx(3));
        assert_eq!(code[0], Instr::I32Const(Tag::Closure as i32));
        assert_eq!(code[1], Instr::I32Const(3));
        assert_eq!(code[2], Instr::I32Const(0));
    }

    #[test]
    fn restore_captures_emits_one_triple_per_local() {
        let code = emit_restore_captures(LocalIdx(0), &[LocalIdx(1), LocalIdx(2)]);
        assert_eq!(code.len(), 6);
    }

    #[test]
    fn direct_call_emits_plain_call() {
        assert_eq!(emit_direct_call(FuncIdx(7)), vec![Instr::Call(FuncIdx(7))]);
    }

    #[test]
    fn static_fun_dispatches_direct_regardless_of_sharing() {
        let rep = crate::stack_rep::StackRep::StaticThing(crate::stack_rep::StaticThing::StaticFun(FuncIdx(1)));
        assert_eq!(
            call_shape_for(rep, crate::ir::Sharing::Local),
            CallShape::Direct(FuncIdx(1))
        );
    }

    #[test]
    fn shared_message_dispatches_remote() {
        let rep = crate::stack_rep::StackRep::StaticThing(crate::stack_rep::StaticThing::Message(FuncIdx(1)));
        assert_eq!(
            call_shape_for(rep, crate::ir::Sharing::Shared(crate::ir::Control::Returns)),
            CallShape::SharedRemote
        );
    }

    #[test]
    fn vanilla_value_dispatches_closure_call() {
        assert_eq!(
            call_shape_for(crate::stack_rep::StackRep::Vanilla, crate::ir::Sharing::Local),
            CallShape::Closure
        );
    }
}
