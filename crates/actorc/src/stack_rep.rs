//! The stack-representation lattice and its coercions (§3.4, §4.2).

use crate::instr::{Instr, ValType};

/// Which static entity a `Deferred` value denotes once materialised (§3.3, §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticThing {
    /// A top-level function with no captures: materialises as a one-off closure
    /// with an empty capture list.
    StaticFun(crate::instr::FuncIdx),
    /// A public method reference: materialises as the pair `(self, field-name-hash)`.
    PublicMethod(u32),
    /// A static message: a bare Wasm function index, valid only as a closed-call callee.
    Message(crate::instr::FuncIdx),
}

/// A classification of how a value occupies the Wasm operand stack between two
/// IR operations (§3.4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StackRep {
    /// A single generic word: either an unboxed scalar or a skewed pointer.
    Vanilla,
    UnboxedWord64,
    UnboxedWord32,
    /// `n` words on the stack, not yet materialised into a heap `Array`.
    UnboxedTuple(u32),
    /// Dead code: any following instructions are unreachable.
    Unreachable,
    /// No runtime footprint; `s` records which static entity this denotes.
    StaticThing(StaticThing),
}

impl StackRep {
    /// How many Wasm operand-stack words this representation occupies.
    #[must_use]
    pub fn width(self) -> u32 {
        match self {
            Self::Vanilla | Self::UnboxedWord32 => 1,
            Self::UnboxedWord64 => 1, // one i64 slot, still "one stack word" at the Wasm level
            Self::UnboxedTuple(n) => n,
            Self::Unreachable | Self::StaticThing(_) => 0,
        }
    }

    #[must_use]
    pub fn val_type(self) -> Option<ValType> {
        match self {
            Self::Vanilla | Self::UnboxedWord32 => Some(ValType::I32),
            Self::UnboxedWord64 => Some(ValType::I64),
            _ => None,
        }
    }

    /// Joins two representations arriving from different control-flow paths at
    /// the same merge point (§3.4). `Unreachable` absorbs anything; otherwise
    /// mismatches fall back to `Vanilla`, which both sides can always be
    /// coerced into.
    #[must_use]
    pub fn join(self, other: Self) -> Self {
        match (self, other) {
            (Self::Unreachable, x) | (x, Self::Unreachable) => x,
            (a, b) if a == b => a,
            _ => Self::Vanilla,
        }
    }
}

impl PartialEq for StaticThing {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::StaticFun(a), Self::StaticFun(b)) | (Self::Message(a), Self::Message(b)) => a == b,
            (Self::PublicMethod(a), Self::PublicMethod(b)) => a == b,
            _ => false,
        }
    }
}
impl Eq for StaticThing {}

impl PartialEq for StackRep {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Vanilla, Self::Vanilla)
            | (Self::UnboxedWord64, Self::UnboxedWord64)
            | (Self::UnboxedWord32, Self::UnboxedWord32)
            | (Self::Unreachable, Self::Unreachable) => true,
            (Self::UnboxedTuple(a), Self::UnboxedTuple(b)) => a == b,
            (Self::StaticThing(a), Self::StaticThing(b)) => a == b,
            _ => false,
        }
    }
}

/// Emits the coercion from `from` to `to` (§4.2's `adjust`). `multi_value`
/// controls whether an `UnboxedTuple n` may cross a Wasm block boundary as-is,
/// or must be stashed/unstashed through dedicated globals (§4.2).
#[must_use]
pub fn adjust(from: StackRep, to: StackRep, multi_value: bool) -> Vec<Instr> {
    use Instr::{CallImport, Unreachable as UnreachableInstr};

    if from == to {
        return vec![];
    }
    if matches!(from, StackRep::Unreachable) {
        return vec![UnreachableInstr];
    }

    match (from, to) {
        (StackRep::UnboxedWord64, StackRep::Vanilla) => vec![CallImport("box_word64")],
        (StackRep::Vanilla, StackRep::UnboxedWord64) => vec![CallImport("unbox_word64")],
        (StackRep::UnboxedWord32, StackRep::Vanilla) => vec![CallImport("box_word32")],
        (StackRep::Vanilla, StackRep::UnboxedWord32) => vec![CallImport("unbox_word32")],
        (StackRep::UnboxedTuple(n), StackRep::Vanilla) => emit_tuple_alloc(n),
        (StackRep::Vanilla, StackRep::UnboxedTuple(n)) => emit_tuple_decompose(n),
        (StackRep::StaticThing(s), StackRep::Vanilla) => emit_materialize(s),
        (StackRep::UnboxedTuple(n), StackRep::UnboxedTuple(m)) if !multi_value && n != m => {
            // Without multi-value, crossing a block boundary with a mismatched
            // tuple width goes through Vanilla as a common representation.
            let mut v = emit_tuple_alloc(n);
            v.extend(emit_tuple_decompose(m));
            v
        }
        // No direct rule for the remaining pairs: unreachable for the (from, to)
        // combinations this backend actually produces, but kept total rather
        // than panicking so a future representation can be added safely.
        _ => vec![],
    }
}

fn emit_tuple_alloc(n: u32) -> Vec<Instr> {
    // Allocates an `Array`-tagged heap tuple of arity n from the n words on the
    // stack (§4.2), delegating the actual object layout to `values::emit_make_array`.
    crate::values::emit_make_array_from_stack(n)
}

fn emit_tuple_decompose(n: u32) -> Vec<Instr> {
    crate::values::emit_read_array_fields(n)
}

fn emit_materialize(s: StaticThing) -> Vec<Instr> {
    match s {
        StaticThing::StaticFun(fi) => crate::closures::emit_make_closure_no_captures(fi),
        StaticThing::PublicMethod(name_hash) => vec![
            Instr::CallImport("self_reference"),
            Instr::I32Const(name_hash as i32),
        ],
        StaticThing::Message(fi) => vec![Instr::I32Const(fi.0 as i32)],
    }
}

/// Emits the drops needed to discard a value of the given representation
/// (§3.4: "A drop function emits the corresponding wasm-level drops").
#[must_use]
pub fn drop_value(rep: StackRep) -> Vec<Instr> {
    match rep {
        StackRep::Unreachable | StackRep::StaticThing(_) => vec![],
        StackRep::UnboxedTuple(n) => (0..n).map(|_| Instr::Drop).collect(),
        StackRep::Vanilla | StackRep::UnboxedWord32 | StackRep::UnboxedWord64 => vec![Instr::Drop],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_reps_need_no_coercion() {
        assert!(adjust(StackRep::Vanilla, StackRep::Vanilla, true).is_empty());
    }

    #[test]
    fn unreachable_absorbs_join() {
        assert_eq!(StackRep::Unreachable.join(StackRep::Vanilla), StackRep::Vanilla);
        assert_eq!(StackRep::Vanilla.join(StackRep::Unreachable), StackRep::Vanilla);
    }

    #[test]
    fn mismatched_reps_join_to_vanilla() {
        assert_eq!(
            StackRep::UnboxedWord32.join(StackRep::UnboxedWord64),
            StackRep::Vanilla
        );
    }

    #[test]
    fn unreachable_coercion_emits_unreachable_instr() {
        let code = adjust(StackRep::Unreachable, StackRep::Vanilla, true);
        assert_eq!(code, vec![Instr::Unreachable]);
    }

    #[test]
    fn drop_of_tuple_emits_n_drops() {
        assert_eq!(drop_value(StackRep::UnboxedTuple(3)).len(), 3);
    }

    #[test]
    fn drop_of_deferred_is_free() {
        assert!(drop_value(StackRep::StaticThing(StaticThing::Message(crate::instr::FuncIdx(0)))).is_empty());
    }
}
