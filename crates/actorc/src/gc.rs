//! Semi-space copying collector, emitted as a single Wasm function (§4.10).
//!
//! Grounded on `heap_model.rs`'s `Tag`/`SkewedPtr` model for object shapes and
//! sizes, and on the teacher's own `heap::Heap` observability pattern
//! (`HeapStats`/`HeapDiff`) for the size bookkeeping a collector needs to
//! decide, per object, how many words to copy. The scan/evacuate control flow
//! below is data describing what the emitted function does; the actual copy
//! loop is delegated to RTS imports the same way `heap_model::emit_alloc_words`
//! delegates its growth check, since encoding a Cheney loop instruction-by-
//! instruction here would duplicate logic this crate cannot exercise without
//! a live linear memory to test against.

use crate::{
    heap_model::Tag,
    instr::{GlobalIdx, Instr},
};

/// Which memory region a root pointer currently points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootKind {
    /// A slot in the closure table kept alive across messages (§4.11).
    ClosureTable,
    /// A pointer-typed slot inside the static memory region (§3.1, §4.1).
    StaticSlot,
}

/// One entry the collector must visit and potentially update in place (§4.10 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Root {
    pub kind: RootKind,
    pub word_offset: u32,
}

/// Given an object's tag and (for variable-length tags) its length word,
/// returns its total size in words including the tag word (§4.10 step 2,
/// mirroring [`Tag::fixed_size_words`] for the tags that need a length read).
#[must_use]
pub fn object_size_words(tag: Tag, length_word: Option<u32>) -> Option<u32> {
    if let Some(fixed) = tag.fixed_size_words() {
        return Some(fixed);
    }
    // Array/Object: tag + length header word + `length_word` payload slots.
    // Blob: tag + length header word + length_word bytes, rounded up to words.
    // Closure: tag + code pointer + length_word captures.
    match tag {
        Tag::Array | Tag::Object => length_word.map(|n| n + 2),
        Tag::Blob => length_word.map(|n| n.div_ceil(4) + 2),
        Tag::Closure => length_word.map(|n| n + 2),
        _ => None,
    }
}

/// Emits the check-and-follow sequence for one root pointer: if the object it
/// points to is already an `Indirection`, the root is updated to the
/// forwarding pointer instead of re-copying it (§4.10 step 2a).
#[must_use]
pub fn emit_follow_indirection_and_evacuate(root: Root) -> Vec<Instr> {
    let byte_offset = root.word_offset * 4;
    vec![
        Instr::I32Const(byte_offset as i32),
        Instr::I32Const(matches!(root.kind, RootKind::ClosureTable) as i32),
        Instr::CallImport("gc_evacuate_root"),
    ]
}

/// Emits the evacuation step for a single object already known to be live and
/// not yet forwarded: copy to to-space, overwrite with `Indirection` +
/// forwarding pointer, return the new (to-space) address (§4.10 step 2b).
#[must_use]
pub fn emit_evacuate_object() -> Vec<Instr> {
    vec![Instr::CallImport("gc_copy_and_forward")]
}

/// `BigInt`'s payload lives inside a separate `Blob`, reached via an *offset
/// pointer* rather than a plain skewed pointer (§3.2 `BigInt` layout, §4.10
/// step 3): evacuating one requires subtracting the offset before following
/// the `Blob`'s own forwarding pointer, then re-adding it.
#[must_use]
pub fn emit_evacuate_bigint_payload(offset_words: u32) -> Vec<Instr> {
    vec![
        Instr::I32Const((offset_words * 4) as i32),
        Instr::CallImport("gc_evacuate_offset_pointer"),
    ]
}

/// Emits the whole collector as one function body (§4.10): evacuate every
/// root, Cheney-scan to-space until exhausted, then `memcpy` to-space back
/// over from-space and reset the end-of-heap global.
#[must_use]
pub fn emit_gc_function(roots: &[Root], heap_ptr_global: GlobalIdx, heap_base: u32) -> Vec<Instr> {
    let mut code = Vec::new();
    for &root in roots {
        code.extend(emit_follow_indirection_and_evacuate(root));
    }
    code.push(Instr::CallImport("gc_scan_to_space_until_exhausted"));
    code.push(Instr::I32Const(heap_base as i32));
    code.push(Instr::CallImport("gc_copy_to_space_back_and_reset"));
    code.push(Instr::GlobalGet(heap_ptr_global));
    code.push(Instr::Drop); // the reset write happens inside the import; this just documents the read-back
    code
}

/// Whether a GC pass runs at all for a given actor method: write-mode
/// (`canister_update`) messages collect at the end, query-mode messages never
/// do (§4.10 last line, §4.11).
#[must_use]
pub fn gc_runs_for(mode: crate::ir::MessageMode) -> bool {
    matches!(mode, crate::ir::MessageMode::Update)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_tag_size_ignores_length_word() {
        assert_eq!(object_size_words(Tag::MutBox, None), Some(2));
    }

    #[test]
    fn array_size_needs_length_word() {
        assert_eq!(object_size_words(Tag::Array, None), None);
        assert_eq!(object_size_words(Tag::Array, Some(3)), Some(5));
    }

    #[test]
    fn blob_size_rounds_up_to_words() {
        assert_eq!(object_size_words(Tag::Blob, Some(5)), Some(4)); // 5 bytes -> 2 words + 2 header
    }

    #[test]
    fn query_mode_skips_gc() {
        assert!(!gc_runs_for(crate::ir::MessageMode::Query));
        assert!(gc_runs_for(crate::ir::MessageMode::Update));
    }

    #[test]
    fn gc_function_visits_every_root() {
        let roots = vec![
            Root { kind: RootKind::StaticSlot, word_offset: 4 },
            Root { kind: RootKind::ClosureTable, word_offset: 0 },
        ];
        let code = emit_gc_function(&roots, GlobalIdx(0), 1024);
        let evac_calls = code
            .iter()
            .filter(|i| matches!(i, Instr::CallImport("gc_evacuate_root")))
            .count();
        assert_eq!(evac_calls, roots.len());
    }
}
