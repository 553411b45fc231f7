//! The `rts` import catalogue (§6.1): support routines this backend assumes
//! are linked in from a separate runtime-support object, the same way the
//! teacher's own bytecode never inlines e.g. string hashing but calls out to
//! a shared helper.
//!
//! Registration happens once, at the very start of compiling a module, since
//! `ModuleEnv::add_func_import` rejects imports added after the first
//! non-import function (§4.1).

use ahash::AHashMap;

use crate::{
    diag::CompileError,
    instr::{FuncIdx, FuncType, ValType},
    module_env::ModuleEnv,
};

/// One `rts`-module import's declared signature.
struct RtsImport {
    name: &'static str,
    params: &'static [ValType],
    results: &'static [ValType],
}

const I32: ValType = ValType::I32;
const I64: ValType = ValType::I64;

/// The catalogue entries actually called into by this crate's codegen
/// helpers (§6.1 lists the full surface; this is the subset this backend's
/// emitted instruction sequences above reference by name).
const CATALOG: &[RtsImport] = &[
    RtsImport { name: "version", params: &[], results: &[I32] },
    RtsImport { name: "parse_idl_header", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "skip_leb128", params: &[I32], results: &[I32] },
    RtsImport { name: "skip_any", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "skip_fields", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "find_field", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "read_u32_of_leb128", params: &[I32], results: &[I32] },
    RtsImport { name: "read_i32_of_sleb128", params: &[I32], results: &[I32] },
    RtsImport { name: "leb128_encode", params: &[I32, I32], results: &[] },
    RtsImport { name: "sleb128_encode", params: &[I32, I32], results: &[] },
    RtsImport { name: "utf8_validate", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "as_memcpy", params: &[I32, I32, I32], results: &[] },
    RtsImport { name: "remember_closure", params: &[I32], results: &[I32] },
    RtsImport { name: "recall_closure", params: &[I32], results: &[I32] },
    RtsImport { name: "closure_count", params: &[], results: &[I32] },
    RtsImport { name: "closure_table_loc", params: &[], results: &[I32] },
    RtsImport { name: "closure_table_size", params: &[], results: &[I32] },
    // `bigint_*` family (§6.1). Grouped here rather than spelled out one
    // entry per op in prose, since every one of them shares the shape
    // "pointer(s) in, pointer/word out" that `bigint_binop` below captures.
    RtsImport { name: "bigint_add", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_sub", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_mul", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_div", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_rem", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_pow", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_neg", params: &[I32], results: &[I32] },
    RtsImport { name: "bigint_abs", params: &[I32], results: &[I32] },
    RtsImport { name: "bigint_lsh", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_eq", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_lt", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_le", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_gt", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_ge", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "bigint_of_word32", params: &[I32], results: &[I32] },
    RtsImport { name: "bigint_of_word32_signed", params: &[I32], results: &[I32] },
    RtsImport { name: "bigint_of_word64", params: &[I64], results: &[I32] },
    RtsImport { name: "bigint_of_word64_signed", params: &[I64], results: &[I32] },
    RtsImport { name: "bigint_to_word32", params: &[I32], results: &[I32] },
    RtsImport { name: "bigint_to_word32_trap", params: &[I32], results: &[I32] },
    RtsImport { name: "bigint_to_word32_signed_trap", params: &[I32], results: &[I32] },
    RtsImport { name: "bigint_to_word64", params: &[I32], results: &[I64] },
    RtsImport { name: "bigint_to_word64_trap", params: &[I32], results: &[I64] },
    RtsImport { name: "bigint_to_word64_signed_trap", params: &[I32], results: &[I64] },
    RtsImport { name: "bigint_count_bits", params: &[I32], results: &[I32] },
    RtsImport { name: "bigint_2complement_bits", params: &[I32], results: &[I32] },
    RtsImport { name: "bigint_isneg", params: &[I32], results: &[I32] },
    // Heap object construction and layout helpers (§3.2, §4.4), backing
    // `values.rs`'s emitters for arrays/objects/options/variants.
    RtsImport { name: "alloc_tagged", params: &[I32], results: &[I32] },
    RtsImport { name: "alloc_tagged_1", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "alloc_variant", params: &[I32, I32, I32], results: &[I32] },
    RtsImport { name: "store_n_fields", params: &[I32], results: &[I32] },
    RtsImport { name: "read_array_field", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "object_scan_one_hash_slot", params: &[I32], results: &[I32] },
    RtsImport { name: "variant_tag_word", params: &[I32], results: &[I32] },
    RtsImport { name: "deep_eq_literal", params: &[I32], results: &[I32] },
    // Closure construction (§4.7, §4.8), mirroring the `remember_closure`/
    // `recall_closure` pair above but for the closure object itself rather
    // than the cross-message handle table.
    RtsImport { name: "alloc_closure", params: &[I32, I32, I32], results: &[I32] },
    RtsImport { name: "store_closure_captures", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "resolve_actor_reference", params: &[I32], results: &[I32] },
    // Boxed-word coercions the `StackRep` lattice's `adjust` step calls into
    // when crossing between unboxed and vanilla representations (§4.3).
    RtsImport { name: "box_word64", params: &[I64], results: &[I32] },
    RtsImport { name: "unbox_word64", params: &[I32], results: &[I64] },
    RtsImport { name: "box_word32", params: &[I32], results: &[I32] },
    RtsImport { name: "unbox_word32", params: &[I32], results: &[I32] },
    RtsImport { name: "self_reference", params: &[], results: &[I32] },
    // Copying-collector primitives (§4.10), called from the one GC function
    // body this backend emits.
    RtsImport { name: "gc_evacuate_root", params: &[I32, I32], results: &[] },
    RtsImport { name: "gc_copy_and_forward", params: &[], results: &[I32] },
    RtsImport { name: "gc_evacuate_offset_pointer", params: &[I32], results: &[] },
    RtsImport { name: "gc_scan_to_space_until_exhausted", params: &[], results: &[] },
    RtsImport { name: "gc_copy_to_space_back_and_reset", params: &[I32], results: &[] },
    // Actor-method/async-call support (§4.11, §4.12).
    RtsImport { name: "run_gc", params: &[], results: &[] },
    RtsImport { name: "closure_call_no_args", params: &[I32], results: &[I32] },
    RtsImport { name: "make_system_error_value", params: &[I32], results: &[I32] },
    // Candid-style wire (de)serialisation (§4.9), called from
    // `serialization::emit_serialize`/`emit_deserialize`.
    RtsImport { name: "idl_serialize_args", params: &[I32, I32], results: &[I32] },
    RtsImport { name: "idl_deserialize_args", params: &[I32, I32], results: &[I32] },
];

/// Registers every catalogue entry as a function import on `menv`, returning
/// a name-indexed lookup table of the resulting [`FuncIdx`]s.
///
/// Must run before any function body is added (§4.1).
pub fn register_rts_imports(menv: &mut ModuleEnv) -> Result<AHashMap<&'static str, FuncIdx>, CompileError> {
    let mut table = AHashMap::new();
    for entry in CATALOG {
        let ty = FuncType {
            params: entry.params.to_vec(),
            results: entry.results.to_vec(),
        };
        let idx = menv.add_func_import("rts", entry.name, ty)?;
        table.insert(entry.name, idx);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_catalog_entry() {
        let mut menv = ModuleEnv::new();
        let table = register_rts_imports(&mut menv).unwrap();
        assert_eq!(table.len(), CATALOG.len());
        assert_eq!(menv.imports().len(), CATALOG.len());
    }

    #[test]
    fn bigint_add_has_two_pointer_params() {
        let mut menv = ModuleEnv::new();
        let table = register_rts_imports(&mut menv).unwrap();
        let idx = table["bigint_add"];
        assert_eq!(menv.imports()[idx.index()].module, "rts");
    }
}
