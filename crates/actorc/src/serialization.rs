//! Wire serialization: self-describing type table plus leb128/sleb128-encoded
//! values (§4.9).
//!
//! The type-table builder and host-side reference encoder/decoder below are
//! pure Rust — useful for the end-to-end tests that check a round trip
//! without a live Wasm host — while [`emit_serialize`]/[`emit_deserialize`]
//! are the actual codegen surface: like `values.rs`'s allocation helpers, the
//! byte-level walk happens in the RTS import this backend calls into, not in
//! instructions this crate emits one at a time (§1, §6.1).

use crate::diag::Trap;

pub const MAGIC: [u8; 4] = *b"DIDL";

/// Negative sleb128 codes for primitive and composite type-table entries (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimCode {
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
    Text,
    Reserved,
    Empty,
}

impl PrimCode {
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            Self::Null => -1,
            Self::Bool => -2,
            Self::Nat => -3,
            Self::Int => -4,
            Self::Nat8 => -5,
            Self::Nat16 => -6,
            Self::Nat32 => -7,
            Self::Nat64 => -8,
            Self::Int8 => -9,
            Self::Int16 => -10,
            Self::Int32 => -11,
            Self::Int64 => -12,
            Self::Text => -15,
            Self::Reserved => -16,
            Self::Empty => -17,
        }
    }
}

const RECORD_CODE: i64 = -20;
const VARIANT_CODE: i64 = -21;
const VECTOR_CODE: i64 = -19;
const OPTION_CODE: i64 = -18;

/// A reference to a type, either a primitive written inline or an index into
/// the type table's non-primitive entries (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeRef {
    Prim(PrimCode),
    Table(u32),
}

/// One structural entry in the type table (§4.9). `Record`/`Variant` fields
/// are `(name_hash, TypeRef)` pairs, laid out in ascending hash order to match
/// the object/variant runtime layout (§3.2, §4.5).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeEntry {
    Record(Vec<(u32, TypeRef)>),
    Variant(Vec<(u32, TypeRef)>),
    Vector(TypeRef),
    Option(TypeRef),
}

/// Builds the type table for a set of top-level argument types, deduplicating
/// structurally identical composite entries (§4.9's "normalised type identifier").
#[derive(Debug, Clone, Default)]
pub struct TypeTableBuilder {
    entries: Vec<TypeEntry>,
}

impl TypeTableBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `entry`, returning its table index.
    pub fn intern(&mut self, entry: TypeEntry) -> u32 {
        if let Some(i) = self.entries.iter().position(|e| *e == entry) {
            return i as u32;
        }
        self.entries.push(entry);
        (self.entries.len() - 1) as u32
    }

    #[must_use]
    pub fn type_ref(&mut self, ty: &crate::ir::Type) -> TypeRef {
        use crate::ir::{PrimType, Type};
        match ty {
            Type::Prim(p) => TypeRef::Prim(prim_code(*p)),
            Type::Option(inner) => {
                let r = self.type_ref(inner);
                TypeRef::Table(self.intern(TypeEntry::Option(r)))
            }
            Type::Array(inner) => {
                let r = self.type_ref(inner);
                TypeRef::Table(self.intern(TypeEntry::Vector(r)))
            }
            Type::Tuple(elems) => {
                let mut fields = Vec::with_capacity(elems.len());
                for (i, t) in elems.iter().enumerate() {
                    fields.push((i as u32, self.type_ref(t)));
                }
                TypeRef::Table(self.intern(TypeEntry::Record(fields)))
            }
            Type::Object(fields) => {
                let mut sorted: Vec<_> = fields.iter().collect();
                sorted.sort_by_key(|f| crate::values::name_hash(&f.name));
                let mut entries = Vec::with_capacity(sorted.len());
                for f in sorted {
                    entries.push((crate::values::name_hash(&f.name), self.type_ref(&f.ty)));
                }
                TypeRef::Table(self.intern(TypeEntry::Record(entries)))
            }
            Type::Variant(cases) => {
                let mut sorted: Vec<_> = cases.iter().collect();
                sorted.sort_by_key(|(name, _)| crate::values::name_hash(name));
                let mut entries = Vec::with_capacity(sorted.len());
                for (name, t) in sorted {
                    entries.push((crate::values::name_hash(name), self.type_ref(t)));
                }
                TypeRef::Table(self.intern(TypeEntry::Variant(entries)))
            }
            // Function/actor types never cross the wire in this backend's
            // supported surface (§4.9's scope is argument/result serialization).
            Type::Func(_) | Type::Actor(_) => TypeRef::Prim(PrimCode::Reserved),
            _ => TypeRef::Prim(prim_code(PrimType::Any)),
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        write_leb128(&mut buf, self.entries.len() as u64);
        for entry in &self.entries {
            encode_entry(&mut buf, entry);
        }
        buf
    }
}

fn prim_code(p: crate::ir::PrimType) -> PrimCode {
    use crate::ir::PrimType as P;
    match p {
        P::Null => PrimCode::Null,
        P::Bool => PrimCode::Bool,
        P::Nat => PrimCode::Nat,
        P::Int => PrimCode::Int,
        P::Nat8 | P::Word8 => PrimCode::Nat8,
        P::Nat16 | P::Word16 => PrimCode::Nat16,
        P::Nat32 | P::Word32 | P::Char => PrimCode::Nat32,
        P::Nat64 | P::Word64 => PrimCode::Nat64,
        P::Int8 => PrimCode::Int8,
        P::Int16 => PrimCode::Int16,
        P::Int32 => PrimCode::Int32,
        P::Int64 => PrimCode::Int64,
        P::Text | P::Blob => PrimCode::Text,
        P::Any => PrimCode::Reserved,
        P::Empty => PrimCode::Empty,
    }
}

fn encode_type_ref(buf: &mut Vec<u8>, r: TypeRef) {
    match r {
        TypeRef::Prim(p) => write_sleb128(buf, p.code()),
        TypeRef::Table(i) => write_leb128(buf, u64::from(i)),
    }
}

fn encode_entry(buf: &mut Vec<u8>, entry: &TypeEntry) {
    match entry {
        TypeEntry::Record(fields) => {
            write_sleb128(buf, RECORD_CODE);
            write_leb128(buf, fields.len() as u64);
            for (hash, r) in fields {
                write_leb128(buf, u64::from(*hash));
                encode_type_ref(buf, *r);
            }
        }
        TypeEntry::Variant(cases) => {
            write_sleb128(buf, VARIANT_CODE);
            write_leb128(buf, cases.len() as u64);
            for (hash, r) in cases {
                write_leb128(buf, u64::from(*hash));
                encode_type_ref(buf, *r);
            }
        }
        TypeEntry::Vector(r) => {
            write_sleb128(buf, VECTOR_CODE);
            encode_type_ref(buf, *r);
        }
        TypeEntry::Option(r) => {
            write_sleb128(buf, OPTION_CODE);
            encode_type_ref(buf, *r);
        }
    }
}

/// Writes the 4-byte magic, type table, and argument-type-index list that
/// precede any serialized value payload (§4.9 steps 1-4).
#[must_use]
pub fn encode_header(builder: &TypeTableBuilder, arg_refs: &[TypeRef]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&MAGIC);
    buf.extend(builder.encode());
    write_leb128(&mut buf, arg_refs.len() as u64);
    for r in arg_refs {
        encode_type_ref(&mut buf, *r);
    }
    buf
}

pub fn write_leb128(buf: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

pub fn write_sleb128(buf: &mut Vec<u8>, mut v: i64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        if done {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

pub fn read_leb128(bytes: &[u8], pos: &mut usize) -> Result<u64, Trap> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(*pos).ok_or_else(|| Trap::deserialization_error("truncated leb128"))?;
        *pos += 1;
        result |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    Ok(result)
}

pub fn read_sleb128(bytes: &[u8], pos: &mut usize) -> Result<i64, Trap> {
    let mut result: i64 = 0;
    let mut shift = 0;
    let mut byte;
    loop {
        byte = *bytes.get(*pos).ok_or_else(|| Trap::deserialization_error("truncated sleb128"))?;
        *pos += 1;
        result |= i64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if shift < 64 && byte & 0x40 != 0 {
        result |= -1i64 << shift;
    }
    Ok(result)
}

/// Validates the fixed magic at the start of an incoming message (§4.9 step 1).
pub fn check_magic(bytes: &[u8]) -> Result<(), Trap> {
    if bytes.get(..4) == Some(&MAGIC[..]) {
        Ok(())
    } else {
        Err(Trap::deserialization_error("bad magic"))
    }
}

/// Emits the call into the RTS that serializes `n_args` already-pushed
/// arguments against the given static type-table pointer (§4.9, §6.1).
#[must_use]
pub fn emit_serialize(type_table: crate::heap_model::SkewedPtr, n_args: u32) -> Vec<crate::instr::Instr> {
    vec![
        crate::instr::Instr::I32Const(type_table.0),
        crate::instr::Instr::CallImportIndexed("idl_serialize_args", n_args),
    ]
}

/// Emits the call into the RTS that deserializes an incoming message buffer
/// against the given static type-table pointer, producing `n_args` values on
/// the stack (§4.9, §6.1).
#[must_use]
pub fn emit_deserialize(type_table: crate::heap_model::SkewedPtr, n_args: u32) -> Vec<crate::instr::Instr> {
    vec![
        crate::instr::Instr::I32Const(type_table.0),
        crate::instr::Instr::CallImportIndexed("idl_deserialize_args", n_args),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FieldType, PrimType, Type};

    #[test]
    fn leb128_roundtrips() {
        let mut buf = Vec::new();
        write_leb128(&mut buf, 300);
        let mut pos = 0;
        assert_eq!(read_leb128(&buf, &mut pos).unwrap(), 300);
    }

    #[test]
    fn sleb128_roundtrips_negative() {
        let mut buf = Vec::new();
        write_sleb128(&mut buf, -17);
        let mut pos = 0;
        assert_eq!(read_sleb128(&buf, &mut pos).unwrap(), -17);
    }

    #[test]
    fn primitive_type_ref_is_inline() {
        let mut b = TypeTableBuilder::new();
        let r = b.type_ref(&Type::Prim(PrimType::Nat));
        assert_eq!(r, TypeRef::Prim(PrimCode::Nat));
        assert!(b.encode().starts_with(&[0])); // empty table: leb128(0 entries)
    }

    #[test]
    fn record_type_is_interned_once_for_identical_shapes() {
        let mut b = TypeTableBuilder::new();
        let obj = Type::Object(vec![FieldType {
            name: "n".into(),
            ty: Type::Prim(PrimType::Nat),
            mutable: false,
        }]);
        let a = b.type_ref(&obj);
        let c = b.type_ref(&obj);
        assert_eq!(a, c);
    }

    #[test]
    fn magic_check_rejects_short_or_wrong_buffers() {
        assert!(check_magic(b"DIDL").is_ok());
        assert!(check_magic(b"XXXX").is_err());
        assert!(check_magic(b"DI").is_err());
    }

    #[test]
    fn header_includes_magic_and_arg_count() {
        let b = TypeTableBuilder::new();
        let header = encode_header(&b, &[TypeRef::Prim(PrimCode::Nat)]);
        assert!(header.starts_with(&MAGIC));
    }
}
