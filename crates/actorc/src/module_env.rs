//! `ModuleEnv` and `FunEnv`: the accumulating module and per-function bookkeeping (§4.1, §2).
//!
//! `ModuleEnv`'s accumulators (imports, function types, functions, built-ins)
//! are monotonic — only ever appended to, never rewritten in place — which is
//! exactly the property the teacher's own design notes call out (§9: "these
//! accumulators are monotonic") and the property the teacher's `heap::Heap`
//! and `intern::Interns` both lean on (append-only vectors indexed by a
//! newtype). `indexmap::IndexMap` is used wherever insertion order must be
//! preserved for determinism (§5: "the order of function emission affects
//! function indices").

use indexmap::IndexMap;

use crate::{
    diag::{CompileError, Diagnostic},
    heap_model::HeapModel,
    instr::{FuncIdx, FuncType, Instr, TypeIdx},
};

/// Tri-state lifecycle of a registered built-in function (§4.1 `built_in`).
pub enum BuiltinState {
    /// Referenced but no body generated yet.
    Declared,
    /// Body generated and stored.
    Defined(Vec<Instr>),
    /// Body will be generated on first use by running the given thunk.
    Pending(Box<dyn FnOnce() -> Vec<Instr>>),
}

impl std::fmt::Debug for BuiltinState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Declared => write!(f, "Declared"),
            Self::Defined(body) => f.debug_tuple("Defined").field(&body.len()).finish(),
            Self::Pending(_) => write!(f, "Pending(..)"),
        }
    }
}

/// Per-function bookkeeping (§2, §4.1): parameter count, declared return
/// arity, ordered local types, debug names.
#[derive(Debug, Clone, Default)]
pub struct FunEnv {
    pub param_count: u32,
    pub return_arity: u32,
    pub locals: Vec<crate::instr::ValType>,
    pub local_names: Vec<Option<String>>,
    pub debug_name: Option<String>,
}

impl FunEnv {
    #[must_use]
    pub fn new(param_count: u32, return_arity: u32, param_types: &[crate::instr::ValType]) -> Self {
        Self {
            param_count,
            return_arity,
            locals: param_types.to_vec(),
            local_names: vec![None; param_types.len()],
            debug_name: None,
        }
    }

    /// Allocates a fresh local of the given type, returning its index.
    pub fn add_local(&mut self, ty: crate::instr::ValType, name: Option<String>) -> crate::instr::LocalIdx {
        let idx = crate::instr::LocalIdx(self.locals.len() as u32);
        self.locals.push(ty);
        self.local_names.push(name);
        idx
    }
}

#[derive(Debug, Clone)]
pub struct FuncEntry {
    pub name: String,
    pub ty: TypeIdx,
    pub fun_env: FunEnv,
    pub body: Option<Vec<Instr>>,
}

#[derive(Debug, Clone)]
pub struct ImportEntry {
    pub module: String,
    pub func: String,
    pub ty: TypeIdx,
}

/// The accumulating module under construction (§2, §4.1).
#[derive(Debug, Default)]
pub struct ModuleEnv {
    func_types: IndexMap<FuncType, TypeIdx>,
    imports: Vec<ImportEntry>,
    funcs: Vec<FuncEntry>,
    builtins: IndexMap<String, BuiltinState>,
    heap: HeapModel,
    diagnostics: Vec<Diagnostic>,
    first_non_import_func_added: bool,
    table_entries: Vec<FuncIdx>,
}

impl ModuleEnv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a function type, returning its (possibly pre-existing) index (§4.1 `func_type`).
    pub fn func_type(&mut self, ty: FuncType) -> TypeIdx {
        if let Some(idx) = self.func_types.get(&ty) {
            return *idx;
        }
        let idx = TypeIdx(self.func_types.len() as u32);
        self.func_types.insert(ty, idx);
        idx
    }

    /// Adds a function import. Must happen before any non-import function (§4.1).
    pub fn add_func_import(
        &mut self,
        module: impl Into<String>,
        func: impl Into<String>,
        ty: FuncType,
    ) -> Result<FuncIdx, CompileError> {
        let module = module.into();
        let func = func.into();
        if self.first_non_import_func_added {
            return Err(CompileError::ImportAfterFunction { module, func });
        }
        let ty = self.func_type(ty);
        let idx = FuncIdx((self.imports.len()) as u32);
        self.imports.push(ImportEntry { module, func, ty });
        Ok(idx)
    }

    /// Reserves a function index and returns a setter used later to fill in its
    /// body, supporting mutual recursion (§4.1 `reserve_fun`).
    pub fn reserve_fun(&mut self, name: impl Into<String>, ty: FuncType, fun_env: FunEnv) -> FuncIdx {
        self.first_non_import_func_added = true;
        let ty_idx = self.func_type(ty);
        let idx = FuncIdx((self.imports.len() + self.funcs.len()) as u32);
        self.funcs.push(FuncEntry {
            name: name.into(),
            ty: ty_idx,
            fun_env,
            body: None,
        });
        idx
    }

    /// Fills in the body reserved by `reserve_fun`.
    pub fn fill_fun(&mut self, idx: FuncIdx, body: Vec<Instr>) {
        let local_idx = idx.index() - self.imports.len();
        self.funcs[local_idx].body = Some(body);
    }

    /// Allocates a function index and defines its body immediately (§4.1 `add_fun`).
    pub fn add_fun(&mut self, name: impl Into<String>, ty: FuncType, fun_env: FunEnv, body: Vec<Instr>) -> FuncIdx {
        let idx = self.reserve_fun(name, ty, fun_env);
        self.fill_fun(idx, body);
        idx
    }

    /// Tri-state registry lookup/promotion (§4.1 `built_in`): looking up a
    /// pending name runs its thunk and promotes it to defined.
    pub fn built_in(&mut self, name: &str) -> Option<&[Instr]> {
        match self.builtins.get_mut(name) {
            Some(BuiltinState::Defined(body)) => Some(body.as_slice()),
            Some(state @ BuiltinState::Pending(_)) => {
                let BuiltinState::Pending(thunk) = std::mem::replace(state, BuiltinState::Declared) else {
                    unreachable!()
                };
                let body = thunk();
                *state = BuiltinState::Defined(body);
                let Some(BuiltinState::Defined(body)) = self.builtins.get(name) else {
                    unreachable!()
                };
                Some(body.as_slice())
            }
            Some(BuiltinState::Declared) | None => None,
        }
    }

    /// Declares a built-in by name without a body yet.
    pub fn declare_builtin(&mut self, name: impl Into<String>) {
        self.builtins.entry(name.into()).or_insert(BuiltinState::Declared);
    }

    /// Registers a thunk that lazily produces a built-in's body on first lookup.
    pub fn declare_builtin_pending(&mut self, name: impl Into<String>, thunk: impl FnOnce() -> Vec<Instr> + 'static) {
        self.builtins.insert(name.into(), BuiltinState::Pending(Box::new(thunk)));
    }

    /// Adds a function index to the indirect-call table, returning its table slot.
    pub fn add_table_entry(&mut self, f: FuncIdx) -> u32 {
        let slot = self.table_entries.len() as u32;
        self.table_entries.push(f);
        slot
    }

    pub fn add_static_bytes(&mut self, data: &[u8]) -> Result<crate::heap_model::SkewedPtr, CompileError> {
        self.heap
            .add_static_bytes(data)
            .map_err(|_| CompileError::StaticMemoryFrozen)
    }

    pub fn add_mutable_static_bytes(&mut self, data: &[u8]) -> Result<crate::heap_model::SkewedPtr, CompileError> {
        self.heap
            .add_mutable_static_bytes(data)
            .map_err(|_| CompileError::StaticMemoryFrozen)
    }

    pub fn reserve_static_memory(&mut self, size: u32) -> Result<u32, CompileError> {
        self.heap
            .reserve_static_memory(size)
            .map_err(|_| CompileError::StaticMemoryFrozen)
    }

    pub fn get_end_of_static_memory(&mut self) -> u32 {
        self.heap.get_end_of_static_memory()
    }

    pub fn push_diagnostic(&mut self, d: Diagnostic) {
        self.diagnostics.push(d);
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    #[must_use]
    pub fn funcs(&self) -> &[FuncEntry] {
        &self.funcs
    }

    #[must_use]
    pub fn imports(&self) -> &[ImportEntry] {
        &self.imports
    }

    #[must_use]
    pub fn table_entries(&self) -> &[FuncIdx] {
        &self.table_entries
    }

    #[must_use]
    pub fn heap_stats(&self) -> &crate::heap_model::HeapStats {
        self.heap.stats()
    }

    /// Resolves every `CallImport`/`CallImportIndexed` pseudo-instruction left
    /// in a defined function body into a real `Call(FuncIdx)` (§4.1, §6.1,
    /// §6.2), using the import table built up by `add_func_import`. Must run
    /// once every import and every function body has been added; a name with
    /// no matching import is a compiler bug, not a user error.
    pub fn resolve_call_imports(&mut self) -> Result<(), CompileError> {
        let mut by_name: std::collections::HashMap<String, FuncIdx> = std::collections::HashMap::new();
        for (i, imp) in self.imports.iter().enumerate() {
            by_name.insert(imp.func.clone(), FuncIdx(i as u32));
        }
        for entry in &mut self.funcs {
            let Some(body) = entry.body.take() else { continue };
            let mut resolved = Vec::with_capacity(body.len());
            for instr in body {
                match instr {
                    Instr::CallImport(name) => {
                        let idx = *by_name
                            .get(name)
                            .ok_or_else(|| CompileError::UnresolvedImport { name: name.to_owned() })?;
                        resolved.push(Instr::Call(idx));
                    }
                    Instr::CallImportIndexed(name, n) => {
                        let idx = *by_name
                            .get(name)
                            .ok_or_else(|| CompileError::UnresolvedImport { name: name.to_owned() })?;
                        resolved.push(Instr::I32Const(n as i32));
                        resolved.push(Instr::Call(idx));
                    }
                    other => resolved.push(other),
                }
            }
            entry.body = Some(resolved);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::ValType;

    fn unit_ty() -> FuncType {
        FuncType {
            params: vec![],
            results: vec![],
        }
    }

    #[test]
    fn func_type_interning_dedups() {
        let mut env = ModuleEnv::new();
        let a = env.func_type(unit_ty());
        let b = env.func_type(unit_ty());
        assert_eq!(a, b);
    }

    #[test]
    fn import_after_function_is_rejected() {
        let mut env = ModuleEnv::new();
        env.add_fun("f", unit_ty(), FunEnv::default(), vec![]);
        let err = env.add_func_import("env", "g", unit_ty());
        assert!(matches!(err, Err(CompileError::ImportAfterFunction { .. })));
    }

    #[test]
    fn reserve_then_fill_supports_mutual_recursion() {
        let mut env = ModuleEnv::new();
        let a = env.reserve_fun("a", unit_ty(), FunEnv::default());
        let b = env.reserve_fun("b", unit_ty(), FunEnv::default());
        // a's body can reference b's index before b has a body.
        env.fill_fun(a, vec![Instr::Call(b)]);
        env.fill_fun(b, vec![Instr::Call(a)]);
        assert!(env.funcs()[0].body.is_some());
        assert!(env.funcs()[1].body.is_some());
    }

    #[test]
    fn builtin_pending_promotes_to_defined_on_lookup() {
        let mut env = ModuleEnv::new();
        env.declare_builtin_pending("helper", || vec![Instr::Nop]);
        assert_eq!(env.built_in("helper"), Some(&[Instr::Nop][..]));
    }

    #[test]
    fn builtin_declared_without_body_is_none() {
        let mut env = ModuleEnv::new();
        env.declare_builtin("helper");
        assert_eq!(env.built_in("helper"), None);
    }

    #[test]
    fn fun_env_add_local_indexes_after_params() {
        let mut fe = FunEnv::new(2, 1, &[ValType::I32, ValType::I32]);
        let idx = fe.add_local(ValType::I64, Some("x".to_owned()));
        assert_eq!(idx.0, 2);
    }
}
