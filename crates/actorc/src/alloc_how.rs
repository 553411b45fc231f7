//! `AllocHow`: the fixed-point analysis deciding where each declared variable
//! ultimately lives (§4.7).
//!
//! A variable's allocation strategy depends on properties that are only fully
//! known after looking at its entire scope — whether it is ever captured by a
//! nested function literal, whether it is ever assigned to — so this runs as a
//! small fixed-point over a `Vec<VarInfo>` the way the teacher's own
//! multi-pass analyses (e.g. `prepare.rs`'s constant-folding, since removed)
//! iterate a worklist until nothing changes.

use std::collections::{BTreeMap, BTreeSet};

use crate::ir::{self, Name};

/// The decided storage strategy for one declared variable (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocHow {
    /// Lives in a plain Wasm local; never assigned, never captured.
    LocalImmut,
    /// Lives in a plain Wasm local; assigned in place, but never captured by
    /// a nested closure (so no heap box is needed to share mutation).
    LocalMut,
    /// Lives in a heap `MutBox`/`ObjInd` cell reached through a local holding
    /// the box's address: needed once a closure captures a mutable binding,
    /// since the closure's copy and the enclosing function's copy must see
    /// the same mutations.
    StoreHeap,
    /// Lives in static memory, allocated once for the module's lifetime —
    /// top-level `var`s and actor fields (§3.3, §4.7).
    StoreStatic,
    /// Declared but never read: no storage is emitted at all.
    Absent,
}

/// Per-declaration usage facts gathered by a single front-to-back walk, fed
/// into [`decide`] to reach the fixed point (§4.7).
#[derive(Debug, Clone, Default)]
pub struct VarUsage {
    pub read: bool,
    pub assigned: bool,
    pub captured_by_closure: bool,
    pub is_top_level: bool,
}

/// Runs the fixed point: a variable captured by a closure forces any
/// transitively-enclosing mutable binding it in turn closes over to also be
/// considered captured (§4.7: "capture analysis is itself a fixed point,
/// since one closure's captures can themselves be captured by another").
///
/// `captures` maps each declared name to the set of declared names captured
/// by any closure literal occurring in its own body/initializer.
#[must_use]
pub fn decide(mut usage: BTreeMap<Name, VarUsage>, captures: &BTreeMap<Name, BTreeSet<Name>>) -> BTreeMap<Name, AllocHow> {
    propagate_captures(&mut usage, captures);

    usage
        .into_iter()
        .map(|(name, u)| {
            let how = if !u.read && !u.is_top_level {
                AllocHow::Absent
            } else if u.is_top_level {
                AllocHow::StoreStatic
            } else if u.assigned && u.captured_by_closure {
                AllocHow::StoreHeap
            } else if u.assigned {
                AllocHow::LocalMut
            } else {
                AllocHow::LocalImmut
            };
            (name, how)
        })
        .collect()
}

/// Iterates marking `captured_by_closure` until no more names change, per the
/// transitive-capture rule described on [`decide`].
fn propagate_captures(usage: &mut BTreeMap<Name, VarUsage>, captures: &BTreeMap<Name, BTreeSet<Name>>) {
    loop {
        let mut changed = false;
        for captured_names in captures.values() {
            for name in captured_names {
                if let Some(u) = usage.get_mut(name) {
                    if !u.captured_by_closure {
                        u.captured_by_closure = true;
                        changed = true;
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Names a pattern binds, descending into nested sub-patterns (§4.6).
fn pattern_names(pat: &ir::Pat, out: &mut BTreeSet<Name>) {
    match pat {
        ir::Pat::Var(n) => {
            out.insert(n.clone());
        }
        ir::Pat::Option(p) | ir::Pat::Annot(p, _) | ir::Pat::Variant(_, p) => pattern_names(p, out),
        ir::Pat::Tuple(ps) => ps.iter().for_each(|p| pattern_names(p, out)),
        ir::Pat::Object(fs) => fs.iter().for_each(|(_, p)| pattern_names(p, out)),
        ir::Pat::Or(a, b) => {
            pattern_names(a, out);
            pattern_names(b, out);
        }
        ir::Pat::Wild | ir::Pat::Lit(_) | ir::Pat::Null => {}
    }
}

/// The free variables of a function literal's body: everything it reads that
/// isn't one of its own parameters — the candidate capture set a call site
/// checks against the names it is deciding storage for (§4.7, §4.8).
fn func_free_vars(f: &ir::FuncDec) -> BTreeSet<Name> {
    let mut bound = BTreeSet::new();
    for p in &f.params {
        pattern_names(p, &mut bound);
    }
    let mut free = BTreeSet::new();
    collect_reads(&f.body, &mut bound, &mut free);
    free
}

/// Structural walk collecting every `Var` read not shadowed by `bound`,
/// descending into nested scopes with their own bindings folded in as it goes
/// (§4.6, §4.8) — covers every [`ir::ExpKind`] shape.
fn collect_reads(exp: &ir::Exp, bound: &mut BTreeSet<Name>, free: &mut BTreeSet<Name>) {
    match &exp.kind {
        ir::ExpKind::Var(name) => {
            if !bound.contains(name) {
                free.insert(name.clone());
            }
        }
        ir::ExpKind::Lit(_) | ir::ExpKind::Null | ir::ExpKind::Unit => {}
        ir::ExpKind::Prim1(_, e) | ir::ExpKind::Some(e) | ir::ExpKind::Variant(_, e) | ir::ExpKind::Ignore(e) => {
            collect_reads(e, bound, free);
        }
        ir::ExpKind::Prim2(_, a, b)
        | ir::ExpKind::While(a, b)
        | ir::ExpKind::Assign(a, b)
        | ir::ExpKind::ArrayIdx(a, b) => {
            collect_reads(a, bound, free);
            collect_reads(b, bound, free);
        }
        ir::ExpKind::Tuple(es) | ir::ExpKind::Array(es) => es.iter().for_each(|e| collect_reads(e, bound, free)),
        ir::ExpKind::ObjectLit(fields) => fields.iter().for_each(|(_, e)| collect_reads(e, bound, free)),
        ir::ExpKind::Dot(e, _) => collect_reads(e, bound, free),
        ir::ExpKind::FuncLit(inner) => {
            let mut inner_bound = bound.clone();
            for p in &inner.params {
                pattern_names(p, &mut inner_bound);
            }
            collect_reads(&inner.body, &mut inner_bound, free);
        }
        ir::ExpKind::Call(callee, args) => {
            collect_reads(callee, bound, free);
            args.iter().for_each(|a| collect_reads(a, bound, free));
        }
        ir::ExpKind::AsyncCall { callee, args, .. } => {
            collect_reads(callee, bound, free);
            args.iter().for_each(|a| collect_reads(a, bound, free));
        }
        ir::ExpKind::Async(block) => collect_reads(&block.body, bound, free),
        ir::ExpKind::If(c, t, e) => {
            collect_reads(c, bound, free);
            collect_reads(t, bound, free);
            collect_reads(e, bound, free);
        }
        ir::ExpKind::Switch(scrutinee, arms) => {
            collect_reads(scrutinee, bound, free);
            for (pat, body) in arms {
                let mut arm_bound = bound.clone();
                pattern_names(pat, &mut arm_bound);
                collect_reads(body, &mut arm_bound, free);
            }
        }
        ir::ExpKind::Block(decs, trailing) => {
            let mut block_bound = bound.clone();
            for dec in decs {
                match &dec.kind {
                    ir::DecKind::Let(pat, value) => {
                        collect_reads(value, &mut block_bound, free);
                        pattern_names(pat, &mut block_bound);
                    }
                    ir::DecKind::Var(name, _, value) => {
                        collect_reads(value, &mut block_bound, free);
                        block_bound.insert(name.clone());
                    }
                    ir::DecKind::Func(f) => {
                        block_bound.insert(f.name.clone());
                    }
                    ir::DecKind::Actor(_) => {}
                }
            }
            collect_reads(trailing, &mut block_bound, free);
        }
    }
}

/// Every name assigned to (the target of an `Assign`) anywhere in `exp`,
/// including inside a nested function literal's body — a name only ever
/// reassigned from within a closure still needs `assigned` set, since that is
/// exactly the case [`decide`] promotes to [`AllocHow::StoreHeap`].
fn collect_assigned(exp: &ir::Exp, assigned: &mut BTreeSet<Name>) {
    match &exp.kind {
        ir::ExpKind::Assign(target, value) => {
            if let ir::ExpKind::Var(name) = &target.kind {
                assigned.insert(name.clone());
            } else {
                collect_assigned(target, assigned);
            }
            collect_assigned(value, assigned);
        }
        ir::ExpKind::Var(_) | ir::ExpKind::Lit(_) | ir::ExpKind::Null | ir::ExpKind::Unit => {}
        ir::ExpKind::Prim1(_, e) | ir::ExpKind::Some(e) | ir::ExpKind::Variant(_, e) | ir::ExpKind::Ignore(e) => {
            collect_assigned(e, assigned);
        }
        ir::ExpKind::Prim2(_, a, b) | ir::ExpKind::While(a, b) | ir::ExpKind::ArrayIdx(a, b) => {
            collect_assigned(a, assigned);
            collect_assigned(b, assigned);
        }
        ir::ExpKind::Tuple(es) | ir::ExpKind::Array(es) => es.iter().for_each(|e| collect_assigned(e, assigned)),
        ir::ExpKind::ObjectLit(fields) => fields.iter().for_each(|(_, e)| collect_assigned(e, assigned)),
        ir::ExpKind::Dot(e, _) => collect_assigned(e, assigned),
        ir::ExpKind::FuncLit(inner) => collect_assigned(&inner.body, assigned),
        ir::ExpKind::Call(callee, args) => {
            collect_assigned(callee, assigned);
            args.iter().for_each(|a| collect_assigned(a, assigned));
        }
        ir::ExpKind::AsyncCall { callee, args, .. } => {
            collect_assigned(callee, assigned);
            args.iter().for_each(|a| collect_assigned(a, assigned));
        }
        ir::ExpKind::Async(block) => collect_assigned(&block.body, assigned),
        ir::ExpKind::If(c, t, e) => {
            collect_assigned(c, assigned);
            collect_assigned(t, assigned);
            collect_assigned(e, assigned);
        }
        ir::ExpKind::Switch(scrutinee, arms) => {
            collect_assigned(scrutinee, assigned);
            arms.iter().for_each(|(_, body)| collect_assigned(body, assigned));
        }
        ir::ExpKind::Block(decs, trailing) => {
            for dec in decs {
                match &dec.kind {
                    ir::DecKind::Let(_, value) | ir::DecKind::Var(_, _, value) => collect_assigned(value, assigned),
                    ir::DecKind::Func(_) | ir::DecKind::Actor(_) => {}
                }
            }
            collect_assigned(trailing, assigned);
        }
    }
}

/// For every function literal anywhere in `exp`, folds in the subset of its
/// free variables that are in `declared` (§4.7). Keyed by an arbitrary
/// per-closure label purely so the `captures` map has one entry per closure
/// found; nothing reads the keys back out, only [`decide`]'s `.values()` walk.
fn collect_captures(exp: &ir::Exp, declared: &BTreeSet<Name>, out: &mut BTreeMap<Name, BTreeSet<Name>>, next_id: &mut u32) {
    match &exp.kind {
        ir::ExpKind::FuncLit(inner) => {
            let captured: BTreeSet<Name> = func_free_vars(inner).into_iter().filter(|n| declared.contains(n)).collect();
            if !captured.is_empty() {
                out.insert(format!("#closure{next_id}"), captured);
                *next_id += 1;
            }
            collect_captures(&inner.body, declared, out, next_id);
        }
        ir::ExpKind::Lit(_) | ir::ExpKind::Var(_) | ir::ExpKind::Null | ir::ExpKind::Unit => {}
        ir::ExpKind::Prim1(_, e) | ir::ExpKind::Some(e) | ir::ExpKind::Variant(_, e) | ir::ExpKind::Ignore(e) => {
            collect_captures(e, declared, out, next_id);
        }
        ir::ExpKind::Prim2(_, a, b)
        | ir::ExpKind::While(a, b)
        | ir::ExpKind::Assign(a, b)
        | ir::ExpKind::ArrayIdx(a, b) => {
            collect_captures(a, declared, out, next_id);
            collect_captures(b, declared, out, next_id);
        }
        ir::ExpKind::Tuple(es) | ir::ExpKind::Array(es) => es.iter().for_each(|e| collect_captures(e, declared, out, next_id)),
        ir::ExpKind::ObjectLit(fields) => fields.iter().for_each(|(_, e)| collect_captures(e, declared, out, next_id)),
        ir::ExpKind::Dot(e, _) => collect_captures(e, declared, out, next_id),
        ir::ExpKind::Call(callee, args) => {
            collect_captures(callee, declared, out, next_id);
            args.iter().for_each(|a| collect_captures(a, declared, out, next_id));
        }
        ir::ExpKind::AsyncCall { callee, args, .. } => {
            collect_captures(callee, declared, out, next_id);
            args.iter().for_each(|a| collect_captures(a, declared, out, next_id));
        }
        ir::ExpKind::Async(block) => collect_captures(&block.body, declared, out, next_id),
        ir::ExpKind::If(c, t, e) => {
            collect_captures(c, declared, out, next_id);
            collect_captures(t, declared, out, next_id);
            collect_captures(e, declared, out, next_id);
        }
        ir::ExpKind::Switch(scrutinee, arms) => {
            collect_captures(scrutinee, declared, out, next_id);
            arms.iter().for_each(|(_, body)| collect_captures(body, declared, out, next_id));
        }
        ir::ExpKind::Block(decs, trailing) => {
            for dec in decs {
                match &dec.kind {
                    ir::DecKind::Let(_, value) | ir::DecKind::Var(_, _, value) => {
                        collect_captures(value, declared, out, next_id);
                    }
                    ir::DecKind::Func(_) | ir::DecKind::Actor(_) => {}
                }
            }
            collect_captures(trailing, declared, out, next_id);
        }
    }
}

/// Runs the §4.7 decision for a set of names (parameters or `var`
/// declarations) given the expression(s) in which they are visible —
/// gathers [`VarUsage`] and the capture map by walking `exprs`, then calls
/// [`decide`]. `top_level` forces every name to [`AllocHow::StoreStatic`], the
/// same override [`decide`] itself applies.
#[must_use]
pub fn decide_for_scope(exprs: &[&ir::Exp], declared: &[Name], top_level: bool) -> BTreeMap<Name, AllocHow> {
    let declared_set: BTreeSet<Name> = declared.iter().cloned().collect();
    let mut usage: BTreeMap<Name, VarUsage> = declared
        .iter()
        .map(|n| {
            (
                n.clone(),
                VarUsage {
                    is_top_level: top_level,
                    ..VarUsage::default()
                },
            )
        })
        .collect();
    let mut assigned = BTreeSet::new();
    let mut captures = BTreeMap::new();
    let mut next_id = 0;
    for e in exprs {
        let mut free = BTreeSet::new();
        collect_reads(e, &mut BTreeSet::new(), &mut free);
        for name in declared {
            if free.contains(name) {
                usage.get_mut(name).unwrap().read = true;
            }
        }
        collect_assigned(e, &mut assigned);
        collect_captures(e, &declared_set, &mut captures, &mut next_id);
    }
    for name in &assigned {
        if let Some(u) = usage.get_mut(name) {
            u.assigned = true;
        }
    }
    decide(usage, &captures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(read: bool, assigned: bool, captured: bool, top_level: bool) -> VarUsage {
        VarUsage {
            read,
            assigned,
            captured_by_closure: captured,
            is_top_level: top_level,
        }
    }

    #[test]
    fn unread_local_is_absent() {
        let mut u = BTreeMap::new();
        u.insert("x".to_owned(), usage(false, false, false, false));
        let result = decide(u, &BTreeMap::new());
        assert_eq!(result["x"], AllocHow::Absent);
    }

    #[test]
    fn plain_read_only_local_is_immut() {
        let mut u = BTreeMap::new();
        u.insert("x".to_owned(), usage(true, false, false, false));
        let result = decide(u, &BTreeMap::new());
        assert_eq!(result["x"], AllocHow::LocalImmut);
    }

    #[test]
    fn assigned_uncaptured_local_is_mut() {
        let mut u = BTreeMap::new();
        u.insert("x".to_owned(), usage(true, true, false, false));
        let result = decide(u, &BTreeMap::new());
        assert_eq!(result["x"], AllocHow::LocalMut);
    }

    #[test]
    fn assigned_and_captured_goes_to_heap() {
        let mut u = BTreeMap::new();
        u.insert("x".to_owned(), usage(true, true, false, false));
        let mut captures = BTreeMap::new();
        captures.insert("f".to_owned(), BTreeSet::from(["x".to_owned()]));
        let result = decide(u, &captures);
        assert_eq!(result["x"], AllocHow::StoreHeap);
    }

    #[test]
    fn top_level_var_is_static_even_if_also_captured() {
        let mut u = BTreeMap::new();
        u.insert("counter".to_owned(), usage(true, true, false, true));
        let result = decide(u, &BTreeMap::new());
        assert_eq!(result["counter"], AllocHow::StoreStatic);
    }

    #[test]
    fn transitive_capture_propagates() {
        // g captures y; f captures g (so transitively captures y through g's closure).
        let mut u = BTreeMap::new();
        u.insert("y".to_owned(), usage(true, true, false, false));
        let mut captures = BTreeMap::new();
        captures.insert("g".to_owned(), BTreeSet::from(["y".to_owned()]));
        captures.insert("f".to_owned(), BTreeSet::from(["g".to_owned()]));
        let result = decide(u, &captures);
        assert_eq!(result["y"], AllocHow::StoreHeap);
    }

    fn int_lit(v: i64) -> ir::Exp {
        ir::Exp {
            kind: ir::ExpKind::Lit(ir::Lit::Int(v.to_string())),
            ty: ir::Type::Prim(ir::PrimType::Nat),
            at: None,
        }
    }

    fn var(name: &str) -> ir::Exp {
        ir::Exp {
            kind: ir::ExpKind::Var(name.to_owned()),
            ty: ir::Type::Prim(ir::PrimType::Nat),
            at: None,
        }
    }

    fn closure_over(body: ir::Exp) -> ir::Exp {
        ir::Exp {
            kind: ir::ExpKind::FuncLit(Box::new(ir::FuncDec {
                name: String::new(),
                sharing: ir::Sharing::Local,
                params: vec![],
                param_tys: vec![],
                ret_tys: vec![],
                body,
            })),
            ty: ir::Type::Prim(ir::PrimType::Nat),
            at: None,
        }
    }

    #[test]
    fn scope_never_mentioning_a_name_decides_absent() {
        let decisions = decide_for_scope(&[&int_lit(1)], &["x".to_owned()], false);
        assert_eq!(decisions["x"], AllocHow::Absent);
    }

    #[test]
    fn scope_reading_but_not_assigning_decides_immut() {
        let decisions = decide_for_scope(&[&var("x")], &["x".to_owned()], false);
        assert_eq!(decisions["x"], AllocHow::LocalImmut);
    }

    #[test]
    fn closure_only_reading_a_name_does_not_force_heap() {
        let body = closure_over(var("x"));
        let decisions = decide_for_scope(&[&body], &["x".to_owned()], false);
        assert_eq!(decisions["x"], AllocHow::LocalImmut);
    }

    #[test]
    fn closure_assigning_a_captured_name_decides_store_heap() {
        let assign = ir::Exp {
            kind: ir::ExpKind::Assign(Box::new(var("x")), Box::new(int_lit(2))),
            ty: ir::Type::Prim(ir::PrimType::Nat),
            at: None,
        };
        let body = closure_over(assign);
        let decisions = decide_for_scope(&[&body], &["x".to_owned()], false);
        assert_eq!(decisions["x"], AllocHow::StoreHeap);
    }
}
