//! Pattern-match compilation (§4.6): `Wild`/`Var`/irrefutable shapes compile
//! as `CannotFail`, everything else as `CanFail`.
//!
//! Grounded on `var_env`'s persistent-environment convention (a pattern binds
//! new names the same way `VarEnv::with_var` extends a scope) and on
//! `values.rs`'s field-hash/variant-tag helpers, which a structural pattern
//! calls into to read out the piece it needs to test or bind.

use crate::{
    instr::{BlockType, Instr, LocalIdx},
    ir::{Lit, Pat},
    var_env::{VarEnv, VarLoc},
};

/// The result of compiling a pattern against a scrutinee already sitting in
/// `scrutinee_local` (§4.6).
///
/// `CannotFail` patterns (`_`, a bare variable, a fully-irrefutable tuple/object
/// of such) only ever extend `VarEnv`; `CanFail` patterns additionally carry
/// code that leaves a boolean ("did it match") on the stack, to be consumed by
/// an enclosing `if`/`br_if` before the bindings are considered live.
pub enum PatternResult {
    CannotFail { bind: Vec<Instr>, env: VarEnv },
    CanFail { test: Vec<Instr>, bind: Vec<Instr>, env: VarEnv },
}

impl PatternResult {
    #[must_use]
    pub fn env(&self) -> &VarEnv {
        match self {
            Self::CannotFail { env, .. } | Self::CanFail { env, .. } => env,
        }
    }

    /// Whether this pattern can ever fail to match (§4.6): callers use this to
    /// skip emitting a test/branch entirely for the common `let`-binding case.
    #[must_use]
    pub fn can_fail(&self) -> bool {
        matches!(self, Self::CanFail { .. })
    }
}

/// Compiles `pat` against a scrutinee already materialised (as a `Vanilla`
/// word) in `scrutinee_local`, extending `env` with whatever names it binds.
#[must_use]
pub fn compile_pattern(pat: &Pat, scrutinee_local: LocalIdx, env: &VarEnv) -> PatternResult {
    match pat {
        Pat::Wild => PatternResult::CannotFail {
            bind: vec![],
            env: env.clone(),
        },
        Pat::Var(name) => PatternResult::CannotFail {
            bind: vec![],
            env: env.with_var(name.clone(), VarLoc::Local(scrutinee_local)),
        },
        Pat::Annot(inner, _ty) => compile_pattern(inner, scrutinee_local, env),

        Pat::Lit(lit) => PatternResult::CanFail {
            test: emit_lit_test(lit, scrutinee_local),
            bind: vec![],
            env: env.clone(),
        },

        Pat::Null => PatternResult::CanFail {
            test: vec![
                Instr::LocalGet(scrutinee_local),
                Instr::I32Const(crate::heap_model::Scalar::null().0),
                Instr::I32Eq,
            ],
            bind: vec![],
            env: env.clone(),
        },

        Pat::Option(inner) => {
            // `null` fails to match `Some(p)`; anything else is a `Some` box
            // whose payload is the inner scrutinee (§3.2 `Some` layout, §4.5).
            let not_null_test = vec![
                Instr::LocalGet(scrutinee_local),
                Instr::I32Const(crate::heap_model::Scalar::null().0),
                Instr::I32Ne,
            ];
            let payload_bind = crate::values::emit_deref_boxed(scrutinee_local);
            let inner_result = compile_pattern(inner, scrutinee_local, env);
            combine_guard_then(not_null_test, payload_bind, inner_result)
        }

        Pat::Variant(label, inner) => {
            let tag_test = crate::values::emit_test_is(label);
            let payload_bind = crate::values::emit_deref_boxed(scrutinee_local);
            let inner_result = compile_pattern(inner, scrutinee_local, env);
            combine_guard_then(tag_test, payload_bind, inner_result)
        }

        Pat::Tuple(elems) => compile_sequence(elems, scrutinee_local, env, crate::values::emit_read_array_fields),

        Pat::Object(fields) => {
            let mut test = vec![];
            let mut bind = vec![];
            let mut env = env.clone();
            let mut any_fail = false;
            for (name, sub) in fields {
                let field_lookup = crate::values::emit_idx_hash(name, fields.len() as u32);
                bind.extend(field_lookup);
                let sub_result = compile_pattern(sub, scrutinee_local, &env);
                env = sub_result.env().clone();
                match sub_result {
                    PatternResult::CanFail { test: t, bind: b, .. } => {
                        any_fail = true;
                        test.extend(t);
                        bind.extend(b);
                    }
                    PatternResult::CannotFail { bind: b, .. } => bind.extend(b),
                }
            }
            if any_fail {
                PatternResult::CanFail { test, bind, env }
            } else {
                PatternResult::CannotFail { bind, env }
            }
        }

        Pat::Or(left, right) => {
            // §4.6: an `Or` pattern matches if either alternative does; both
            // sides must bind the same names (checked by the front end, not here).
            let l = compile_pattern(left, scrutinee_local, env);
            let r = compile_pattern(right, scrutinee_local, env);
            let mut test = match &l {
                PatternResult::CanFail { test, .. } => test.clone(),
                PatternResult::CannotFail { .. } => vec![Instr::I32Const(1)],
            };
            test.push(Instr::If(BlockType::Value(crate::instr::ValType::I32)));
            test.push(Instr::I32Const(1));
            test.push(Instr::Else);
            if let PatternResult::CanFail { test: rt, .. } = &r {
                test.extend(rt.clone());
            } else {
                test.push(Instr::I32Const(1));
            }
            test.push(Instr::End);
            PatternResult::CanFail {
                test,
                bind: match l {
                    PatternResult::CanFail { bind, .. } | PatternResult::CannotFail { bind, .. } => bind,
                },
                env: r.env().clone(),
            }
        }
    }
}

/// Sequences a list of sub-patterns against the words `decompose` reads out of
/// the scrutinee (used by `Tuple`; `Array`'s fixed-index case is structurally
/// identical and reuses this). Combines their `CanFail`-ness with logical AND.
fn compile_sequence(
    elems: &[Pat],
    scrutinee_local: LocalIdx,
    env: &VarEnv,
    decompose: impl Fn(u32) -> Vec<Instr>,
) -> PatternResult {
    let mut bind = decompose(elems.len() as u32);
    let mut test = vec![];
    let mut env = env.clone();
    let mut any_fail = false;
    for elem in elems {
        let sub = compile_pattern(elem, scrutinee_local, &env);
        env = sub.env().clone();
        match sub {
            PatternResult::CanFail { test: t, bind: b, .. } => {
                any_fail = true;
                test.extend(t);
                bind.extend(b);
            }
            PatternResult::CannotFail { bind: b, .. } => bind.extend(b),
        }
    }
    if any_fail {
        PatternResult::CanFail { test, bind, env }
    } else {
        PatternResult::CannotFail { bind, env }
    }
}

/// Combines a guard test (e.g. "is this a `Some`"/"is this tagged `label`")
/// with an inner pattern's result: the whole thing fails if the guard fails or
/// the inner pattern fails, and bindings only become visible past the guard.
fn combine_guard_then(guard_test: Vec<Instr>, payload_bind: Vec<Instr>, inner: PatternResult) -> PatternResult {
    match inner {
        PatternResult::CannotFail { bind, env } => {
            let mut bind_all = payload_bind;
            bind_all.extend(bind);
            PatternResult::CanFail {
                test: guard_test,
                bind: bind_all,
                env,
            }
        }
        PatternResult::CanFail { test, bind, env } => {
            let mut test_all = guard_test;
            test_all.push(Instr::If(BlockType::Value(crate::instr::ValType::I32)));
            test_all.extend(test);
            test_all.push(Instr::Else);
            test_all.push(Instr::I32Const(0));
            test_all.push(Instr::End);
            let mut bind_all = payload_bind;
            bind_all.extend(bind);
            PatternResult::CanFail {
                test: test_all,
                bind: bind_all,
                env,
            }
        }
    }
}

fn emit_lit_test(lit: &Lit, scrutinee_local: LocalIdx) -> Vec<Instr> {
    match lit {
        Lit::Bool(b) => vec![
            Instr::LocalGet(scrutinee_local),
            Instr::I32Const(i32::from(*b)),
            Instr::I32Eq,
        ],
        Lit::Char(c) => vec![
            Instr::LocalGet(scrutinee_local),
            Instr::I32Const(crate::numerics::char_to_tagged_word(*c) as i32),
            Instr::I32Eq,
        ],
        Lit::Null => vec![
            Instr::LocalGet(scrutinee_local),
            Instr::I32Const(crate::heap_model::Scalar::null().0),
            Instr::I32Eq,
        ],
        // `Int`/`Text`/`Blob` literal equality dispatches to an RTS compare
        // helper since both compact-scalar and boxed representations are
        // possible at the point a pattern is compiled (§4.3, §4.9).
        Lit::Int(_) | Lit::Text(_) | Lit::Blob(_) => {
            vec![Instr::LocalGet(scrutinee_local), Instr::CallImport("deep_eq_literal")]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wild_binds_nothing_and_cannot_fail() {
        let env = VarEnv::new();
        let result = compile_pattern(&Pat::Wild, LocalIdx(0), &env);
        assert!(!result.can_fail());
    }

    #[test]
    fn var_binds_and_cannot_fail() {
        let env = VarEnv::new();
        let result = compile_pattern(&Pat::Var("x".into()), LocalIdx(1), &env);
        assert!(!result.can_fail());
        assert!(matches!(result.env().lookup_var("x"), Some(VarLoc::Local(LocalIdx(1)))));
    }

    #[test]
    fn literal_pattern_can_fail() {
        let env = VarEnv::new();
        let result = compile_pattern(&Pat::Lit(Lit::Bool(true)), LocalIdx(0), &env);
        assert!(result.can_fail());
    }

    #[test]
    fn tuple_of_vars_cannot_fail() {
        let env = VarEnv::new();
        let pat = Pat::Tuple(vec![Pat::Var("a".into()), Pat::Var("b".into())]);
        let result = compile_pattern(&pat, LocalIdx(0), &env);
        assert!(!result.can_fail());
        assert!(result.env().lookup_var("a").is_some());
        assert!(result.env().lookup_var("b").is_some());
    }

    #[test]
    fn tuple_with_a_literal_element_can_fail() {
        let env = VarEnv::new();
        let pat = Pat::Tuple(vec![Pat::Lit(Lit::Bool(true)), Pat::Var("b".into())]);
        let result = compile_pattern(&pat, LocalIdx(0), &env);
        assert!(result.can_fail());
    }

    #[test]
    fn option_pattern_can_fail_and_binds_payload() {
        let env = VarEnv::new();
        let pat = Pat::Option(Box::new(Pat::Var("x".into())));
        let result = compile_pattern(&pat, LocalIdx(0), &env);
        assert!(result.can_fail());
        assert!(result.env().lookup_var("x").is_some());
    }

    #[test]
    fn variant_pattern_can_fail() {
        let env = VarEnv::new();
        let pat = Pat::Variant("ok".into(), Box::new(Pat::Wild));
        let result = compile_pattern(&pat, LocalIdx(0), &env);
        assert!(result.can_fail());
    }
}
