//! Whole-pipeline scenarios, one per concrete example this backend is meant
//! to handle end to end. Mirrors the teacher's convention of a top-level
//! `tests/` directory for pipeline-wide checks distinct from the per-module
//! `#[cfg(test)]` blocks (`session_manager_tests.rs`'s relationship to
//! `session_manager.rs`'s own inline tests).

use actorc::{
    compile::{CompileOptions, compile_program},
    diag::CompileError,
    host::HostMode,
    instr::Instr,
    ir::{
        ActorDec, BinOp, Dec, DecKind, Exp, ExpKind, FuncDec, Lit, Pat, PrimType, Prog, Sharing, Type,
    },
    serialization::{TypeRef, TypeTableBuilder},
};

fn nat() -> Type {
    Type::Prim(PrimType::Nat)
}

fn int_lit(v: i64) -> Exp {
    Exp {
        kind: ExpKind::Lit(Lit::Int(v.to_string())),
        ty: nat(),
        at: None,
    }
}

fn var(name: &str) -> Exp {
    Exp {
        kind: ExpKind::Var(name.to_owned()),
        ty: nat(),
        at: None,
    }
}

fn binop(op: BinOp, lhs: Exp, rhs: Exp) -> Exp {
    Exp {
        kind: ExpKind::Prim2(op, Box::new(lhs), Box::new(rhs)),
        ty: nat(),
        at: None,
    }
}

/// Scenario 1: `let x = 1; let y = x + 1; x * y + x` compiles without error
/// and produces a non-empty module (the scaled value itself is only visible
/// at runtime; the Wasm binary encoder and executor are both out of scope).
#[test]
fn scenario_one_scalar_arithmetic_compiles() {
    let add = binop(BinOp::Add, var("x"), int_lit(1));
    let mul = binop(BinOp::Mul, var("x"), var("y"));
    let final_exp = binop(BinOp::Add, mul, var("x"));
    let body = Exp {
        kind: ExpKind::Block(
            vec![
                Dec { kind: DecKind::Let(Pat::Var("x".into()), int_lit(1)), at: None },
                Dec { kind: DecKind::Let(Pat::Var("y".into()), add), at: None },
            ],
            Box::new(final_exp),
        ),
        ty: nat(),
        at: None,
    };
    let prog = Prog {
        decs: vec![Dec { kind: DecKind::Let(Pat::Wild, body), at: None }],
    };
    let menv = compile_program(&prog, CompileOptions::default()).expect("scenario 1 should compile");
    assert!(!menv.funcs().is_empty());
    assert!(menv.diagnostics().is_empty(), "no unimplemented shapes expected here");
}

/// Scenario 2: an actor with one public update method backed by a mutable
/// field exports `canister_update inc`.
#[test]
fn scenario_two_actor_exports_update_method() {
    let inc_body = Exp {
        kind: ExpKind::Block(
            vec![Dec {
                kind: DecKind::Let(
                    Pat::Wild,
                    Exp {
                        kind: ExpKind::Assign(
                            Box::new(var("n")),
                            Box::new(binop(BinOp::Add, var("n"), int_lit(1))),
                        ),
                        ty: Type::Tuple(vec![]),
                        at: None,
                    },
                ),
                at: None,
            }],
            Box::new(var("n")),
        ),
        ty: nat(),
        at: None,
    };
    let actor = ActorDec {
        name: "Counter".to_owned(),
        fields: vec![Dec {
            kind: DecKind::Var("n".to_owned(), nat(), int_lit(0)),
            at: None,
        }],
        public: vec![FuncDec {
            name: "inc".to_owned(),
            sharing: Sharing::Shared(actorc::ir::Control::Returns),
            params: vec![],
            param_tys: vec![],
            ret_tys: vec![nat()],
            body: inc_body,
        }],
    };
    let prog = Prog {
        decs: vec![Dec { kind: DecKind::Actor(actor), at: None }],
    };
    let menv = compile_program(&prog, CompileOptions::default()).expect("scenario 2 should compile");
    assert!(menv.funcs().iter().any(|f| f.name == "canister_update inc"));
}

/// Scenario 3: `1 / 0` lowers to the native `i32.div_s` instruction rather
/// than an explicit compiler-emitted zero check — Wasm's own trap semantics
/// cover it.
#[test]
fn scenario_three_division_by_zero_relies_on_native_trap() {
    let prog = Prog {
        decs: vec![Dec {
            kind: DecKind::Let(Pat::Wild, binop(BinOp::Div, int_lit(1), int_lit(0))),
            at: None,
        }],
    };
    let menv = compile_program(&prog, CompileOptions::default()).expect("scenario 3 should compile");
    let start = menv.funcs().iter().find(|f| f.name == "init").unwrap();
    let body = start.body.as_ref().unwrap();
    assert!(body.contains(&Instr::I32DivS));
    assert!(!body.iter().any(|i| matches!(i, Instr::CallImport("trap"))));
}

/// Scenario 4: serializing the tuple `("hello", 42, "world")` of type
/// `(Text, Nat, Text)` produces a header starting with the `DIDL` magic and a
/// single record type-table entry.
#[test]
fn scenario_four_tuple_serialization_header() {
    let tuple_ty = Type::Tuple(vec![
        Type::Prim(PrimType::Text),
        Type::Prim(PrimType::Nat),
        Type::Prim(PrimType::Text),
    ]);
    let mut builder = TypeTableBuilder::new();
    let arg_ref = builder.type_ref(&tuple_ty);
    assert!(matches!(arg_ref, TypeRef::Table(0)));
    let header = actorc::serialization::encode_header(&builder, &[arg_ref]);
    assert!(header.starts_with(&actorc::serialization::MAGIC));
}

/// Scenario 5: `0 - 1` at `Nat` emits the explicit underflow guard (native
/// wrapping subtraction would silently go negative, unlike the trapping
/// semantics `Nat` requires).
#[test]
fn scenario_five_nat_subtraction_underflow_traps() {
    let prog = Prog {
        decs: vec![Dec {
            kind: DecKind::Let(Pat::Wild, binop(BinOp::Sub, int_lit(0), int_lit(1))),
            at: None,
        }],
    };
    let menv = compile_program(&prog, CompileOptions::default()).expect("scenario 5 should compile");
    let start = menv.funcs().iter().find(|f| f.name == "init").unwrap();
    let body = start.body.as_ref().unwrap();
    assert!(body.contains(&Instr::I32LtS));
    assert!(body.iter().any(|i| matches!(i, Instr::CallImport("trap"))));
}

/// Scenario 6: a recursive function compiles through the reserve/fill
/// mutual-recursion path, and its self-call resolves to the same function
/// index every time (closure identity, §8).
#[test]
fn scenario_six_recursive_function_self_call_is_stable() {
    // fac(n) = if n == 0 then 1 else n * fac(n - 1)
    let cond = binop(BinOp::Eq, var("n"), int_lit(0));
    let recurse = Exp {
        kind: ExpKind::Call(
            Box::new(var("fac")),
            vec![binop(BinOp::Sub, var("n"), int_lit(1))],
        ),
        ty: nat(),
        at: None,
    };
    let else_branch = binop(BinOp::Mul, var("n"), recurse);
    let body = Exp {
        kind: ExpKind::If(Box::new(cond), Box::new(int_lit(1)), Box::new(else_branch)),
        ty: nat(),
        at: None,
    };
    let fac = FuncDec {
        name: "fac".to_owned(),
        sharing: Sharing::Local,
        params: vec![Pat::Var("n".into())],
        param_tys: vec![nat()],
        ret_tys: vec![nat()],
        body,
    };
    let prog = Prog {
        decs: vec![Dec { kind: DecKind::Func(fac), at: None }],
    };
    let menv = compile_program(&prog, CompileOptions::default()).expect("scenario 6 should compile");
    let fac_entry = menv.funcs().iter().find(|f| f.name == "fac").unwrap();
    let body = fac_entry.body.as_ref().unwrap();
    // The recursive call is a direct call to fac's own reserved index.
    assert!(body.iter().any(|i| matches!(i, Instr::Call(_))));
}

/// A literal too large for the inline compact-scalar fast path is a
/// recognised limitation, not silent truncation: `compile_program` reports it
/// as `UnrepresentableLiteral` rather than wrapping or panicking.
#[test]
fn oversized_literal_is_reported_not_silently_wrapped() {
    let huge = Exp {
        kind: ExpKind::Lit(Lit::Int("99999999999999999999999999999999999999".to_owned())),
        ty: nat(),
        at: None,
    };
    let prog = Prog {
        decs: vec![Dec { kind: DecKind::Let(Pat::Wild, huge), at: None }],
    };
    let err = compile_program(&prog, CompileOptions::default());
    assert!(matches!(err, Err(CompileError::UnrepresentableLiteral { .. })));
}

#[test]
fn host_mode_defaults_to_ic_catalogue() {
    let prog = Prog::default();
    let menv = compile_program(&prog, CompileOptions { multi_value: false, mode: HostMode::Ic, gc: true }).unwrap();
    assert!(menv.imports().iter().any(|i| i.module == "ic0"));
    assert!(menv.imports().iter().any(|i| i.module == "rts"));
}
