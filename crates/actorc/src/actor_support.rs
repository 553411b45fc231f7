//! Actor and message lowering: exported entry points, async call/reply/reject,
//! and the closure-table continuation mechanism (§4.11).
//!
//! Grounded on `module_env.rs`'s `built_in` registry for the shared reply/
//! reject callback bodies (one per callee type, materialised lazily the first
//! time a call site needs it — the same Pending/Defined lifecycle already
//! used for ordinary built-ins) and on `closures.rs`'s closure layout for how
//! a continuation pair is packaged before being handed to the closure table.

use crate::{
    instr::{FuncIdx, Instr},
    ir::{Control, MessageMode, Sharing},
};

/// A handle into the closure table: a small integer identifying a stored
/// closure (or continuation pair) across a message boundary (§4.11).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosureHandle(pub u32);

/// The name this backend exports continuation dispatch under; the source
/// language's own `async { ... }` desugaring issues a self-call here with a
/// closure handle argument to get deferred execution (§4.11).
pub const ASYNC_HELPER_EXPORT_NAME: &str = "__async_continuation_helper";

pub const INIT_EXPORT_NAME: &str = "canister_init";

/// The Wasm export name for one public actor field, derived from its sharing
/// annotation (§4.11: `"canister_update <field>"` / `"canister_query <field>"`).
#[must_use]
pub fn export_name(field: &str, sharing: Sharing) -> String {
    match sharing {
        Sharing::Shared(Control::Oneway) | Sharing::Shared(Control::Returns) => {
            format!("{} {field}", mode_for(sharing).export_prefix())
        }
        Sharing::Local => unreachable!("only shared fields are exported as actor methods"),
    }
}

fn mode_for(sharing: Sharing) -> MessageMode {
    // Oneway methods still run in write mode: they may still mutate actor
    // state even though they never reply with a value (§4.11, §5).
    match sharing {
        Sharing::Shared(_) => MessageMode::Update,
        Sharing::Local => MessageMode::Query,
    }
}

trait ExportPrefix {
    fn export_prefix(self) -> &'static str;
}
impl ExportPrefix for MessageMode {
    fn export_prefix(self) -> &'static str {
        match self {
            MessageMode::Update => "canister_update",
            MessageMode::Query => "canister_query",
        }
    }
}

/// Emits the body of one exported actor method (§4.11 steps 1-5).
///
/// `deserialize_args` produces the method's parameter values on the stack;
/// `bind_params` moves them into fresh locals; `body` is the already-compiled
/// method body; `reply_with_result` runs after `body` and is responsible for
/// serializing and replying with whatever `body` left on the stack (empty for
/// oneway methods, which reply empty via `reply_empty_first` before `body`
/// even runs so the caller is unblocked immediately).
#[must_use]
pub fn emit_message_entry(
    mode: MessageMode,
    reply_empty_first: bool,
    deserialize_args: Vec<Instr>,
    bind_params: Vec<Instr>,
    body: Vec<Instr>,
    reply_with_result: Vec<Instr>,
) -> Vec<Instr> {
    let mut code = Vec::new();
    if reply_empty_first {
        code.push(Instr::CallImport("msg_reply"));
    }
    code.extend(deserialize_args);
    code.extend(bind_params);
    code.extend(body);
    code.extend(reply_with_result);
    if crate::gc::gc_runs_for(mode) {
        code.push(Instr::CallImport("run_gc"));
    }
    code
}

/// Emits the `canister_init` export: run the module's start function, then
/// collect (§4.11: "invokes the module start function then triggers a GC cycle").
#[must_use]
pub fn emit_init_export(start_fn: FuncIdx) -> Vec<Instr> {
    vec![Instr::Call(start_fn), Instr::CallImport("run_gc")]
}

/// Packages a reply continuation and a reject continuation as a two-element
/// array and stores it in the closure table, returning its handle (§4.11).
#[must_use]
pub fn emit_store_continuation_pair() -> Vec<Instr> {
    // Caller has already pushed the reply closure and the reject closure.
    let mut code = crate::values::emit_make_array_from_stack(2);
    code.push(Instr::CallImport("remember_closure"));
    code
}

/// Emits the `call_simple` system-call sequence for an asynchronous call
/// (§4.11): callee/method as pointer+length, the shared reply and reject
/// callback function indices parameterised by `callee_type_key`, the
/// continuation handle, and the already-serialised argument data.
#[must_use]
pub fn emit_call_simple(reply_callback: FuncIdx, reject_callback: FuncIdx, handle: ClosureHandle) -> Vec<Instr> {
    vec![
        // callee pointer+length, method pointer+length already on the stack.
        Instr::I32Const(reply_callback.0 as i32),
        Instr::I32Const(handle.0 as i32),
        Instr::I32Const(reject_callback.0 as i32),
        Instr::I32Const(handle.0 as i32),
        // serialised argument blob pointer+length already on the stack.
        Instr::CallImport("call_simple"),
    ]
}

/// Builds the shared reply-callback body for one callee type, keyed so every
/// call site targeting the same reply-value shape reuses one function rather
/// than emitting a fresh copy (§4.11, mirrors `module_env::built_in`'s
/// dedup-by-key convention).
#[must_use]
pub fn emit_reply_callback_body(handle_local: crate::instr::LocalIdx, deserialize_reply: Vec<Instr>) -> Vec<Instr> {
    let mut code = vec![
        Instr::LocalGet(handle_local),
        Instr::CallImport("recall_closure"),
        Instr::I32Const(0), // project the reply component (array index 0)
        Instr::CallImportIndexed("read_array_field", 0),
    ];
    code.extend(deserialize_reply);
    code.push(Instr::CallImport("closure_call_no_args"));
    code.push(Instr::CallImport("run_gc"));
    code
}

/// Builds the shared reject-callback body: recalls the pair, projects the
/// reject continuation, constructs a synthetic `(#system, code, message)`
/// error value, invokes, and collects (§4.11, §4.12).
#[must_use]
pub fn emit_reject_callback_body(handle_local: crate::instr::LocalIdx) -> Vec<Instr> {
    vec![
        Instr::LocalGet(handle_local),
        Instr::CallImport("recall_closure"),
        Instr::CallImportIndexed("read_array_field", 1),
        Instr::CallImport("make_system_error_value"),
        Instr::CallImport("closure_call_no_args"),
        Instr::CallImport("run_gc"),
    ]
}

/// A one-shot (fire-and-forget) call uses a callback that recalls and drops
/// the continuation without invoking it (§4.11: "one-shot calls use an
/// ignoring callback").
#[must_use]
pub fn emit_ignoring_callback_body(handle_local: crate::instr::LocalIdx) -> Vec<Instr> {
    vec![
        Instr::LocalGet(handle_local),
        Instr::CallImport("recall_closure"),
        Instr::Drop,
    ]
}

/// Emits the body of the `__async_continuation_helper` export itself (§4.11):
/// accepts a closure handle, recalls it, calls it with no arguments, collects.
#[must_use]
pub fn emit_async_helper_body(handle_local: crate::instr::LocalIdx) -> Vec<Instr> {
    vec![
        Instr::LocalGet(handle_local),
        Instr::CallImport("recall_closure"),
        Instr::CallImport("closure_call_no_args"),
        Instr::CallImport("run_gc"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instr::LocalIdx;

    #[test]
    fn update_export_name_matches_convention() {
        assert_eq!(
            export_name("inc", Sharing::Shared(Control::Returns)),
            "canister_update inc"
        );
    }

    #[test]
    fn oneway_is_still_update_mode() {
        assert_eq!(mode_for(Sharing::Shared(Control::Oneway)), MessageMode::Update);
    }

    #[test]
    fn reply_empty_is_emitted_first_for_oneway() {
        let code = emit_message_entry(MessageMode::Update, true, vec![], vec![], vec![], vec![]);
        assert_eq!(code[0], Instr::CallImport("msg_reply"));
    }

    #[test]
    fn query_mode_entry_never_calls_gc() {
        let code = emit_message_entry(MessageMode::Query, false, vec![], vec![], vec![Instr::Nop], vec![]);
        assert!(!code.contains(&Instr::CallImport("run_gc")));
    }

    #[test]
    fn update_mode_entry_runs_gc() {
        let code = emit_message_entry(MessageMode::Update, false, vec![], vec![], vec![Instr::Nop], vec![]);
        assert!(code.contains(&Instr::CallImport("run_gc")));
    }

    #[test]
    fn reply_with_result_runs_after_body_before_gc() {
        let code = emit_message_entry(
            MessageMode::Update,
            false,
            vec![],
            vec![],
            vec![Instr::Nop],
            vec![Instr::CallImport("msg_reply")],
        );
        let body_pos = code.iter().position(|i| *i == Instr::Nop).unwrap();
        let reply_pos = code.iter().position(|i| *i == Instr::CallImport("msg_reply")).unwrap();
        let gc_pos = code.iter().position(|i| *i == Instr::CallImport("run_gc")).unwrap();
        assert!(body_pos < reply_pos && reply_pos < gc_pos);
    }

    #[test]
    fn init_export_runs_start_then_gc() {
        let code = emit_init_export(FuncIdx(3));
        assert_eq!(code, vec![Instr::Call(FuncIdx(3)), Instr::CallImport("run_gc")]);
    }

    #[test]
    fn ignoring_callback_drops_without_invoking() {
        let code = emit_ignoring_callback_body(LocalIdx(0));
        assert!(!code.contains(&Instr::CallImport("closure_call_no_args")));
    }

    #[test]
    fn async_helper_body_invokes_and_collects() {
        let code = emit_async_helper_body(LocalIdx(0));
        assert!(code.contains(&Instr::CallImport("closure_call_no_args")));
        assert!(code.contains(&Instr::CallImport("run_gc")));
    }
}
