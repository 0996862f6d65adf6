//! The dispatch loop.
//!
//! One frame per applied closure: arguments sit at the frame base with
//! locals right above them and the working area on top. Errors unwind the
//! frame (the stack is truncated back to the frame base) and propagate to
//! the caller.

use std::sync::Arc;

use bytecode::{BytecodeDecoder, Instruction};

use crate::code::{Capture, EachOp, Fun};
use crate::error::{wrong_type, Error, Result};
use crate::list::List;
use crate::thread::Thread;
use crate::value::{V, Z};

/// Apply a value: closures and primitives run, an each-op maps, anything
/// else is pushed back as data.
pub fn apply(th: &mut Thread, v: &V) -> Result<()> {
    match v {
        V::Fun(f) => run_fun(th, f),
        V::Prim(p) => crate::prims::apply_prim(th, p),
        V::Each(e) => crate::each::apply_each(th, e),
        other => th.push(other.clone()),
    }
}

/// Send the result of a keyed lookup back to its receiver: callables run
/// with the receiver as their first argument, data is just produced.
pub fn msg_send(th: &mut Thread, receiver: V, found: &V) -> Result<()> {
    if found.is_callable() {
        th.push(receiver)?;
        apply(th, found)
    } else {
        th.push(found.clone())
    }
}

pub fn run_fun(th: &mut Thread, fun: &Arc<Fun>) -> Result<()> {
    let num_args = fun.def.num_args as usize;
    let num_locals = fun.def.num_locals as usize;
    if th.stack_depth() < num_args {
        return Err(Error::StackUnderflow);
    }
    let frame_base = th.stack_depth() - num_args;
    for _ in 0..num_locals {
        th.push(V::default())?;
    }

    match exec(th, fun, frame_base) {
        Ok(()) => {
            th.drain_frame(frame_base, frame_base + num_args + num_locals);
            Ok(())
        }
        Err(e) => {
            th.truncate(frame_base);
            Err(e)
        }
    }
}

fn exec(th: &mut Thread, fun: &Arc<Fun>, frame_base: usize) -> Result<()> {
    let code = fun.def.code.clone();
    let mut d = BytecodeDecoder::new(&code.bytes);

    while let Some(instr) = d.decode_next() {
        match instr {
            Instruction::PushLiteral { idx } => {
                th.push(code.literal(idx).clone())?;
            }
            Instruction::PushSmi { value } => {
                th.push(V::Real(value as Z))?;
            }
            Instruction::LoadLocal { slot } => {
                let v = th.stack[frame_base + slot as usize].clone();
                th.push(v)?;
            }
            Instruction::StoreLocal { slot } => {
                let v = th.pop()?;
                th.stack[frame_base + slot as usize] = v;
            }
            Instruction::LoadVar { idx } => {
                th.push(fun.var(idx))?;
            }
            Instruction::StoreVar { idx } => {
                let v = th.pop()?;
                fun.set_var(idx, v);
            }
            Instruction::CallWord { name_idx } => {
                let key = code.literal(name_idx);
                let found = lookup(th, fun, key)?;
                if found.is_callable() {
                    apply(th, &found)?;
                } else {
                    th.push(found)?;
                }
            }
            Instruction::LoadScope { name_idx } => {
                let key = code.literal(name_idx);
                let found = lookup(th, fun, key)?;
                th.push(found)?;
            }
            Instruction::Call => {
                let v = th.pop()?;
                apply(th, &v)?;
            }
            Instruction::CallPrim { idx } => {
                let V::Prim(p) = code.literal(idx) else {
                    return Err(wrong_type(
                        "call",
                        "Prim",
                        code.literal(idx).type_name(),
                    ));
                };
                let p = p.clone();
                crate::prims::apply_prim(th, &p)?;
            }
            Instruction::Return => return Ok(()),
            Instruction::Jump { offset } => {
                d.advance(offset);
            }
            Instruction::JumpIfFalse { offset } => {
                let v = th.pop()?;
                if !v.is_true() {
                    d.advance(offset);
                }
            }
            Instruction::MakeClosure { fundef_idx } => {
                let V::FunDef(def) = code.literal(fundef_idx) else {
                    return Err(wrong_type(
                        "closure",
                        "FunDef",
                        code.literal(fundef_idx).type_name(),
                    ));
                };
                let vars: Vec<V> = def
                    .captures
                    .iter()
                    .map(|cap| match cap {
                        Capture::Local(i) => {
                            th.stack[frame_base + *i as usize].clone()
                        }
                        Capture::Var(i) => fun.var(*i),
                    })
                    .collect();
                let closure = Fun::new(def.clone(), vars, fun.scope.clone());
                th.push(V::Fun(closure))?;
            }
            Instruction::MakeEach { mask } => {
                let v = th.pop()?;
                th.push(V::Each(EachOp::new(v, mask as u32)))?;
            }
            Instruction::Dot { name_idx } => {
                let key = code.literal(name_idx).clone();
                let receiver = th.pop()?;
                let found = receiver.must_get(th, &key)?;
                msg_send(th, receiver, &found)?;
            }
            Instruction::Comma { name_idx } => {
                let key = code.literal(name_idx).clone();
                let receiver = th.pop()?;
                let found = receiver.must_get(th, &key)?;
                th.push(found)?;
            }
            Instruction::NewList { n } => {
                let items = th.pop_n(n as usize)?;
                th.push(make_list(items))?;
            }
            Instruction::Dup => {
                let v = th.top()?.clone();
                th.push(v)?;
            }
            Instruction::Swap => {
                let b = th.pop()?;
                let a = th.pop()?;
                th.push(b)?;
                th.push(a)?;
            }
            Instruction::DropTop => {
                th.pop()?;
            }
            Instruction::Rot => {
                let c = th.pop()?;
                let b = th.pop()?;
                let a = th.pop()?;
                th.push(b)?;
                th.push(c)?;
                th.push(a)?;
            }
        }
    }
    Ok(())
}

/// Resolve a free word: the closure's lexical scope chain first, then the
/// engine workspace.
fn lookup(th: &Thread, fun: &Arc<Fun>, key: &V) -> Result<V> {
    if let Some(scope) = &fun.scope {
        if let Some(v) = scope.get(key) {
            return Ok(v);
        }
    }
    th.engine().workspace().must_get(key)
}

/// Build a literal list: all-scalar contents pack into a signal list,
/// anything else stays boxed.
pub fn make_list(items: Vec<V>) -> V {
    if items.iter().all(|v| v.is_real()) {
        let zs: Vec<Z> = items.iter().map(|v| v.as_float()).collect();
        V::List(List::from_zs(zs))
    } else {
        V::List(List::from_vs(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code::{Code, FunDef};
    use crate::engine::test_thread;
    use bytecode::BytecodeBuilder;

    fn fun_from(
        b: BytecodeBuilder,
        literals: Vec<V>,
        num_args: u16,
        captures: Vec<Capture>,
        vars: Vec<V>,
    ) -> Arc<Fun> {
        let def = Arc::new(FunDef {
            code: Code::new(b.into_bytes(), literals),
            arg_names: Vec::new(),
            num_args,
            num_locals: 0,
            leaves: 1,
            captures,
            help: None,
        });
        Fun::new(def, vars, None)
    }

    #[test]
    fn push_pop_round_trip() {
        let mut th = test_thread();
        th.push(V::Real(42.0)).unwrap();
        assert_eq!(th.stack_depth(), 1);
        let v = th.pop().unwrap();
        assert!(v.is_real());
        assert_eq!(v.as_float(), 42.0);
        assert_eq!(th.stack_depth(), 0);
    }

    #[test]
    fn pop_empty_stack_underflows() {
        let mut th = test_thread();
        assert!(matches!(th.pop(), Err(Error::StackUnderflow)));
    }

    #[test]
    fn scalar_addition() {
        let mut th = test_thread();
        let v = th.eval("10 20 +").unwrap();
        assert_eq!(v.as_float(), 30.0);
    }

    #[test]
    fn arithmetic_chains() {
        let mut th = test_thread();
        // (2 + 3) * (7 - 2)
        assert_eq!(th.eval("2 3 + 7 2 - *").unwrap().as_float(), 25.0);
        assert_eq!(th.eval("16 sqrt -9 abs +").unwrap().as_float(), 13.0);
    }

    #[test]
    fn division_by_zero_yields_infinity() {
        let mut th = test_thread();
        assert!(th.eval("1 0 /").unwrap().as_float().is_infinite());
    }

    #[test]
    fn local_bindings() {
        let mut th = test_thread();
        assert_eq!(th.eval("42 = x x").unwrap().as_float(), 42.0);
        assert_eq!(th.eval("10 = x 20 = y x y +").unwrap().as_float(), 30.0);
    }

    #[test]
    fn lambda_application() {
        let mut th = test_thread();
        assert_eq!(th.eval("5 \\x [x x +] !").unwrap().as_float(), 10.0);
        assert_eq!(th.eval("5 \\x [x x *] !").unwrap().as_float(), 25.0);
        assert_eq!(th.eval("3 4 \\x y [x y +] !").unwrap().as_float(), 7.0);
    }

    #[test]
    fn closure_captures_by_value() {
        let mut th = test_thread();
        let v = th
            .eval("10 = base \\x [x base +] = f 5 f !")
            .unwrap();
        assert_eq!(v.as_float(), 15.0);
    }

    #[test]
    fn conditional_execution() {
        let mut th = test_thread();
        assert_eq!(th.eval("1 \\[42] \\[99] if").unwrap().as_float(), 42.0);
        assert_eq!(th.eval("0 \\[42] \\[99] if").unwrap().as_float(), 99.0);
    }

    #[test]
    fn stack_words() {
        let mut th = test_thread();
        assert_eq!(th.eval("1 2 pop").unwrap().as_float(), 1.0);
        th.clear_stack();
        th.run("7 aa +").unwrap();
        assert_eq!(th.pop().unwrap().as_float(), 14.0);
        th.clear_stack();
        th.run("1 2 ba").unwrap();
        assert_eq!(th.pop().unwrap().as_float(), 1.0);
        assert_eq!(th.pop().unwrap().as_float(), 2.0);
    }

    #[test]
    fn list_literal_of_scalars_is_zlist() {
        let mut th = test_thread();
        let v = th.eval("[1 2 3]").unwrap();
        assert!(v.is_zlist());
        assert!(v.is_finite());
    }

    #[test]
    fn nested_list_literal_is_vlist() {
        let mut th = test_thread();
        let v = th.eval("[[1 2] [3 4]]").unwrap();
        assert!(v.is_vlist());
    }

    #[test]
    fn fold_scan_adverbs() {
        let mut th = test_thread();
        assert_eq!(th.eval("[1 2 3 4] +/").unwrap().as_float(), 10.0);
        let v = th.eval("[1 2 3 4] +\\").unwrap();
        assert!(v.is_list());
    }

    #[test]
    fn unknown_word_is_not_found() {
        let mut th = test_thread();
        assert!(matches!(
            th.eval("no_such_word_anywhere"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn error_unwinds_frame() {
        let mut th = test_thread();
        let before = th.stack_depth();
        assert!(th.run("1 2 no_such_word_anywhere").is_err());
        assert_eq!(th.stack_depth(), before);
    }

    #[test]
    fn quotation_pushes_a_fun() {
        let mut th = test_thread();
        let v = th.eval("\\x [x]").unwrap();
        assert!(v.is_fun());
        assert_eq!(v.takes(), 1);
    }

    #[test]
    fn string_literal_evaluates_to_string() {
        let mut th = test_thread();
        let v = th.eval("\"hello\"").unwrap();
        assert!(v.is_str());
    }

    #[test]
    fn global_definition_via_def() {
        let mut th = test_thread();
        th.run("42 'answer def").unwrap();
        assert_eq!(th.eval("answer").unwrap().as_float(), 42.0);
    }

    #[test]
    fn forward_jumps_select_a_branch() {
        let mut th = test_thread();
        let mut b = BytecodeBuilder::new();
        b.load_local(0);
        let else_branch = b.jump_if_false();
        b.push_smi(11);
        let end = b.jump();
        b.bind(else_branch);
        b.push_smi(22);
        b.bind(end);
        b.return_();
        let fun = fun_from(b, Vec::new(), 1, Vec::new(), Vec::new());

        th.push(V::Real(1.0)).unwrap();
        run_fun(&mut th, &fun).unwrap();
        assert_eq!(th.pop().unwrap().as_float(), 11.0);

        th.push(V::Real(0.0)).unwrap();
        run_fun(&mut th, &fun).unwrap();
        assert_eq!(th.pop().unwrap().as_float(), 22.0);
    }

    #[test]
    fn load_scope_pushes_without_applying() {
        let mut th = test_thread();
        let mut b = BytecodeBuilder::new();
        b.load_scope(0);
        b.return_();
        let plus = V::Str(crate::strings::getsym("+"));
        let fun = fun_from(b, vec![plus], 0, Vec::new(), Vec::new());
        run_fun(&mut th, &fun).unwrap();
        let v = th.pop().unwrap();
        assert!(v.is_prim());
    }

    #[test]
    fn closure_vars_load_and_store() {
        let mut th = test_thread();
        let mut b = BytecodeBuilder::new();
        b.push_smi(9);
        b.store_var(0);
        b.load_var(0);
        b.return_();
        let fun = fun_from(
            b,
            Vec::new(),
            0,
            vec![Capture::Local(0)],
            vec![V::Real(0.0)],
        );
        run_fun(&mut th, &fun).unwrap();
        assert_eq!(th.pop().unwrap().as_float(), 9.0);
        assert_eq!(fun.var(0).as_float(), 9.0);
    }

    #[test]
    fn dot_sends_to_receiver() {
        let mut th = test_thread();
        // build a table with `table`, then read a field back with `.`
        th.run("['a 'b] [1 2] table = t t ,a").unwrap();
        assert_eq!(th.pop().unwrap().as_float(), 1.0);
    }
}
