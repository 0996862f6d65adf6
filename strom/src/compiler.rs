//! AST to bytecode.
//!
//! Locals (`= name` bindings and lambda arguments) are resolved to frame
//! slots at compile time. A name defined in an enclosing function body
//! becomes a captured closure variable, threaded transitively through
//! intermediate lambdas. Free words are left to runtime scope lookup.

use std::sync::Arc;

use bytecode::BytecodeBuilder;
use parser::{Node, NodeKind};

use crate::code::{Capture, Code, Fun, FunDef, Prim};
use crate::error::{Error, Result};
use crate::ops::{self, OpRef};
use crate::strings::getsym;
use crate::value::V;

enum Slot {
    Local(u16),
    Var(u16),
}

struct FnFrame {
    b: BytecodeBuilder,
    literals: Vec<V>,
    /// Argument names followed by local names; index = frame slot.
    names: Vec<String>,
    num_args: usize,
    captures: Vec<(String, Capture)>,
}

impl FnFrame {
    fn new(args: &[String]) -> FnFrame {
        FnFrame {
            b: BytecodeBuilder::new(),
            literals: Vec::new(),
            names: args.to_vec(),
            num_args: args.len(),
            captures: Vec::new(),
        }
    }

    fn add_literal(&mut self, v: V) -> u16 {
        let idx = self.literals.len();
        assert!(idx <= u16::MAX as usize, "literal pool overflow");
        self.literals.push(v);
        idx as u16
    }
}

pub struct Compiler {
    frames: Vec<FnFrame>,
}

/// Compile a parsed program into a zero-argument closure.
pub fn compile_program(nodes: &[Node]) -> Result<Arc<Fun>> {
    let mut c = Compiler { frames: Vec::new() };
    let def = c.compile_fun(&[], nodes)?;
    Ok(Fun::new(def, Vec::new(), None))
}

impl Compiler {
    fn compile_fun(
        &mut self,
        args: &[String],
        body: &[Node],
    ) -> Result<Arc<FunDef>> {
        self.frames.push(FnFrame::new(args));
        for node in body {
            self.emit(node)?;
        }
        let mut frame = self.frames.pop().expect("frame just pushed");
        frame.b.return_();

        let arg_names = args.iter().map(|a| getsym(a)).collect();
        let num_locals = frame.names.len() - frame.num_args;
        Ok(Arc::new(FunDef {
            code: Code::new(frame.b.into_bytes(), frame.literals),
            arg_names,
            num_args: frame.num_args as u16,
            num_locals: num_locals as u16,
            leaves: 1,
            captures: frame.captures.into_iter().map(|(_, c)| c).collect(),
            help: None,
        }))
    }

    fn top(&mut self) -> &mut FnFrame {
        self.frames.last_mut().expect("inside a function")
    }

    /// Resolve a name in frame `fi`, adding transitive captures through
    /// intermediate frames as needed.
    fn resolve(&mut self, fi: usize, name: &str) -> Option<Slot> {
        if let Some(pos) =
            self.frames[fi].names.iter().position(|n| n == name)
        {
            return Some(Slot::Local(pos as u16));
        }
        if let Some(pos) = self.frames[fi]
            .captures
            .iter()
            .position(|(n, _)| n == name)
        {
            return Some(Slot::Var(pos as u16));
        }
        if fi == 0 {
            return None;
        }
        let outer = self.resolve(fi - 1, name)?;
        let capture = match outer {
            Slot::Local(i) => Capture::Local(i),
            Slot::Var(i) => Capture::Var(i),
        };
        let frame = &mut self.frames[fi];
        let idx = frame.captures.len() as u16;
        frame.captures.push((name.to_owned(), capture));
        Some(Slot::Var(idx))
    }

    fn emit(&mut self, node: &Node) -> Result<()> {
        match &node.kind {
            NodeKind::Real(f) => {
                let frame = self.top();
                if f.fract() == 0.0
                    && *f >= i32::MIN as f64
                    && *f <= i32::MAX as f64
                {
                    frame.b.push_smi(*f as i32);
                } else {
                    let idx = frame.add_literal(V::Real(*f));
                    frame.b.push_literal(idx);
                }
            }
            NodeKind::Str(s) | NodeKind::Symbol(s) => {
                let lit = V::Str(getsym(s));
                let frame = self.top();
                let idx = frame.add_literal(lit);
                frame.b.push_literal(idx);
            }
            NodeKind::Word(w) => {
                let fi = self.frames.len() - 1;
                match self.resolve(fi, w) {
                    Some(Slot::Local(slot)) => self.top().b.load_local(slot),
                    Some(Slot::Var(idx)) => self.top().b.load_var(idx),
                    None => {
                        let lit = V::Str(getsym(w));
                        let frame = self.top();
                        let idx = frame.add_literal(lit);
                        frame.b.call_word(idx);
                    }
                }
            }
            NodeKind::Bind(name) => {
                // a rebinding in the same frame reuses its slot; names from
                // enclosing frames are shadowed, not captured
                let frame = self.top();
                let slot = match frame.names.iter().position(|n| n == name) {
                    Some(pos) => pos as u16,
                    None => {
                        let slot = frame.names.len() as u16;
                        frame.names.push(name.clone());
                        slot
                    }
                };
                frame.b.store_local(slot);
            }
            NodeKind::ListLit(items) => {
                for item in items {
                    self.emit(item)?;
                }
                if items.len() > u16::MAX as usize {
                    return Err(Error::Syntax(
                        "list literal too long".to_owned(),
                    ));
                }
                self.top().b.new_list(items.len() as u16);
            }
            NodeKind::Lambda { args, body } => {
                let def = self.compile_fun(args, body)?;
                let frame = self.top();
                let idx = frame.add_literal(V::FunDef(def));
                frame.b.make_closure(idx);
            }
            NodeKind::Fold(op_name) => {
                self.emit_adverb(op_name, "fold", crate::prims::prim_fold)?;
            }
            NodeKind::Scan(op_name) => {
                self.emit_adverb(op_name, "scan", crate::prims::prim_scan)?;
            }
            NodeKind::Pairs(op_name) => {
                self.emit_adverb(op_name, "pairs", crate::prims::prim_pairs)?;
            }
            NodeKind::Each => {
                self.top().b.make_each(0);
            }
            NodeKind::Dot(name) => {
                let lit = V::Str(getsym(name));
                let frame = self.top();
                let idx = frame.add_literal(lit);
                frame.b.dot(idx);
            }
            NodeKind::Comma(name) => {
                let lit = V::Str(getsym(name));
                let frame = self.top();
                let idx = frame.add_literal(lit);
                frame.b.comma(idx);
            }
        }
        Ok(())
    }

    /// Fold/scan/pairs compile to a direct primitive application carrying
    /// the named operator.
    fn emit_adverb(
        &mut self,
        op_name: &str,
        kind: &'static str,
        func: crate::code::PrimFn,
    ) -> Result<()> {
        let Some(op) = ops::find_binary(op_name) else {
            return Err(Error::Syntax(format!(
                "{kind} needs a binary operator, got {op_name:?}"
            )));
        };
        let prim = Prim::with_op(
            kind,
            1,
            1,
            Some("a"),
            "",
            func,
            OpRef::Binary(op),
        );
        let frame = self.top();
        let idx = frame.add_literal(V::Prim(prim));
        frame.b.call_prim(idx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(src: &str) -> Arc<Fun> {
        let nodes = parser::parse(src).expect("parse");
        compile_program(&nodes).expect("compile")
    }

    #[test]
    fn top_level_has_no_args() {
        let fun = compile("1 2 +");
        assert_eq!(fun.def.num_args, 0);
        assert_eq!(fun.def.num_locals, 0);
        assert!(fun.def.captures.is_empty());
    }

    #[test]
    fn bindings_allocate_local_slots() {
        let fun = compile("1 = a 2 = b a b +");
        assert_eq!(fun.def.num_locals, 2);
    }

    #[test]
    fn rebinding_reuses_the_slot() {
        let fun = compile("1 = a 2 = a a");
        assert_eq!(fun.def.num_locals, 1);
    }

    #[test]
    fn lambda_args_are_slots_not_captures() {
        let fun = compile("\\x y [x y +]");
        let V::FunDef(inner) = &fun.def.code.literals[0] else {
            panic!("expected inner fundef literal");
        };
        assert_eq!(inner.num_args, 2);
        assert!(inner.captures.is_empty());
    }

    #[test]
    fn free_outer_local_becomes_capture() {
        let fun = compile("10 = base \\x [x base +]");
        let def = &fun.def;
        let inner = def
            .code
            .literals
            .iter()
            .find_map(|v| match v {
                V::FunDef(d) => Some(d.clone()),
                _ => None,
            })
            .expect("inner fundef");
        assert_eq!(inner.captures, vec![Capture::Local(0)]);
    }

    #[test]
    fn nested_capture_threads_through_middle_frame() {
        let fun = compile("1 = a \\[ \\[ a ] ]");
        let outer = fun
            .def
            .code
            .literals
            .iter()
            .find_map(|v| match v {
                V::FunDef(d) => Some(d.clone()),
                _ => None,
            })
            .expect("outer lambda");
        // the middle lambda captures `a` from the top-level frame ...
        assert_eq!(outer.captures, vec![Capture::Local(0)]);
        let inner = outer
            .code
            .literals
            .iter()
            .find_map(|v| match v {
                V::FunDef(d) => Some(d.clone()),
                _ => None,
            })
            .expect("inner lambda");
        // ... and the innermost captures it from the middle's vars
        assert_eq!(inner.captures, vec![Capture::Var(0)]);
    }

    #[test]
    fn unknown_fold_operator_is_a_syntax_error() {
        let nodes = parser::parse("[1 2] zz/").expect("parse");
        assert!(matches!(
            compile_program(&nodes),
            Err(Error::Syntax(_))
        ));
    }

    #[test]
    fn decompile_renders_instructions() {
        let fun = compile("1 2 +");
        let text = fun.def.code.decompile();
        assert!(text.contains("PushSmi 1"));
        assert!(text.contains("CallWord"));
        assert!(text.contains("Return"));
    }
}
