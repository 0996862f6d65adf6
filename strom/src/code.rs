//! Compiled code and the callable kinds: closures, primitives, each-ops.

use std::sync::Arc;

use bytecode::BytecodeDecoder;
use parking_lot::Mutex;

use crate::error::Result;
use crate::ops::OpRef;
use crate::strings::Str;
use crate::table::Form;
use crate::thread::Thread;
use crate::value::V;

/// A dense instruction stream plus its literal pool.
#[derive(Debug)]
pub struct Code {
    pub bytes: Vec<u8>,
    pub literals: Vec<V>,
}

impl Code {
    pub fn new(bytes: Vec<u8>, literals: Vec<V>) -> Arc<Code> {
        Arc::new(Code { bytes, literals })
    }

    pub fn literal(&self, idx: u16) -> &V {
        &self.literals[idx as usize]
    }

    /// Render the instruction stream for debugging.
    pub fn decompile(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let mut d = BytecodeDecoder::new(&self.bytes);
        loop {
            let offset = d.offset();
            match d.decode_next() {
                Some(instr) => {
                    let _ = writeln!(out, "{offset:4}  {instr}");
                }
                None => break,
            }
        }
        out
    }
}

/// Where a captured closure variable comes from at closure-creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capture {
    /// A slot of the creating frame.
    Local(u16),
    /// A captured variable of the creating closure.
    Var(u16),
}

/// A compiled function definition: code plus arity metadata.
#[derive(Debug)]
pub struct FunDef {
    pub code: Arc<Code>,
    pub arg_names: Vec<Arc<Str>>,
    pub num_args: u16,
    pub num_locals: u16,
    pub leaves: u16,
    pub captures: Vec<Capture>,
    pub help: Option<Arc<Str>>,
}

impl FunDef {
    pub fn num_vars(&self) -> u16 {
        self.captures.len() as u16
    }
}

/// A runtime closure: a definition, its captured variable values, and its
/// lexical parent scope.
#[derive(Debug)]
pub struct Fun {
    pub def: Arc<FunDef>,
    pub vars: Mutex<Vec<V>>,
    pub scope: Option<Arc<Form>>,
}

impl Fun {
    pub fn new(
        def: Arc<FunDef>,
        vars: Vec<V>,
        scope: Option<Arc<Form>>,
    ) -> Arc<Fun> {
        debug_assert_eq!(vars.len(), def.captures.len());
        Arc::new(Fun {
            def,
            vars: Mutex::new(vars),
            scope,
        })
    }

    pub fn var(&self, idx: u16) -> V {
        self.vars.lock()[idx as usize].clone()
    }

    pub fn set_var(&self, idx: u16, v: V) {
        self.vars.lock()[idx as usize] = v;
    }
}

pub type PrimFn = fn(&mut Thread, &Arc<Prim>) -> Result<()>;

/// A built-in function.
pub struct Prim {
    pub name: &'static str,
    pub help: &'static str,
    pub takes: u16,
    pub leaves: u16,
    /// Automap mask, one character per argument in stack order
    /// (deepest first): `a` as-is, `z` map over value lists,
    /// `k` map over all lists. `None` disables automapping entirely.
    pub mask: Option<&'static str>,
    pub func: PrimFn,
    /// Operator payload for arithmetic primitives.
    pub op: Option<OpRef>,
}

impl Prim {
    pub fn new(
        name: &'static str,
        takes: u16,
        leaves: u16,
        mask: Option<&'static str>,
        help: &'static str,
        func: PrimFn,
    ) -> Arc<Prim> {
        Arc::new(Prim {
            name,
            help,
            takes,
            leaves,
            mask,
            func,
            op: None,
        })
    }

    pub fn with_op(
        name: &'static str,
        takes: u16,
        leaves: u16,
        mask: Option<&'static str>,
        help: &'static str,
        func: PrimFn,
        op: OpRef,
    ) -> Arc<Prim> {
        Arc::new(Prim {
            name,
            help,
            takes,
            leaves,
            mask,
            func,
            op: Some(op),
        })
    }
}

impl std::fmt::Debug for Prim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Prim({}, takes={}, leaves={})", self.name, self.takes, self.leaves)
    }
}

/// A callable wrapped with an explicit automap mask: applying it maps the
/// inner callable over its list-shaped arguments.
#[derive(Debug)]
pub struct EachOp {
    pub v: V,
    /// One bit per argument, bit i set = map argument i over lists.
    /// Zero means "map every argument".
    pub mask: u32,
}

impl EachOp {
    pub fn new(v: V, mask: u32) -> Arc<EachOp> {
        Arc::new(EachOp { v, mask })
    }

    pub fn maps_arg(&self, i: u16) -> bool {
        self.mask == 0 || (self.mask >> i) & 1 == 1
    }
}
