//! Unary and binary operator dispatch.
//!
//! Operators are static descriptors with a scalar kernel plus provided
//! vector loops. Dispatch is per value kind: scalars run the kernel
//! directly, signal lists build lazy combinators that pull both inputs
//! block by block, value lists recurse elementwise, strings get their
//! own per-operator meaning.

use std::sync::Arc;

use crate::array::Array;
use crate::error::{wrong_type, Error, Result};
use crate::input::{VIn, ZIn};
use crate::list::{Gen, List, Pulled, BLOCK_SIZE};
use crate::strings::{getsym, Str};
use crate::thread::Thread;
use crate::value::{ItemKind, V, Z};

pub trait UnaryOpT: Send + Sync {
    fn name(&self) -> &'static str;
    fn z(&self, a: Z) -> Z;

    fn loop_z(&self, a: &[Z], out: &mut [Z]) {
        for (o, &x) in out.iter_mut().zip(a.iter()) {
            *o = self.z(x);
        }
    }
}

pub trait BinaryOpT: Send + Sync {
    fn name(&self) -> &'static str;
    fn zz(&self, a: Z, b: Z) -> Z;

    /// The reduction identity, when the operator has one.
    fn identity(&self) -> Option<Z> {
        None
    }

    fn loop_zz(&self, a: &[Z], b: &[Z], out: &mut [Z]) {
        for i in 0..out.len() {
            out[i] = self.zz(a[i], b[i]);
        }
    }

    /// Per-operator meaning for string pairs.
    fn string_op(&self, _a: &Arc<Str>, _b: &Arc<Str>) -> Result<V> {
        Err(Error::UndefinedOperation(self.name()))
    }
}

/// Operator payload carried by arithmetic primitives.
#[derive(Clone, Copy)]
pub enum OpRef {
    Unary(&'static dyn UnaryOpT),
    Binary(&'static dyn BinaryOpT),
}

impl std::fmt::Debug for OpRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpRef::Unary(op) => write!(f, "OpRef::Unary({})", op.name()),
            OpRef::Binary(op) => write!(f, "OpRef::Binary({})", op.name()),
        }
    }
}

// ── kernel definitions ─────────────────────────────────────────────

macro_rules! def_unary {
    ($ty:ident, $static_name:ident, $opname:literal, $f:expr) => {
        pub struct $ty;
        impl UnaryOpT for $ty {
            fn name(&self) -> &'static str {
                $opname
            }
            fn z(&self, a: Z) -> Z {
                ($f)(a)
            }
        }
        pub static $static_name: $ty = $ty;
    };
}

macro_rules! def_binary {
    ($ty:ident, $static_name:ident, $opname:literal, $f:expr) => {
        def_binary!($ty, $static_name, $opname, $f, None);
    };
    ($ty:ident, $static_name:ident, $opname:literal, $f:expr, $id:expr) => {
        pub struct $ty;
        impl BinaryOpT for $ty {
            fn name(&self) -> &'static str {
                $opname
            }
            fn zz(&self, a: Z, b: Z) -> Z {
                ($f)(a, b)
            }
            fn identity(&self) -> Option<Z> {
                $id
            }
        }
        pub static $static_name: $ty = $ty;
    };
}

def_unary!(OpNeg, NEG, "neg", |a: Z| -a);
def_unary!(OpAbs, ABS, "abs", |a: Z| a.abs());
def_unary!(OpSqrt, SQRT, "sqrt", |a: Z| a.sqrt());
def_unary!(OpExp, EXP, "exp", |a: Z| a.exp());
def_unary!(OpLog, LOG, "log", |a: Z| a.ln());
def_unary!(OpLog2, LOG2, "log2", |a: Z| a.log2());
def_unary!(OpLog10, LOG10, "log10", |a: Z| a.log10());
def_unary!(OpSin, SIN, "sin", |a: Z| a.sin());
def_unary!(OpCos, COS, "cos", |a: Z| a.cos());
def_unary!(OpTan, TAN, "tan", |a: Z| a.tan());
def_unary!(OpAtan, ATAN, "atan", |a: Z| a.atan());
def_unary!(OpFloor, FLOOR, "floor", |a: Z| a.floor());
def_unary!(OpCeil, CEIL, "ceil", |a: Z| a.ceil());
def_unary!(OpRecip, RECIP, "recip", |a: Z| a.recip());

// `+` carries the one string meaning: concatenation.
pub struct OpAdd;
impl BinaryOpT for OpAdd {
    fn name(&self) -> &'static str {
        "+"
    }
    fn zz(&self, a: Z, b: Z) -> Z {
        a + b
    }
    fn identity(&self) -> Option<Z> {
        Some(0.0)
    }
    fn string_op(&self, a: &Arc<Str>, b: &Arc<Str>) -> Result<V> {
        let mut s = String::with_capacity(a.len() + b.len());
        s.push_str(a.as_str());
        s.push_str(b.as_str());
        Ok(V::Str(getsym(&s)))
    }
}
pub static ADD: OpAdd = OpAdd;

def_binary!(OpSub, SUB, "-", |a: Z, b: Z| a - b);
def_binary!(OpMul, MUL, "*", |a: Z, b: Z| a * b, Some(1.0));
def_binary!(OpDiv, DIV, "/", |a: Z, b: Z| a / b);
def_binary!(OpMod, MOD, "%", |a: Z, b: Z| {
    let r = a - b * (a / b).floor();
    r
});
def_binary!(OpPow, POW, "pow", |a: Z, b: Z| a.powf(b));
def_binary!(OpMin, MIN, "&", |a: Z, b: Z| a.min(b));
def_binary!(OpMax, MAX, "|", |a: Z, b: Z| a.max(b));
def_binary!(OpAtan2, ATAN2, "atan2", |a: Z, b: Z| a.atan2(b));
def_binary!(OpEq, EQ, "==", |a: Z, b: Z| (a == b) as i32 as Z);
def_binary!(OpNe, NE, "!=", |a: Z, b: Z| (a != b) as i32 as Z);
def_binary!(OpLt, LT, "<", |a: Z, b: Z| (a < b) as i32 as Z);
def_binary!(OpGt, GT, ">", |a: Z, b: Z| (a > b) as i32 as Z);
def_binary!(OpLe, LE, "<=", |a: Z, b: Z| (a <= b) as i32 as Z);
def_binary!(OpGe, GE, ">=", |a: Z, b: Z| (a >= b) as i32 as Z);

/// Look a binary operator up by its surface name (used by the fold, scan,
/// and pairs adverbs).
pub fn find_binary(name: &str) -> Option<&'static dyn BinaryOpT> {
    Some(match name {
        "+" => &ADD,
        "-" => &SUB,
        "*" => &MUL,
        "/" => &DIV,
        "%" => &MOD,
        "pow" => &POW,
        "&" => &MIN,
        "|" => &MAX,
        "atan2" => &ATAN2,
        "==" => &EQ,
        "!=" => &NE,
        "<" => &LT,
        ">" => &GT,
        "<=" => &LE,
        ">=" => &GE,
        _ => return None,
    })
}

pub fn find_unary(name: &str) -> Option<&'static dyn UnaryOpT> {
    Some(match name {
        "neg" => &NEG,
        "abs" => &ABS,
        "sqrt" => &SQRT,
        "exp" => &EXP,
        "log" => &LOG,
        "log2" => &LOG2,
        "log10" => &LOG10,
        "sin" => &SIN,
        "cos" => &COS,
        "tan" => &TAN,
        "atan" => &ATAN,
        "floor" => &FLOOR,
        "ceil" => &CEIL,
        "recip" => &RECIP,
        _ => return None,
    })
}

// ── lazy combinator generators ─────────────────────────────────────

struct UnaryZGen {
    op: &'static dyn UnaryOpT,
    input: ZIn,
}

impl Gen for UnaryZGen {
    fn name(&self) -> &'static str {
        "unary-z"
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut buf = vec![0.0; BLOCK_SIZE];
        let mut n = BLOCK_SIZE;
        let done = self.input.fill(th, &mut n, &mut buf, 1)?;
        if n == 0 {
            return Ok(Pulled::End);
        }
        buf.truncate(n);
        let mut out = vec![0.0; n];
        self.op.loop_z(&buf, &mut out);
        let array = Array::from_zs(out);
        Ok(if done {
            Pulled::Last(array)
        } else {
            Pulled::Block(array)
        })
    }
}

struct UnaryVGen {
    op: &'static dyn UnaryOpT,
    input: VIn,
}

impl Gen for UnaryVGen {
    fn name(&self) -> &'static str {
        "unary-v"
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut out: Vec<V> = Vec::with_capacity(BLOCK_SIZE);
        let mut ended = false;
        for _ in 0..BLOCK_SIZE {
            let mut item = V::default();
            if self.input.one(th, &mut item)? {
                ended = true;
                break;
            }
            out.push(unary(th, self.op, &item)?);
        }
        if out.is_empty() {
            return Ok(Pulled::End);
        }
        let array = Array::from_vs(out);
        Ok(if ended {
            Pulled::Last(array)
        } else {
            Pulled::Block(array)
        })
    }
}

struct BinaryZGen {
    op: &'static dyn BinaryOpT,
    a: ZIn,
    b: ZIn,
}

impl Gen for BinaryZGen {
    fn name(&self) -> &'static str {
        "binary-z"
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut bufa = vec![0.0; BLOCK_SIZE];
        let mut bufb = vec![0.0; BLOCK_SIZE];
        let mut na = BLOCK_SIZE;
        let da = self.a.fill(th, &mut na, &mut bufa, 1)?;
        let mut nb = na;
        let db = self.b.fill(th, &mut nb, &mut bufb, 1)?;
        let n = na.min(nb);
        if n == 0 {
            return Ok(Pulled::End);
        }
        let mut out = vec![0.0; n];
        self.op.loop_zz(&bufa[..n], &bufb[..n], &mut out);
        let array = Array::from_zs(out);
        Ok(if da || db {
            Pulled::Last(array)
        } else {
            Pulled::Block(array)
        })
    }
}

struct BinaryVGen {
    op: &'static dyn BinaryOpT,
    a: VIn,
    b: VIn,
}

impl Gen for BinaryVGen {
    fn name(&self) -> &'static str {
        "binary-v"
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut out: Vec<V> = Vec::with_capacity(BLOCK_SIZE);
        let mut ended = false;
        for _ in 0..BLOCK_SIZE {
            let mut va = V::default();
            let mut vb = V::default();
            if self.a.one(th, &mut va)? || self.b.one(th, &mut vb)? {
                ended = true;
                break;
            }
            out.push(binary(th, self.op, &va, &vb)?);
        }
        if out.is_empty() {
            return Ok(Pulled::End);
        }
        let array = Array::from_vs(out);
        Ok(if ended {
            Pulled::Last(array)
        } else {
            Pulled::Block(array)
        })
    }
}

struct ScanZGen {
    op: &'static dyn BinaryOpT,
    input: ZIn,
    acc: Option<Z>,
}

impl Gen for ScanZGen {
    fn name(&self) -> &'static str {
        "scan-z"
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut buf = vec![0.0; BLOCK_SIZE];
        let mut n = BLOCK_SIZE;
        let done = self.input.fill(th, &mut n, &mut buf, 1)?;
        if n == 0 {
            return Ok(Pulled::End);
        }
        let mut out = Vec::with_capacity(n);
        for &x in &buf[..n] {
            let next = match self.acc {
                None => x,
                Some(acc) => self.op.zz(acc, x),
            };
            self.acc = Some(next);
            out.push(next);
        }
        let array = Array::from_zs(out);
        Ok(if done {
            Pulled::Last(array)
        } else {
            Pulled::Block(array)
        })
    }
}

struct PairsZGen {
    op: &'static dyn BinaryOpT,
    input: ZIn,
    prev: Option<Z>,
}

impl Gen for PairsZGen {
    fn name(&self) -> &'static str {
        "pairs-z"
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut buf = vec![0.0; BLOCK_SIZE];
        let mut n = BLOCK_SIZE;
        let done = self.input.fill(th, &mut n, &mut buf, 1)?;
        if n == 0 {
            return Ok(Pulled::End);
        }
        let mut out = Vec::with_capacity(n);
        for &x in &buf[..n] {
            let next = match self.prev {
                None => x,
                Some(prev) => self.op.zz(x, prev),
            };
            self.prev = Some(x);
            out.push(next);
        }
        let array = Array::from_zs(out);
        Ok(if done {
            Pulled::Last(array)
        } else {
            Pulled::Block(array)
        })
    }
}

// ── dispatch ───────────────────────────────────────────────────────

/// Apply a unary operator to a value.
pub fn unary(th: &mut Thread, op: &'static dyn UnaryOpT, a: &V) -> Result<V> {
    match a {
        V::Real(z) => Ok(V::Real(op.z(*z))),
        V::Ref(_) | V::ZRef(_) => {
            let d = a.deref();
            unary(th, op, &d)
        }
        V::List(l) => {
            let finite = l.is_finite();
            let gen: Box<dyn Gen> = match l.kind() {
                ItemKind::Z => Box::new(UnaryZGen {
                    op,
                    input: ZIn::from_list(l.clone()),
                }),
                ItemKind::V => {
                    return Ok(V::List(List::from_gen(
                        Box::new(UnaryVGen {
                            op,
                            input: VIn::new(a.clone()),
                        }),
                        ItemKind::V,
                        finite,
                    )));
                }
            };
            Ok(V::List(List::from_gen(gen, ItemKind::Z, finite)))
        }
        other => Err(wrong_type(op.name(), "Real or List", other.type_name())),
    }
}

/// Whether the combination of two stream inputs is bounded: the result
/// ends as soon as either input ends.
fn most_finite(a: &V, b: &V) -> bool {
    let fa = match a {
        V::List(l) => l.is_finite(),
        _ => false, // scalars broadcast; they never shorten
    };
    let fb = match b {
        V::List(l) => l.is_finite(),
        _ => false,
    };
    fa || fb
        || (!matches!(a, V::List(_)) && !matches!(b, V::List(_)))
}

/// Apply a binary operator to a pair of values.
pub fn binary(
    th: &mut Thread,
    op: &'static dyn BinaryOpT,
    a: &V,
    b: &V,
) -> Result<V> {
    match (a, b) {
        (V::Real(x), V::Real(y)) => Ok(V::Real(op.zz(*x, *y))),
        (V::Str(x), V::Str(y)) => op.string_op(x, y),
        (V::Ref(_) | V::ZRef(_), _) => {
            let d = a.deref();
            binary(th, op, &d, b)
        }
        (_, V::Ref(_) | V::ZRef(_)) => {
            let d = b.deref();
            binary(th, op, a, &d)
        }
        (V::List(_), _) | (_, V::List(_)) => {
            let finite = most_finite(a, b);
            let v_side = a.is_vlist() || b.is_vlist();
            if v_side {
                let gen = Box::new(BinaryVGen {
                    op,
                    a: VIn::new(a.clone()),
                    b: VIn::new(b.clone()),
                });
                Ok(V::List(List::from_gen(gen, ItemKind::V, finite)))
            } else {
                let gen = Box::new(BinaryZGen {
                    op,
                    a: ZIn::try_new(a.clone())?,
                    b: ZIn::try_new(b.clone())?,
                });
                Ok(V::List(List::from_gen(gen, ItemKind::Z, finite)))
            }
        }
        _ => {
            let culprit = if matches!(a, V::Real(_) | V::List(_)) {
                b
            } else {
                a
            };
            Err(wrong_type(
                op.name(),
                "Real, String, or List",
                culprit.type_name(),
            ))
        }
    }
}

/// Fold a binary operator over a finite stream.
pub fn reduce(
    th: &mut Thread,
    op: &'static dyn BinaryOpT,
    v: &V,
) -> Result<V> {
    match v {
        V::Real(_) => Ok(v.clone()),
        V::List(l) => {
            if !l.is_finite() {
                return Err(Error::IndefiniteOperation("reduce"));
            }
            match l.kind() {
                ItemKind::Z => {
                    let mut input = ZIn::from_list(l.clone());
                    let mut acc: Option<Z> = None;
                    let mut x = 0.0;
                    while !input.one_z(th, &mut x)? {
                        acc = Some(match acc {
                            None => x,
                            Some(a) => op.zz(a, x),
                        });
                    }
                    match acc.or(op.identity()) {
                        Some(z) => Ok(V::Real(z)),
                        None => Err(Error::IndefiniteOperation(
                            "reduce of empty list with no identity",
                        )),
                    }
                }
                ItemKind::V => {
                    let mut input = VIn::new(v.clone());
                    let mut acc: Option<V> = None;
                    let mut item = V::default();
                    while !input.one(th, &mut item)? {
                        acc = Some(match acc {
                            None => item.clone(),
                            Some(a) => binary(th, op, &a, &item)?,
                        });
                    }
                    match acc {
                        Some(v) => Ok(v),
                        None => match op.identity() {
                            Some(z) => Ok(V::Real(z)),
                            None => Err(Error::IndefiniteOperation(
                                "reduce of empty list with no identity",
                            )),
                        },
                    }
                }
            }
        }
        other => Err(wrong_type(op.name(), "Real or List", other.type_name())),
    }
}

/// Prefix-scan: a lazy running accumulation. The result stream is as long
/// as the source and never emits a terminal state of its own.
pub fn scan(th: &mut Thread, op: &'static dyn BinaryOpT, v: &V) -> Result<V> {
    let _ = th;
    match v {
        V::Real(_) => Ok(v.clone()),
        V::List(l) if l.kind() == ItemKind::Z => {
            let gen = Box::new(ScanZGen {
                op,
                input: ZIn::from_list(l.clone()),
                acc: None,
            });
            Ok(V::List(List::from_gen(gen, ItemKind::Z, l.is_finite())))
        }
        other => Err(wrong_type(op.name(), "Real or ZList", other.type_name())),
    }
}

/// Pairwise combination of adjacent elements; the first element passes
/// through unchanged.
pub fn pairs(th: &mut Thread, op: &'static dyn BinaryOpT, v: &V) -> Result<V> {
    let _ = th;
    match v {
        V::Real(_) => Ok(v.clone()),
        V::List(l) if l.kind() == ItemKind::Z => {
            let gen = Box::new(PairsZGen {
                op,
                input: ZIn::from_list(l.clone()),
                prev: None,
            });
            Ok(V::List(List::from_gen(gen, ItemKind::Z, l.is_finite())))
        }
        other => Err(wrong_type(op.name(), "Real or ZList", other.type_name())),
    }
}
