//! Built-in words and their registration into the workspace.

use std::sync::Arc;

use crate::array::Array;
use crate::cell::{Plug, Ref, ZPlug, ZRef};
use crate::code::Prim;
use crate::each;
use crate::error::{wrong_type, Error, Result};
use crate::input::{VIn, ZIn};
use crate::interpreter::apply;
use crate::list::{Gen, List, Pulled, BLOCK_SIZE};
use crate::ops::{self, OpRef};
use crate::strings::getsym;
use crate::table::{Form, GForm, Table};
use crate::thread::{Rate, Thread};
use crate::value::{ItemKind, V, Z};

/// Apply a primitive, routing through the automap machinery when its mask
/// and the argument shapes ask for it.
pub fn apply_prim(th: &mut Thread, p: &Arc<Prim>) -> Result<()> {
    if let Some(mask) = p.mask {
        let takes = p.takes as usize;
        if th.stack_depth() < takes {
            return Err(Error::StackUnderflow);
        }
        let mut any = false;
        for (i, ch) in mask.bytes().enumerate().take(takes) {
            let arg = th.peek(takes - 1 - i)?;
            if each::wants_map(ch, arg) {
                any = true;
                break;
            }
        }
        if any {
            let args = th.pop_n(takes)?;
            let mapped: Vec<bool> = mask
                .bytes()
                .chain(std::iter::repeat(b'a'))
                .take(takes)
                .zip(args.iter())
                .map(|(ch, arg)| each::wants_map(ch, arg))
                .collect();
            return each::map_call(th, V::Prim(p.clone()), args, mapped);
        }
    }
    (p.func)(th, p)
}

fn op_binary(p: &Arc<Prim>) -> &'static dyn ops::BinaryOpT {
    match p.op {
        Some(OpRef::Binary(op)) => op,
        _ => unreachable!("binary primitive without operator payload"),
    }
}

fn op_unary(p: &Arc<Prim>) -> &'static dyn ops::UnaryOpT {
    match p.op {
        Some(OpRef::Unary(op)) => op,
        _ => unreachable!("unary primitive without operator payload"),
    }
}

// ── arithmetic ─────────────────────────────────────────────────────

fn prim_binop(th: &mut Thread, p: &Arc<Prim>) -> Result<()> {
    let b = th.pop()?;
    let a = th.pop()?;
    let r = ops::binary(th, op_binary(p), &a, &b)?;
    th.push(r)
}

fn prim_unop(th: &mut Thread, p: &Arc<Prim>) -> Result<()> {
    let a = th.pop()?;
    let r = ops::unary(th, op_unary(p), &a)?;
    th.push(r)
}

pub fn prim_fold(th: &mut Thread, p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    let r = ops::reduce(th, op_binary(p), &v)?;
    th.push(r)
}

pub fn prim_scan(th: &mut Thread, p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    let r = ops::scan(th, op_binary(p), &v)?;
    th.push(r)
}

pub fn prim_pairs(th: &mut Thread, p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    let r = ops::pairs(th, op_binary(p), &v)?;
    th.push(r)
}

// ── stack shufflers ────────────────────────────────────────────────

fn prim_dup(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let v = th.top()?.clone();
    th.push(v)
}

fn prim_swap(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let b = th.pop()?;
    let a = th.pop()?;
    th.push(b)?;
    th.push(a)
}

fn prim_drop(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    th.pop()?;
    Ok(())
}

fn prim_rot(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let c = th.pop()?;
    let b = th.pop()?;
    let a = th.pop()?;
    th.push(b)?;
    th.push(c)?;
    th.push(a)
}

// ── application and control ────────────────────────────────────────

fn prim_apply(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    apply(th, &v)
}

fn prim_if(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let f_else = th.pop()?;
    let f_then = th.pop()?;
    let cond = th.pop()?;
    if cond.is_true() {
        apply(th, &f_then)
    } else {
        apply(th, &f_else)
    }
}

// ── indexing and list shape ────────────────────────────────────────

/// Pack a list argument for random access; scalars pass through.
fn packed_for_index(th: &mut Thread, v: V) -> Result<V> {
    match v {
        V::List(l) => {
            let packed = l
                .pack(th, None)?
                .expect("pack without limit always completes");
            Ok(V::List(packed))
        }
        other => Ok(other),
    }
}

fn prim_at(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let i = th.pop_index()?;
    let v = th.pop()?;
    let v = packed_for_index(th, v)?;
    th.push(v.at(i))
}

fn prim_wrap_at(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let i = th.pop_index()?;
    let v = th.pop()?;
    let v = packed_for_index(th, v)?;
    th.push(v.wrap_at(i))
}

fn prim_clip_at(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let i = th.pop_index()?;
    let v = th.pop()?;
    let v = packed_for_index(th, v)?;
    th.push(v.clip_at(i))
}

fn prim_fold_at(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let i = th.pop_index()?;
    let v = th.pop()?;
    let v = packed_for_index(th, v)?;
    th.push(v.fold_at(i))
}

fn prim_size(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    let n = v.length(th)?;
    th.push(V::Real(n as Z))
}

fn prim_pack(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let l = th.pop_list()?;
    let packed = l
        .pack(th, None)?
        .expect("pack without limit always completes");
    th.push(V::List(packed))
}

struct ChainZGen {
    first: Option<ZIn>,
    second: ZIn,
}

impl Gen for ChainZGen {
    fn name(&self) -> &'static str {
        "chain-z"
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut buf = vec![0.0; BLOCK_SIZE];
        if let Some(a) = self.first.as_mut() {
            let mut n = BLOCK_SIZE;
            a.fill(th, &mut n, &mut buf, 1)?;
            if n > 0 {
                buf.truncate(n);
                return Ok(Pulled::Block(Array::from_zs(buf)));
            }
            self.first = None;
        }
        let mut n = BLOCK_SIZE;
        let done = self.second.fill(th, &mut n, &mut buf, 1)?;
        if n == 0 {
            return Ok(Pulled::End);
        }
        buf.truncate(n);
        let array = Array::from_zs(buf);
        Ok(if done {
            Pulled::Last(array)
        } else {
            Pulled::Block(array)
        })
    }
}

struct ChainVGen {
    first: Option<VIn>,
    second: VIn,
}

impl Gen for ChainVGen {
    fn name(&self) -> &'static str {
        "chain-v"
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled> {
        let mut out: Vec<V> = Vec::with_capacity(BLOCK_SIZE);
        if let Some(a) = self.first.as_mut() {
            for _ in 0..BLOCK_SIZE {
                let mut v = V::default();
                if a.one(th, &mut v)? {
                    self.first = None;
                    break;
                }
                out.push(v);
            }
            if !out.is_empty() {
                return Ok(Pulled::Block(Array::from_vs(out)));
            }
        }
        let mut ended = false;
        for _ in 0..BLOCK_SIZE {
            let mut v = V::default();
            if self.second.one(th, &mut v)? {
                ended = true;
                break;
            }
            out.push(v);
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

fn prim_cat(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let b = th.pop_list()?;
    let a = th.pop_list()?;
    let finite = a.is_finite() && b.is_finite();
    let result = if a.kind() == ItemKind::Z && b.kind() == ItemKind::Z {
        List::from_gen(
            Box::new(ChainZGen {
                first: Some(ZIn::from_list(a)),
                second: ZIn::from_list(b),
            }),
            ItemKind::Z,
            finite,
        )
    } else {
        List::from_gen(
            Box::new(ChainVGen {
                first: Some(VIn::new(V::List(a))),
                second: VIn::new(V::List(b)),
            }),
            ItemKind::V,
            finite,
        )
    };
    th.push(V::List(result))
}

// ── references and plugs ───────────────────────────────────────────

fn prim_ref(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    th.push(V::Ref(Arc::new(Ref::new(v))))
}

fn prim_zref(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let z = th.pop_float()?;
    th.push(V::ZRef(Arc::new(ZRef::new(z))))
}

fn prim_plug(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    th.push(V::Plug(Arc::new(Plug::new(v))))
}

fn prim_zplug(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    let zin = ZIn::try_new(v)?;
    th.push(V::ZPlug(Arc::new(ZPlug::new(zin))))
}

fn prim_deref(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    th.push(v.deref())
}

fn prim_set(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    let target = th.pop()?;
    match target {
        V::Ref(r) => {
            r.set(v);
            Ok(())
        }
        V::ZRef(r) => {
            r.set(v.as_float());
            Ok(())
        }
        V::Plug(p) => {
            p.set(v);
            Ok(())
        }
        V::ZPlug(p) => {
            p.set(ZIn::try_new(v)?);
            Ok(())
        }
        other => Err(wrong_type("set", "Ref, ZRef, or Plug", other.type_name())),
    }
}

fn prim_chase(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let n = th.pop_index()?;
    let v = th.pop()?;
    let chased = v.chase(th, n)?;
    th.push(chased)
}

// ── dictionaries ───────────────────────────────────────────────────

fn prim_def(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let name = th.pop()?;
    let value = th.pop()?;
    if !name.is_str() {
        return Err(wrong_type("def", "String", name.type_name()));
    }
    th.engine().workspace().put_impure(&name, &value);
    Ok(())
}

fn prim_table(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let values = th.pop_list()?;
    let keys = th.pop_list()?;
    let keys = keys
        .pack(th, None)?
        .expect("pack without limit always completes");
    let values = values
        .pack(th, None)?
        .expect("pack without limit always completes");
    let keys = keys.packed_array().expect("packed").to_vs();
    let values = values.packed_array().expect("packed").to_vs();
    if keys.len() != values.len() {
        return Err(Error::OutOfRange(format!(
            "table needs matching key and value counts, got {} and {}",
            keys.len(),
            values.len()
        )));
    }
    let pairs = keys.into_iter().zip(values).collect();
    th.push(V::Table(Table::from_pairs(pairs)))
}

fn prim_form(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let parent = th.pop()?;
    let table = th.pop()?;
    let V::Table(table) = table else {
        return Err(wrong_type("form", "Table", table.type_name()));
    };
    let parent = match parent {
        V::Form(f) => Some(f),
        V::Real(z) if z == 0.0 => None,
        other => {
            return Err(wrong_type("form", "Form or 0", other.type_name()));
        }
    };
    th.push(V::Form(Form::cons(table, parent)))
}

// ── signals and audio ──────────────────────────────────────────────

fn prim_sinosc(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let freq = th.pop()?;
    let finite = matches!(&freq, V::List(l) if l.is_finite());
    let zin = ZIn::try_new(freq)?;
    let rate = th.rate();
    let gen = Box::new(crate::dsp::SinOsc::new(zin, rate.radians_per_sample));
    th.push(V::List(List::from_gen(gen, ItemKind::Z, finite)))
}

fn prim_line(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let dur = th.pop_float()?;
    let end = th.pop_float()?;
    let start = th.pop_float()?;
    if dur < 0.0 {
        return Err(Error::OutOfRange(format!(
            "line duration must be non-negative, got {dur}"
        )));
    }
    let frames = (dur * th.rate().sample_rate).round() as usize;
    let gen = Box::new(crate::dsp::LineGen::new(start, end, frames));
    th.push(V::List(List::from_gen(gen, ItemKind::Z, true)))
}

fn prim_play(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    let v = th.pop()?;
    let engine = th.engine().clone();
    engine.audio().play(th, v)
}

fn prim_stop(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    th.engine().audio().stop_all();
    Ok(())
}

fn prim_stop_finished(th: &mut Thread, _p: &Arc<Prim>) -> Result<()> {
    th.engine().audio().stop_finished();
    Ok(())
}

// ── registration ───────────────────────────────────────────────────

fn def_value(ws: &Arc<GForm>, name: &str, v: V) {
    ws.put_impure(&V::Str(getsym(name)), &v);
}

fn def_prim(ws: &Arc<GForm>, p: Arc<Prim>) {
    ws.put_impure(&V::Str(getsym(p.name)), &V::Prim(p));
}

/// Install every builtin into the workspace.
pub fn register(ws: &Arc<GForm>, rate: &Rate) {
    use crate::ops as o;

    let binaries: &[(&'static str, &'static dyn o::BinaryOpT, &'static str)] = &[
        ("+", &o::ADD, "add"),
        ("-", &o::SUB, "subtract"),
        ("*", &o::MUL, "multiply"),
        ("/", &o::DIV, "divide"),
        ("%", &o::MOD, "modulo"),
        ("pow", &o::POW, "raise to a power"),
        ("&", &o::MIN, "minimum"),
        ("|", &o::MAX, "maximum"),
        ("atan2", &o::ATAN2, "arc tangent of a quotient"),
        ("==", &o::EQ, "equal"),
        ("!=", &o::NE, "not equal"),
        ("<", &o::LT, "less than"),
        (">", &o::GT, "greater than"),
        ("<=", &o::LE, "less or equal"),
        (">=", &o::GE, "greater or equal"),
    ];
    for &(name, op, help) in binaries {
        def_prim(
            ws,
            Prim::with_op(
                name,
                2,
                1,
                Some("zz"),
                help,
                prim_binop,
                OpRef::Binary(op),
            ),
        );
    }

    let unaries: &[(&'static str, &'static dyn o::UnaryOpT, &'static str)] = &[
        ("neg", &o::NEG, "negate"),
        ("abs", &o::ABS, "absolute value"),
        ("sqrt", &o::SQRT, "square root"),
        ("exp", &o::EXP, "e to the power"),
        ("log", &o::LOG, "natural logarithm"),
        ("log2", &o::LOG2, "base-2 logarithm"),
        ("log10", &o::LOG10, "base-10 logarithm"),
        ("sin", &o::SIN, "sine"),
        ("cos", &o::COS, "cosine"),
        ("tan", &o::TAN, "tangent"),
        ("atan", &o::ATAN, "arc tangent"),
        ("floor", &o::FLOOR, "round down"),
        ("ceil", &o::CEIL, "round up"),
        ("recip", &o::RECIP, "reciprocal"),
    ];
    for &(name, op, help) in unaries {
        def_prim(
            ws,
            Prim::with_op(
                name,
                1,
                1,
                Some("z"),
                help,
                prim_unop,
                OpRef::Unary(op),
            ),
        );
    }

    def_prim(ws, Prim::new("aa", 1, 2, None, "duplicate the top value", prim_dup));
    def_prim(ws, Prim::new("ba", 2, 2, None, "swap the top two values", prim_swap));
    def_prim(ws, Prim::new("pop", 1, 0, None, "drop the top value", prim_drop));
    def_prim(ws, Prim::new("rot", 3, 3, None, "rotate the top three values", prim_rot));

    def_prim(ws, Prim::new("!", 1, 1, None, "apply a function", prim_apply));
    def_prim(
        ws,
        Prim::new("if", 3, 1, None, "branch on a condition", prim_if),
    );

    def_prim(
        ws,
        Prim::new("at", 2, 1, Some("ak"), "index with zero padding", prim_at),
    );
    def_prim(
        ws,
        Prim::new("wrapAt", 2, 1, Some("ak"), "index with wraparound", prim_wrap_at),
    );
    def_prim(
        ws,
        Prim::new("clipAt", 2, 1, Some("ak"), "index with clamping", prim_clip_at),
    );
    def_prim(
        ws,
        Prim::new("foldAt", 2, 1, Some("ak"), "index with reflection", prim_fold_at),
    );
    def_prim(ws, Prim::new("size", 1, 1, None, "element count", prim_size));
    def_prim(
        ws,
        Prim::new("pack", 1, 1, None, "flatten a finite list", prim_pack),
    );
    def_prim(
        ws,
        Prim::new("$", 2, 1, None, "concatenate two lists", prim_cat),
    );

    def_prim(ws, Prim::new("ref", 1, 1, None, "make a mutable cell", prim_ref));
    def_prim(
        ws,
        Prim::new("zref", 1, 1, None, "make a mutable scalar cell", prim_zref),
    );
    def_prim(
        ws,
        Prim::new("plug", 1, 1, None, "make a swappable source", prim_plug),
    );
    def_prim(
        ws,
        Prim::new(
            "zplug",
            1,
            1,
            None,
            "make a swappable signal source",
            prim_zplug,
        ),
    );
    def_prim(
        ws,
        Prim::new("deref", 1, 1, None, "read a mutable cell", prim_deref),
    );
    def_prim(
        ws,
        Prim::new("set", 2, 0, None, "write a mutable cell", prim_set),
    );
    def_prim(
        ws,
        Prim::new("chase", 2, 1, None, "force through references", prim_chase),
    );

    def_prim(
        ws,
        Prim::new("def", 2, 0, None, "bind a global name", prim_def),
    );
    def_prim(
        ws,
        Prim::new("table", 2, 1, None, "build a keyed table", prim_table),
    );
    def_prim(
        ws,
        Prim::new("form", 2, 1, None, "build a scope frame", prim_form),
    );

    def_prim(
        ws,
        Prim::new("sinosc", 1, 1, Some("z"), "sine oscillator", prim_sinosc),
    );
    def_prim(
        ws,
        Prim::new("line", 3, 1, None, "linear ramp over a duration", prim_line),
    );
    def_prim(ws, Prim::new("play", 1, 0, None, "play a signal", prim_play));
    def_prim(ws, Prim::new("stop", 0, 0, None, "stop all players", prim_stop));
    def_prim(
        ws,
        Prim::new(
            "stopFinished",
            0,
            0,
            None,
            "remove players that have ended",
            prim_stop_finished,
        ),
    );

    def_value(ws, "pi", V::Real(std::f64::consts::PI));
    def_value(ws, "twopi", V::Real(std::f64::consts::TAU));
    def_value(ws, "sampleRate", V::Real(rate.sample_rate));
}
