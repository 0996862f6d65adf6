//! The tagged value `V` and its dispatch surface.
//!
//! `V` is a closed sum over the scalar case and every heap kind the engine
//! knows. Cloning a `V` bumps the held object's atomic refcount; dropping
//! releases it. The scalar branch carries an IEEE-754 double, the system's
//! sample type `Z`.

use std::cmp::Ordering;
use std::hash::Hasher;
use std::sync::Arc;

use crate::array::Array;
use crate::cell::{Plug, Ref, ZPlug, ZRef};
use crate::code::{Code, EachOp, Fun, FunDef, Prim};
use crate::error::{Error, Result};
use crate::list::List;
use crate::strings::Str;
use crate::table::{Form, GForm, Table};
use crate::thread::Thread;
use crate::tree::{GTable, TreeNode};

/// The sample type.
pub type Z = f64;

/// Element kind of a List or Array: boxed values or raw samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    V,
    Z,
}

#[derive(Clone)]
pub enum V {
    Real(Z),
    Str(Arc<Str>),
    Array(Arc<Array>),
    List(Arc<List>),
    Table(Arc<Table>),
    Form(Arc<Form>),
    GTable(Arc<GTable>),
    GForm(Arc<GForm>),
    TreeNode(Arc<TreeNode>),
    Ref(Arc<Ref>),
    ZRef(Arc<ZRef>),
    Plug(Arc<Plug>),
    ZPlug(Arc<ZPlug>),
    Fun(Arc<Fun>),
    Prim(Arc<Prim>),
    FunDef(Arc<FunDef>),
    Code(Arc<Code>),
    Each(Arc<EachOp>),
}

impl Default for V {
    fn default() -> Self {
        V::Real(0.0)
    }
}

impl V {
    pub fn type_name(&self) -> &'static str {
        match self {
            V::Real(_) => "Real",
            V::Str(_) => "String",
            V::Array(_) => "Array",
            V::List(l) => match l.kind() {
                ItemKind::V => "VList",
                ItemKind::Z => "ZList",
            },
            V::Table(_) => "Table",
            V::Form(_) => "Form",
            V::GTable(_) => "GTable",
            V::GForm(_) => "GForm",
            V::TreeNode(_) => "TreeNode",
            V::Ref(_) => "Ref",
            V::ZRef(_) => "ZRef",
            V::Plug(_) => "Plug",
            V::ZPlug(_) => "ZPlug",
            V::Fun(_) => "Fun",
            V::Prim(_) => "Prim",
            V::FunDef(_) => "FunDef",
            V::Code(_) => "Code",
            V::Each(_) => "EachOp",
        }
    }

    // ── type predicates ────────────────────────────────────────────

    pub fn is_real(&self) -> bool {
        matches!(self, V::Real(_))
    }

    pub fn is_object(&self) -> bool {
        !self.is_real()
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, V::Real(f) if *f == 0.0)
    }

    pub fn is_str(&self) -> bool {
        matches!(self, V::Str(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, V::List(_))
    }

    pub fn is_vlist(&self) -> bool {
        matches!(self, V::List(l) if l.kind() == ItemKind::V)
    }

    pub fn is_zlist(&self) -> bool {
        matches!(self, V::List(l) if l.kind() == ItemKind::Z)
    }

    pub fn is_fun(&self) -> bool {
        matches!(self, V::Fun(_))
    }

    pub fn is_prim(&self) -> bool {
        matches!(self, V::Prim(_))
    }

    /// Values the interpreter applies rather than pushes.
    pub fn is_callable(&self) -> bool {
        matches!(self, V::Fun(_) | V::Prim(_) | V::Each(_))
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, V::Ref(_))
    }

    pub fn is_zref(&self) -> bool {
        matches!(self, V::ZRef(_))
    }

    // ── scalar projections ─────────────────────────────────────────

    /// Numeric projection. Scalars pass through; references dereference;
    /// everything else projects to 0, matching the object default.
    pub fn as_float(&self) -> Z {
        match self {
            V::Real(f) => *f,
            V::Ref(r) => r.deref().as_float(),
            V::ZRef(r) => r.get(),
            _ => 0.0,
        }
    }

    /// Integer projection for indices and counts.
    pub fn as_index(&self) -> Result<i64> {
        match self {
            V::Real(f) => Ok(*f as i64),
            other => Err(crate::error::wrong_type(
                "index",
                "Real",
                other.type_name(),
            )),
        }
    }

    /// Truthiness: zero is false, every other value is true.
    pub fn is_true(&self) -> bool {
        match self {
            V::Real(f) => *f != 0.0,
            _ => true,
        }
    }

    /// Whether this value, viewed as a stream, is known to be bounded.
    pub fn is_finite(&self) -> bool {
        match self {
            V::List(l) => l.is_finite(),
            V::Fun(_) | V::Prim(_) | V::Each(_) => false,
            _ => true,
        }
    }

    /// Element count. Lists force their spine, which fails on indefinite
    /// streams.
    pub fn length(&self, th: &mut Thread) -> Result<i64> {
        match self {
            V::List(l) => l.length(th),
            V::Array(a) => Ok(a.len() as i64),
            V::Str(s) => Ok(s.len() as i64),
            V::Table(t) => Ok(t.len() as i64),
            _ => Ok(1),
        }
    }

    // ── indexed access ─────────────────────────────────────────────
    //
    // Scalars and most objects index to themselves; arrays and packed
    // lists do real element access with the standard read policies.

    pub fn at(&self, i: i64) -> V {
        match self {
            V::Array(a) => a.at(i),
            V::List(l) => l.at(i).unwrap_or_else(|| self.clone()),
            _ => self.clone(),
        }
    }

    pub fn wrap_at(&self, i: i64) -> V {
        match self {
            V::Array(a) => a.wrap_at(i),
            V::List(l) => l.wrap_at(i).unwrap_or_else(|| self.clone()),
            _ => self.clone(),
        }
    }

    pub fn clip_at(&self, i: i64) -> V {
        match self {
            V::Array(a) => a.clip_at(i),
            V::List(l) => l.clip_at(i).unwrap_or_else(|| self.clone()),
            _ => self.clone(),
        }
    }

    pub fn fold_at(&self, i: i64) -> V {
        match self {
            V::Array(a) => a.fold_at(i),
            V::List(l) => l.fold_at(i).unwrap_or_else(|| self.clone()),
            _ => self.clone(),
        }
    }

    // ── references ─────────────────────────────────────────────────

    /// Force through one level of mutable reference.
    pub fn deref(&self) -> V {
        match self {
            V::Ref(r) => r.deref(),
            V::ZRef(r) => V::Real(r.get()),
            _ => self.clone(),
        }
    }

    /// Force through references and scope parents up to `n` steps.
    ///
    /// On a `Ref`, the chased value is written back; an intervening `set`
    /// from another thread may be overwritten. This race is a documented
    /// weakening, preferred over holding the cell lock across the chase.
    pub fn chase(&self, th: &mut Thread, n: i64) -> Result<V> {
        if n <= 0 {
            return Ok(self.clone());
        }
        match self {
            V::Ref(r) => {
                let v = r.deref();
                let chased = v.chase(th, n - 1)?;
                r.set(chased.clone());
                Ok(chased)
            }
            V::ZRef(r) => Ok(V::Real(r.get())),
            V::Form(f) => Ok(V::Form(f.chase_form(n))),
            _ => Ok(self.clone()),
        }
    }

    // ── hashing, identity, equality, ordering ──────────────────────

    pub fn hash64(&self) -> u64 {
        match self {
            V::Real(f) => {
                let mut h = ahash::AHasher::default();
                h.write_u64(f.to_bits());
                h.finish()
            }
            V::Str(s) => s.hash(),
            other => {
                let mut h = ahash::AHasher::default();
                h.write_usize(other.object_addr());
                h.finish()
            }
        }
    }

    /// 63-bit key hash used by the persistent tree.
    pub fn key_hash(&self) -> i64 {
        (self.hash64() & 0x7fff_ffff_ffff_ffff) as i64
    }

    fn object_addr(&self) -> usize {
        match self {
            V::Real(_) => 0,
            V::Str(o) => Arc::as_ptr(o) as usize,
            V::Array(o) => Arc::as_ptr(o) as usize,
            V::List(o) => Arc::as_ptr(o) as usize,
            V::Table(o) => Arc::as_ptr(o) as usize,
            V::Form(o) => Arc::as_ptr(o) as usize,
            V::GTable(o) => Arc::as_ptr(o) as usize,
            V::GForm(o) => Arc::as_ptr(o) as usize,
            V::TreeNode(o) => Arc::as_ptr(o) as usize,
            V::Ref(o) => Arc::as_ptr(o) as usize,
            V::ZRef(o) => Arc::as_ptr(o) as usize,
            V::Plug(o) => Arc::as_ptr(o) as usize,
            V::ZPlug(o) => Arc::as_ptr(o) as usize,
            V::Fun(o) => Arc::as_ptr(o) as usize,
            V::Prim(o) => Arc::as_ptr(o) as usize,
            V::FunDef(o) => Arc::as_ptr(o) as usize,
            V::Code(o) => Arc::as_ptr(o) as usize,
            V::Each(o) => Arc::as_ptr(o) as usize,
        }
    }

    /// Identity: same scalar bits or same object.
    pub fn identical(&self, other: &V) -> bool {
        match (self, other) {
            (V::Real(a), V::Real(b)) => a == b,
            (a, b) => {
                a.is_object()
                    && b.is_object()
                    && a.object_addr() == b.object_addr()
            }
        }
    }

    /// Key equality for dictionaries: value equality for scalars and
    /// interned strings (where identity is value equality), identity for
    /// everything else. Never forces streams.
    pub fn key_equals(&self, other: &V) -> bool {
        match (self, other) {
            (V::Real(a), V::Real(b)) => a == b,
            (V::Str(a), V::Str(b)) => Arc::ptr_eq(a, b),
            (a, b) => a.identical(b),
        }
    }

    /// Deep equality. Finite lists compare elementwise (forcing their
    /// spines); references compare their current contents.
    pub fn equals(&self, th: &mut Thread, other: &V) -> Result<bool> {
        if self.identical(other) {
            return Ok(true);
        }
        match (self, other) {
            (V::Real(a), V::Real(b)) => Ok(a == b),
            (V::Str(a), V::Str(b)) => Ok(Arc::ptr_eq(a, b)),
            (V::Ref(a), V::Ref(b)) => a.deref().equals(th, &b.deref()),
            (V::ZRef(a), V::ZRef(b)) => Ok(a.get() == b.get()),
            (V::List(a), V::List(b)) => {
                if !a.is_finite() || !b.is_finite() {
                    return Ok(false);
                }
                List::equals(a, b, th)
            }
            (V::Array(a), V::Array(b)) => {
                Ok(a.compare(th, b)? == Ordering::Equal)
            }
            (V::Table(a), V::Table(b)) => Table::equals(a, b, th),
            (V::Form(a), V::Form(b)) => Form::equals(a, b, th),
            (V::GForm(a), V::GForm(b)) => GForm::equals(a, b, th),
            (V::GTable(a), V::GTable(b)) => GTable::equals(a, b, th),
            _ => Ok(false),
        }
    }

    /// Total ordering used by sort-like operations and comparisons of
    /// aggregate values. Values of different kinds order by type name,
    /// then by identity.
    pub fn compare(&self, th: &mut Thread, other: &V) -> Result<Ordering> {
        match (self, other) {
            (V::Real(a), V::Real(b)) => {
                Ok(a.partial_cmp(b).unwrap_or(Ordering::Equal))
            }
            (V::Str(a), V::Str(b)) => Ok(a.as_str().cmp(b.as_str())),
            (V::Array(a), V::Array(b)) => a.compare(th, b),
            (V::List(a), V::List(b))
                if a.is_finite()
                    && b.is_finite()
                    && a.kind() == b.kind() =>
            {
                List::compare(a, b, th)
            }
            (a, b) => {
                let ord = a.type_name().cmp(b.type_name());
                if ord != Ordering::Equal {
                    return Ok(ord);
                }
                Ok(a.object_addr().cmp(&b.object_addr()))
            }
        }
    }

    // ── dictionary access ──────────────────────────────────────────

    /// Keyed lookup; `Ok(None)` when the key is absent.
    pub fn get(&self, th: &mut Thread, key: &V) -> Result<Option<V>> {
        match self {
            V::Table(t) => Ok(t.get(key)),
            V::Form(f) => Ok(f.get(key)),
            V::GTable(t) => Ok(t.get(key)),
            V::GForm(f) => Ok(f.get(key)),
            V::Ref(r) => r.deref().get(th, key),
            _ => Ok(None),
        }
    }

    /// Keyed lookup that fails with `NotFound` when absent.
    pub fn must_get(&self, th: &mut Thread, key: &V) -> Result<V> {
        self.get(th, key)?.ok_or_else(|| {
            Error::NotFound(key.to_display_string())
        })
    }

    // ── arity ──────────────────────────────────────────────────────

    pub fn takes(&self) -> u16 {
        match self {
            V::Fun(f) => f.def.num_args,
            V::Prim(p) => p.takes,
            V::Each(e) => e.v.takes(),
            _ => 0,
        }
    }

    pub fn leaves(&self) -> u16 {
        match self {
            V::Fun(f) => f.def.leaves,
            V::Prim(p) => p.leaves,
            V::Each(e) => e.v.leaves(),
            _ => 1,
        }
    }

    // ── printing ───────────────────────────────────────────────────

    /// Human-readable rendering. Finite lists are forced for printing;
    /// indefinite lists print a bounded prefix followed by `...`.
    pub fn print(&self, th: &mut Thread, out: &mut String, depth: usize) {
        use std::fmt::Write;
        const MAX_DEPTH: usize = 6;
        const MAX_ITEMS: usize = 32;
        if depth > MAX_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            V::Real(f) => {
                let _ = write!(out, "{f}");
            }
            V::Str(s) => {
                let _ = write!(out, "\"{}\"", s.as_str());
            }
            V::List(l) => {
                out.push('[');
                let mut n = 0usize;
                let mut cursor = crate::input::VIn::new(V::List(l.clone()));
                loop {
                    if n >= MAX_ITEMS {
                        out.push_str(" ...");
                        break;
                    }
                    if !l.is_finite() && n >= 8 {
                        out.push_str(" ...");
                        break;
                    }
                    let mut item = V::default();
                    match cursor.one(th, &mut item) {
                        Ok(false) => {
                            if n > 0 {
                                out.push(' ');
                            }
                            item.print(th, out, depth + 1);
                            n += 1;
                        }
                        _ => break,
                    }
                }
                out.push(']');
            }
            V::Array(a) => {
                out.push('#');
                out.push('[');
                for i in 0..a.len().min(MAX_ITEMS) {
                    if i > 0 {
                        out.push(' ');
                    }
                    a.at(i as i64).print(th, out, depth + 1);
                }
                if a.len() > MAX_ITEMS {
                    out.push_str(" ...");
                }
                out.push(']');
            }
            V::Ref(r) => {
                out.push_str("ref(");
                r.deref().print(th, out, depth + 1);
                out.push(')');
            }
            V::ZRef(r) => {
                let _ = write!(out, "zref({})", r.get());
            }
            V::Fun(f) => {
                let _ = write!(out, "\\fun/{}", f.def.num_args);
            }
            V::Prim(p) => {
                let _ = write!(out, "'{}'", p.name);
            }
            V::Table(t) => {
                let _ = write!(out, "table[{}]", t.len());
            }
            V::Form(_) => out.push_str("form"),
            V::GForm(_) => out.push_str("gform"),
            V::GTable(_) => out.push_str("gtable"),
            other => out.push_str(other.type_name()),
        }
    }

    /// Best-effort rendering without a thread, for error messages.
    pub fn to_display_string(&self) -> String {
        match self {
            V::Real(f) => format!("{f}"),
            V::Str(s) => s.as_str().to_owned(),
            other => other.type_name().to_owned(),
        }
    }
}

impl std::fmt::Debug for V {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            V::Real(x) => write!(f, "V::Real({x})"),
            V::Str(s) => write!(f, "V::Str({:?})", s.as_str()),
            other => write!(f, "V::{}", other.type_name()),
        }
    }
}

impl From<Z> for V {
    fn from(f: Z) -> Self {
        V::Real(f)
    }
}

impl From<Arc<Str>> for V {
    fn from(s: Arc<Str>) -> Self {
        V::Str(s)
    }
}

impl From<Arc<List>> for V {
    fn from(l: Arc<List>) -> Self {
        V::List(l)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::getsym;

    #[test]
    fn scalar_predicates() {
        let v = V::Real(42.0);
        assert!(v.is_real());
        assert!(!v.is_object());
        assert_eq!(v.as_float(), 42.0);
        assert!(V::Real(0.0).is_zero());
        assert!(!V::Real(0.5).is_zero());
    }

    #[test]
    fn truthiness() {
        assert!(!V::Real(0.0).is_true());
        assert!(V::Real(1.0).is_true());
        assert!(V::Real(-1.0).is_true());
        assert!(V::Str(getsym("x")).is_true());
    }

    #[test]
    fn string_values_share_interned_identity() {
        let a = V::Str(getsym("note"));
        let b = V::Str(getsym("note"));
        assert!(a.identical(&b));
        assert!(a.key_equals(&b));
        assert_eq!(a.hash64(), b.hash64());
    }

    #[test]
    fn key_hash_fits_63_bits() {
        for s in ["a", "b", "freq", "trigger"] {
            let h = V::Str(getsym(s)).key_hash();
            assert!(h >= 0);
        }
        assert!(V::Real(-1.5).key_hash() >= 0);
    }

    #[test]
    fn clone_bumps_refcount() {
        let s = getsym("refcounted-once");
        let base = Arc::strong_count(&s);
        let v = V::Str(s.clone());
        assert_eq!(Arc::strong_count(&s), base + 1);
        let v2 = v.clone();
        assert_eq!(Arc::strong_count(&s), base + 2);
        drop(v);
        assert_eq!(Arc::strong_count(&s), base + 1);
        drop(v2);
        assert_eq!(Arc::strong_count(&s), base);
    }

    #[test]
    fn default_is_scalar_zero() {
        assert!(V::default().is_zero());
    }
}
