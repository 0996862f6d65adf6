//! Input cursors: uniform block-pull adapters over constants and lists.
//!
//! A cursor is either *constant* (a value repeated forever) or
//! *list-backed* (a strong reference to a spine cell plus an offset into
//! its block). Cursor operations are cooperative: when the current block
//! is exhausted the cursor forces the underlying spine, which may invoke
//! upstream generators.

use std::sync::Arc;

use crate::array::Array;
use crate::error::{wrong_type, Result};
use crate::list::{Forced, List};
use crate::thread::Thread;
use crate::value::{V, Z};

/// Walks a list spine block by block.
#[derive(Clone)]
struct ListCursor {
    current: Arc<List>,
    block: Option<(Arc<Array>, Option<Arc<List>>)>,
    offset: usize,
    exhausted: bool,
}

impl ListCursor {
    fn new(list: Arc<List>) -> Self {
        Self {
            current: list,
            block: None,
            offset: 0,
            exhausted: false,
        }
    }

    /// Make data available, forcing as needed. Returns `None` at end.
    /// On success the current block has at least one unread item.
    fn ensure(&mut self, th: &mut Thread) -> Result<Option<(&Arc<Array>, usize)>> {
        if self.exhausted {
            return Ok(None);
        }
        loop {
            if self.block.is_none() {
                match self.current.force(th)? {
                    Forced::End => {
                        self.exhausted = true;
                        return Ok(None);
                    }
                    Forced::Data(array, next) => {
                        self.block = Some((array, next));
                        self.offset = 0;
                    }
                }
            }
            let (array, next) = self.block.as_ref().expect("just filled");
            if self.offset < array.len() {
                break;
            }
            match next.clone() {
                Some(n) => {
                    self.current = n;
                    self.block = None;
                }
                None => {
                    self.exhausted = true;
                    return Ok(None);
                }
            }
        }
        let (array, _) = self.block.as_ref().expect("non-empty");
        Ok(Some((array, self.offset)))
    }

    fn advance(&mut self, n: usize) {
        self.offset += n;
    }

    fn one(&mut self, th: &mut Thread) -> Result<Option<V>> {
        match self.ensure(th)? {
            None => Ok(None),
            Some((array, offset)) => {
                let v = array.at(offset as i64);
                self.advance(1);
                Ok(Some(v))
            }
        }
    }
}

#[derive(Clone)]
enum Src {
    Const(V),
    List(ListCursor),
}

/// Cursor yielding boxed values.
#[derive(Clone)]
pub struct VIn {
    src: Src,
    done: bool,
}

impl VIn {
    /// Lists become walking cursors; every other value is a constant
    /// repeated forever.
    pub fn new(v: V) -> VIn {
        let src = match v {
            V::List(l) => Src::List(ListCursor::new(l)),
            other => Src::Const(other),
        };
        VIn { src, done: false }
    }

    pub fn constant(v: V) -> VIn {
        VIn {
            src: Src::Const(v),
            done: false,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.src, Src::Const(_))
    }

    pub fn is_zero(&self) -> bool {
        matches!(&self.src, Src::Const(v) if v.is_zero())
    }

    pub fn done(&self) -> bool {
        self.done
    }

    pub fn set(&mut self, v: V) {
        *self = VIn::new(v);
    }

    /// Replace the cursor's list, restarting block state.
    pub fn link(&mut self, list: Arc<List>) {
        self.src = Src::List(ListCursor::new(list));
        self.done = false;
    }

    /// Pull a single element. Returns `true` when the stream is done (and
    /// `out` is untouched).
    pub fn one(&mut self, th: &mut Thread, out: &mut V) -> Result<bool> {
        if self.done {
            return Ok(true);
        }
        match &mut self.src {
            Src::Const(v) => {
                *out = v.clone();
                Ok(false)
            }
            Src::List(cursor) => match cursor.one(th)? {
                Some(v) => {
                    *out = v;
                    Ok(false)
                }
                None => {
                    self.done = true;
                    Ok(true)
                }
            },
        }
    }

    /// Fill up to `*n` values. `*n` is updated to the count produced;
    /// returns `true` once the stream is done.
    pub fn fill(
        &mut self,
        th: &mut Thread,
        n: &mut usize,
        out: &mut [V],
    ) -> Result<bool> {
        let wanted = (*n).min(out.len());
        if self.done {
            *n = 0;
            return Ok(true);
        }
        match &mut self.src {
            Src::Const(v) => {
                for slot in out.iter_mut().take(wanted) {
                    *slot = v.clone();
                }
                *n = wanted;
                Ok(false)
            }
            Src::List(cursor) => {
                let mut produced = 0;
                while produced < wanted {
                    match cursor.one(th)? {
                        Some(v) => {
                            out[produced] = v;
                            produced += 1;
                        }
                        None => {
                            self.done = true;
                            break;
                        }
                    }
                }
                *n = produced;
                Ok(self.done)
            }
        }
    }
}

/// Cursor yielding raw samples.
#[derive(Clone)]
pub struct ZIn {
    src: Src,
    done: bool,
}

impl ZIn {
    /// Scalars and scalar references become constants; Z lists become
    /// walking cursors. Anything else is a type error.
    pub fn try_new(v: V) -> Result<ZIn> {
        match v {
            V::Real(z) => Ok(ZIn::constant(z)),
            V::ZRef(r) => Ok(ZIn::constant(r.get())),
            V::List(l) => Ok(ZIn {
                src: Src::List(ListCursor::new(l)),
                done: false,
            }),
            other => Err(wrong_type("signal input", "ZList or Real", other.type_name())),
        }
    }

    pub fn constant(z: Z) -> ZIn {
        ZIn {
            src: Src::Const(V::Real(z)),
            done: false,
        }
    }

    pub fn from_list(list: Arc<List>) -> ZIn {
        ZIn {
            src: Src::List(ListCursor::new(list)),
            done: false,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.src, Src::Const(_))
    }

    pub fn is_zero(&self) -> bool {
        matches!(&self.src, Src::Const(v) if v.is_zero())
    }

    pub fn done(&self) -> bool {
        self.done
    }

    pub fn set(&mut self, v: V) -> Result<()> {
        *self = ZIn::try_new(v)?;
        Ok(())
    }

    pub fn link(&mut self, list: Arc<List>) {
        self.src = Src::List(ListCursor::new(list));
        self.done = false;
    }

    /// Pull one sample. Returns `true` when the stream is done.
    pub fn one_z(&mut self, th: &mut Thread, out: &mut Z) -> Result<bool> {
        if self.done {
            return Ok(true);
        }
        match &mut self.src {
            Src::Const(v) => {
                *out = v.as_float();
                Ok(false)
            }
            Src::List(cursor) => match cursor.ensure(th)? {
                Some((array, offset)) => {
                    *out = array.at_z(offset as i64);
                    cursor.advance(1);
                    Ok(false)
                }
                None => {
                    self.done = true;
                    Ok(true)
                }
            },
        }
    }

    /// Look at the next sample without consuming it.
    pub fn peek(&mut self, th: &mut Thread, out: &mut Z) -> Result<bool> {
        if self.done {
            return Ok(true);
        }
        match &mut self.src {
            Src::Const(v) => {
                *out = v.as_float();
                Ok(false)
            }
            Src::List(cursor) => match cursor.ensure(th)? {
                Some((array, offset)) => {
                    *out = array.at_z(offset as i64);
                    Ok(false)
                }
                None => {
                    self.done = true;
                    Ok(true)
                }
            },
        }
    }

    /// Fill up to `*n` samples into `out` at the given stride. `*n` is
    /// updated to the count actually produced; short fills are legal at
    /// block boundaries. Returns `true` once the stream is done.
    pub fn fill(
        &mut self,
        th: &mut Thread,
        n: &mut usize,
        out: &mut [Z],
        stride: usize,
    ) -> Result<bool> {
        let stride = stride.max(1);
        let capacity = if stride == 1 {
            out.len()
        } else {
            (out.len() + stride - 1) / stride
        };
        let wanted = (*n).min(capacity);
        if self.done {
            *n = 0;
            return Ok(true);
        }
        match &mut self.src {
            Src::Const(v) => {
                let z = v.as_float();
                for i in 0..wanted {
                    out[i * stride] = z;
                }
                *n = wanted;
                Ok(false)
            }
            Src::List(cursor) => {
                let mut produced = 0;
                while produced < wanted {
                    let taken = match cursor.ensure(th)? {
                        None => {
                            self.done = true;
                            break;
                        }
                        Some((array, offset)) => {
                            let take = (array.len() - offset)
                                .min(wanted - produced);
                            if array.is_z() {
                                array.with_z(|zs| {
                                    for i in 0..take {
                                        out[(produced + i) * stride] =
                                            zs[offset + i];
                                    }
                                });
                            } else {
                                array.with_v(|vs| {
                                    for i in 0..take {
                                        out[(produced + i) * stride] =
                                            vs[offset + i].as_float();
                                    }
                                });
                            }
                            take
                        }
                    };
                    cursor.advance(taken);
                    produced += taken;
                }
                *n = produced;
                Ok(self.done)
            }
        }
    }

    /// Accumulate up to `*n` samples into `out`.
    pub fn mix(
        &mut self,
        th: &mut Thread,
        n: &mut usize,
        out: &mut [Z],
    ) -> Result<bool> {
        let wanted = (*n).min(out.len());
        if self.done {
            *n = 0;
            return Ok(true);
        }
        let mut scratch = vec![0.0; wanted];
        let mut m = wanted;
        let done = self.fill(th, &mut m, &mut scratch, 1)?;
        for i in 0..m {
            out[i] += scratch[i];
        }
        *n = m;
        Ok(done)
    }

    /// Advance the cursor by `frames` samples without copying them out.
    pub fn hop(&mut self, th: &mut Thread, frames: usize) -> Result<bool> {
        if self.done {
            return Ok(true);
        }
        match &mut self.src {
            Src::Const(_) => Ok(false),
            Src::List(cursor) => {
                let mut remaining = frames;
                while remaining > 0 {
                    match cursor.ensure(th)? {
                        None => {
                            self.done = true;
                            return Ok(true);
                        }
                        Some((array, offset)) => {
                            let take = (array.len() - offset).min(remaining);
                            cursor.advance(take);
                            remaining -= take;
                        }
                    }
                }
                Ok(false)
            }
        }
    }
}

/// Cursor yielding either representation, used by operators that consume
/// one item at a time regardless of the source's element kind.
#[derive(Clone)]
pub struct BothIn {
    inner: VIn,
}

impl BothIn {
    pub fn new(v: V) -> BothIn {
        BothIn { inner: VIn::new(v) }
    }

    pub fn constant(v: V) -> BothIn {
        BothIn {
            inner: VIn::constant(v),
        }
    }

    pub fn set(&mut self, v: V) {
        self.inner.set(v);
    }

    pub fn done(&self) -> bool {
        self.inner.done()
    }

    pub fn one(&mut self, th: &mut Thread, out: &mut V) -> Result<bool> {
        self.inner.one(th, out)
    }

    pub fn one_z(&mut self, th: &mut Thread, out: &mut Z) -> Result<bool> {
        let mut v = V::default();
        let done = self.inner.one(th, &mut v)?;
        if !done {
            *out = v.as_float();
        }
        Ok(done)
    }

    pub fn one_i(&mut self, th: &mut Thread, out: &mut i64) -> Result<bool> {
        let mut z = 0.0;
        let done = self.one_z(th, &mut z)?;
        if !done {
            *out = z as i64;
        }
        Ok(done)
    }
}
