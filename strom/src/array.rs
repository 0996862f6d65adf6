//! Contiguous storage of scalars or values.
//!
//! An array's element kind is fixed at creation. Out-of-range reads follow
//! one of the standard policies: `at` yields the domain zero, `wrap_at`
//! uses Euclidean modulo, `clip_at` saturates, and `fold_at` mirrors
//! across both ends.

use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;
use crate::thread::Thread;
use crate::value::{ItemKind, V, Z};

#[derive(Debug)]
enum Raw {
    V(Vec<V>),
    Z(Vec<Z>),
}

impl std::fmt::Debug for Array {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Array({:?}, len={})", self.kind, self.len())
    }
}

pub struct Array {
    kind: ItemKind,
    data: RwLock<Raw>,
}

/// Euclidean modulo: the result is always in `[0, n)`.
pub fn imod(i: i64, n: i64) -> i64 {
    let r = i % n;
    if r < 0 {
        r + n
    } else {
        r
    }
}

/// Reflect `i` into `[0, n)` as a triangle wave with period `2(n-1)`.
pub fn ifold(i: i64, n: i64) -> i64 {
    if n <= 1 {
        return 0;
    }
    let period = 2 * (n - 1);
    let x = imod(i, period);
    if x >= n {
        period - x
    } else {
        x
    }
}

impl Array {
    pub fn new(kind: ItemKind, cap: usize) -> Self {
        let data = match kind {
            ItemKind::V => Raw::V(Vec::with_capacity(cap.max(1))),
            ItemKind::Z => Raw::Z(Vec::with_capacity(cap.max(1))),
        };
        Self {
            kind,
            data: RwLock::new(data),
        }
    }

    pub fn from_zs(zs: Vec<Z>) -> Self {
        Self {
            kind: ItemKind::Z,
            data: RwLock::new(Raw::Z(zs)),
        }
    }

    pub fn from_vs(vs: Vec<V>) -> Self {
        Self {
            kind: ItemKind::V,
            data: RwLock::new(Raw::V(vs)),
        }
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    pub fn is_v(&self) -> bool {
        self.kind == ItemKind::V
    }

    pub fn is_z(&self) -> bool {
        self.kind == ItemKind::Z
    }

    pub fn len(&self) -> usize {
        match &*self.data.read() {
            Raw::V(v) => v.len(),
            Raw::Z(z) => z.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── writing ────────────────────────────────────────────────────

    /// Append a value. Z arrays store its numeric projection.
    pub fn add(&self, value: V) {
        match &mut *self.data.write() {
            Raw::V(v) => v.push(value),
            Raw::Z(z) => z.push(value.as_float()),
        }
    }

    /// Append a scalar. V arrays box it.
    pub fn add_z(&self, value: Z) {
        match &mut *self.data.write() {
            Raw::V(v) => v.push(V::Real(value)),
            Raw::Z(z) => z.push(value),
        }
    }

    pub fn put(&self, i: i64, value: V) {
        match &mut *self.data.write() {
            Raw::V(v) => {
                if let Some(slot) = v.get_mut(i as usize) {
                    *slot = value;
                }
            }
            Raw::Z(z) => {
                if let Some(slot) = z.get_mut(i as usize) {
                    *slot = value.as_float();
                }
            }
        }
    }

    pub fn put_z(&self, i: i64, value: Z) {
        self.put(i, V::Real(value));
    }

    /// Append every element of `other` (element kinds must agree).
    pub fn add_all(&self, other: &Array) {
        match (&mut *self.data.write(), &*other.data.read()) {
            (Raw::V(dst), Raw::V(src)) => dst.extend(src.iter().cloned()),
            (Raw::Z(dst), Raw::Z(src)) => dst.extend_from_slice(src),
            (Raw::V(dst), Raw::Z(src)) => {
                dst.extend(src.iter().map(|&z| V::Real(z)))
            }
            (Raw::Z(dst), Raw::V(src)) => {
                dst.extend(src.iter().map(|v| v.as_float()))
            }
        }
    }

    // ── reading ────────────────────────────────────────────────────

    fn read_at(&self, i: i64) -> Option<V> {
        match &*self.data.read() {
            Raw::V(v) => v.get(i as usize).cloned(),
            Raw::Z(z) => z.get(i as usize).copied().map(V::Real),
        }
    }

    pub fn at(&self, i: i64) -> V {
        if i < 0 {
            return V::Real(0.0);
        }
        self.read_at(i).unwrap_or(V::Real(0.0))
    }

    pub fn wrap_at(&self, i: i64) -> V {
        let n = self.len() as i64;
        if n == 0 {
            return V::Real(0.0);
        }
        self.read_at(imod(i, n)).unwrap_or(V::Real(0.0))
    }

    pub fn clip_at(&self, i: i64) -> V {
        let n = self.len() as i64;
        if n == 0 {
            return V::Real(0.0);
        }
        self.read_at(i.clamp(0, n - 1)).unwrap_or(V::Real(0.0))
    }

    pub fn fold_at(&self, i: i64) -> V {
        let n = self.len() as i64;
        if n == 0 {
            return V::Real(0.0);
        }
        self.read_at(ifold(i, n)).unwrap_or(V::Real(0.0))
    }

    pub fn at_z(&self, i: i64) -> Z {
        self.at(i).as_float()
    }

    pub fn wrap_at_z(&self, i: i64) -> Z {
        self.wrap_at(i).as_float()
    }

    pub fn clip_at_z(&self, i: i64) -> Z {
        self.clip_at(i).as_float()
    }

    pub fn fold_at_z(&self, i: i64) -> Z {
        self.fold_at(i).as_float()
    }

    /// Run `f` over the scalar contents. Only valid on Z arrays.
    pub fn with_z<R>(&self, f: impl FnOnce(&[Z]) -> R) -> R {
        match &*self.data.read() {
            Raw::Z(z) => f(z),
            Raw::V(_) => f(&[]),
        }
    }

    /// Run `f` over the boxed contents. Only valid on V arrays.
    pub fn with_v<R>(&self, f: impl FnOnce(&[V]) -> R) -> R {
        match &*self.data.read() {
            Raw::V(v) => f(v),
            Raw::Z(_) => f(&[]),
        }
    }

    /// Copy the contents out as boxed values.
    pub fn to_vs(&self) -> Vec<V> {
        match &*self.data.read() {
            Raw::V(v) => v.clone(),
            Raw::Z(z) => z.iter().map(|&z| V::Real(z)).collect(),
        }
    }

    /// Copy the contents out as scalars.
    pub fn to_zs(&self) -> Vec<Z> {
        match &*self.data.read() {
            Raw::V(v) => v.iter().map(|v| v.as_float()).collect(),
            Raw::Z(z) => z.clone(),
        }
    }

    /// Lexicographic comparison; on a common prefix the shorter array is
    /// smaller.
    pub fn compare(
        self: &Arc<Self>,
        th: &mut Thread,
        other: &Arc<Array>,
    ) -> Result<Ordering> {
        let n = self.len().min(other.len());
        for i in 0..n {
            let ord = self.at(i as i64).compare(th, &other.at(i as i64))?;
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(self.len().cmp(&other.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn z_array(items: &[Z]) -> Array {
        Array::from_zs(items.to_vec())
    }

    #[test]
    fn add_and_read_back() {
        let a = Array::new(ItemKind::V, 4);
        a.add(V::Real(1.0));
        a.add(V::Real(2.0));
        a.add(V::Real(3.0));
        assert_eq!(a.len(), 3);
        assert_eq!(a.at(0).as_float(), 1.0);
        assert_eq!(a.at(2).as_float(), 3.0);
    }

    #[test]
    fn growth_preserves_elements() {
        let a = Array::new(ItemKind::Z, 1);
        for i in 0..100 {
            a.add_z(i as Z);
        }
        assert_eq!(a.len(), 100);
        for i in 0..100 {
            assert_eq!(a.at_z(i), i as Z);
        }
    }

    #[test]
    fn out_of_range_at_is_zero() {
        let a = z_array(&[10.0, 20.0, 30.0]);
        assert_eq!(a.at_z(-1), 0.0);
        assert_eq!(a.at_z(3), 0.0);
        assert_eq!(a.at_z(100), 0.0);
    }

    #[test]
    fn wrap_at_uses_euclidean_modulo() {
        let a = z_array(&[10.0, 20.0, 30.0]);
        assert_eq!(a.wrap_at_z(0), 10.0);
        assert_eq!(a.wrap_at_z(3), 10.0);
        assert_eq!(a.wrap_at_z(4), 20.0);
        assert_eq!(a.wrap_at_z(5), 30.0);
        assert_eq!(a.wrap_at_z(-1), 30.0);
        assert_eq!(a.wrap_at_z(-3), 10.0);
    }

    #[test]
    fn wrap_at_matches_at_mod_n() {
        let a = z_array(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let n = a.len() as i64;
        for i in -20..20 {
            assert_eq!(a.wrap_at_z(i), a.at_z(imod(i, n)), "i = {i}");
        }
    }

    #[test]
    fn clip_at_saturates() {
        let a = z_array(&[10.0, 20.0, 30.0]);
        assert_eq!(a.clip_at_z(-5), 10.0);
        assert_eq!(a.clip_at_z(0), 10.0);
        assert_eq!(a.clip_at_z(2), 30.0);
        assert_eq!(a.clip_at_z(100), 30.0);
    }

    #[test]
    fn fold_at_mirrors() {
        let a = z_array(&[10.0, 20.0, 30.0]);
        assert_eq!(a.fold_at_z(0), 10.0);
        assert_eq!(a.fold_at_z(1), 20.0);
        assert_eq!(a.fold_at_z(2), 30.0);
        assert_eq!(a.fold_at_z(3), 20.0);
        assert_eq!(a.fold_at_z(4), 10.0);
        assert_eq!(a.fold_at_z(5), 20.0);
    }

    #[test]
    fn fold_at_is_periodic() {
        let a = z_array(&[1.0, 2.0, 3.0, 4.0]);
        let n = a.len() as i64;
        let period = 2 * (n - 1);
        for i in 0..32 {
            assert_eq!(a.fold_at_z(i), a.fold_at_z(i + period), "i = {i}");
        }
    }

    #[test]
    fn single_element_fold_and_wrap() {
        let a = z_array(&[7.0]);
        for i in -3..4 {
            assert_eq!(a.wrap_at_z(i), 7.0);
            assert_eq!(a.fold_at_z(i), 7.0);
            assert_eq!(a.clip_at_z(i), 7.0);
        }
    }

    #[test]
    fn empty_array_reads_zero_everywhere() {
        let a = Array::new(ItemKind::Z, 0);
        assert_eq!(a.at_z(0), 0.0);
        assert_eq!(a.wrap_at_z(5), 0.0);
        assert_eq!(a.clip_at_z(5), 0.0);
        assert_eq!(a.fold_at_z(5), 0.0);
    }

    #[test]
    fn v_array_boxes_scalars_added_as_z() {
        let a = Array::new(ItemKind::V, 2);
        a.add_z(1.5);
        assert!(a.at(0).is_real());
        assert_eq!(a.at(0).as_float(), 1.5);
    }

    #[test]
    fn add_all_concatenates() {
        let a = z_array(&[1.0, 2.0]);
        let b = z_array(&[3.0, 4.0]);
        a.add_all(&b);
        assert_eq!(a.to_zs(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn put_replaces_in_place() {
        let a = z_array(&[0.0, 0.0]);
        a.put_z(0, 42.0);
        a.put_z(1, 99.0);
        assert_eq!(a.at_z(0), 42.0);
        assert_eq!(a.at_z(1), 99.0);
    }
}
