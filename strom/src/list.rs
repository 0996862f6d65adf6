//! Lazy lists: block-wise pull streams.
//!
//! A `List` is a spine cell in one of three states. A *thunk* holds the
//! generator that will fill it; forcing runs the generator under the
//! cell's lock and transitions the cell to *filled* (an array block plus
//! an optional continuation) or *end*. The spine is pulled, never pushed:
//! consumers hold cursors and ask for blocks; nothing is produced ahead
//! of demand.
//!
//! A generator is owned by exactly one unforced cell at a time. When it
//! produces a block and continues, ownership moves into the freshly
//! chained thunk, so there is no cycle between a list and its generator.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use crate::array::Array;
use crate::error::{Error, Result};
use crate::thread::Thread;
use crate::value::{ItemKind, V};

/// Default block granularity for generators.
pub const BLOCK_SIZE: usize = 64;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ListFlags: u8 {
        /// Every reachable block is bounded.
        const FINITE = 1;
        /// Opt this value out of automapping.
        const NO_EACH = 2;
    }
}

/// What a generator hands back from one pull.
pub enum Pulled {
    /// A block; the generator continues afterwards.
    Block(Array),
    /// The final block; the stream ends after it.
    Last(Array),
    /// No more data.
    End,
}

/// A producer cell. `pull` is invoked under the owning cell's lock, so it
/// runs on at most one thread at a time for any given list.
pub trait Gen: Send {
    fn name(&self) -> &'static str {
        "gen"
    }

    fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    fn pull(&mut self, th: &mut Thread) -> Result<Pulled>;
}

enum Cell {
    Thunk(Box<dyn Gen>),
    Filled {
        array: Arc<Array>,
        next: Option<Arc<List>>,
    },
    End,
}

/// The result of forcing one spine cell.
pub enum Forced {
    Data(Arc<Array>, Option<Arc<List>>),
    End,
}

pub struct List {
    kind: ItemKind,
    flags: AtomicU8,
    cell: Mutex<Cell>,
}

impl List {
    pub fn from_array(array: Arc<Array>) -> Arc<List> {
        Arc::new(List {
            kind: array.kind(),
            flags: AtomicU8::new(ListFlags::FINITE.bits()),
            cell: Mutex::new(Cell::Filled { array, next: None }),
        })
    }

    pub fn from_zs(zs: Vec<f64>) -> Arc<List> {
        List::from_array(Arc::new(Array::from_zs(zs)))
    }

    pub fn from_vs(vs: Vec<V>) -> Arc<List> {
        List::from_array(Arc::new(Array::from_vs(vs)))
    }

    /// A filled head block chained to a continuation.
    pub fn from_array_next(array: Arc<Array>, next: Arc<List>) -> Arc<List> {
        let finite = next.is_finite();
        let mut flags = ListFlags::empty();
        if finite {
            flags |= ListFlags::FINITE;
        }
        Arc::new(List {
            kind: array.kind(),
            flags: AtomicU8::new(flags.bits()),
            cell: Mutex::new(Cell::Filled {
                array,
                next: Some(next),
            }),
        })
    }

    /// A thunk over a generator. Finiteness is declared by the creator and
    /// inherited by every chained cell.
    pub fn from_gen(gen: Box<dyn Gen>, kind: ItemKind, finite: bool) -> Arc<List> {
        let mut flags = ListFlags::empty();
        if finite {
            flags |= ListFlags::FINITE;
        }
        Arc::new(List {
            kind,
            flags: AtomicU8::new(flags.bits()),
            cell: Mutex::new(Cell::Thunk(gen)),
        })
    }

    pub fn empty(kind: ItemKind) -> Arc<List> {
        Arc::new(List {
            kind,
            flags: AtomicU8::new(ListFlags::FINITE.bits()),
            cell: Mutex::new(Cell::End),
        })
    }

    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    fn flags(&self) -> ListFlags {
        ListFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    pub fn is_finite(&self) -> bool {
        self.flags().contains(ListFlags::FINITE)
    }

    pub fn is_no_each(&self) -> bool {
        self.flags().contains(ListFlags::NO_EACH)
    }

    pub fn mark_no_each(&self) {
        self.flags
            .fetch_or(ListFlags::NO_EACH.bits(), Ordering::Relaxed);
    }

    pub fn is_thunk(&self) -> bool {
        matches!(&*self.cell.lock(), Cell::Thunk(_))
    }

    pub fn is_end(&self) -> bool {
        matches!(&*self.cell.lock(), Cell::End)
    }

    /// A packed list is a single filled block with no continuation; the
    /// random-access operations below require it.
    pub fn is_packed(&self) -> bool {
        matches!(
            &*self.cell.lock(),
            Cell::Filled { next: None, .. }
        )
    }

    /// The materialized block of a packed list.
    pub fn packed_array(&self) -> Option<Arc<Array>> {
        match &*self.cell.lock() {
            Cell::Filled { array, next: None } => Some(array.clone()),
            _ => None,
        }
    }

    /// Force this cell: run the generator if the cell is still a thunk,
    /// then report the block and continuation.
    ///
    /// The generator runs under the cell lock, which is what guarantees a
    /// given list's `pull` is entered by one thread at a time.
    pub fn force(self: &Arc<Self>, th: &mut Thread) -> Result<Forced> {
        let mut cell = self.cell.lock();
        loop {
            match &*cell {
                Cell::Filled { array, next } => {
                    return Ok(Forced::Data(array.clone(), next.clone()));
                }
                Cell::End => return Ok(Forced::End),
                Cell::Thunk(_) => {
                    let Cell::Thunk(mut gen) =
                        std::mem::replace(&mut *cell, Cell::End)
                    else {
                        unreachable!()
                    };
                    match gen.pull(th) {
                        Ok(Pulled::Block(array)) => {
                            let next = Arc::new(List {
                                kind: self.kind,
                                flags: AtomicU8::new(
                                    self.flags.load(Ordering::Relaxed),
                                ),
                                cell: Mutex::new(Cell::Thunk(gen)),
                            });
                            *cell = Cell::Filled {
                                array: Arc::new(array),
                                next: Some(next),
                            };
                        }
                        Ok(Pulled::Last(array)) => {
                            *cell = Cell::Filled {
                                array: Arc::new(array),
                                next: None,
                            };
                        }
                        Ok(Pulled::End) => {
                            *cell = Cell::End;
                        }
                        Err(e) => {
                            // the cell stays ended; a failed stream does
                            // not restart
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    /// Install a continuation at the end of the spine. The spine up to the
    /// end must already be materialized.
    pub fn link(self: &Arc<Self>, cont: Arc<List>) {
        let mut cont = Some(cont);
        let mut current = self.clone();
        loop {
            let walked = {
                let mut cell = current.cell.lock();
                match &mut *cell {
                    Cell::Filled { next, .. } => match next {
                        Some(n) => n.clone(),
                        None => {
                            *next = cont.take();
                            return;
                        }
                    },
                    Cell::End => {
                        *cell = Cell::Filled {
                            array: Arc::new(Array::new(current.kind, 0)),
                            next: cont.take(),
                        };
                        return;
                    }
                    // unforced spine: nothing to link onto
                    Cell::Thunk(_) => return,
                }
            };
            current = walked;
        }
    }

    /// Force thunks along the spine and flatten into a single block.
    ///
    /// With a `limit`, returns `Ok(None)` once more than `limit` items
    /// would be needed. Without one, the list must be finite.
    pub fn pack(
        self: &Arc<Self>,
        th: &mut Thread,
        limit: Option<usize>,
    ) -> Result<Option<Arc<List>>> {
        if self.is_packed() {
            return Ok(Some(self.clone()));
        }
        if limit.is_none() && !self.is_finite() {
            return Err(Error::IndefiniteOperation("pack"));
        }
        let acc = Array::new(self.kind, BLOCK_SIZE);
        let mut current = self.clone();
        loop {
            match current.force(th)? {
                Forced::End => break,
                Forced::Data(array, next) => {
                    acc.add_all(&array);
                    if let Some(limit) = limit {
                        if acc.len() > limit {
                            return Ok(None);
                        }
                    }
                    match next {
                        Some(n) => current = n,
                        None => break,
                    }
                }
            }
        }
        Ok(Some(List::from_array(Arc::new(acc))))
    }

    /// Force the entire spine without flattening. Finite lists only.
    pub fn force_all(self: &Arc<Self>, th: &mut Thread) -> Result<()> {
        if !self.is_finite() {
            return Err(Error::IndefiniteOperation("force"));
        }
        let mut current = self.clone();
        loop {
            match current.force(th)? {
                Forced::End => return Ok(()),
                Forced::Data(_, Some(next)) => current = next,
                Forced::Data(_, None) => return Ok(()),
            }
        }
    }

    /// Total element count; forces the spine. Fails on indefinite streams.
    pub fn length(self: &Arc<Self>, th: &mut Thread) -> Result<i64> {
        if !self.is_finite() {
            return Err(Error::IndefiniteOperation("length"));
        }
        let mut total: i64 = 0;
        let mut current = self.clone();
        loop {
            match current.force(th)? {
                Forced::End => return Ok(total),
                Forced::Data(array, next) => {
                    total += array.len() as i64;
                    match next {
                        Some(n) => current = n,
                        None => return Ok(total),
                    }
                }
            }
        }
    }

    // ── random access on packed lists ──────────────────────────────

    pub fn at(&self, i: i64) -> Option<V> {
        self.packed_array().map(|a| a.at(i))
    }

    pub fn wrap_at(&self, i: i64) -> Option<V> {
        self.packed_array().map(|a| a.wrap_at(i))
    }

    pub fn clip_at(&self, i: i64) -> Option<V> {
        self.packed_array().map(|a| a.clip_at(i))
    }

    pub fn fold_at(&self, i: i64) -> Option<V> {
        self.packed_array().map(|a| a.fold_at(i))
    }

    // ── elementwise comparison ─────────────────────────────────────

    pub fn equals(
        a: &Arc<List>,
        b: &Arc<List>,
        th: &mut Thread,
    ) -> Result<bool> {
        if Arc::ptr_eq(a, b) {
            return Ok(true);
        }
        let mut ca = crate::input::VIn::new(V::List(a.clone()));
        let mut cb = crate::input::VIn::new(V::List(b.clone()));
        loop {
            let mut va = V::default();
            let mut vb = V::default();
            let da = ca.one(th, &mut va)?;
            let db = cb.one(th, &mut vb)?;
            match (da, db) {
                (true, true) => return Ok(true),
                (true, false) | (false, true) => return Ok(false),
                (false, false) => {
                    if !va.equals(th, &vb)? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    pub fn compare(
        a: &Arc<List>,
        b: &Arc<List>,
        th: &mut Thread,
    ) -> Result<std::cmp::Ordering> {
        use std::cmp::Ordering::*;
        let mut ca = crate::input::VIn::new(V::List(a.clone()));
        let mut cb = crate::input::VIn::new(V::List(b.clone()));
        loop {
            let mut va = V::default();
            let mut vb = V::default();
            let da = ca.one(th, &mut va)?;
            let db = cb.one(th, &mut vb)?;
            match (da, db) {
                (true, true) => return Ok(Equal),
                (true, false) => return Ok(Less),
                (false, true) => return Ok(Greater),
                (false, false) => {
                    let ord = va.compare(th, &vb)?;
                    if ord != Equal {
                        return Ok(ord);
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for List {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.cell.lock() {
            Cell::Thunk(g) => format!("thunk({})", g.name()),
            Cell::Filled { array, next } => format!(
                "filled(len={}, next={})",
                array.len(),
                next.is_some()
            ),
            Cell::End => "end".to_owned(),
        };
        write!(f, "List({:?}, finite={}, {state})", self.kind, self.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_thread;

    /// Counts 0, 1, 2, ... forever (or up to a limit), in blocks of 4.
    pub struct CountGen {
        next: f64,
        limit: Option<usize>,
        produced: usize,
    }

    impl CountGen {
        pub fn new(limit: Option<usize>) -> Self {
            Self {
                next: 0.0,
                limit,
                produced: 0,
            }
        }
    }

    impl Gen for CountGen {
        fn name(&self) -> &'static str {
            "count"
        }

        fn block_size(&self) -> usize {
            4
        }

        fn pull(&mut self, _th: &mut Thread) -> Result<Pulled> {
            let mut block = Vec::with_capacity(self.block_size());
            for _ in 0..self.block_size() {
                if let Some(limit) = self.limit {
                    if self.produced >= limit {
                        break;
                    }
                }
                block.push(self.next);
                self.next += 1.0;
                self.produced += 1;
            }
            if block.is_empty() {
                return Ok(Pulled::End);
            }
            let done = self.limit.is_some_and(|l| self.produced >= l);
            let array = Array::from_zs(block);
            Ok(if done {
                Pulled::Last(array)
            } else {
                Pulled::Block(array)
            })
        }
    }

    fn counting_list(limit: Option<usize>) -> Arc<List> {
        List::from_gen(
            Box::new(CountGen::new(limit)),
            ItemKind::Z,
            limit.is_some(),
        )
    }

    #[test]
    fn array_list_is_finite_with_matching_length() {
        let mut th = test_thread();
        let l = List::from_zs(vec![1.0, 2.0, 3.0]);
        assert!(l.is_finite());
        assert_eq!(l.length(&mut th).unwrap(), 3);
    }

    #[test]
    fn gen_list_reports_declared_finiteness() {
        assert!(counting_list(Some(10)).is_finite());
        assert!(!counting_list(None).is_finite());
    }

    #[test]
    fn forcing_transitions_thunk_to_filled() {
        let mut th = test_thread();
        let l = counting_list(Some(10));
        assert!(l.is_thunk());
        match l.force(&mut th).unwrap() {
            Forced::Data(array, next) => {
                assert_eq!(array.len(), 4);
                assert_eq!(array.at_z(0), 0.0);
                assert!(next.is_some());
            }
            Forced::End => panic!("expected data"),
        }
        assert!(!l.is_thunk());
    }

    #[test]
    fn forcing_twice_yields_same_contents() {
        let mut th = test_thread();
        let l = counting_list(Some(6));
        let first = match l.force(&mut th).unwrap() {
            Forced::Data(a, _) => a.to_zs(),
            Forced::End => panic!(),
        };
        let second = match l.force(&mut th).unwrap() {
            Forced::Data(a, _) => a.to_zs(),
            Forced::End => panic!(),
        };
        assert_eq!(first, second);
    }

    #[test]
    fn pack_flattens_blocks() {
        let mut th = test_thread();
        let l = counting_list(Some(10));
        let packed = l.pack(&mut th, None).unwrap().unwrap();
        assert!(packed.is_packed());
        let array = packed.packed_array().unwrap();
        assert_eq!(array.len(), 10);
        for i in 0..10 {
            assert_eq!(array.at_z(i), i as f64);
        }
    }

    #[test]
    fn packing_a_packed_list_returns_it() {
        let mut th = test_thread();
        let l = List::from_zs(vec![1.0, 2.0]);
        let packed = l.pack(&mut th, None).unwrap().unwrap();
        assert!(Arc::ptr_eq(&l, &packed));
    }

    #[test]
    fn pack_with_limit_bails_on_long_streams() {
        let mut th = test_thread();
        let l = counting_list(None);
        assert!(l.pack(&mut th, Some(16)).unwrap().is_none());
    }

    #[test]
    fn pack_without_limit_rejects_indefinite() {
        let mut th = test_thread();
        let l = counting_list(None);
        assert!(matches!(
            l.pack(&mut th, None),
            Err(Error::IndefiniteOperation(_))
        ));
    }

    #[test]
    fn length_fails_on_indefinite() {
        let mut th = test_thread();
        let l = counting_list(None);
        assert!(matches!(
            l.length(&mut th),
            Err(Error::IndefiniteOperation(_))
        ));
    }

    #[test]
    fn short_blocks_chain_until_end() {
        let mut th = test_thread();
        let l = counting_list(Some(9)); // 4 + 4 + 1
        let mut blocks = Vec::new();
        let mut current = l;
        loop {
            match current.force(&mut th).unwrap() {
                Forced::End => break,
                Forced::Data(array, next) => {
                    blocks.push(array.len());
                    match next {
                        Some(n) => current = n,
                        None => break,
                    }
                }
            }
        }
        assert_eq!(blocks, vec![4, 4, 1]);
    }

    #[test]
    fn link_attaches_continuation() {
        let mut th = test_thread();
        let a = List::from_zs(vec![1.0, 2.0]);
        let b = List::from_zs(vec![3.0, 4.0]);
        a.link(b);
        let packed = a.pack(&mut th, None).unwrap().unwrap();
        assert_eq!(packed.packed_array().unwrap().to_zs(), vec![
            1.0, 2.0, 3.0, 4.0
        ]);
    }

    #[test]
    fn equals_compares_elementwise() {
        let mut th = test_thread();
        let a = List::from_zs(vec![1.0, 2.0, 3.0]);
        let b = counting_list(Some(3)); // 0 1 2
        let c = List::from_zs(vec![0.0, 1.0, 2.0]);
        assert!(!List::equals(&a, &b, &mut th).unwrap());
        assert!(List::equals(&b, &c, &mut th).unwrap());
    }

    #[test]
    fn compare_orders_by_prefix_then_length() {
        let mut th = test_thread();
        let a = List::from_zs(vec![1.0, 2.0]);
        let b = List::from_zs(vec![1.0, 2.0, 3.0]);
        assert_eq!(
            List::compare(&a, &b, &mut th).unwrap(),
            std::cmp::Ordering::Less
        );
    }
}
