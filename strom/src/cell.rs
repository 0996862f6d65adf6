//! Mutable cells: references and plugs.
//!
//! `Ref` guards a whole value so readers always observe a consistent
//! scalar-or-object pair; `ZRef` is a bare atomic scalar. Plugs hold a
//! swappable source cursor plus a change counter so audio-rate consumers
//! can notice control-rate source swaps without mixing samples from the
//! old and new sources.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::input::{VIn, ZIn};
use crate::value::{V, Z};

/// A single mutable value cell.
#[derive(Debug)]
pub struct Ref {
    cell: Mutex<V>,
}

impl Ref {
    pub fn new(v: V) -> Ref {
        Ref {
            cell: Mutex::new(v),
        }
    }

    /// Publish a new value.
    pub fn set(&self, v: V) {
        *self.cell.lock() = v;
    }

    /// Read the current value.
    pub fn deref(&self) -> V {
        self.cell.lock().clone()
    }
}

/// A single mutable scalar cell. Reads and writes are relaxed atomics;
/// there is no ordering relationship with neighbouring data.
pub struct ZRef {
    bits: AtomicU64,
}

impl ZRef {
    pub fn new(z: Z) -> ZRef {
        ZRef {
            bits: AtomicU64::new(z.to_bits()),
        }
    }

    pub fn set(&self, z: Z) {
        self.bits.store(z.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> Z {
        Z::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

impl std::fmt::Debug for ZRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ZRef({})", self.get())
    }
}

struct PlugState<C> {
    source: C,
    change_count: u64,
}

/// A mutable cell holding a value-source cursor.
pub struct Plug {
    state: Mutex<PlugState<VIn>>,
}

impl Plug {
    pub fn new(v: V) -> Plug {
        Plug {
            state: Mutex::new(PlugState {
                source: VIn::new(v),
                change_count: 0,
            }),
        }
    }

    /// Publish a new source and bump the change counter.
    pub fn set(&self, v: V) {
        let mut state = self.state.lock();
        state.source = VIn::new(v);
        state.change_count += 1;
    }

    /// Snapshot the current cursor and its change count atomically.
    pub fn get(&self) -> (VIn, u64) {
        let state = self.state.lock();
        (state.source.clone(), state.change_count)
    }

    /// The current change count alone, for cheap polling.
    pub fn change_count(&self) -> u64 {
        self.state.lock().change_count
    }
}

impl std::fmt::Debug for Plug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Plug(changes={})", self.change_count())
    }
}

/// A mutable cell holding a signal-source cursor.
pub struct ZPlug {
    state: Mutex<PlugState<ZIn>>,
}

impl ZPlug {
    pub fn new(zin: ZIn) -> ZPlug {
        ZPlug {
            state: Mutex::new(PlugState {
                source: zin,
                change_count: 0,
            }),
        }
    }

    pub fn set(&self, zin: ZIn) {
        let mut state = self.state.lock();
        state.source = zin;
        state.change_count += 1;
    }

    pub fn get(&self) -> (ZIn, u64) {
        let state = self.state.lock();
        (state.source.clone(), state.change_count)
    }

    pub fn change_count(&self) -> u64 {
        self.state.lock().change_count
    }
}

impl std::fmt::Debug for ZPlug {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ZPlug(changes={})", self.change_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::test_thread;
    use crate::list::List;

    #[test]
    fn ref_set_and_deref() {
        let r = Ref::new(V::Real(3.14));
        assert_eq!(r.deref().as_float(), 3.14);
        r.set(V::Real(2.71));
        assert_eq!(r.deref().as_float(), 2.71);
    }

    #[test]
    fn captured_copy_is_unchanged_by_set() {
        let r = Ref::new(V::Real(1.0));
        let captured = r.deref();
        r.set(V::Real(2.0));
        assert_eq!(captured.as_float(), 1.0);
        assert_eq!(r.deref().as_float(), 2.0);
    }

    #[test]
    fn zref_round_trips_scalars() {
        let r = ZRef::new(0.5);
        assert_eq!(r.get(), 0.5);
        r.set(-1.25);
        assert_eq!(r.get(), -1.25);
    }

    #[test]
    fn plug_bumps_change_count_on_set() {
        let p = Plug::new(V::Real(0.0));
        let (_, c0) = p.get();
        assert_eq!(c0, 0);
        p.set(V::Real(1.0));
        let (_, c1) = p.get();
        assert_eq!(c1, 1);
        p.set(V::Real(2.0));
        assert_eq!(p.change_count(), 2);
    }

    #[test]
    fn plug_snapshot_reflects_latest_source() {
        let mut th = test_thread();
        let p = Plug::new(V::Real(1.0));
        p.set(V::List(List::from_zs(vec![9.0])));
        let (mut vin, count) = p.get();
        assert_eq!(count, 1);
        let mut v = V::default();
        assert!(!vin.one(&mut th, &mut v).unwrap());
        assert_eq!(v.as_float(), 9.0);
    }

    #[test]
    fn zplug_swaps_sources_without_mixing() {
        let mut th = test_thread();
        let p = ZPlug::new(ZIn::from_list(List::from_zs(vec![1.0, 1.0])));
        let (mut a, ca) = p.get();
        let mut z = 0.0;
        a.one_z(&mut th, &mut z).unwrap();
        assert_eq!(z, 1.0);

        p.set(ZIn::constant(5.0));
        let (mut b, cb) = p.get();
        assert_ne!(ca, cb, "consumer can tell the source changed");
        b.one_z(&mut th, &mut z).unwrap();
        assert_eq!(z, 5.0);
    }
}
