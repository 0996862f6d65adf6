//! Persistent ordered map nodes and the global table built on them.
//!
//! The tree is a binary search tree ordered by 63-bit key hash, ties
//! broken by a monotonic serial assigned at first insertion. Child slots
//! are atomic pointers: pure puts path-copy and share untouched subtrees,
//! impure puts publish a fully built replacement node into the parent's
//! slot so concurrent readers see either the old subtree or the new one.

use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::thread::Thread;
use crate::value::V;

static NEXT_SERIAL: AtomicI64 = AtomicI64::new(1);

fn fresh_serial() -> i64 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

pub struct TreeNode {
    key: V,
    value: V,
    hash: i64,
    serial: i64,
    left: AtomicPtr<TreeNode>,
    right: AtomicPtr<TreeNode>,
}

// SAFETY: the child pointers are reference-counted nodes published with
// release stores and read with acquire loads; V payloads are Send + Sync.
unsafe impl Send for TreeNode {}
// SAFETY: see above.
unsafe impl Sync for TreeNode {}

/// Turn an optional node into a raw child pointer, transferring one count.
fn into_raw(node: Option<Arc<TreeNode>>) -> *mut TreeNode {
    match node {
        Some(n) => Arc::into_raw(n) as *mut TreeNode,
        None => ptr::null_mut(),
    }
}

/// Clone the Arc a raw child pointer stands for.
///
/// # Safety
/// `p` must be a pointer previously produced by `Arc::into_raw` and still
/// holding at least one count.
unsafe fn clone_raw(p: *const TreeNode) -> Option<Arc<TreeNode>> {
    if p.is_null() {
        return None;
    }
    Arc::increment_strong_count(p);
    Some(Arc::from_raw(p))
}

impl TreeNode {
    fn new(
        key: V,
        hash: i64,
        value: V,
        serial: i64,
        left: Option<Arc<TreeNode>>,
        right: Option<Arc<TreeNode>>,
    ) -> Self {
        Self {
            key,
            value,
            hash,
            serial,
            left: AtomicPtr::new(into_raw(left)),
            right: AtomicPtr::new(into_raw(right)),
        }
    }

    fn new_leaf(key: V, hash: i64, value: V) -> Self {
        Self::new(key, hash, value, fresh_serial(), None, None)
    }

    pub fn key(&self) -> &V {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn hash(&self) -> i64 {
        self.hash
    }

    pub fn serial(&self) -> i64 {
        self.serial
    }

    pub fn left(&self) -> Option<Arc<TreeNode>> {
        // SAFETY: the slot holds a counted pointer published by a release
        // store; a concurrent impure put may replace it, but the engine
        // serializes dictionary writers on the interpreter thread.
        unsafe { clone_raw(self.left.load(Ordering::Acquire)) }
    }

    pub fn right(&self) -> Option<Arc<TreeNode>> {
        // SAFETY: as in `left`.
        unsafe { clone_raw(self.right.load(Ordering::Acquire)) }
    }

    /// Pure put: produce a new root by path-copying from the search target.
    /// Unchanged subtrees are shared with the old tree.
    pub fn put_pure(
        node: Option<&Arc<TreeNode>>,
        key: &V,
        hash: i64,
        value: &V,
    ) -> Arc<TreeNode> {
        let Some(n) = node else {
            return Arc::new(TreeNode::new_leaf(key.clone(), hash, value.clone()));
        };
        if hash < n.hash {
            let left = TreeNode::put_pure(n.left().as_ref(), key, hash, value);
            Arc::new(TreeNode::new(
                n.key.clone(),
                n.hash,
                n.value.clone(),
                n.serial,
                Some(left),
                n.right(),
            ))
        } else if hash > n.hash || !key.key_equals(&n.key) {
            // equal hash with a different key sorts right (newer serials
            // are inserted after older ones)
            let right = TreeNode::put_pure(n.right().as_ref(), key, hash, value);
            Arc::new(TreeNode::new(
                n.key.clone(),
                n.hash,
                n.value.clone(),
                n.serial,
                n.left(),
                Some(right),
            ))
        } else {
            Arc::new(TreeNode::new(
                n.key.clone(),
                n.hash,
                value.clone(),
                n.serial,
                n.left(),
                n.right(),
            ))
        }
    }

    /// Search on (hash, key).
    pub fn get(node: &Arc<TreeNode>, key: &V, hash: i64) -> Option<V> {
        let mut current = node.clone();
        loop {
            let next = if hash < current.hash {
                current.left()
            } else if hash > current.hash || !key.key_equals(&current.key) {
                current.right()
            } else {
                return Some(current.value.clone());
            };
            current = next?;
        }
    }

    /// In-order traversal: yields entries in (hash, serial) ascending
    /// order.
    pub fn get_all(node: &Arc<TreeNode>, out: &mut Vec<Arc<TreeNode>>) {
        if let Some(left) = node.left() {
            TreeNode::get_all(&left, out);
        }
        out.push(node.clone());
        if let Some(right) = node.right() {
            TreeNode::get_all(&right, out);
        }
    }
}

impl Drop for TreeNode {
    fn drop(&mut self) {
        for slot in [&self.left, &self.right] {
            let p = slot.load(Ordering::Acquire);
            if !p.is_null() {
                // SAFETY: the slot owns one count of the child.
                unsafe { drop(Arc::from_raw(p)) };
            }
        }
    }
}

impl std::fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TreeNode({:?} -> {:?}, h={}, s={})",
            self.key, self.value, self.hash, self.serial
        )
    }
}

/// A container holding one atomic pointer to a tree root.
///
/// Nodes displaced by impure puts are parked in `retired` rather than
/// freed, so a reader that loaded the old pointer just before the swap
/// can still dereference it. They are released when the table drops.
pub struct GTable {
    root: AtomicPtr<TreeNode>,
    retired: Mutex<Vec<Arc<TreeNode>>>,
}

// SAFETY: the root slot follows the same publish discipline as child slots.
unsafe impl Send for GTable {}
// SAFETY: see above.
unsafe impl Sync for GTable {}

impl GTable {
    pub fn new(root: Option<Arc<TreeNode>>) -> Self {
        Self {
            root: AtomicPtr::new(into_raw(root)),
            retired: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(None)
    }

    pub fn tree(&self) -> Option<Arc<TreeNode>> {
        // SAFETY: the root holds one count while present.
        unsafe { clone_raw(self.root.load(Ordering::Acquire)) }
    }

    pub fn get(&self, key: &V) -> Option<V> {
        let root = self.tree()?;
        TreeNode::get(&root, key, key.key_hash())
    }

    pub fn must_get(&self, key: &V) -> Result<V> {
        self.get(key)
            .ok_or_else(|| Error::NotFound(key.to_display_string()))
    }

    /// Pure put: a new table sharing structure with this one.
    pub fn put_pure(&self, key: &V, value: &V) -> GTable {
        let root = self.tree();
        let new_root =
            TreeNode::put_pure(root.as_ref(), key, key.key_hash(), value);
        GTable::new(Some(new_root))
    }

    /// Impure put: publish the change into this table in place. Returns
    /// `true` when the key was newly inserted.
    ///
    /// New nodes are fully initialized before publication, so readers
    /// running a pure traversal see either the old subtree or the new one.
    pub fn put_impure(&self, key: &V, value: &V) -> bool {
        let hash = key.key_hash();
        'retry: loop {
            // Pin every node on the search path so a concurrent
            // replacement cannot free what we are standing on.
            let mut path: Vec<Arc<TreeNode>> = Vec::new();
            let mut slot: *const AtomicPtr<TreeNode> = &self.root;
            loop {
                // SAFETY: `slot` points into `self` or into a pinned node.
                let p = unsafe { (*slot).load(Ordering::Acquire) };
                if p.is_null() {
                    let leaf = Arc::new(TreeNode::new_leaf(
                        key.clone(),
                        hash,
                        value.clone(),
                    ));
                    let raw = Arc::into_raw(leaf) as *mut TreeNode;
                    // SAFETY: `slot` is still valid (path is pinned).
                    let res = unsafe {
                        (*slot).compare_exchange(
                            ptr::null_mut(),
                            raw,
                            Ordering::Release,
                            Ordering::Relaxed,
                        )
                    };
                    match res {
                        Ok(_) => return true,
                        Err(_) => {
                            // SAFETY: we still own the count we minted.
                            unsafe { drop(Arc::from_raw(raw)) };
                            continue 'retry;
                        }
                    }
                }
                // SAFETY: `p` was counted when published; pin it.
                let node = unsafe { clone_raw(p) }.expect("non-null child");
                if hash < node.hash {
                    slot = &node.left;
                    path.push(node);
                } else if hash > node.hash || !key.key_equals(&node.key) {
                    slot = &node.right;
                    path.push(node);
                } else {
                    // Replace: a new node with the same serial sharing both
                    // children, swapped into the parent slot.
                    let repl = Arc::new(TreeNode::new(
                        node.key.clone(),
                        node.hash,
                        value.clone(),
                        node.serial,
                        node.left(),
                        node.right(),
                    ));
                    let raw = Arc::into_raw(repl) as *mut TreeNode;
                    // SAFETY: `slot` is valid; `p` is the node we pinned.
                    let res = unsafe {
                        (*slot).compare_exchange(
                            p,
                            raw,
                            Ordering::Release,
                            Ordering::Relaxed,
                        )
                    };
                    match res {
                        Ok(old) => {
                            // SAFETY: the slot owned one count of `old`;
                            // park it so in-flight readers stay valid.
                            let old = unsafe { Arc::from_raw(old) };
                            self.retired.lock().push(old);
                            return false;
                        }
                        Err(_) => {
                            // SAFETY: we still own the count we minted.
                            unsafe { drop(Arc::from_raw(raw)) };
                            continue 'retry;
                        }
                    }
                }
            }
        }
    }

    /// All entries in (hash, serial) order.
    pub fn sorted(&self) -> Vec<Arc<TreeNode>> {
        let mut out = Vec::new();
        if let Some(root) = self.tree() {
            TreeNode::get_all(&root, &mut out);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.sorted().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree().is_none()
    }

    pub fn equals(
        a: &Arc<GTable>,
        b: &Arc<GTable>,
        th: &mut Thread,
    ) -> Result<bool> {
        if Arc::ptr_eq(a, b) {
            return Ok(true);
        }
        let ea = a.sorted();
        let eb = b.sorted();
        if ea.len() != eb.len() {
            return Ok(false);
        }
        for (na, nb) in ea.iter().zip(eb.iter()) {
            if !na.key().key_equals(nb.key()) {
                return Ok(false);
            }
            if !na.value().equals(th, nb.value())? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Drop for GTable {
    fn drop(&mut self) {
        let p = self.root.load(Ordering::Acquire);
        if !p.is_null() {
            // SAFETY: the root owns one count.
            unsafe { drop(Arc::from_raw(p)) };
        }
    }
}

impl std::fmt::Debug for GTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "GTable(len={})", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::getsym;

    fn sym(s: &str) -> V {
        V::Str(getsym(s))
    }

    #[test]
    fn empty_table_finds_nothing() {
        let t = GTable::empty();
        assert!(t.get(&sym("missing")).is_none());
        assert!(t.must_get(&sym("missing")).is_err());
    }

    #[test]
    fn impure_put_then_get() {
        let t = GTable::empty();
        assert!(t.put_impure(&sym("a"), &V::Real(1.0)));
        assert!(t.put_impure(&sym("b"), &V::Real(2.0)));
        assert_eq!(t.get(&sym("a")).unwrap().as_float(), 1.0);
        assert_eq!(t.get(&sym("b")).unwrap().as_float(), 2.0);
    }

    #[test]
    fn impure_put_replaces_existing_value() {
        let t = GTable::empty();
        assert!(t.put_impure(&sym("k"), &V::Real(1.0)));
        assert!(!t.put_impure(&sym("k"), &V::Real(2.0)));
        assert_eq!(t.get(&sym("k")).unwrap().as_float(), 2.0);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn replacement_keeps_serial() {
        let t = GTable::empty();
        t.put_impure(&sym("x"), &V::Real(1.0));
        let before = t.sorted()[0].serial();
        t.put_impure(&sym("x"), &V::Real(9.0));
        let after = t.sorted()[0].serial();
        assert_eq!(before, after);
    }

    #[test]
    fn pure_put_leaves_original_untouched() {
        let t = GTable::empty();
        t.put_impure(&sym("base"), &V::Real(1.0));
        let t2 = t.put_pure(&sym("base"), &V::Real(42.0));
        assert_eq!(t.get(&sym("base")).unwrap().as_float(), 1.0);
        assert_eq!(t2.get(&sym("base")).unwrap().as_float(), 42.0);
    }

    #[test]
    fn pure_put_shares_unchanged_subtrees() {
        let t = GTable::empty();
        for i in 0..32 {
            t.put_impure(&V::Real(i as f64), &V::Real(i as f64));
        }
        let t2 = t.put_pure(&V::Real(0.0), &V::Real(-1.0));
        // both tables still agree on every key except the replaced one
        for i in 1..32 {
            let k = V::Real(i as f64);
            assert_eq!(
                t.get(&k).unwrap().as_float(),
                t2.get(&k).unwrap().as_float()
            );
        }
        assert_eq!(t2.get(&V::Real(0.0)).unwrap().as_float(), -1.0);
    }

    #[test]
    fn iteration_is_hash_then_serial_ordered() {
        let t = GTable::empty();
        for s in ["delta", "alpha", "echo", "bravo", "charlie"] {
            t.put_impure(&sym(s), &V::Real(0.0));
        }
        let entries = t.sorted();
        assert_eq!(entries.len(), 5);
        for w in entries.windows(2) {
            let (a, b) = (&w[0], &w[1]);
            assert!(
                (a.hash(), a.serial()) < (b.hash(), b.serial()),
                "entries must ascend by (hash, serial)"
            );
        }
    }

    #[test]
    fn order_is_independent_of_insertion_interleaving() {
        let names = ["one", "two", "three", "four", "five", "six"];
        let t1 = GTable::empty();
        for s in names {
            t1.put_impure(&sym(s), &V::Real(1.0));
        }
        let t2 = GTable::empty();
        for s in names.iter().rev() {
            t2.put_impure(&sym(s), &V::Real(1.0));
        }
        let h1: Vec<i64> = t1.sorted().iter().map(|n| n.hash()).collect();
        let h2: Vec<i64> = t2.sorted().iter().map(|n| n.hash()).collect();
        assert_eq!(h1, h2);
    }

    #[test]
    fn concurrent_readers_see_consistent_tree() {
        let t = Arc::new(GTable::empty());
        for i in 0..64 {
            t.put_impure(&V::Real(i as f64), &V::Real(i as f64));
        }
        let writer = {
            let t = t.clone();
            std::thread::spawn(move || {
                for round in 0..200 {
                    for i in 0..64 {
                        t.put_impure(
                            &V::Real(i as f64),
                            &V::Real((round * 64 + i) as f64),
                        );
                    }
                }
            })
        };
        let reader = {
            let t = t.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    for i in 0..64 {
                        // always present; value is some published state
                        assert!(t.get(&V::Real(i as f64)).is_some());
                    }
                }
            })
        };
        writer.join().unwrap();
        reader.join().unwrap();
        assert_eq!(t.len(), 64);
    }

    #[test]
    fn scalar_keys_work() {
        let t = GTable::empty();
        t.put_impure(&V::Real(1.5), &sym("one-and-a-half"));
        assert!(t.get(&V::Real(1.5)).is_some());
        assert!(t.get(&V::Real(2.5)).is_none());
    }
}
