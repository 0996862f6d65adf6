//! Insertion-ordered immutable maps and lexical scope chains.
//!
//! A `TableMap` owns the power-of-two open-addressed index plus the dense
//! key array in insertion order; a `Table` owns the matching dense value
//! array and shares the map. Tables sharing one map have identical key
//! sets and order, which makes same-shape operations cheap.
//!
//! A `Form` is a scope frame: a table plus an optional parent. Lookup
//! walks the chain outward. Global bindings live in a `GForm`, whose
//! per-slot mutability comes from the tree-backed `GTable`.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::thread::Thread;
use crate::tree::GTable;
use crate::value::V;

const EMPTY: usize = usize::MAX;

#[derive(Debug)]
pub struct TableMap {
    mask: usize,
    index: Box<[usize]>,
    keys: Vec<V>,
    hashes: Vec<i64>,
}

impl TableMap {
    /// Build a map over the given keys, kept in insertion order.
    /// Duplicate keys keep their first slot.
    pub fn from_keys(keys: Vec<V>) -> Arc<TableMap> {
        let cap = (keys.len().max(2) * 2).next_power_of_two();
        let mask = cap - 1;
        let mut index = vec![EMPTY; cap].into_boxed_slice();
        let mut unique: Vec<V> = Vec::with_capacity(keys.len());
        let mut hashes: Vec<i64> = Vec::with_capacity(keys.len());
        for key in keys {
            let hash = key.key_hash();
            let mut probe = (hash as usize) & mask;
            loop {
                let slot = index[probe];
                if slot == EMPTY {
                    index[probe] = unique.len();
                    unique.push(key);
                    hashes.push(hash);
                    break;
                }
                if hashes[slot] == hash && unique[slot].key_equals(&key) {
                    break; // first insertion wins
                }
                probe = (probe + 1) & mask;
            }
        }
        Arc::new(TableMap {
            mask,
            index,
            keys: unique,
            hashes,
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn key_at(&self, i: usize) -> &V {
        &self.keys[i]
    }

    pub fn keys(&self) -> &[V] {
        &self.keys
    }

    /// Linear-probe lookup returning the dense slot index.
    pub fn get_index(&self, key: &V, hash: i64) -> Option<usize> {
        let mut probe = (hash as usize) & self.mask;
        loop {
            let slot = self.index[probe];
            if slot == EMPTY {
                return None;
            }
            if self.hashes[slot] == hash && self.keys[slot].key_equals(key) {
                return Some(slot);
            }
            probe = (probe + 1) & self.mask;
        }
    }
}

#[derive(Debug)]
pub struct Table {
    map: Arc<TableMap>,
    values: Vec<V>,
}

impl Table {
    pub fn new(map: Arc<TableMap>, values: Vec<V>) -> Arc<Table> {
        debug_assert_eq!(map.len(), values.len());
        Arc::new(Table { map, values })
    }

    pub fn from_pairs(pairs: Vec<(V, V)>) -> Arc<Table> {
        let keys: Vec<V> = pairs.iter().map(|(k, _)| k.clone()).collect();
        let map = TableMap::from_keys(keys);
        // from_keys dedups; the first value for a repeated key wins
        let mut values = vec![V::default(); map.len()];
        let mut seen = vec![false; map.len()];
        for (key, value) in pairs {
            let slot = map.get_index(&key, key.key_hash()).expect("own key");
            if !seen[slot] {
                seen[slot] = true;
                values[slot] = value;
            }
        }
        Table::new(map, values)
    }

    pub fn map(&self) -> &Arc<TableMap> {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn key_at(&self, i: usize) -> &V {
        self.map.key_at(i)
    }

    pub fn value_at(&self, i: usize) -> &V {
        &self.values[i]
    }

    pub fn get(&self, key: &V) -> Option<V> {
        let slot = self.map.get_index(key, key.key_hash())?;
        Some(self.values[slot].clone())
    }

    /// A table with one value replaced, sharing this table's map.
    pub fn with_value(&self, slot: usize, value: V) -> Arc<Table> {
        let mut values = self.values.clone();
        values[slot] = value;
        Table::new(self.map.clone(), values)
    }

    pub fn equals(
        a: &Arc<Table>,
        b: &Arc<Table>,
        th: &mut Thread,
    ) -> Result<bool> {
        if Arc::ptr_eq(a, b) {
            return Ok(true);
        }
        if a.len() != b.len() {
            return Ok(false);
        }
        for i in 0..a.len() {
            let key = a.key_at(i);
            let Some(other) = b.get(key) else {
                return Ok(false);
            };
            if !a.value_at(i).equals(th, &other)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// An immutable scope frame.
#[derive(Debug)]
pub struct Form {
    table: Arc<Table>,
    next: Option<Arc<Form>>,
}

impl Form {
    pub fn cons(table: Arc<Table>, next: Option<Arc<Form>>) -> Arc<Form> {
        Arc::new(Form { table, next })
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    pub fn parent(&self) -> Option<&Arc<Form>> {
        self.next.as_ref()
    }

    /// Walk the chain outward.
    pub fn get(&self, key: &V) -> Option<V> {
        let mut form = self;
        loop {
            if let Some(v) = form.table.get(key) {
                return Some(v);
            }
            form = form.next.as_deref()?;
        }
    }

    /// Fails with `NotFound` at the outermost miss.
    pub fn must_get(&self, key: &V) -> Result<V> {
        self.get(key)
            .ok_or_else(|| Error::NotFound(key.to_display_string()))
    }

    /// Skip up to `n` known scope levels.
    pub fn chase_form(self: &Arc<Form>, n: i64) -> Arc<Form> {
        let mut form = self.clone();
        for _ in 0..n {
            match &form.next {
                Some(parent) => form = parent.clone(),
                None => break,
            }
        }
        form
    }

    pub fn equals(
        a: &Arc<Form>,
        b: &Arc<Form>,
        th: &mut Thread,
    ) -> Result<bool> {
        if Arc::ptr_eq(a, b) {
            return Ok(true);
        }
        // fail cheaply first
        match (&a.next, &b.next) {
            (None, Some(_)) | (Some(_), None) => return Ok(false),
            _ => {}
        }
        if !Table::equals(&a.table, &b.table, th)? {
            return Ok(false);
        }
        match (&a.next, &b.next) {
            (None, None) => Ok(true),
            (Some(na), Some(nb)) => Form::equals(na, nb, th),
            _ => unreachable!(),
        }
    }
}

/// A mutable-per-slot scope frame for global bindings.
#[derive(Debug)]
pub struct GForm {
    table: Arc<GTable>,
    next: Option<Arc<GForm>>,
}

impl GForm {
    pub fn cons(table: Arc<GTable>, next: Option<Arc<GForm>>) -> Arc<GForm> {
        Arc::new(GForm { table, next })
    }

    pub fn empty() -> Arc<GForm> {
        GForm::cons(Arc::new(GTable::empty()), None)
    }

    pub fn table(&self) -> &Arc<GTable> {
        &self.table
    }

    pub fn parent(&self) -> Option<&Arc<GForm>> {
        self.next.as_ref()
    }

    pub fn get(&self, key: &V) -> Option<V> {
        let mut form = self;
        loop {
            if let Some(v) = form.table.get(key) {
                return Some(v);
            }
            form = form.next.as_deref()?;
        }
    }

    pub fn must_get(&self, key: &V) -> Result<V> {
        self.get(key)
            .ok_or_else(|| Error::NotFound(key.to_display_string()))
    }

    /// Mutate the innermost table in place.
    pub fn put_impure(&self, key: &V, value: &V) -> bool {
        self.table.put_impure(key, value)
    }

    /// A new chain head with the binding added, sharing the parent chain.
    pub fn put_pure(self: &Arc<GForm>, key: &V, value: &V) -> Arc<GForm> {
        let table = Arc::new(self.table.put_pure(key, value));
        GForm::cons(table, self.next.clone())
    }

    pub fn equals(
        a: &Arc<GForm>,
        b: &Arc<GForm>,
        th: &mut Thread,
    ) -> Result<bool> {
        if Arc::ptr_eq(a, b) {
            return Ok(true);
        }
        match (&a.next, &b.next) {
            (None, Some(_)) | (Some(_), None) => return Ok(false),
            _ => {}
        }
        if !GTable::equals(&a.table, &b.table, th)? {
            return Ok(false);
        }
        match (&a.next, &b.next) {
            (None, None) => Ok(true),
            (Some(na), Some(nb)) => GForm::equals(na, nb, th),
            _ => unreachable!(),
        }
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
    fn table_map_round_trips_keys() {
        let map = TableMap::from_keys(vec![sym("a"), sym("b"), sym("c")]);
        assert_eq!(map.len(), 3);
        for (i, k) in ["a", "b", "c"].iter().enumerate() {
            let key = sym(k);
            assert_eq!(map.get_index(&key, key.key_hash()), Some(i));
        }
        let missing = sym("zzz");
        assert_eq!(map.get_index(&missing, missing.key_hash()), None);
    }

    #[test]
    fn table_map_preserves_insertion_order() {
        let map =
            TableMap::from_keys(vec![sym("z"), sym("m"), sym("a"), sym("q")]);
        let names: Vec<&str> = (0..map.len())
            .map(|i| match map.key_at(i) {
                V::Str(s) => s.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["z", "m", "a", "q"]);
    }

    #[test]
    fn tables_share_map_shape() {
        let map = TableMap::from_keys(vec![sym("x"), sym("y")]);
        let t1 = Table::new(map.clone(), vec![V::Real(1.0), V::Real(2.0)]);
        let t2 = Table::new(map.clone(), vec![V::Real(3.0), V::Real(4.0)]);
        assert!(Arc::ptr_eq(t1.map(), t2.map()));
        assert_eq!(t1.get(&sym("x")).unwrap().as_float(), 1.0);
        assert_eq!(t2.get(&sym("x")).unwrap().as_float(), 3.0);
    }

    #[test]
    fn with_value_shares_map() {
        let t = Table::from_pairs(vec![
            (sym("a"), V::Real(1.0)),
            (sym("b"), V::Real(2.0)),
        ]);
        let t2 = t.with_value(1, V::Real(99.0));
        assert!(Arc::ptr_eq(t.map(), t2.map()));
        assert_eq!(t.get(&sym("b")).unwrap().as_float(), 2.0);
        assert_eq!(t2.get(&sym("b")).unwrap().as_float(), 99.0);
    }

    #[test]
    fn form_lookup_walks_outward() {
        let outer = Form::cons(
            Table::from_pairs(vec![
                (sym("shadowed"), V::Real(1.0)),
                (sym("outer_only"), V::Real(10.0)),
            ]),
            None,
        );
        let inner = Form::cons(
            Table::from_pairs(vec![(sym("shadowed"), V::Real(2.0))]),
            Some(outer),
        );
        assert_eq!(inner.get(&sym("shadowed")).unwrap().as_float(), 2.0);
        assert_eq!(inner.get(&sym("outer_only")).unwrap().as_float(), 10.0);
        assert!(matches!(
            inner.must_get(&sym("absent")),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn chase_form_skips_levels() {
        let a = Form::cons(Table::from_pairs(vec![]), None);
        let b = Form::cons(Table::from_pairs(vec![]), Some(a.clone()));
        let c = Form::cons(Table::from_pairs(vec![]), Some(b.clone()));
        assert!(Arc::ptr_eq(&c.chase_form(0), &c));
        assert!(Arc::ptr_eq(&c.chase_form(1), &b));
        assert!(Arc::ptr_eq(&c.chase_form(2), &a));
        // chasing past the root stops at the root
        assert!(Arc::ptr_eq(&c.chase_form(10), &a));
    }

    #[test]
    fn gform_put_impure_is_visible_through_chain() {
        let root = GForm::empty();
        let child = GForm::cons(Arc::new(GTable::empty()), Some(root.clone()));
        root.put_impure(&sym("global"), &V::Real(7.0));
        assert_eq!(child.get(&sym("global")).unwrap().as_float(), 7.0);
        child.put_impure(&sym("global"), &V::Real(8.0));
        // the child's own table shadows the root binding now
        assert_eq!(child.get(&sym("global")).unwrap().as_float(), 8.0);
        assert_eq!(root.get(&sym("global")).unwrap().as_float(), 7.0);
    }

    #[test]
    fn gform_put_pure_leaves_original() {
        let root = GForm::empty();
        root.put_impure(&sym("k"), &V::Real(1.0));
        let other = root.put_pure(&sym("k"), &V::Real(2.0));
        assert_eq!(root.get(&sym("k")).unwrap().as_float(), 1.0);
        assert_eq!(other.get(&sym("k")).unwrap().as_float(), 2.0);
    }
}
