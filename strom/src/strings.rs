//! Interned strings.
//!
//! Every string in the system is interned: equal byte sequences share one
//! `Arc<Str>` for the life of the process, so pointer equality is value
//! equality and the hash is computed exactly once.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

/// An interned immutable UTF-8 string with its precomputed hash.
#[derive(Debug)]
pub struct Str {
    text: Box<str>,
    hash: u64,
}

impl Str {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }
}

impl std::fmt::Display for Str {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = ahash::AHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// The process-wide symbol table. One lock serializes insertion; entries
/// live until process exit and their pointers never move.
struct SymbolTable {
    map: Mutex<HashMap<&'static str, Arc<Str>>>,
}

fn table() -> &'static SymbolTable {
    static TABLE: OnceLock<SymbolTable> = OnceLock::new();
    TABLE.get_or_init(|| SymbolTable {
        map: Mutex::new(HashMap::new()),
    })
}

/// Intern a string, returning the canonical `Arc<Str>` for its bytes.
///
/// `getsym(s)` and `getsym(t)` return the same allocation iff `s == t`.
pub fn getsym(s: &str) -> Arc<Str> {
    let table = table();
    let mut map = table.map.lock();
    if let Some(found) = map.get(s) {
        return found.clone();
    }
    let interned = Arc::new(Str {
        text: s.into(),
        hash: hash_bytes(s.as_bytes()),
    });
    // The key borrows the Arc's interior, which is never dropped: the
    // table keeps one strong reference forever.
    let key: &'static str =
        unsafe { &*(interned.as_str() as *const str) };
    map.insert(key, interned.clone());
    interned
}
