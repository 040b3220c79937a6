// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! String interning pool for type tags and other small repeated labels.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ident::Sym;

/// Deduplicates small repeated strings into shared [`Sym`] handles.
///
/// The pool is append-only: symbols stay valid for the life of the pool.
/// Type tags are low-cardinality in practice, so unbounded growth here is
/// the intended trade against per-record string storage.
#[derive(Debug, Default)]
pub struct InternPool {
    strings: Vec<Arc<str>>,
    lookup: FxHashMap<Arc<str>, Sym>,
}

impl InternPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `value`, returning the existing handle when already present.
    pub fn intern(&mut self, value: &str) -> Sym {
        if let Some(sym) = self.lookup.get(value) {
            return *sym;
        }
        let shared: Arc<str> = Arc::from(value);
        let sym = Sym(self.strings.len() as u32);
        self.strings.push(Arc::clone(&shared));
        self.lookup.insert(shared, sym);
        sym
    }

    /// Returns the handle for `value` without interning it.
    #[must_use]
    pub fn get(&self, value: &str) -> Option<Sym> {
        self.lookup.get(value).copied()
    }

    /// Resolves a handle back to its string.
    ///
    /// Handles from a different pool resolve to the empty string; this is a
    /// caller bug surfaced by a debug assertion rather than a panic.
    #[must_use]
    pub fn resolve(&self, sym: Sym) -> &str {
        match self.strings.get(sym.0 as usize) {
            Some(s) => s,
            None => {
                debug_assert!(false, "sym {sym:?} was not issued by this pool");
                ""
            }
        }
    }

    /// Number of distinct interned strings.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Returns `true` when nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Rough backing-byte estimate for memory accounting.
    #[must_use]
    pub fn approx_bytes(&self) -> usize {
        self.strings.iter().map(|s| s.len()).sum::<usize>()
            + self.strings.len() * std::mem::size_of::<Arc<str>>() * 2
    }
}
