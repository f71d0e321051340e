// ABOUTME: Symbol interning — dense 32-bit ids over a growable string array

use std::collections::HashMap;

/// An interned symbol: a 32-bit index into a `SymbolTable`'s string array.
///
/// Symbol 0 is always the empty string. Once allocated, an id's meaning is
/// stable for the lifetime of the `SymbolTable` that created it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub u32);

impl Symbol {
    pub const EMPTY: Symbol = Symbol(0);

    pub fn id(self) -> u32 {
        self.0
    }
}

const INITIAL_CAPACITY: usize = 1024;

/// Interns strings to dense symbol ids. Backed by a growable array (indexed
/// by id) plus a string-to-id map for the reverse lookup, matching
/// `smilelib/src/env/symboltable.c`: symbol 0 is the preallocated empty
/// string, and the array grows by doubling.
#[derive(Debug)]
pub struct SymbolTable {
    names: Vec<String>,
    ids: HashMap<String, Symbol>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut names = Vec::with_capacity(INITIAL_CAPACITY);
        names.push(String::new());
        let mut ids = HashMap::with_capacity(INITIAL_CAPACITY);
        ids.insert(String::new(), Symbol::EMPTY);
        SymbolTable { names, ids }
    }

    /// Intern `name`, returning its existing id or allocating a new one.
    pub fn get_or_create(&mut self, name: &str) -> Symbol {
        if let Some(&sym) = self.ids.get(name) {
            return sym;
        }
        let sym = Symbol(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), sym);
        sym
    }

    /// Look up `name` without interning it; returns `Symbol::EMPTY` (id 0)
    /// if it has never been interned. Note this is ambiguous with the
    /// legitimately-interned empty string, matching the source behavior.
    pub fn get_no_create(&self, name: &str) -> Symbol {
        self.ids.get(name).copied().unwrap_or(Symbol::EMPTY)
    }

    /// Resolve a symbol back to its string. Panics on an id that was never
    /// allocated by this table — that is a caller bug, not recoverable
    /// input.
    pub fn get_name(&self, symbol: Symbol) -> &str {
        &self.names[symbol.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Well-known symbols preloaded at `Runtime` startup so the lexer, parser,
/// and compiler can compare by integer instead of by string. Field order
/// has no significance beyond grouping; ids are whatever `SymbolTable`
/// assigns them during `KnownSymbols::new`.
#[derive(Debug, Clone, Copy)]
pub struct KnownSymbols {
    pub set: Symbol,
    pub opset: Symbol,
    pub if_: Symbol,
    pub while_: Symbol,
    pub till: Symbol,
    pub when: Symbol,
    pub catch: Symbol,
    pub return_: Symbol,
    pub fn_: Symbol,
    pub quote: Symbol,
    pub prog1: Symbol,
    pub progn: Symbol,
    pub scope: Symbol,
    pub new: Symbol,
    pub dot: Symbol,
    pub index: Symbol,
    pub is: Symbol,
    pub typeof_: Symbol,
    pub eq: Symbol,
    pub ne: Symbol,
    pub and: Symbol,
    pub or: Symbol,
    pub not: Symbol,
    pub a: Symbol,
    pub d: Symbol,
    pub start: Symbol,
    pub end: Symbol,
    pub count: Symbol,
    pub length: Symbol,
}

impl KnownSymbols {
    pub fn new(table: &mut SymbolTable) -> Self {
        KnownSymbols {
            set: table.get_or_create("$set"),
            opset: table.get_or_create("$opset"),
            if_: table.get_or_create("$if"),
            while_: table.get_or_create("$while"),
            till: table.get_or_create("$till"),
            when: table.get_or_create("$when"),
            catch: table.get_or_create("$catch"),
            return_: table.get_or_create("$return"),
            fn_: table.get_or_create("$fn"),
            quote: table.get_or_create("$quote"),
            prog1: table.get_or_create("$prog1"),
            progn: table.get_or_create("$progn"),
            scope: table.get_or_create("$scope"),
            new: table.get_or_create("$new"),
            dot: table.get_or_create("$dot"),
            index: table.get_or_create("$index"),
            is: table.get_or_create("$is"),
            typeof_: table.get_or_create("$typeof"),
            eq: table.get_or_create("$eq"),
            ne: table.get_or_create("$ne"),
            and: table.get_or_create("$and"),
            or: table.get_or_create("$or"),
            not: table.get_or_create("$not"),
            a: table.get_or_create("a"),
            d: table.get_or_create("d"),
            start: table.get_or_create("start"),
            end: table.get_or_create("end"),
            count: table.get_or_create("count"),
            length: table.get_or_create("length"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_symbol_zero() {
        let table = SymbolTable::new();
        assert_eq!(table.get_name(Symbol::EMPTY), "");
    }

    #[test]
    fn interning_is_idempotent() {
        let mut table = SymbolTable::new();
        let a = table.get_or_create("foo");
        let b = table.get_or_create("foo");
        assert_eq!(a, b);
        let c = table.get_or_create("bar");
        assert_ne!(a, c);
    }

    #[test]
    fn round_trips_name() {
        let mut table = SymbolTable::new();
        let sym = table.get_or_create("hello-world");
        assert_eq!(table.get_name(sym), "hello-world");
    }

    #[test]
    fn get_no_create_returns_zero_for_unknown() {
        let table = SymbolTable::new();
        assert_eq!(table.get_no_create("never-interned"), Symbol::EMPTY);
    }

    #[test]
    fn known_symbols_are_preloaded() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        assert_eq!(table.get_name(known.if_), "$if");
        assert_eq!(table.get_no_create("$if"), known.if_);
    }
}
