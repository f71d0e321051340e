// ABOUTME: Runtime groups the symbol table, known symbols, and hash oracle
// ABOUTME: that the source keeps as Smile_Init process globals

use crate::symbol::{KnownSymbols, Symbol, SymbolTable};
use std::cell::RefCell;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

/// Replaces the source's `Smile_Init`/`Smile_ResetEnvironment` process
/// globals with an instance, so independent tests never need a global mutex
/// or serialized test execution (spec.md §5, Design Notes §9 "Global
/// mutable state").
pub struct Runtime {
    symbols: RefCell<SymbolTable>,
    known: KnownSymbols,
    hash_oracle: RandomState,
    active: RefCell<bool>,
}

impl Runtime {
    /// Seeds a process-local hash oracle from OS entropy (via
    /// `RandomState`, the stdlib's own `getrandom`-backed seed) so hash
    /// codes derived from this runtime's objects differ run to run, exactly
    /// as `Smile_Init` seeds its 32-bit oracle (spec.md §5).
    pub fn new() -> Self {
        let mut symbols = SymbolTable::new();
        let known = KnownSymbols::new(&mut symbols);
        Runtime {
            symbols: RefCell::new(symbols),
            known,
            hash_oracle: RandomState::new(),
            active: RefCell::new(false),
        }
    }

    pub fn intern(&self, name: &str) -> Symbol {
        self.symbols.borrow_mut().get_or_create(name)
    }

    pub fn lookup(&self, name: &str) -> Option<Symbol> {
        let sym = self.symbols.borrow().get_no_create(name);
        if sym == Symbol::EMPTY && !name.is_empty() {
            None
        } else {
            Some(sym)
        }
    }

    pub fn symbol_name(&self, symbol: Symbol) -> String {
        self.symbols.borrow().get_name(symbol).to_owned()
    }

    pub fn known(&self) -> &KnownSymbols {
        &self.known
    }

    /// Hash a value the way a `Closure`/`BoxedObject` identity hash would be
    /// salted: through the process-local oracle rather than a fixed seed,
    /// so two runs never agree on hash-bucket order (spec.md §5).
    pub fn oracle_hash<T: Hash>(&self, value: &T) -> u64 {
        let mut hasher = self.hash_oracle.build_hasher();
        value.hash(&mut hasher);
        hasher.finish()
    }

    /// Marks this runtime as mid-compilation; `reset` refuses to run while
    /// this is set (spec.md §5: "must not run while any compilation or
    /// execution is in flight").
    pub fn begin_session(&self) -> RuntimeSessionGuard<'_> {
        *self.active.borrow_mut() = true;
        RuntimeSessionGuard { runtime: self }
    }

    /// Tears down and rebuilds the symbol table, as `Smile_ResetEnvironment`
    /// does for its process globals — a testing hook only.
    pub fn reset(&mut self) -> Result<(), crate::error::SmileCoreError> {
        if *self.active.borrow() {
            return Err(crate::error::SmileCoreError::ResetWhileActive);
        }
        let mut symbols = SymbolTable::new();
        let known = KnownSymbols::new(&mut symbols);
        self.symbols = RefCell::new(symbols);
        self.known = known;
        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::new()
    }
}

pub struct RuntimeSessionGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for RuntimeSessionGuard<'_> {
    fn drop(&mut self) {
        *self.runtime.active.borrow_mut() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_runtimes_are_fully_independent() {
        let a = Runtime::new();
        let b = Runtime::new();
        let sym_a = a.intern("foo");
        assert!(b.lookup("foo").is_none());
        assert_eq!(a.symbol_name(sym_a), "foo");
    }

    #[test]
    fn reset_refuses_while_a_session_is_active() {
        let mut rt = Runtime::new();
        let guard = rt.begin_session();
        assert!(rt.reset().is_err());
        drop(guard);
        assert!(rt.reset().is_ok());
    }

    #[test]
    fn reset_clears_previously_interned_symbols() {
        let mut rt = Runtime::new();
        rt.intern("custom");
        assert!(rt.lookup("custom").is_some());
        rt.reset().unwrap();
        assert!(rt.lookup("custom").is_none());
    }
}
