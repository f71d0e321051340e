// ABOUTME: Module-wide constant pools (strings, functions, objects, source
// ABOUTME: locations, till-continuations) populated during compilation

use crate::bytecode::{ByteCodeSegment, LabelId};
use crate::closure::ClosureInfo;
use crate::position::LexerPosition;
use crate::symbol::Symbol;
use crate::value::{Ast, SmileArg};
use std::collections::HashMap;
use std::rc::Rc;

/// One argument slot's declared shape (spec.md §3 "UserFunctionInfo").
#[derive(Debug, Clone)]
pub struct ArgInfo {
    pub name: Symbol,
    pub type_name: Option<Symbol>,
    pub is_rest: bool,
    pub has_typecheck: bool,
    pub is_optional: bool,
    pub default_value: Option<SmileArg>,
}

/// A compiled user function: its signature, source AST, and resulting
/// shape/bytecode (spec.md §3).
#[derive(Debug)]
pub struct UserFunctionInfo {
    pub parent: Option<usize>,
    pub arg_count: usize,
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub args: Vec<ArgInfo>,
    pub position: Option<LexerPosition>,
    pub arg_list_ast: Ast,
    pub body_ast: Ast,
    pub closure_info: Rc<ClosureInfo>,
    pub byte_code_segment: ByteCodeSegment,
}

/// A record of where one compiled instruction range originated, for
/// diagnostics and debugging (spec.md §4.7.5).
#[derive(Debug, Clone)]
pub struct SourceLocationRecord {
    pub position: LexerPosition,
    pub assigned_name: Option<Symbol>,
}

/// Static data for one `till` escape continuation (spec.md §3).
#[derive(Debug, Clone)]
pub struct TillContinuationInfo {
    pub owning_function: usize,
    pub flags: Vec<Symbol>,
    /// Populated during compilation, before linearization.
    pub branch_target_labels: Vec<LabelId>,
    /// Filled in by `resolve_till_branch_targets` once the segment has
    /// absolute pcs (spec.md §4.8).
    pub branch_target_addresses: Vec<Option<usize>>,
}

impl TillContinuationInfo {
    pub fn new(owning_function: usize, flags: Vec<Symbol>, branch_target_labels: Vec<LabelId>) -> Self {
        let branch_target_addresses = vec![None; branch_target_labels.len()];
        TillContinuationInfo {
            owning_function,
            flags,
            branch_target_labels,
            branch_target_addresses,
        }
    }

    pub fn flag_offset(&self, symbol: Symbol) -> Option<usize> {
        self.flags.iter().position(|&s| s == symbol)
    }
}

/// Module-wide deduplicating constant pools (spec.md §4.8): strings dedup by
/// content, function-infos and constant objects dedup by identity, source
/// locations are append-only and referenced by index, till-continuation
/// infos are append-only.
#[derive(Debug, Default)]
pub struct CompiledTables {
    strings: Vec<Rc<str>>,
    string_index: HashMap<Rc<str>, usize>,
    pub functions: Vec<UserFunctionInfo>,
    pub constants: Vec<SmileArg>,
    pub source_locations: Vec<SourceLocationRecord>,
    pub till_continuations: Vec<TillContinuationInfo>,
}

impl CompiledTables {
    pub fn new() -> Self {
        CompiledTables::default()
    }

    pub fn intern_string(&mut self, text: &str) -> usize {
        if let Some(&index) = self.string_index.get(text) {
            return index;
        }
        let index = self.strings.len();
        let rc: Rc<str> = Rc::from(text);
        self.strings.push(rc.clone());
        self.string_index.insert(rc, index);
        index
    }

    pub fn string(&self, index: usize) -> &str {
        &self.strings[index]
    }

    pub fn push_function(&mut self, info: UserFunctionInfo) -> usize {
        let index = self.functions.len();
        self.functions.push(info);
        index
    }

    pub fn push_constant(&mut self, value: SmileArg) -> usize {
        let index = self.constants.len();
        self.constants.push(value);
        index
    }

    pub fn push_source_location(&mut self, record: SourceLocationRecord) -> usize {
        let index = self.source_locations.len();
        self.source_locations.push(record);
        index
    }

    pub fn push_till_continuation(&mut self, info: TillContinuationInfo) -> usize {
        let index = self.till_continuations.len();
        self.till_continuations.push(info);
        index
    }

    /// Walk every till-continuation-info and replace its stored
    /// branch-target label references with the absolute pc those labels
    /// received in `segment` at linearization (spec.md §4.8).
    pub fn resolve_till_branch_targets(&mut self, label_pcs: &HashMap<LabelId, usize>) {
        for info in &mut self.till_continuations {
            for (slot, label) in info
                .branch_target_addresses
                .iter_mut()
                .zip(info.branch_target_labels.iter())
            {
                *slot = label_pcs.get(label).copied();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_the_same_string_twice_returns_the_same_index() {
        let mut tables = CompiledTables::new();
        let a = tables.intern_string("hello");
        let b = tables.intern_string("hello");
        let c = tables.intern_string("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn till_branch_targets_resolve_from_label_pcs() {
        let mut tables = CompiledTables::new();
        let info = TillContinuationInfo::new(0, vec![Symbol(1), Symbol(2)], vec![LabelId(0), LabelId(1)]);
        tables.push_till_continuation(info);

        let mut label_pcs = HashMap::new();
        label_pcs.insert(LabelId(0), 10usize);
        label_pcs.insert(LabelId(1), 20usize);
        tables.resolve_till_branch_targets(&label_pcs);

        assert_eq!(tables.till_continuations[0].branch_target_addresses, vec![Some(10), Some(20)]);
    }

    #[test]
    fn flag_offset_finds_position_by_symbol() {
        let info = TillContinuationInfo::new(0, vec![Symbol(5), Symbol(6)], vec![LabelId(0), LabelId(1)]);
        assert_eq!(info.flag_offset(Symbol(6)), Some(1));
        assert_eq!(info.flag_offset(Symbol(9)), None);
    }
}
