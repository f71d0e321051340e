// ABOUTME: Compiles [$dot obj sym] and [$index obj idx] — property/member
// ABOUTME: loads, with dedicated opcodes for the cons-cell accessor names

use super::Compiler;
use crate::bytecode::{CompiledBlock, Opcode, Operand};
use crate::value::Ast;
use std::cell::RefCell;
use std::rc::Rc;

/// `sym` ∈ {a, d, start, end, count, length} lowers to a dedicated opcode;
/// anything else is a generic `LdProp` (spec.md §4.7.4).
fn dedicated_opcode(compiler: &Compiler, sym: crate::symbol::Symbol) -> Option<Opcode> {
    let k = compiler.known;
    if sym == k.a {
        Some(Opcode::LdA)
    } else if sym == k.d {
        Some(Opcode::LdD)
    } else if sym == k.start {
        Some(Opcode::LdStart)
    } else if sym == k.end {
        Some(Opcode::LdEnd)
    } else if sym == k.count {
        Some(Opcode::LdCount)
    } else if sym == k.length {
        Some(Opcode::LdLength)
    } else {
        None
    }
}

pub fn compile_dot(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.len() != 2 {
        return compiler.compile_error("$dot requires an object and a property symbol", None);
    }
    let Some(sym) = rest[1].as_symbol() else {
        return compiler.compile_error("$dot's second argument must be a bare symbol", None);
    };

    let mut block = CompiledBlock::new();
    let obj_block = compiler.compile(&rest[0], true);
    block.append_child(Rc::new(RefCell::new(obj_block)));
    match dedicated_opcode(compiler, sym) {
        Some(opcode) => compiler.emit(&mut block, opcode, Operand::None),
        None => compiler.emit(&mut block, Opcode::LdProp, Operand::Symbol(sym)),
    }
    if !want_result {
        compiler.emit(&mut block, Opcode::Pop1, Operand::None);
    }
    block
}

pub fn compile_index(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.len() != 2 {
        return compiler.compile_error("$index requires an object and an index expression", None);
    }
    let mut block = CompiledBlock::new();
    let obj_block = compiler.compile(&rest[0], true);
    block.append_child(Rc::new(RefCell::new(obj_block)));
    let idx_block = compiler.compile(&rest[1], true);
    block.append_child(Rc::new(RefCell::new(idx_block)));
    compiler.emit(&mut block, Opcode::LdMember, Operand::None);
    if !want_result {
        compiler.emit(&mut block, Opcode::Pop1, Operand::None);
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{KnownSymbols, SymbolTable};

    #[test]
    fn dot_with_count_lowers_to_ldcount() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let rest = vec![Ast::Symbol(known.count), Ast::Symbol(known.count)];
        // Reuse `known.count` as a stand-in object symbol purely for this test.
        let block = compile_dot(&mut compiler, &rest, true);
        let segment = block.linearize();
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::LdCount));
    }

    #[test]
    fn dot_with_other_symbol_emits_ldprop() {
        let mut table = SymbolTable::new();
        let custom = table.get_or_create("custom");
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let rest = vec![Ast::Symbol(custom), Ast::Symbol(custom)];
        let block = compile_dot(&mut compiler, &rest, true);
        let segment = block.linearize();
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::LdProp));
    }
}
