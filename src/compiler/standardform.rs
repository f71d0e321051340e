// ABOUTME: Compiles $return, $is, $typeof, $eq, $ne, $and, $or, $not —
// ABOUTME: the remaining simple one/two-operand core forms

use super::Compiler;
use crate::bytecode::{CompiledBlock, Opcode, Operand};
use crate::value::Ast;
use std::cell::RefCell;
use std::rc::Rc;

pub fn compile_return(compiler: &mut Compiler, rest: &[Ast]) -> CompiledBlock {
    if rest.len() > 1 {
        return compiler.compile_error("$return takes at most one value", None);
    }
    let mut block = CompiledBlock::new();
    match rest.first() {
        Some(value) => {
            let value_block = compiler.compile(value, true);
            block.append_child(Rc::new(RefCell::new(value_block)));
            compiler.emit(&mut block, Opcode::Ret, Operand::None);
        }
        None => {
            compiler.emit(&mut block, Opcode::Ret0, Operand::None);
        }
    }
    block
}

fn compile_binary(compiler: &mut Compiler, rest: &[Ast], opcode: Opcode, want_result: bool, name: &str) -> CompiledBlock {
    if rest.len() != 2 {
        return compiler.compile_error(format!("{name} requires exactly two operands"), None);
    }
    let mut block = CompiledBlock::new();
    let lhs = compiler.compile(&rest[0], true);
    block.append_child(Rc::new(RefCell::new(lhs)));
    let rhs = compiler.compile(&rest[1], true);
    block.append_child(Rc::new(RefCell::new(rhs)));
    compiler.emit(&mut block, opcode, Operand::None);
    if !want_result {
        compiler.emit(&mut block, Opcode::Pop1, Operand::None);
    }
    block
}

pub fn compile_is(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    compile_binary(compiler, rest, Opcode::Is, want_result, "$is")
}

pub fn compile_eq(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    compile_binary(compiler, rest, Opcode::SuperEq, want_result, "$eq")
}

pub fn compile_ne(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    compile_binary(compiler, rest, Opcode::SuperNe, want_result, "$ne")
}

pub fn compile_typeof(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.len() != 1 {
        return compiler.compile_error("$typeof takes exactly one operand", None);
    }
    let mut block = CompiledBlock::new();
    let operand_block = compiler.compile(&rest[0], true);
    block.append_child(Rc::new(RefCell::new(operand_block)));
    compiler.emit(&mut block, Opcode::TypeOf, Operand::None);
    if !want_result {
        compiler.emit(&mut block, Opcode::Pop1, Operand::None);
    }
    block
}

/// `$not` inverts at compile time by stripping chains of `$not` when
/// possible, otherwise emits the `Not` opcode (spec.md §4.7.3).
pub fn compile_not(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.len() != 1 {
        return compiler.compile_error("$not takes exactly one operand", None);
    }
    if let Ast::Cons(cell) = &rest[0] {
        if cell.car.as_symbol() == Some(compiler.known.not) {
            if let Ast::Cons(inner) = &cell.cdr {
                if inner.cdr.is_null() {
                    return compiler.compile(&inner.car, want_result);
                }
            }
        }
    }
    let mut block = CompiledBlock::new();
    let operand_block = compiler.compile(&rest[0], true);
    block.append_child(Rc::new(RefCell::new(operand_block)));
    compiler.emit(&mut block, Opcode::Not, Operand::None);
    if !want_result {
        compiler.emit(&mut block, Opcode::Pop1, Operand::None);
    }
    block
}

/// `$and`/`$or` short-circuit via `BfJmp`/`BtJmp` — branch-if-false/true
/// without popping, so the falsy/truthy value itself becomes the result
/// (spec.md §4.7.3).
fn compile_short_circuit(compiler: &mut Compiler, rest: &[Ast], branch_opcode: Opcode, want_result: bool) -> CompiledBlock {
    if rest.is_empty() {
        return compiler.compile_error("$and/$or require at least one operand", None);
    }
    let mut block = CompiledBlock::new();
    let end_label = compiler.new_label();
    let (last, init) = rest.split_last().expect("checked non-empty above");
    for expr in init {
        let expr_block = compiler.compile(expr, true);
        block.append_child(Rc::new(RefCell::new(expr_block)));
        compiler.emit_branch(&mut block, branch_opcode, end_label);
        compiler.emit(&mut block, Opcode::Pop1, Operand::None);
    }
    let last_block = compiler.compile(last, true);
    block.append_child(Rc::new(RefCell::new(last_block)));
    compiler.emit_label(&mut block, end_label);
    if !want_result {
        compiler.emit(&mut block, Opcode::Pop1, Operand::None);
    }
    block
}

pub fn compile_and(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    compile_short_circuit(compiler, rest, Opcode::BfJmp, want_result)
}

pub fn compile_or(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    compile_short_circuit(compiler, rest, Opcode::BtJmp, want_result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{KnownSymbols, SymbolTable};
    use crate::value::Primitive;

    #[test]
    fn return_with_no_value_emits_ret0() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let block = compile_return(&mut compiler, &[]);
        let segment = block.linearize();
        assert_eq!(segment.instructions[0].opcode, Opcode::Ret0);
    }

    #[test]
    fn double_not_cancels_at_compile_time() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let inner_not = Ast::list(vec![Ast::Symbol(known.not), Ast::Primitive(Primitive::Bool(true))], None);
        let rest = vec![inner_not];
        let block = compile_not(&mut compiler, &rest, true);
        let segment = block.linearize();
        assert!(!segment.instructions.iter().any(|i| i.opcode == Opcode::Not));
    }

    #[test]
    fn and_short_circuits_with_bfjmp() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let rest = vec![Ast::Primitive(Primitive::Bool(true)), Ast::Primitive(Primitive::Bool(false))];
        let block = compile_and(&mut compiler, &rest, true);
        let segment = block.linearize();
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::BfJmp));
    }
}
