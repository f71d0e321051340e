// ABOUTME: Compiles [$if cond then else?], mirroring compile_if.c's
// ABOUTME: not-stripping and four-way empty-branch dispatch

use super::Compiler;
use crate::bytecode::{CompiledBlock, Opcode, Operand};
use crate::value::Ast;
use std::cell::RefCell;
use std::rc::Rc;

/// Strip leading `$not`s from `cond`, returning the stripped expression and
/// whether an odd number of `$not`s were removed (spec.md §4.7.3:
/// "Strip outer `$not`s (swap branches per nest)").
fn strip_nots<'a>(compiler: &Compiler, mut cond: &'a Ast, mut negated: bool) -> (&'a Ast, bool) {
    loop {
        let Ast::Cons(cell) = cond else { return (cond, negated) };
        if cell.car.as_symbol() != Some(compiler.known.not) {
            return (cond, negated);
        }
        let Ast::Cons(arg_cell) = &cell.cdr else { return (cond, negated) };
        if !arg_cell.cdr.is_null() {
            return (cond, negated);
        }
        negated = !negated;
        cond = &arg_cell.car;
    }
}

pub fn compile_if(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.is_empty() || rest.len() > 3 {
        return compiler.compile_error("$if requires a condition and one or two branches", None);
    }
    let (cond, negated) = strip_nots(compiler, &rest[0], false);
    let cond = cond.clone();
    let (then_branch, else_branch) = match rest.len() {
        1 => (None, None),
        2 => (Some(&rest[1]), None),
        _ => (Some(&rest[1]), Some(&rest[2])),
    };
    let (then_branch, else_branch) = if negated {
        (else_branch, then_branch)
    } else {
        (then_branch, else_branch)
    };

    let mut block = CompiledBlock::new();

    match (then_branch, else_branch) {
        (None, None) => {
            let cond_block = compiler.compile(&cond, false);
            block.append_child(Rc::new(RefCell::new(cond_block)));
        }
        (Some(then_ast), None) => {
            let cond_block = compiler.compile(&cond, true);
            block.append_child(Rc::new(RefCell::new(cond_block)));
            let end_label = compiler.new_label();
            compiler.emit_branch(&mut block, Opcode::Bf, end_label);
            let then_block = compiler.compile(then_ast, want_result);
            block.append_child(Rc::new(RefCell::new(then_block)));
            compiler.emit_label(&mut block, end_label);
        }
        (None, Some(else_ast)) => {
            let cond_block = compiler.compile(&cond, true);
            block.append_child(Rc::new(RefCell::new(cond_block)));
            let end_label = compiler.new_label();
            compiler.emit_branch(&mut block, Opcode::Bt, end_label);
            let else_block = compiler.compile(else_ast, want_result);
            block.append_child(Rc::new(RefCell::new(else_block)));
            compiler.emit_label(&mut block, end_label);
        }
        (Some(then_ast), Some(else_ast)) => {
            let cond_block = compiler.compile(&cond, true);
            block.append_child(Rc::new(RefCell::new(cond_block)));
            let else_label = compiler.new_label();
            let end_label = compiler.new_label();
            compiler.emit_branch(&mut block, Opcode::Bf, else_label);
            let then_block = compiler.compile(then_ast, want_result);
            block.append_child(Rc::new(RefCell::new(then_block)));
            compiler.emit_branch(&mut block, Opcode::Jmp, end_label);
            compiler.emit_label(&mut block, else_label);
            let else_block = compiler.compile(else_ast, want_result);
            block.append_child(Rc::new(RefCell::new(else_block)));
            compiler.emit_label(&mut block, end_label);
        }
    }

    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{KnownSymbols, SymbolTable};
    use crate::value::Primitive;

    fn list(items: Vec<Ast>) -> Ast {
        Ast::list(items, None)
    }

    #[test]
    fn if_with_both_branches_emits_bf_jmp_and_two_labels() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let ast = list(vec![
            Ast::Primitive(Primitive::Bool(true)),
            Ast::Primitive(Primitive::Int32(1)),
            Ast::Primitive(Primitive::Int32(2)),
        ]);
        let block = compile_if(&mut compiler, &ast.as_proper_list().unwrap()[1..], true);
        let segment = block.linearize();
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::Bf));
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::Jmp));
    }

    #[test]
    fn if_with_only_then_branch_uses_bf_without_jmp() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let ast = list(vec![Ast::Primitive(Primitive::Bool(true)), Ast::Primitive(Primitive::Int32(1))]);
        let block = compile_if(&mut compiler, &ast.as_proper_list().unwrap()[1..], true);
        let segment = block.linearize();
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::Bf));
        assert!(!segment.instructions.iter().any(|i| i.opcode == Opcode::Jmp));
    }
}
