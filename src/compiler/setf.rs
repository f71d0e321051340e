// ABOUTME: Compiles [$set lvalue rvalue] and [$opset op lvalue rvalue]
// ABOUTME: sharing one lvalue-descriptor routine per Design Notes §9

use super::{Compiler, LocalKind, VariableRef};
use crate::bytecode::{CompiledBlock, Opcode, Operand};
use crate::value::Ast;
use std::cell::RefCell;
use std::rc::Rc;

/// The three lvalue shapes `$set`/`$opset` both accept (spec.md §4.7.3).
enum Lvalue<'a> {
    Variable(crate::symbol::Symbol),
    Property { obj: &'a Ast, sym: crate::symbol::Symbol },
    Member { obj: &'a Ast, index: &'a Ast },
}

fn parse_lvalue(compiler: &Compiler, ast: &Ast) -> Option<Lvalue<'_>> {
    if let Some(sym) = ast.as_symbol() {
        return Some(Lvalue::Variable(sym));
    }
    let items = ast.as_proper_list()?;
    let head = items.first()?.as_symbol()?;
    if head == compiler.known.dot && items.len() == 3 {
        let sym = items[2].as_symbol()?;
        let Ast::Cons(cell) = ast else { return None };
        let Ast::Cons(next) = &cell.cdr else { return None };
        return Some(Lvalue::Property { obj: &next.car, sym });
    }
    if head == compiler.known.index && items.len() == 3 {
        let Ast::Cons(cell) = ast else { return None };
        let Ast::Cons(next) = &cell.cdr else { return None };
        let Ast::Cons(next2) = &next.cdr else { return None };
        return Some(Lvalue::Member { obj: &next.car, index: &next2.car });
    }
    None
}

/// Emit the store half of an lvalue, given that its value is already on the
/// stack (for `Variable`/`Property`) or its receiver/index/value are (for
/// `Member`). `no_result` picks the "p" (pop) opcode variants.
fn emit_store(compiler: &mut Compiler, block: &mut CompiledBlock, lvalue: &Lvalue, no_result: bool) {
    match lvalue {
        Lvalue::Variable(sym) => match compiler.resolve_variable(*sym) {
            VariableRef::Local { kind: LocalKind::Argument, index, .. } => {
                compiler.emit(block, Opcode::StArg, Operand::Index(index));
            }
            VariableRef::Local { kind: LocalKind::Local, index, .. } => {
                compiler.emit(block, Opcode::StLoc, Operand::Index(index));
            }
            VariableRef::Global(sym) => {
                compiler.emit(block, Opcode::StGlobal, Operand::Symbol(sym));
            }
        },
        Lvalue::Property { sym, .. } => {
            let opcode = if no_result { Opcode::StpProp } else { Opcode::StProp };
            compiler.emit(block, opcode, Operand::Symbol(*sym));
        }
        Lvalue::Member { .. } => {
            let opcode = if no_result { Opcode::StpMember } else { Opcode::StMember };
            compiler.emit(block, opcode, Operand::None);
        }
    }
}

fn emit_lvalue_receiver(compiler: &mut Compiler, block: &mut CompiledBlock, lvalue: &Lvalue) {
    match lvalue {
        Lvalue::Variable(_) => {}
        Lvalue::Property { obj, .. } => {
            let obj_block = compiler.compile(obj, true);
            block.append_child(Rc::new(RefCell::new(obj_block)));
        }
        Lvalue::Member { obj, index } => {
            let obj_block = compiler.compile(obj, true);
            block.append_child(Rc::new(RefCell::new(obj_block)));
            let index_block = compiler.compile(index, true);
            block.append_child(Rc::new(RefCell::new(index_block)));
        }
    }
}

pub fn compile_set(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.len() != 2 {
        return compiler.compile_error("$set requires an lvalue and a value", None);
    }
    let Some(lvalue) = parse_lvalue(compiler, &rest[0]) else {
        return compiler.compile_error("$set's first argument is not a valid lvalue", None);
    };

    let mut block = CompiledBlock::new();
    emit_lvalue_receiver(compiler, &mut block, &lvalue);
    let rvalue_block = compiler.compile(&rest[1], true);
    block.append_child(Rc::new(RefCell::new(rvalue_block)));
    emit_store(compiler, &mut block, &lvalue, !want_result);
    block
}

pub fn compile_opset(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.len() != 3 {
        return compiler.compile_error("$opset requires an operator, an lvalue, and a value", None);
    }
    let Some(op) = rest[0].as_symbol() else {
        return compiler.compile_error("$opset's operator must be a bare symbol", None);
    };
    let Some(lvalue) = parse_lvalue(compiler, &rest[1]) else {
        return compiler.compile_error("$opset's lvalue argument is not valid", None);
    };

    let mut block = CompiledBlock::new();
    emit_lvalue_receiver(compiler, &mut block, &lvalue);
    // Load the lvalue's current value first (spec.md §4.7.3).
    match &lvalue {
        Lvalue::Variable(sym) => {
            let load_block = compiler.compile(&Ast::Symbol(*sym), true);
            block.append_child(Rc::new(RefCell::new(load_block)));
        }
        Lvalue::Property { sym, .. } => {
            compiler.emit(&mut block, Opcode::LdProp, Operand::Symbol(*sym));
        }
        Lvalue::Member { .. } => {
            compiler.emit(&mut block, Opcode::LdMember, Operand::None);
        }
    }

    let rvalue_block = compiler.compile(&rest[2], true);
    block.append_child(Rc::new(RefCell::new(rvalue_block)));
    compiler.emit(&mut block, Opcode::Met1, Operand::Symbol(op));
    emit_store(compiler, &mut block, &lvalue, !want_result);
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{KnownSymbols, SymbolTable};
    use crate::value::Primitive;

    #[test]
    fn set_on_a_bare_symbol_emits_a_store_opcode() {
        let mut table = SymbolTable::new();
        let x = table.get_or_create("x");
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);
        compiler.declare_local(x, LocalKind::Local);

        let rest = vec![Ast::Symbol(x), Ast::Primitive(Primitive::Int32(5))];
        let block = compile_set(&mut compiler, &rest, false);
        let segment = block.linearize();
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::StLoc));
    }

    #[test]
    fn opset_loads_current_value_before_applying_the_operator() {
        let mut table = SymbolTable::new();
        let x = table.get_or_create("x");
        let plus = table.get_or_create("+");
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);
        compiler.declare_local(x, LocalKind::Local);

        let rest = vec![Ast::Symbol(plus), Ast::Symbol(x), Ast::Primitive(Primitive::Int32(1))];
        let block = compile_opset(&mut compiler, &rest, false);
        let segment = block.linearize();
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::Met1));
    }
}
