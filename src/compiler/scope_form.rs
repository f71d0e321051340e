// ABOUTME: Compiles [$scope [vars] body...] — declares locals, initializes
// ABOUTME: them deterministically, then compiles body as an implicit $progn

use super::{Compiler, LocalKind};
use crate::bytecode::Opcode;
use crate::bytecode::{CompiledBlock, Operand};
use crate::value::Ast;
use std::cell::RefCell;
use std::rc::Rc;

use super::quote_progn::compile_progn_items;

/// Each var declaration is a bare symbol, or `[sym auto]` / `[sym set-once]`
/// (spec.md §4.7.3).
fn declared_symbol(var: &Ast) -> Option<crate::symbol::Symbol> {
    if let Some(sym) = var.as_symbol() {
        return Some(sym);
    }
    var.as_proper_list()?.first()?.as_symbol()
}

pub fn compile_scope(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.is_empty() {
        return compiler.compile_error("$scope requires a variable list", None);
    }
    let Some(var_asts) = rest[0].as_proper_list() else {
        return compiler.compile_error("$scope's first argument must be a proper list of declarations", None);
    };

    let mut block = CompiledBlock::new();
    for var in &var_asts {
        let Some(symbol) = declared_symbol(var) else {
            return compiler.compile_error("$scope declaration is not a bare symbol or [sym kind] pair", None);
        };
        compiler.declare_local(symbol, LocalKind::Local);
        // Guarantee a deterministic initial value (spec.md §4.7.3).
        compiler.emit(&mut block, Opcode::NullLoc0, Operand::None);
    }

    let body_block = compile_progn_items(compiler, &rest[1..], want_result);
    block.append_child(Rc::new(RefCell::new(body_block)));
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{KnownSymbols, SymbolTable};
    use crate::value::Primitive;

    #[test]
    fn scope_emits_one_nullloc0_per_declared_variable() {
        let mut table = SymbolTable::new();
        let x = table.get_or_create("x");
        let y = table.get_or_create("y");
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let rest = vec![
            Ast::list(vec![Ast::Symbol(x), Ast::Symbol(y)], None),
            Ast::Primitive(Primitive::Int32(1)),
        ];
        let block = compile_scope(&mut compiler, &rest, true);
        let segment = block.linearize();
        let nullloc_count = segment.instructions.iter().filter(|i| i.opcode == Opcode::NullLoc0).count();
        assert_eq!(nullloc_count, 2);
    }
}
