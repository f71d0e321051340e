// ABOUTME: Compiles [$new base members...] — NewObject plus one StProp per
// ABOUTME: [sym value] member initializer

use super::Compiler;
use crate::bytecode::{CompiledBlock, Opcode, Operand};
use crate::value::Ast;
use std::cell::RefCell;
use std::rc::Rc;

pub fn compile_new(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.is_empty() {
        return compiler.compile_error("$new requires a base expression", None);
    }
    let mut block = CompiledBlock::new();
    let base_block = compiler.compile(&rest[0], true);
    block.append_child(Rc::new(RefCell::new(base_block)));
    compiler.emit(&mut block, Opcode::NewObject, Operand::None);

    for member in &rest[1..] {
        let Some(pair) = member.as_proper_list() else {
            return compiler.compile_error("$new member initializer must be [sym value]", None);
        };
        if pair.len() != 2 {
            return compiler.compile_error("$new member initializer must have exactly a symbol and a value", None);
        }
        let Some(sym) = pair[0].as_symbol() else {
            return compiler.compile_error("$new member name must be a bare symbol", None);
        };
        let value_block = compiler.compile(&pair[1], true);
        block.append_child(Rc::new(RefCell::new(value_block)));
        compiler.emit(&mut block, Opcode::StProp, Operand::Symbol(sym));
    }

    if !want_result {
        compiler.emit(&mut block, Opcode::Pop1, Operand::None);
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{KnownSymbols, SymbolTable};
    use crate::value::Primitive;

    #[test]
    fn new_with_members_emits_newobject_and_one_stprop_each() {
        let mut table = SymbolTable::new();
        let x = table.get_or_create("x");
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let rest = vec![
            Ast::Null,
            Ast::list(vec![Ast::Symbol(x), Ast::Primitive(Primitive::Int32(1))], None),
        ];
        let block = compile_new(&mut compiler, &rest, true);
        let segment = block.linearize();
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::NewObject));
        assert_eq!(segment.instructions.iter().filter(|i| i.opcode == Opcode::StProp).count(), 1);
    }
}
