// ABOUTME: Compiles [$while pre cond post], the four pre/post-presence
// ABOUTME: variants described in spec.md §4.7.3

use super::Compiler;
use crate::bytecode::{CompiledBlock, Opcode, Operand};
use crate::value::Ast;
use std::cell::RefCell;
use std::rc::Rc;

pub fn compile_while(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.len() != 3 {
        return compiler.compile_error("$while requires pre, cond, and post expressions", None);
    }
    let pre = &rest[0];
    let cond = &rest[1];
    let post = &rest[2];
    let pre_present = !pre.is_null();
    let post_present = !post.is_null();

    let mut block = CompiledBlock::new();
    let top = compiler.new_label();
    let end = compiler.new_label();

    if post_present && !pre_present {
        // A never-executed loop must still leave `null` (spec.md §4.7.3:
        // "The post-only form prepends LdNull").
        compiler.emit(&mut block, Opcode::LdNull, Operand::None);
    }

    compiler.emit_label(&mut block, top);
    if pre_present {
        let pre_block = compiler.compile(pre, true);
        block.append_child(Rc::new(RefCell::new(pre_block)));
    } else {
        compiler.emit(&mut block, Opcode::LdNull, Operand::None);
    }

    let cond_block = compiler.compile(cond, true);
    block.append_child(Rc::new(RefCell::new(cond_block)));
    compiler.emit_branch(&mut block, Opcode::Bf, end);

    if pre_present {
        compiler.emit(&mut block, Opcode::Pop1, Operand::None);
    }
    if post_present {
        let post_block = compiler.compile(post, false);
        block.append_child(Rc::new(RefCell::new(post_block)));
    }
    compiler.emit_branch(&mut block, Opcode::Jmp, top);
    compiler.emit_label(&mut block, end);

    if !want_result && pre_present {
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
    fn post_only_while_prepends_ldnull() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let rest = vec![
            Ast::Null,
            Ast::Primitive(Primitive::Bool(false)),
            Ast::Primitive(Primitive::Int32(1)),
        ];
        let block = compile_while(&mut compiler, &rest, true);
        let segment = block.linearize();
        assert_eq!(segment.instructions[0].opcode, Opcode::LdNull);
    }
}
