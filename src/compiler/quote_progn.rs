// ABOUTME: Compiles [$quote expr], [$prog1 a b...], and [$progn a b...]

use super::Compiler;
use crate::bytecode::{CompiledBlock, Opcode, Operand};
use crate::value::Ast;
use std::cell::RefCell;
use std::rc::Rc;

pub fn compile_quote(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.len() != 1 {
        return compiler.compile_error("$quote takes exactly one expression", None);
    }
    let index = compiler.tables_mut().push_constant(quoted_value(&rest[0]));
    let mut block = CompiledBlock::new();
    compiler.emit(&mut block, Opcode::LdObj, Operand::Index(index));
    if !want_result {
        compiler.emit(&mut block, Opcode::Pop1, Operand::None);
    }
    block
}

/// `$quote` never evaluates its argument; it becomes a constant reference to
/// the literal AST object itself (spec.md §4.7.3).
fn quoted_value(ast: &Ast) -> crate::value::SmileArg {
    use crate::value::{BoxedObject, BoxedPayload, Kind, Primitive, SmileArg};
    match ast {
        Ast::Primitive(p) => SmileArg::Unboxed(*p),
        Ast::Symbol(s) => SmileArg::Unboxed(Primitive::Symbol(*s)),
        Ast::Null => SmileArg::null(),
        Ast::Str(s) => SmileArg::Boxed(BoxedObject::new(Kind::String, BoxedPayload::String(RefCell::new(s.to_string())))),
        Ast::Cons(_) => SmileArg::Boxed(BoxedObject::new(Kind::List, BoxedPayload::QuotedAst(ast.clone()))),
        Ast::Pair(_) => SmileArg::Boxed(BoxedObject::new(Kind::Pair, BoxedPayload::QuotedAst(ast.clone()))),
    }
}

pub fn compile_prog1(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.is_empty() {
        return compiler.compile_error("$prog1 requires at least one expression", None);
    }
    let mut block = CompiledBlock::new();
    let first_block = compiler.compile(&rest[0], want_result);
    block.append_child(Rc::new(RefCell::new(first_block)));
    for expr in &rest[1..] {
        let expr_block = compiler.compile(expr, false);
        block.append_child(Rc::new(RefCell::new(expr_block)));
    }
    block
}

pub fn compile_progn(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    compile_progn_items(compiler, rest, want_result)
}

/// Shared by `$progn` and `$scope`'s implicit body sequencing: every
/// expression but the last is compiled with its result discarded
/// (spec.md §4.7.3).
pub fn compile_progn_items(compiler: &mut Compiler, items: &[Ast], want_result: bool) -> CompiledBlock {
    let mut block = CompiledBlock::new();
    if items.is_empty() {
        compiler.emit(&mut block, Opcode::LdNull, Operand::None);
        if !want_result {
            compiler.emit(&mut block, Opcode::Pop1, Operand::None);
        }
        return block;
    }
    let (last, init) = items.split_last().expect("checked non-empty above");
    for expr in init {
        let expr_block = compiler.compile(expr, false);
        block.append_child(Rc::new(RefCell::new(expr_block)));
    }
    let last_block = compiler.compile(last, want_result);
    block.append_child(Rc::new(RefCell::new(last_block)));
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{KnownSymbols, SymbolTable};
    use crate::value::Primitive;

    #[test]
    fn progn_discards_all_but_last_result() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let rest = vec![
            Ast::Primitive(Primitive::Int32(1)),
            Ast::Primitive(Primitive::Int32(2)),
            Ast::Primitive(Primitive::Int32(3)),
        ];
        let block = compile_progn(&mut compiler, &rest, true);
        let segment = block.linearize();
        let pop_count = segment.instructions.iter().filter(|i| i.opcode == Opcode::Pop1).count();
        assert_eq!(pop_count, 2);
    }

    #[test]
    fn prog1_keeps_the_first_value() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let rest = vec![Ast::Primitive(Primitive::Int32(1)), Ast::Primitive(Primitive::Int32(2))];
        let block = compile_prog1(&mut compiler, &rest, true);
        let segment = block.linearize();
        let pop_count = segment.instructions.iter().filter(|i| i.opcode == Opcode::Pop1).count();
        assert_eq!(pop_count, 1);
    }

    #[test]
    fn quoting_a_list_keeps_its_structure_instead_of_collapsing_to_null() {
        use crate::symbol::Symbol;
        use crate::value::{BoxedPayload, Kind};

        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let quoted = Ast::list(vec![Ast::Symbol(Symbol(1)), Ast::Symbol(Symbol(2))], None);
        let rest = vec![quoted];
        let block = compile_quote(&mut compiler, &rest, true);
        let _segment = block.linearize();

        assert_eq!(compiler.tables.constants.len(), 1);
        let constant = &compiler.tables.constants[0];
        assert_eq!(constant.kind(), Kind::List);
        match constant {
            crate::value::SmileArg::Boxed(obj) => match &obj.payload {
                BoxedPayload::QuotedAst(ast) => assert_eq!(ast.list_len(), Some(2)),
                other => panic!("expected a QuotedAst payload, got {other:?}"),
            },
            other => panic!("expected a boxed constant, got {other:?}"),
        }
    }
}
