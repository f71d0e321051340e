// ABOUTME: Compiles [$till [flags] body [whens...]] — the escape-continuation
// ABOUTME: form, resolved to absolute branch targets at linearization

use super::{Compiler, LocalKind, TillFrame};
use crate::bytecode::{CompiledBlock, Opcode, Operand};
use crate::compiled_tables::TillContinuationInfo;
use crate::value::Ast;
use std::cell::RefCell;
use std::rc::Rc;

pub fn compile_till(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.len() < 2 {
        return compiler.compile_error("$till requires a flags list and a body", None);
    }
    let Some(flag_asts) = rest[0].as_proper_list() else {
        return compiler.compile_error("$till's flags must be a proper list", None);
    };
    let flags: Vec<_> = match flag_asts.iter().map(|a| a.as_symbol()).collect::<Option<Vec<_>>>() {
        Some(flags) => flags,
        None => return compiler.compile_error("$till flags must all be bare symbols", None),
    };
    let body = &rest[1];
    let whens = &rest[2..];

    let mut block = CompiledBlock::new();
    let flag_labels: Vec<_> = (0..flags.len()).map(|_| compiler.new_label()).collect();
    let till_index = compiler.tables_mut().push_till_continuation(TillContinuationInfo::new(
        compiler.functions.len().saturating_sub(1),
        flags.clone(),
        flag_labels.clone(),
    ));

    // Reserve a frame slot for the continuation handle itself.
    let handle_symbol = flags.first().copied().unwrap_or(crate::symbol::Symbol::EMPTY);
    compiler.declare_local(handle_symbol, LocalKind::Local);

    compiler
        .functions
        .last_mut()
        .expect("compile_till called outside a function context")
        .till_stack
        .push(TillFrame {
            till_index,
            flags: flags.clone(),
            flag_labels: flag_labels.clone(),
        });

    compiler.emit(&mut block, Opcode::NewTill, Operand::Index(till_index));

    let body_block = compiler.compile(body, want_result);
    block.append_child(Rc::new(RefCell::new(body_block)));
    let end_label = compiler.new_label();
    compiler.emit_branch(&mut block, Opcode::Jmp, end_label);

    for (when_ast, &label) in whens.iter().zip(flag_labels.iter()) {
        compiler.emit_label(&mut block, label);
        let when_block = compiler.compile(when_ast, want_result);
        block.append_child(Rc::new(RefCell::new(when_block)));
        compiler.emit_branch(&mut block, Opcode::Jmp, end_label);
    }
    compiler.emit_label(&mut block, end_label);

    compiler
        .functions
        .last_mut()
        .expect("compile_till called outside a function context")
        .till_stack
        .pop();

    block
}

/// Compile a reference to a till flag inside the body: unwind the frame
/// back to the till and branch to its `when` label (spec.md §4.7.3).
pub fn compile_till_escape(compiler: &mut Compiler, flag: crate::symbol::Symbol) -> Option<CompiledBlock> {
    let f = compiler.functions.last()?;
    let frame = f.till_stack.iter().rev().find(|t| t.flags.contains(&flag))?;
    let offset = frame.flags.iter().position(|&s| s == flag)?;
    let till_index = frame.till_index;
    let label = frame.flag_labels[offset];

    let mut block = CompiledBlock::new();
    compiler.emit(&mut block, Opcode::TillEsc, Operand::TillEsc(till_index, offset));
    compiler.emit_branch(&mut block, Opcode::Jmp, label);
    Some(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{KnownSymbols, SymbolTable};
    use crate::value::Primitive;

    #[test]
    fn till_with_one_when_resolves_its_branch_target() {
        let mut table = SymbolTable::new();
        let flag = table.get_or_create("done");
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let rest = vec![
            Ast::list(vec![Ast::Symbol(flag)], None),
            Ast::Primitive(Primitive::Int32(1)),
            Ast::Primitive(Primitive::Int32(2)),
        ];
        let block = compile_till(&mut compiler, &rest, true);
        let segment = block.linearize();
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::NewTill));
        assert_eq!(compiler.tables.till_continuations.len(), 1);
    }
}
