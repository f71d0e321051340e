// ABOUTME: Compiles [$fn args body...] — a nested UserFunctionInfo recursively
// ABOUTME: compiled under its own CompilerFunction

use super::quote_progn::compile_progn_items;
use super::{Compiler, LocalKind};
use crate::bytecode::{CompiledBlock, Opcode, Operand};
use crate::compiled_tables::{ArgInfo, UserFunctionInfo};
use crate::value::Ast;

/// `args` is a proper list of bare-symbol or `[name type]`-shaped argument
/// declarations (spec.md §3 "UserFunctionInfo args[]").
fn parse_arg(ast: &Ast) -> Option<ArgInfo> {
    if let Some(sym) = ast.as_symbol() {
        return Some(ArgInfo {
            name: sym,
            type_name: None,
            is_rest: false,
            has_typecheck: false,
            is_optional: false,
            default_value: None,
        });
    }
    let items = ast.as_proper_list()?;
    let name = items.first()?.as_symbol()?;
    let type_name = items.get(1).and_then(|a| a.as_symbol());
    Some(ArgInfo {
        name,
        type_name,
        is_rest: false,
        has_typecheck: type_name.is_some(),
        is_optional: false,
        default_value: None,
    })
}

pub fn compile_fn(compiler: &mut Compiler, rest: &[Ast], want_result: bool) -> CompiledBlock {
    if rest.is_empty() {
        return compiler.compile_error("$fn requires an argument list", None);
    }
    let Some(arg_asts) = rest[0].as_proper_list() else {
        return compiler.compile_error("$fn's argument list must be a proper list", None);
    };
    let args: Vec<ArgInfo> = match arg_asts.iter().map(parse_arg).collect::<Option<Vec<_>>>() {
        Some(args) => args,
        None => return compiler.compile_error("$fn argument declarations must be symbols or [name type]", None),
    };

    let arg_count = args.len();
    compiler.enter_function(arg_count);
    for arg in &args {
        compiler.declare_local(arg.name, LocalKind::Argument);
    }

    let body_items = &rest[1..];
    let body_ast = Ast::list(body_items.to_vec(), None);
    let body_block = compile_progn_items(compiler, body_items, true);
    let segment = body_block.linearize();

    let finished = compiler.exit_function();

    // `finished.closure_info` was created (and parented to the enclosing
    // function's own closure info) back when this function was entered,
    // then grown in place as its body compiled — it already has the
    // right shape and ancestry, so it is reused as-is rather than rebuilt.
    let closure_info = finished.closure_info.clone();

    let info = UserFunctionInfo {
        parent: compiler.functions.len().checked_sub(1),
        arg_count,
        min_args: arg_count,
        max_args: Some(arg_count),
        args,
        position: None,
        arg_list_ast: rest[0].clone(),
        body_ast,
        closure_info,
        byte_code_segment: segment,
    };
    let fn_index = compiler.tables_mut().push_function(info);

    let mut block = CompiledBlock::new();
    compiler.emit(&mut block, Opcode::NewFn, Operand::Index(fn_index));
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
    fn fn_with_two_args_reserves_two_argument_slots() {
        let mut table = SymbolTable::new();
        let x = table.get_or_create("x");
        let y = table.get_or_create("y");
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);

        let rest = vec![
            Ast::list(vec![Ast::Symbol(x), Ast::Symbol(y)], None),
            Ast::Symbol(x),
        ];
        let block = compile_fn(&mut compiler, &rest, true);
        let segment = block.linearize();
        assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::NewFn));
        assert_eq!(compiler.tables.functions[0].arg_count, 2);
    }

    #[test]
    fn fn_closure_info_parent_is_the_enclosing_functions_closure_info() {
        let mut table = SymbolTable::new();
        let known = KnownSymbols::new(&mut table);
        let mut compiler = Compiler::new(&known);
        compiler.enter_function(0);
        let outer_closure_info = compiler.functions[0].closure_info.clone();

        let rest = vec![Ast::list(vec![], None), Ast::Primitive(Primitive::Int32(1))];
        compile_fn(&mut compiler, &rest, true);

        let inner = &compiler.tables.functions[0];
        let parent = inner.closure_info.parent.as_ref().expect("nested fn must have a parent closure info");
        assert!(std::rc::Rc::ptr_eq(parent, &outer_closure_info));
    }
}
