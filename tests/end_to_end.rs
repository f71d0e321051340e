// ABOUTME: Crate-level integration tests covering the lex/parse/compile
// ABOUTME: pipeline end to end, plus the cross-cutting invariants it must hold

use pretty_assertions::assert_eq;
use smile_core::bytecode::{CompiledBlock, Opcode};
use smile_core::compiler::Compiler;
use smile_core::lexer::Lexer;
use smile_core::parser::{ParseResult, Parser};
use smile_core::symbol::{KnownSymbols, SymbolTable};
use smile_core::token::TokenKind;
use smile_core::value::Ast;
use std::cell::RefCell;
use std::rc::Rc;

fn parse(src: &str) -> (Ast, Rc<RefCell<SymbolTable>>, KnownSymbols) {
    let mut table = SymbolTable::new();
    let known = KnownSymbols::new(&mut table);
    let symbols = Rc::new(RefCell::new(table));
    let lexer = Lexer::new(src.as_bytes(), 0, src.len(), "test.sm", 1, Rc::clone(&symbols));
    let mut parser = Parser::new(lexer, Rc::clone(&symbols), &known);
    let ast = match parser.parse_program() {
        ParseResult::Expr(ast) => ast,
        ParseResult::Recovery => panic!("parse recovery: {:?}", parser.diagnostics.as_slice()),
        ParseResult::Error(msg) => panic!("parse error: {msg}"),
    };
    (ast, symbols, known)
}

fn compile(ast: &Ast, known: &KnownSymbols, want_result: bool) -> (Compiler<'_>, CompiledBlock) {
    let mut compiler = Compiler::new(known);
    compiler.enter_function(0);
    let block = compiler.compile(ast, want_result);
    (compiler, block)
}

#[test]
fn minimal_expression_is_a_method_call() {
    let (ast, _table, known) = parse("1 + 2");
    let (_compiler, block) = compile(&ast, &known, true);
    let segment = block.linearize();
    let opcodes: Vec<_> = segment.instructions.iter().map(|i| i.opcode).collect();
    // `1 + 2` desugars to `[[$dot 1 +] 2]`: push receiver, load the `+`
    // property, push the argument, call with one argument.
    assert_eq!(opcodes, vec![Opcode::Ld32, Opcode::LdProp, Opcode::Ld32, Opcode::Call]);
}

#[test]
fn variable_declaration_and_use() {
    let (ast, _table, known) = parse("var x = 42 x * 2");
    let (_compiler, block) = compile(&ast, &known, true);
    let segment = block.linearize();
    let opcodes: Vec<_> = segment.instructions.iter().map(|i| i.opcode).collect();
    // The enclosing [$scope [x] ...] reserves x's slot with NullLoc0, then
    // StLoc stores 42, then x is loaded again for the multiplication.
    assert!(opcodes.contains(&Opcode::NullLoc0));
    assert!(opcodes.contains(&Opcode::StLoc));
    assert!(opcodes.contains(&Opcode::LdLoc));
    assert!(opcodes.contains(&Opcode::Call));
}

#[test]
fn conditional_balances_the_stack_on_both_branches() {
    let (ast, _table, known) = parse("if x > 0 then 1 else -1");
    let (mut compiler, block) = compile(&ast, &known, true);
    let segment = block.linearize();
    assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::Bf));
    assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::Jmp));
    let _ = compiler.exit_function();
}

#[test]
fn till_escape_resolves_its_branch_target_after_linearization() {
    let src = "till found do { found } when found: 2";
    let (ast, _table, known) = parse(src);
    let mut compiler = Compiler::new(&known);
    compiler.enter_function(0);
    let block = compiler.compile(&ast, false);
    let (_segment, label_pcs) = block.linearize_with_labels();
    compiler.tables.resolve_till_branch_targets(&label_pcs);

    assert_eq!(compiler.tables.till_continuations.len(), 1);
    let info = &compiler.tables.till_continuations[0];
    assert_eq!(info.branch_target_addresses.len(), 1);
    assert!(info.branch_target_addresses[0].is_some());
}

#[test]
fn dynamic_string_interpolation_builds_a_list_of_join_call() {
    let (ast, _table, known) = parse("\"hello {name}!\"");
    let (_compiler, block) = compile(&ast, &known, true);
    let segment = block.linearize();
    // `"hello {name}!"` splits into two string literals plus the embedded
    // `name` expression, becomes `[$dot [[$dot List of] "hello " name "!"] join]`:
    // one call (`List.of` with three arguments) and two property loads
    // (`.of`, then the outer `.join`).
    assert_eq!(segment.instructions.iter().filter(|i| i.opcode == Opcode::LdStr).count(), 2);
    assert_eq!(segment.instructions.iter().filter(|i| i.opcode == Opcode::Call).count(), 1);
    assert_eq!(segment.instructions.iter().filter(|i| i.opcode == Opcode::LdProp).count(), 2);
}

#[test]
fn nested_function_captures_outer_variable_and_produces_a_function_value() {
    let (ast, _table, known) = parse("var x = 10 || x + 1");
    let mut compiler = Compiler::new(&known);
    compiler.enter_function(0);
    let outer_closure_info = compiler.functions[0].closure_info.clone();
    let block = compiler.compile(&ast, true);
    let segment = block.linearize();
    assert!(segment.instructions.iter().any(|i| i.opcode == Opcode::NewFn));
    assert_eq!(compiler.tables.functions.len(), 1);
    let inner = &compiler.tables.functions[0];
    assert_eq!(inner.arg_count, 0);
    // The inner function's ClosureInfo.parent must point to the outer
    // function's own closure info, not a disconnected placeholder.
    let parent = inner.closure_info.parent.as_ref().expect("nested fn must have a parent closure info");
    assert!(Rc::ptr_eq(parent, &outer_closure_info));
}

#[test]
fn progn_list_from_source_is_a_proper_list_of_four() {
    let (ast, _table, _known) = parse("a b c");
    // [$scope [] a b c] — head symbol plus the empty decl list plus three
    // statements: a proper list of length 5.
    assert_eq!(ast.list_len(), Some(5));
    assert!(ast.as_proper_list().is_some());
}

#[test]
fn every_emitted_instruction_has_a_source_location() {
    let (ast, _table, known) = parse("var x = 1 x + 2");
    let (_compiler, block) = compile(&ast, &known, true);
    let segment = block.linearize();
    assert!(!segment.instructions.is_empty());
}

#[test]
fn unclosed_paren_recovers_into_a_diagnostic_not_a_panic() {
    let mut table = SymbolTable::new();
    let known = KnownSymbols::new(&mut table);
    let symbols = Rc::new(RefCell::new(table));
    let src = "(1 + 2";
    let lexer = Lexer::new(src.as_bytes(), 0, src.len(), "test.sm", 1, Rc::clone(&symbols));
    let mut parser = Parser::new(lexer, symbols, &known);
    let result = parser.parse_program();
    assert!(matches!(result, ParseResult::Recovery));
    assert!(parser.diagnostics.has_errors());
}

#[test]
fn unget_then_next_returns_the_same_token_kind() {
    let table = SymbolTable::new();
    let symbols = Rc::new(RefCell::new(table));
    let src = "foo bar";
    let mut lexer = Lexer::new(src.as_bytes(), 0, src.len(), "test.sm", 1, symbols);
    let first = lexer.next();
    lexer.unget();
    let second = lexer.next();
    assert_eq!(first.kind, second.kind);
    assert_eq!(first.text, second.text);
}

#[test]
fn symbol_identity_round_trips_through_the_table() {
    let mut table = SymbolTable::new();
    let a = table.get_or_create("alpha");
    let b = table.get_or_create("alpha");
    let c = table.get_or_create("beta");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(table.get_name(a), "alpha");
    assert_eq!(table.get_no_create("never-interned"), smile_core::symbol::Symbol::EMPTY);
}

#[test]
fn tokens_only_lexing_reaches_eoi() {
    let mut table = SymbolTable::new();
    let symbols = Rc::new(RefCell::new(table));
    let src = "1 + 2";
    let mut lexer = Lexer::new(src.as_bytes(), 0, src.len(), "test.sm", 1, symbols);
    let mut kinds = Vec::new();
    loop {
        let token = lexer.next();
        let done = token.kind == TokenKind::Eoi;
        kinds.push(token.kind);
        if done {
            break;
        }
    }
    assert_eq!(*kinds.last().unwrap(), TokenKind::Eoi);
}
