// ABOUTME: Compiler core — scope/symbol resolution, block emission, stack
// ABOUTME: tracking, source-location threading, and the special-form dispatch

mod catch_form;
mod fn_form;
mod if_form;
mod new_form;
mod property;
mod quote_progn;
mod scope_form;
mod setf;
mod standardform;
mod till_form;
mod while_form;

use crate::bytecode::{CompiledBlock, IntermediateInstruction, LabelId, Opcode, Operand};
use crate::compiled_tables::{CompiledTables, SourceLocationRecord};
use crate::diagnostics::DiagnosticList;
use crate::position::LexerPosition;
use crate::symbol::{KnownSymbols, Symbol};
use crate::value::Ast;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalKind {
    Argument,
    Local,
}

/// Per-variable bookkeeping the compiler needs beyond a plain slot index:
/// whether a nested function reaches in and touches it, which decides at
/// `$fn` compile time whether the outer frame must stay reachable
/// (spec.md §4.7.1).
#[derive(Debug, Clone)]
pub struct CompiledLocalSymbol {
    pub symbol: Symbol,
    pub kind: LocalKind,
    pub index: usize,
    pub read: bool,
    pub written: bool,
    pub read_by_nested_fn: bool,
    pub written_by_nested_fn: bool,
}

/// Mirrors the parser's `ParseScope` stack, one level per function
/// (spec.md §4.7.1). Variable declarations made by `$scope` add to the
/// innermost `CompileScope`'s locals.
#[derive(Debug)]
pub struct CompileScope {
    pub locals: Vec<CompiledLocalSymbol>,
    by_symbol: HashMap<Symbol, usize>,
}

impl CompileScope {
    fn new() -> Self {
        CompileScope {
            locals: Vec::new(),
            by_symbol: HashMap::new(),
        }
    }

    fn declare(&mut self, symbol: Symbol, kind: LocalKind, index: usize) {
        let slot = self.locals.len();
        self.locals.push(CompiledLocalSymbol {
            symbol,
            kind,
            index,
            read: false,
            written: false,
            read_by_nested_fn: false,
            written_by_nested_fn: false,
        });
        self.by_symbol.insert(symbol, slot);
    }

    fn find(&self, symbol: Symbol) -> Option<usize> {
        self.by_symbol.get(&symbol).copied()
    }
}

/// All per-function compile-time state: its scope, the block tree it is
/// emitting into, and stack-depth tracking (spec.md §4.7.2).
pub struct CompilerFunction {
    pub scope: CompileScope,
    pub arg_count: usize,
    pub next_local_index: usize,
    pub current_stack_depth: i32,
    pub stack_size: i32,
    pub current_source_location: usize,
    pub next_label: usize,
    pub variable_names: Vec<Symbol>,
    /// This function's own static shape, parented to whichever function
    /// was active when this one was entered (or the module's global
    /// closure info, for a top-level function). Created eagerly so a
    /// nested `$fn` compiled inside this function's body can capture the
    /// same `Rc` as its parent before this function itself finishes
    /// compiling (spec.md §4.6 "lexical parent chain").
    pub closure_info: Rc<crate::closure::ClosureInfo>,
    /// Stack of `(till index, flag symbols, flag labels)` for flags
    /// currently in scope, innermost last (spec.md §4.7.3 `$till`).
    pub till_stack: Vec<TillFrame>,
}

pub struct TillFrame {
    pub till_index: usize,
    pub flags: Vec<Symbol>,
    pub flag_labels: Vec<LabelId>,
}

impl CompilerFunction {
    fn new(arg_count: usize, closure_info: Rc<crate::closure::ClosureInfo>) -> Self {
        // Argument symbols are declared by `fn_form` once their names are
        // known; slots 0..arg_count-1 are reserved for them regardless.
        let scope = CompileScope::new();
        CompilerFunction {
            scope,
            arg_count,
            next_local_index: arg_count,
            current_stack_depth: 0,
            stack_size: 0,
            current_source_location: 0,
            next_label: 0,
            variable_names: Vec::new(),
            closure_info,
            till_stack: Vec::new(),
        }
    }

    fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        id
    }
}

/// Top-level compiler: owns the module-wide `CompiledTables`, the
/// diagnostics list, and the stack of functions currently being compiled
/// (innermost last) — spec.md §4.7.
pub struct Compiler<'a> {
    pub tables: CompiledTables,
    pub diagnostics: DiagnosticList,
    pub known: &'a KnownSymbols,
    pub functions: Vec<CompilerFunction>,
    /// The module-wide global scope's closure info — the ultimate parent
    /// of every top-level function's own `ClosureInfo` (spec.md §4.6).
    pub global_closure_info: Rc<crate::closure::ClosureInfo>,
}

impl<'a> Compiler<'a> {
    pub fn new(known: &'a KnownSymbols) -> Self {
        Compiler {
            tables: CompiledTables::new(),
            diagnostics: DiagnosticList::new(),
            known,
            functions: Vec::new(),
            global_closure_info: crate::closure::ClosureInfo::new_global(),
        }
    }

    fn current_fn(&mut self) -> &mut CompilerFunction {
        self.functions.last_mut().expect("compile called outside any function context")
    }

    pub fn new_label(&mut self) -> LabelId {
        self.current_fn().new_label()
    }

    /// Emit one instruction into `block`, applying its opcode's stack delta
    /// (or an explicit override) against the current function's running
    /// depth and high-water mark (spec.md §4.7.2 `ApplyStackDelta`).
    pub fn emit(&mut self, block: &mut CompiledBlock, opcode: Opcode, operand: Operand) {
        self.emit_with_delta(block, opcode, operand, opcode.default_stack_delta());
    }

    pub fn emit_with_delta(&mut self, block: &mut CompiledBlock, opcode: Opcode, operand: Operand, delta: i32) {
        let source_location = self.current_fn().current_source_location;
        let mut instr = IntermediateInstruction::plain(opcode, operand, source_location);
        instr.stack_delta = delta;
        let f = self.current_fn();
        f.current_stack_depth += delta;
        if f.current_stack_depth > f.stack_size {
            f.stack_size = f.current_stack_depth;
        }
        f.closure_info.raise_temp_max(f.stack_size.max(0) as usize);
        block.emit(instr);
    }

    pub fn emit_label(&mut self, block: &mut CompiledBlock, label: LabelId) {
        block.emit(IntermediateInstruction::label(label));
    }

    pub fn emit_branch(&mut self, block: &mut CompiledBlock, opcode: Opcode, target: LabelId) {
        let source_location = self.current_fn().current_source_location;
        let delta = opcode.default_stack_delta();
        let mut instr = IntermediateInstruction::plain(opcode, Operand::None, source_location);
        instr.stack_delta = delta;
        instr.branch_target = Some(target);
        let f = self.current_fn();
        f.current_stack_depth += delta;
        if f.current_stack_depth > f.stack_size {
            f.stack_size = f.current_stack_depth;
        }
        f.closure_info.raise_temp_max(f.stack_size.max(0) as usize);
        block.emit(instr);
    }

    /// Push a source-location record for `position` (if any) and make it
    /// current, returning the previous index to be restored on exit from
    /// the subtree (spec.md §4.7.5).
    pub fn push_source_location(&mut self, position: Option<&LexerPosition>, assigned_name: Option<Symbol>) -> usize {
        let previous = self.current_fn().current_source_location;
        if let Some(pos) = position {
            let index = self.tables.push_source_location(SourceLocationRecord {
                position: pos.clone(),
                assigned_name,
            });
            self.current_fn().current_source_location = index;
        }
        previous
    }

    pub fn restore_source_location(&mut self, previous: usize) {
        self.current_fn().current_source_location = previous;
    }

    /// Resolve `symbol` against the current function's locals, then its
    /// lexical ancestors by walking `scope-depth`; falls back to a global
    /// load if nothing matches (spec.md §4.7.1).
    pub fn resolve_variable(&mut self, symbol: Symbol) -> VariableRef {
        let depth_limit = self.functions.len();
        for depth in 0..depth_limit {
            let idx = self.functions.len() - 1 - depth;
            if let Some(slot) = self.functions[idx].scope.find(symbol) {
                let local = &mut self.functions[idx].scope.locals[slot];
                if depth > 0 {
                    local.read_by_nested_fn = true;
                }
                return VariableRef::Local {
                    depth,
                    index: local.index,
                    kind: local.kind,
                };
            }
        }
        VariableRef::Global(symbol)
    }

    pub fn declare_local(&mut self, symbol: Symbol, kind: LocalKind) -> usize {
        let f = self.current_fn();
        let index = match kind {
            LocalKind::Argument => f.scope.locals.iter().filter(|l| l.kind == LocalKind::Argument).count(),
            LocalKind::Local => {
                let index = f.next_local_index;
                f.next_local_index += 1;
                f.variable_names.push(symbol);
                f.closure_info.record_local(symbol);
                index
            }
        };
        f.scope.declare(symbol, kind, index);
        index
    }

    /// Enter a new function context (spec.md §4.7.1: "On entry to a
    /// function, it reserves slots 0..numArgs-1 for arguments"). The new
    /// function's `ClosureInfo` is parented to whichever function is
    /// currently innermost, or to the module's global scope at depth 0.
    pub fn enter_function(&mut self, arg_count: usize) {
        let parent = self.functions.last().map(|f| f.closure_info.clone()).unwrap_or_else(|| self.global_closure_info.clone());
        let closure_info = crate::closure::ClosureInfo::new_local(parent, arg_count, 0, 0, Vec::new());
        self.functions.push(CompilerFunction::new(arg_count, closure_info));
    }

    pub fn exit_function(&mut self) -> CompilerFunction {
        self.functions.pop().expect("exit_function called with no active function")
    }

    /// Record an ill-formed-AST diagnostic and return a stack-neutral empty
    /// block, matching `CompiledBlock::CreateError()` (spec.md §4.7.6).
    pub fn compile_error(&mut self, message: impl Into<String>, position: Option<LexerPosition>) -> CompiledBlock {
        self.diagnostics.error(position, message.into());
        CompiledBlock::new()
    }

    /// Main dispatch: compile one AST node, optionally discarding its
    /// result (spec.md §4.7.3).
    pub fn compile(&mut self, ast: &Ast, want_result: bool) -> CompiledBlock {
        match ast {
            Ast::Null => self.compile_literal(Opcode::LdNull, Operand::None, want_result),
            Ast::Primitive(p) => self.compile_primitive(*p, want_result),
            Ast::Str(s) => self.compile_string(s, want_result),
            Ast::Symbol(sym) => {
                if let Some(escape) = till_form::compile_till_escape(self, *sym) {
                    escape
                } else {
                    self.compile_variable_load(*sym, want_result)
                }
            }
            Ast::Pair(_) => self.compile_error("unexpected syntax pair in compiled position", None),
            Ast::Cons(_) => self.compile_form(ast, want_result),
        }
    }

    fn compile_literal(&mut self, opcode: Opcode, operand: Operand, want_result: bool) -> CompiledBlock {
        let mut block = CompiledBlock::new();
        self.emit(&mut block, opcode, operand);
        if !want_result {
            self.emit(&mut block, Opcode::Pop1, Operand::None);
        }
        block
    }

    fn compile_primitive(&mut self, primitive: crate::value::Primitive, want_result: bool) -> CompiledBlock {
        use crate::value::Primitive as P;
        let (opcode, operand) = match primitive {
            P::Bool(b) => (Opcode::LdBool, Operand::Bool(b)),
            P::Byte(b) => (Opcode::Ld8, Operand::Int8(b)),
            P::Int16(v) => (Opcode::Ld16, Operand::Int16(v)),
            P::Int32(v) => (Opcode::Ld32, Operand::Int32(v)),
            P::Int64(v) => (Opcode::Ld64, Operand::Int64(v)),
            P::Symbol(s) => (Opcode::LdObj, Operand::Symbol(s)),
            _ => {
                let index = self.tables.push_constant(crate::value::SmileArg::Unboxed(primitive));
                (Opcode::LdObj, Operand::Index(index))
            }
        };
        self.compile_literal(opcode, operand, want_result)
    }

    fn compile_string(&mut self, s: &str, want_result: bool) -> CompiledBlock {
        let index = self.tables.intern_string(s);
        self.compile_literal(Opcode::LdStr, Operand::Index(index), want_result)
    }

    fn compile_variable_load(&mut self, symbol: Symbol, want_result: bool) -> CompiledBlock {
        let mut block = CompiledBlock::new();
        match self.resolve_variable(symbol) {
            VariableRef::Local { depth, index, kind } if depth == 0 => {
                let opcode = match kind {
                    LocalKind::Argument => short_arg_opcode(index),
                    LocalKind::Local => short_loc_opcode(index),
                };
                let operand = match opcode {
                    Opcode::LdArg | Opcode::LdLoc => Operand::Index(index),
                    _ => Operand::None,
                };
                self.emit(&mut block, opcode, operand);
            }
            VariableRef::Local { depth, index, .. } => {
                // Deep access: a scope-depth followed by the slot index
                // within that ancestor's frame (spec.md §4.6 "LdX scope index").
                self.emit(&mut block, Opcode::LdX, Operand::Index(depth));
                self.emit_with_delta(&mut block, Opcode::LdX, Operand::Index(index), 0);
            }
            VariableRef::Global(sym) => {
                self.emit(&mut block, Opcode::LdGlobal, Operand::Symbol(sym));
            }
        }
        if !want_result {
            self.emit(&mut block, Opcode::Pop1, Operand::None);
        }
        block
    }

    /// Default call compilation: every element is compiled requiring a
    /// result, then `Call n` is emitted with the argument count
    /// (spec.md §4.7.3 "otherwise, it is a call").
    fn compile_call(&mut self, callee: &Ast, args: &[Ast], want_result: bool) -> CompiledBlock {
        let mut block = CompiledBlock::new();
        let callee_block = self.compile(callee, true);
        block.append_child(Rc::new(RefCell::new(callee_block)));
        for arg in args {
            let arg_block = self.compile(arg, true);
            block.append_child(Rc::new(RefCell::new(arg_block)));
        }
        self.emit_with_delta(&mut block, Opcode::Call, Operand::Index(args.len()), -(args.len() as i32));
        if !want_result {
            self.emit(&mut block, Opcode::Pop1, Operand::None);
        }
        block
    }

    fn compile_form(&mut self, ast: &Ast, want_result: bool) -> CompiledBlock {
        let items = match ast.as_proper_list() {
            Some(items) if !items.is_empty() => items,
            Some(_) => return self.compile_literal(Opcode::LdNull, Operand::None, want_result),
            None => return self.compile_error("improper list in compiled position", None),
        };
        let head_symbol = items[0].as_symbol();
        let rest = &items[1..];

        if let Some(sym) = head_symbol {
            let k = self.known;
            if sym == k.set {
                return setf::compile_set(self, rest, want_result);
            } else if sym == k.opset {
                return setf::compile_opset(self, rest, want_result);
            } else if sym == k.if_ {
                return if_form::compile_if(self, rest, want_result);
            } else if sym == k.while_ {
                return while_form::compile_while(self, rest, want_result);
            } else if sym == k.till {
                return till_form::compile_till(self, rest, want_result);
            } else if sym == k.catch {
                return catch_form::compile_catch(self, rest, want_result);
            } else if sym == k.return_ {
                return standardform::compile_return(self, rest);
            } else if sym == k.fn_ {
                return fn_form::compile_fn(self, rest, want_result);
            } else if sym == k.quote {
                return quote_progn::compile_quote(self, rest, want_result);
            } else if sym == k.prog1 {
                return quote_progn::compile_prog1(self, rest, want_result);
            } else if sym == k.progn {
                return quote_progn::compile_progn(self, rest, want_result);
            } else if sym == k.scope {
                return scope_form::compile_scope(self, rest, want_result);
            } else if sym == k.new {
                return new_form::compile_new(self, rest, want_result);
            } else if sym == k.dot {
                return property::compile_dot(self, rest, want_result);
            } else if sym == k.index {
                return property::compile_index(self, rest, want_result);
            } else if sym == k.is {
                return standardform::compile_is(self, rest, want_result);
            } else if sym == k.typeof_ {
                return standardform::compile_typeof(self, rest, want_result);
            } else if sym == k.eq {
                return standardform::compile_eq(self, rest, want_result);
            } else if sym == k.ne {
                return standardform::compile_ne(self, rest, want_result);
            } else if sym == k.and {
                return standardform::compile_and(self, rest, want_result);
            } else if sym == k.or {
                return standardform::compile_or(self, rest, want_result);
            } else if sym == k.not {
                return standardform::compile_not(self, rest, want_result);
            }
        }

        self.compile_call(&items[0], rest, want_result)
    }

    pub fn tables_mut(&mut self) -> &mut CompiledTables {
        &mut self.tables
    }
}

#[derive(Debug, Clone, Copy)]
pub enum VariableRef {
    Local { depth: usize, index: usize, kind: LocalKind },
    Global(Symbol),
}

fn short_arg_opcode(index: usize) -> Opcode {
    match index {
        0 => Opcode::LdArg0,
        1 => Opcode::LdArg1,
        2 => Opcode::LdArg2,
        3 => Opcode::LdArg3,
        _ => Opcode::LdArg,
    }
}

fn short_loc_opcode(index: usize) -> Opcode {
    match index {
        0 => Opcode::LdLoc0,
        1 => Opcode::LdLoc1,
        2 => Opcode::LdLoc2,
        3 => Opcode::LdLoc3,
        _ => Opcode::LdLoc,
    }
}

impl Ast {
    pub fn as_symbol(&self) -> Option<Symbol> {
        match self {
            Ast::Symbol(s) => Some(*s),
            _ => None,
        }
    }
}
