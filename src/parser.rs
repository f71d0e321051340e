// ABOUTME: Recursive-descent, operator-precedence parser threaded with the
// ABOUTME: scope stack and the syntax/loanword extension tables

use crate::diagnostics::DiagnosticList;
use crate::lexer::Lexer;
use crate::parse_scope::{DeclKind, LoanwordKind, LoanwordRule, ParseScope, ScopeKind};
use crate::position::LexerPosition;
use crate::symbol::{KnownSymbols, Symbol, SymbolTable};
use crate::token::{Token, TokenKind, TokenPayload};
use crate::value::{Ast, Primitive};
use std::cell::RefCell;
use std::rc::Rc;

/// The outcome of one parse entrypoint (spec.md §4.5 / §7). `Recovery`
/// means a diagnostic has already been pushed and the caller should
/// resynchronize; `Error` means the caller may still choose how to report.
pub enum ParseResult {
    Expr(Ast),
    Recovery,
    Error(String),
}

/// Token kinds used as synchronization points after a parse error: closers
/// plus anything that plausibly starts a new declaration or statement
/// (spec.md §4.5 "Recovery").
fn is_recovery_point(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::RightBrace
            | TokenKind::RightParen
            | TokenKind::RightBracket
            | TokenKind::LeftBrace
            | TokenKind::LeftParen
            | TokenKind::LeftBracket
            | TokenKind::Bar
            | TokenKind::AlphaName
            | TokenKind::Var
            | TokenKind::Auto
            | TokenKind::Const
            | TokenKind::If
            | TokenKind::Unless
            | TokenKind::While
            | TokenKind::Return
            | TokenKind::Eoi
    )
}

pub struct Parser<'a> {
    lexer: Lexer<'a>,
    symbols: Rc<RefCell<SymbolTable>>,
    known: &'a KnownSymbols,
    pub diagnostics: DiagnosticList,
    scope: Rc<RefCell<ParseScope>>,
}

impl<'a> Parser<'a> {
    pub fn new(lexer: Lexer<'a>, symbols: Rc<RefCell<SymbolTable>>, known: &'a KnownSymbols) -> Self {
        Parser {
            lexer,
            symbols,
            known,
            diagnostics: DiagnosticList::new(),
            scope: ParseScope::root(),
        }
    }

    fn intern(&self, text: &str) -> Symbol {
        self.symbols.borrow_mut().get_or_create(text)
    }

    fn symbol_name(&self, symbol: Symbol) -> String {
        self.symbols.borrow().get_name(symbol).to_owned()
    }

    fn peek_kind(&mut self) -> TokenKind {
        self.lexer.peek()
    }

    fn advance(&mut self) -> Token {
        self.lexer.next()
    }

    fn unget(&mut self) {
        self.lexer.unget()
    }

    /// Two-token lookahead without consuming either, used to tell a binary
    /// operator apart from the start of a compound-assignment operator
    /// (`+=`, `-=`, ...), which this lexer tokenizes as a plain `PunctName`
    /// immediately followed by `EqualWithoutWhitespace`.
    fn compound_assign_ahead(&mut self) -> bool {
        let first = self.advance();
        if first.kind != TokenKind::PunctName {
            self.unget();
            return false;
        }
        let second_kind = self.peek_kind();
        self.unget();
        second_kind == TokenKind::EqualWithoutWhitespace
    }

    fn error(&mut self, position: Option<LexerPosition>, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(%message, "parse error");
        self.diagnostics.error(position, message);
    }

    /// Skip tokens until a recovery point is reached (spec.md §4.5
    /// "Recovery"); the offending token itself is left un-consumed.
    fn recover(&mut self) {
        tracing::warn!("parser recovering by skipping to next synchronization point");
        loop {
            let kind = self.peek_kind();
            if is_recovery_point(kind) {
                return;
            }
            self.advance();
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Option<Token> {
        let tok = self.advance();
        if tok.kind == kind {
            Some(tok)
        } else {
            let position = tok.position.clone();
            self.unget();
            self.error(Some(position), format!("expected {what}"));
            self.recover();
            None
        }
    }

    // ------------------------------------------------------------------
    // Module entry point
    // ------------------------------------------------------------------

    /// Parse an entire source file into `[$scope [decls...] body...]`
    /// (spec.md §6 "The root of a module is `[$scope [decls...] body...]`").
    pub fn parse_module(&mut self) -> Ast {
        let mut body = Vec::new();
        while self.peek_kind() != TokenKind::Eoi {
            body.push(self.parse_stmt());
        }
        let decls: Vec<Ast> = self
            .scope
            .borrow()
            .decls
            .iter()
            .map(|d| Ast::Symbol(d.symbol))
            .collect();
        let mut items = vec![Ast::Symbol(self.known.scope), Ast::list(decls, None)];
        items.extend(body);
        Ast::list(items, None)
    }

    /// Parse a whole module and report the outcome the way one parse
    /// entrypoint does (spec.md §4.5 / §7): errors were already pushed to
    /// `self.diagnostics` along the way, so a caller checking `ParseResult`
    /// never needs to re-derive them from the returned tree.
    pub fn parse_program(&mut self) -> ParseResult {
        let ast = self.parse_module();
        if self.diagnostics.has_errors() {
            ParseResult::Recovery
        } else {
            ParseResult::Expr(ast)
        }
    }

    // ------------------------------------------------------------------
    // Statement level
    // ------------------------------------------------------------------

    fn parse_stmt(&mut self) -> Ast {
        match self.peek_kind() {
            TokenKind::Var | TokenKind::Auto | TokenKind::Const => self.parse_decl_stmt(),
            TokenKind::Return => self.parse_return_stmt(),
            TokenKind::If | TokenKind::Unless => self.parse_if_stmt(),
            TokenKind::While | TokenKind::Until => self.parse_while_stmt(),
            TokenKind::Till => self.parse_till_stmt(),
            TokenKind::Try => self.parse_try_stmt(),
            TokenKind::LoanwordSyntax => self.parse_syntax_def(),
            TokenKind::LoanwordInclude => self.parse_include(),
            _ => {
                if let Some(ast) = self.try_syntax_rule("STMT") {
                    return ast;
                }
                self.parse_expr()
            }
        }
    }

    /// `var`/`const`/`auto` declarations, comma-separated (spec.md §4.5
    /// "comma-in-var-decl"). Each produces `[$set sym val]`; more than one
    /// is sequenced with an implicit `$progn`.
    fn parse_decl_stmt(&mut self) -> Ast {
        let kind_tok = self.advance();
        let decl_kind = match kind_tok.kind {
            TokenKind::Var => DeclKind::Variable,
            TokenKind::Auto => DeclKind::Auto,
            TokenKind::Const => DeclKind::Const,
            _ => unreachable!("parse_decl_stmt called on a non-decl keyword"),
        };

        let mut sets = Vec::new();
        loop {
            let Some(name_tok) = self.expect(TokenKind::AlphaName, "a declared variable name") else {
                return Ast::Null;
            };
            let Some(symbol) = token_symbol(&name_tok) else {
                self.error(Some(name_tok.position.clone()), "declaration name is not a symbol");
                return Ast::Null;
            };
            if let Err(msg) = ParseScope::declare(&self.scope, symbol, decl_kind, Some(name_tok.position.clone())) {
                self.error(Some(name_tok.position), msg);
            }

            if self.expect(TokenKind::Equal, "'=' in declaration").is_none() {
                return Ast::list(sets, None);
            }
            let value = self.parse_expr();
            sets.push(Ast::list(vec![Ast::Symbol(self.known.set), Ast::Symbol(symbol), value], Some(name_tok.position.clone())));

            if self.peek_kind() == TokenKind::Comma {
                self.advance();
                continue;
            }
            break;
        }

        if sets.len() == 1 {
            sets.pop().unwrap()
        } else {
            let mut items = vec![Ast::Symbol(self.known.progn)];
            items.extend(sets);
            Ast::list(items, None)
        }
    }

    fn parse_return_stmt(&mut self) -> Ast {
        let tok = self.advance();
        let mut items = vec![Ast::Symbol(self.known.return_)];
        if !self.starts_stmt_boundary() {
            items.push(self.parse_expr());
        }
        Ast::list(items, Some(tok.position))
    }

    /// Whether the current token plausibly ends a statement with no
    /// trailing expression (a bare `return`/`$till` flag reference with
    /// nothing following it on the line).
    fn starts_stmt_boundary(&mut self) -> bool {
        matches!(
            self.peek_kind(),
            TokenKind::RightBrace | TokenKind::Semicolon | TokenKind::Eoi
        )
    }

    fn parse_block_or_stmt(&mut self) -> Ast {
        if self.peek_kind() == TokenKind::LeftBrace {
            self.advance();
            let mut items = Vec::new();
            while self.peek_kind() != TokenKind::RightBrace && self.peek_kind() != TokenKind::Eoi {
                items.push(self.parse_stmt());
            }
            self.expect(TokenKind::RightBrace, "'}' closing a block");
            let mut body = vec![Ast::Symbol(self.known.progn)];
            body.extend(items);
            Ast::list(body, None)
        } else {
            self.parse_stmt()
        }
    }

    fn parse_if_stmt(&mut self) -> Ast {
        let tok = self.advance();
        let negate = tok.kind == TokenKind::Unless;
        let mut cond = self.parse_expr();
        if negate {
            cond = Ast::list(vec![Ast::Symbol(self.known.not), cond], None);
        }
        self.expect(TokenKind::Then, "'then' after an 'if'/'unless' condition");
        let then_branch = self.parse_block_or_stmt();
        let mut items = vec![Ast::Symbol(self.known.if_), cond, then_branch];
        if self.peek_kind() == TokenKind::Else {
            self.advance();
            items.push(self.parse_block_or_stmt());
        }
        Ast::list(items, Some(tok.position))
    }

    /// `while cond do body` / `until cond do body` lower to `$while`'s
    /// canonical `[pre cond post]` shape with `pre = Null` (spec.md §4.6).
    fn parse_while_stmt(&mut self) -> Ast {
        let tok = self.advance();
        let negate = tok.kind == TokenKind::Until;
        let mut cond = self.parse_expr();
        if negate {
            cond = Ast::list(vec![Ast::Symbol(self.known.not), cond], None);
        }
        self.expect(TokenKind::Do, "'do' after a loop condition");
        let body = self.parse_block_or_stmt();
        Ast::list(vec![Ast::Symbol(self.known.while_), Ast::Null, cond, body], Some(tok.position))
    }

    fn parse_try_stmt(&mut self) -> Ast {
        let tok = self.advance();
        let body = self.parse_block_or_stmt();
        let mut handlers = Vec::new();
        while self.peek_kind() == TokenKind::Catch {
            self.advance();
            let Some(kind_tok) = self.expect(TokenKind::AlphaName, "a handler's exception-kind symbol") else {
                break;
            };
            let Some(kind_symbol) = token_symbol(&kind_tok) else {
                break;
            };
            self.expect(TokenKind::Colon, "':' after a catch kind");
            let handler = self.parse_block_or_stmt();
            handlers.push(Ast::list(vec![Ast::Symbol(kind_symbol), handler], None));
        }
        Ast::list(vec![Ast::Symbol(self.known.catch), body, Ast::list(handlers, None)], Some(tok.position))
    }

    /// `till flag1, flag2 do body when flag1: h1 when flag2: h2` (spec.md
    /// §4.5 "Till"). Each flag is declared in a fresh till-scope so body
    /// references to it resolve; each `when` consumes its flag.
    fn parse_till_stmt(&mut self) -> Ast {
        let tok = self.advance();
        let till_scope = ParseScope::child(&self.scope, ScopeKind::TillDo);
        let mut flags = Vec::new();
        loop {
            let Some(flag_tok) = self.expect(TokenKind::AlphaName, "a till flag name") else {
                break;
            };
            if let Some(symbol) = token_symbol(&flag_tok) {
                let _ = ParseScope::declare_here(&till_scope, symbol, DeclKind::TillFlag, Some(flag_tok.position));
                flags.push(symbol);
            }
            if self.peek_kind() == TokenKind::Comma {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(TokenKind::Do, "'do' after till flags");

        let previous_scope = std::mem::replace(&mut self.scope, till_scope);
        let body = self.parse_block_or_stmt();
        self.scope = previous_scope;

        // The compiler zips `rest[2..]` positionally against the flags in
        // their declared order, so a handler's slot is its flag's index,
        // not its position among the `when` clauses on the page.
        let mut handlers_by_flag: Vec<Option<Ast>> = vec![None; flags.len()];
        while self.peek_kind() == TokenKind::When {
            self.advance();
            let Some(flag_tok) = self.expect(TokenKind::AlphaName, "a flag name after 'when'") else {
                break;
            };
            let Some(flag_symbol) = token_symbol(&flag_tok) else { break };
            self.expect(TokenKind::Colon, "':' after a 'when' flag");
            let handler = self.parse_block_or_stmt();
            if let Some(slot) = flags.iter().position(|&f| f == flag_symbol) {
                handlers_by_flag[slot] = Some(handler);
            } else {
                self.error(Some(flag_tok.position), "'when' names a flag this 'till' did not declare");
            }
        }

        let last_declared = handlers_by_flag.iter().rposition(Option::is_some);
        let whens: Vec<Ast> = match last_declared {
            Some(last) => handlers_by_flag
                .into_iter()
                .take(last + 1)
                .map(|h| h.unwrap_or(Ast::Null))
                .collect(),
            None => Vec::new(),
        };

        let mut items = vec![Ast::Symbol(self.known.till), Ast::list(flags.into_iter().map(Ast::Symbol).collect(), None), body];
        items.extend(whens);
        Ast::list(items, Some(tok.position))
    }

    fn parse_include(&mut self) -> Ast {
        let tok = self.advance();
        // Platform I/O is out of scope here (spec.md §1 Non-goals); the
        // included path is recorded as a declaration but never read.
        if self.peek_kind() == TokenKind::DynString || self.peek_kind() == TokenKind::RawString {
            let path_tok = self.advance();
            if let TokenPayload::Text(text) = &path_tok.payload {
                let symbol = self.intern(text);
                let _ = ParseScope::declare_here(&self.scope, symbol, DeclKind::Include, Some(tok.position.clone()));
            }
        }
        Ast::Null
    }

    /// `#syntax ClassName ( pattern... ) => template` registers a rule into
    /// the enclosing scope's syntax table. This is a deliberately reduced
    /// grammar for custom syntax compared to the source's full pattern
    /// language (spec.md §4.5 "Custom syntax"): terminals are bare
    /// identifiers/keywords, nonterminals are `#ClassName`, and the
    /// template substitutes each nonterminal's capture for every
    /// occurrence of a symbol spelled identically to its class name.
    fn parse_syntax_def(&mut self) -> Ast {
        let tok = self.advance();
        let Some(class_tok) = self.expect(TokenKind::AlphaName, "a syntax rule's class name") else {
            return Ast::Null;
        };
        let Some(class) = token_symbol(&class_tok) else { return Ast::Null };

        let mut pattern = Vec::new();
        if self.expect(TokenKind::LeftParen, "'(' opening a syntax pattern").is_some() {
            while self.peek_kind() != TokenKind::RightParen && self.peek_kind() != TokenKind::Eoi {
                let t = self.advance();
                if t.kind == TokenKind::DoubleHash {
                    let Some(nt_tok) = self.expect(TokenKind::AlphaName, "a nonterminal class name") else {
                        break;
                    };
                    if let Some(nt_class) = token_symbol(&nt_tok) {
                        pattern.push(crate::parse_scope::PatternElement::Nonterminal {
                            class: nt_class,
                            repeat: crate::parse_scope::Repeat::One,
                            separator: None,
                        });
                    }
                } else if let Some(sym) = token_symbol(&t) {
                    pattern.push(crate::parse_scope::PatternElement::Terminal(crate::parse_scope::TokenMatch::Word(sym)));
                } else {
                    pattern.push(crate::parse_scope::PatternElement::Terminal(crate::parse_scope::TokenMatch::Keyword(t.kind)));
                }
            }
            self.expect(TokenKind::RightParen, "')' closing a syntax pattern");
        }

        // `=>` is lexed as a `PunctName("=")` immediately followed by
        // `Gt`; consume both explicitly rather than folding it into the
        // general operator tiers.
        self.expect(TokenKind::PunctName, "'=>' introducing a syntax template");
        self.expect(TokenKind::Gt, "'=>' introducing a syntax template");
        let template = self.parse_expr();

        ParseScope::add_syntax_rule(
            &self.scope,
            crate::parse_scope::SyntaxRule { class, pattern, template },
        );
        ParseScope::add_loanword_rule(&self.scope, LoanwordRule { word: class, kind: LoanwordKind::Syntax });
        tracing::debug!(rule = %self.symbol_name(class), "registered custom syntax rule");
        let _ = tok;
        Ast::Null
    }

    /// Attempt every registered rule for `class_name`, preferring
    /// keyword-initial rules when the next token is itself a keyword, then
    /// falling back to first-declared-wins order (spec.md §9 "Open
    /// question — syntax rule ambiguity").
    fn try_syntax_rule(&mut self, class_name: &str) -> Option<Ast> {
        let class = self.symbols.borrow().get_no_create(class_name);
        if class == Symbol::EMPTY && !class_name.is_empty() {
            return None;
        }
        let rules = ParseScope::syntax_rules_for(&self.scope, class);
        if rules.is_empty() {
            return None;
        }
        let current_is_keyword = self.advance().is_keyword();
        self.unget();

        let mut ordered: Vec<_> = rules.iter().cloned().collect();
        if current_is_keyword {
            ordered.sort_by_key(|r| !matches!(r.pattern.first(), Some(crate::parse_scope::PatternElement::Terminal(crate::parse_scope::TokenMatch::Keyword(_)))));
        }

        for rule in ordered {
            if let Some(ast) = self.try_match_rule(&rule) {
                return Some(ast);
            }
        }
        None
    }

    fn try_match_rule(&mut self, rule: &crate::parse_scope::SyntaxRule) -> Option<Ast> {
        let mut captures: Vec<(Symbol, Ast)> = Vec::new();
        for element in &rule.pattern {
            match element {
                crate::parse_scope::PatternElement::Terminal(crate::parse_scope::TokenMatch::Word(sym)) => {
                    let tok = self.advance();
                    if token_symbol(&tok) != Some(*sym) {
                        self.unget();
                        return None;
                    }
                }
                crate::parse_scope::PatternElement::Terminal(crate::parse_scope::TokenMatch::Keyword(kind)) => {
                    let tok = self.advance();
                    if tok.kind != *kind {
                        self.unget();
                        return None;
                    }
                }
                crate::parse_scope::PatternElement::Nonterminal { class, .. } => {
                    let name = self.symbol_name(*class);
                    let ast = self.parse_nonterminal_by_name(&name);
                    captures.push((*class, ast));
                }
            }
        }
        Some(substitute_template(&rule.template, &captures))
    }

    fn parse_nonterminal_by_name(&mut self, name: &str) -> Ast {
        match name {
            "STMT" => self.parse_stmt(),
            "CMP" => self.parse_cmp(),
            "TERM" => self.parse_term(),
            _ => self.parse_expr(),
        }
    }

    // ------------------------------------------------------------------
    // Expression levels
    // ------------------------------------------------------------------

    fn parse_expr(&mut self) -> Ast {
        if let Some(ast) = self.try_syntax_rule("EXPR") {
            return ast;
        }
        let lhs = self.parse_or_and_not();

        if self.peek_kind() == TokenKind::Equal {
            self.advance();
            let rhs = self.parse_expr();
            return Ast::list(vec![Ast::Symbol(self.known.set), lhs, rhs], None);
        }
        if self.compound_assign_ahead() {
            let op_tok = self.advance();
            self.advance(); // the EqualWithoutWhitespace half of `+=`
            let Some(op) = token_symbol(&op_tok) else {
                self.error(Some(op_tok.position), "compound-assignment operator is not a symbol");
                return lhs;
            };
            let rhs = self.parse_expr();
            return Ast::list(vec![Ast::Symbol(self.known.opset), Ast::Symbol(op), lhs, rhs], None);
        }
        lhs
    }

    fn parse_or_and_not(&mut self) -> Ast {
        if self.peek_kind() == TokenKind::Not {
            self.advance();
            let operand = self.parse_or_and_not();
            return Ast::list(vec![Ast::Symbol(self.known.not), operand], None);
        }
        let mut lhs = self.parse_cmp();
        loop {
            match self.peek_kind() {
                TokenKind::And => {
                    self.advance();
                    let rhs = self.parse_cmp();
                    lhs = Ast::list(vec![Ast::Symbol(self.known.and), lhs, rhs], None);
                }
                TokenKind::Or => {
                    self.advance();
                    let rhs = self.parse_cmp();
                    lhs = Ast::list(vec![Ast::Symbol(self.known.or), lhs, rhs], None);
                }
                _ => break,
            }
        }
        lhs
    }

    fn parse_cmp(&mut self) -> Ast {
        if self.peek_kind() == TokenKind::Typeof {
            self.advance();
            let operand = self.parse_cmp();
            return Ast::list(vec![Ast::Symbol(self.known.typeof_), operand], None);
        }
        let mut lhs = self.parse_arith();
        loop {
            let kind = self.peek_kind();
            match kind {
                TokenKind::SuperEq | TokenKind::SuperNe | TokenKind::Is => {
                    self.advance();
                    let rhs = self.parse_arith();
                    let sym = match kind {
                        TokenKind::SuperEq => self.known.eq,
                        TokenKind::SuperNe => self.known.ne,
                        _ => self.known.is,
                    };
                    lhs = Ast::list(vec![Ast::Symbol(sym), lhs, rhs], None);
                }
                TokenKind::Eq | TokenKind::Ne | TokenKind::Lt | TokenKind::Gt | TokenKind::Le | TokenKind::Ge => {
                    let tok = self.advance();
                    let rhs = self.parse_arith();
                    let op_text = match kind {
                        TokenKind::Eq => "==",
                        TokenKind::Ne => "!=",
                        TokenKind::Lt => "<",
                        TokenKind::Gt => ">",
                        TokenKind::Le => "<=",
                        _ => ">=",
                    };
                    lhs = self.method_call(lhs, op_text, vec![rhs], tok.position);
                }
                _ => break,
            }
        }
        lhs
    }

    /// `addsub`/`muldiv`/`binary` are one left-associative tier in this
    /// grammar (spec.md §4.5 groups the three rows together); every
    /// punctuation-run operator lowers to a method call `[a.op b]`.
    fn parse_arith(&mut self) -> Ast {
        let mut lhs = self.parse_prefix();
        loop {
            if self.compound_assign_ahead() {
                break;
            }
            if self.peek_kind() != TokenKind::PunctName {
                break;
            }
            let tok = self.advance();
            let rhs = self.parse_prefix();
            lhs = self.method_call(lhs, &tok.text, vec![rhs], tok.position);
        }
        lhs
    }

    /// Unary `-`, `+`, `~`, `!` lower to `[a.unary-op]` — a property load,
    /// not a call (spec.md §4.5 "prefix").
    fn parse_prefix(&mut self) -> Ast {
        if self.peek_kind() == TokenKind::PunctName {
            let tok = self.advance();
            if matches!(tok.text.as_ref(), "-" | "+" | "~" | "!") {
                let operand = self.parse_prefix();
                let op_sym = self.intern(&format!("unary{}", tok.text));
                return Ast::list(vec![Ast::Symbol(self.known.dot), operand, Ast::Symbol(op_sym)], Some(tok.position));
            }
            self.unget();
        }
        self.parse_new()
    }

    /// `new [Base {members...}]` / `new {members...}` (spec.md §4.5 "new").
    fn parse_new(&mut self) -> Ast {
        if self.peek_kind() != TokenKind::New {
            return self.parse_postfix();
        }
        let tok = self.advance();
        let base = if self.peek_kind() == TokenKind::LeftBrace {
            Ast::Null
        } else {
            self.parse_postfix()
        };
        let members = self.parse_object_members();
        let mut items = vec![Ast::Symbol(self.known.new), base];
        items.extend(members);
        Ast::list(items, Some(tok.position))
    }

    fn parse_object_members(&mut self) -> Vec<Ast> {
        let mut members = Vec::new();
        if self.expect(TokenKind::LeftBrace, "'{' opening a member list").is_none() {
            return members;
        }
        while self.peek_kind() != TokenKind::RightBrace && self.peek_kind() != TokenKind::Eoi {
            let Some(name_tok) = self.expect(TokenKind::AlphaName, "a member name") else {
                break;
            };
            let Some(name) = token_symbol(&name_tok) else { break };
            self.expect(TokenKind::Colon, "':' after a member name");
            let value = self.parse_expr();
            members.push(Ast::list(vec![Ast::Symbol(name), value], None));
            if self.peek_kind() == TokenKind::Comma {
                self.advance();
            }
        }
        self.expect(TokenKind::RightBrace, "'}' closing a member list");
        members
    }

    /// Calls, `.`-member access, `:`-indexing, chained left to right
    /// (spec.md §4.5 "postfix").
    fn parse_postfix(&mut self) -> Ast {
        let mut expr = self.parse_cons();
        loop {
            match self.peek_kind() {
                TokenKind::Dot => {
                    let tok = self.advance();
                    let Some(name_tok) = self.expect(TokenKind::AlphaName, "a member name after '.'") else {
                        break;
                    };
                    let Some(sym) = token_symbol(&name_tok) else { break };
                    expr = Ast::list(vec![Ast::Symbol(self.known.dot), expr, Ast::Symbol(sym)], Some(tok.position));
                }
                TokenKind::Colon => {
                    let tok = self.advance();
                    let index = self.parse_arith();
                    expr = Ast::list(vec![Ast::Symbol(self.known.index), expr, index], Some(tok.position));
                }
                TokenKind::LeftParen => {
                    let tok = self.advance();
                    let mut args = Vec::new();
                    while self.peek_kind() != TokenKind::RightParen && self.peek_kind() != TokenKind::Eoi {
                        args.push(self.parse_expr());
                        if self.peek_kind() == TokenKind::Comma {
                            self.advance();
                        }
                    }
                    self.expect(TokenKind::RightParen, "')' closing a call's arguments");
                    let mut items = vec![expr];
                    items.extend(args);
                    expr = Ast::list(items, Some(tok.position));
                }
                _ => break,
            }
        }
        expr
    }

    /// `##` right-associative cons (spec.md §4.5 "cons": `[$cons a b]`,
    /// lowered here to a call of the global `$cons` function so the
    /// existing default-call compilation path (§4.7.3 "otherwise, it is a
    /// call") handles it without a dedicated opcode).
    fn parse_cons(&mut self) -> Ast {
        let lhs = self.parse_term();
        if self.peek_kind() == TokenKind::DoubleHash {
            let tok = self.advance();
            let rhs = self.parse_cons();
            let cons_sym = self.intern("$cons");
            return Ast::list(vec![Ast::Symbol(cons_sym), lhs, rhs], Some(tok.position));
        }
        lhs
    }

    // ------------------------------------------------------------------
    // Term level
    // ------------------------------------------------------------------

    fn parse_term(&mut self) -> Ast {
        if let Some(ast) = self.try_syntax_rule("TERM") {
            return ast;
        }
        let tok = self.advance();
        match tok.kind {
            TokenKind::Integer32 => literal(&tok, |p| if let TokenPayload::Int32(v) = p { Some(Primitive::Int32(*v)) } else { None }),
            TokenKind::Integer16 => literal(&tok, |p| if let TokenPayload::Int16(v) = p { Some(Primitive::Int16(*v)) } else { None }),
            TokenKind::Integer64 => literal(&tok, |p| if let TokenPayload::Int64(v) = p { Some(Primitive::Int64(*v)) } else { None }),
            TokenKind::Integer128 => literal(&tok, |p| if let TokenPayload::Int128(v) = p { Some(Primitive::Int128(*v)) } else { None }),
            TokenKind::Byte => literal(&tok, |p| if let TokenPayload::Byte(v) = p { Some(Primitive::Byte(*v)) } else { None }),
            TokenKind::Real64 => literal(&tok, |p| if let TokenPayload::Real64(v) = p { Some(Primitive::Real64(*v)) } else { None }),
            TokenKind::Real32 => literal(&tok, |p| if let TokenPayload::Real32(v) = p { Some(Primitive::Real32(*v)) } else { None }),
            TokenKind::Float32 => literal(&tok, |p| if let TokenPayload::Float32(v) = p { Some(Primitive::Float32(*v)) } else { None }),
            TokenKind::Float64 => literal(&tok, |p| if let TokenPayload::Float64(v) = p { Some(Primitive::Float64(*v)) } else { None }),
            TokenKind::Char => literal(&tok, |p| if let TokenPayload::Char(v) = p { Some(Primitive::Char(*v)) } else { None }),
            TokenKind::Uni => literal(&tok, |p| if let TokenPayload::Uni(v) = p { Some(Primitive::Uni(*v)) } else { None }),
            TokenKind::DynString | TokenKind::LongDynString => self.parse_dynamic_string(&tok),
            TokenKind::RawString | TokenKind::LongRawString => match &tok.payload {
                TokenPayload::Text(s) => Ast::Str(s.clone()),
                _ => Ast::Null,
            },
            TokenKind::AlphaName | TokenKind::PunctName => {
                let Some(sym) = token_symbol(&tok) else { return Ast::Null };
                Ast::Symbol(sym)
            }
            TokenKind::LeftParen => {
                let inner = self.parse_expr();
                self.expect(TokenKind::RightParen, "')' closing a parenthesized expression");
                inner
            }
            TokenKind::LeftBracket => self.parse_raw_list(),
            TokenKind::LeftBrace => {
                self.unget();
                self.parse_object_literal()
            }
            TokenKind::Backtick => {
                let quoted = self.parse_postfix();
                Ast::list(vec![Ast::Symbol(self.known.quote), quoted], Some(tok.position))
            }
            TokenKind::Bar => self.parse_fn_literal(&tok),
            TokenKind::LoanwordRegex => match &tok.payload {
                // Regex compilation is captured at lex time; the front-end
                // only needs the literal pattern text to flow through as a
                // constant (full regex object support is out of scope here).
                TokenPayload::Regex(_) => Ast::Str(tok.text.clone()),
                _ => Ast::Null,
            },
            TokenKind::LoanwordJson | TokenKind::LoanwordXml | TokenKind::LoanwordBrk => {
                Ast::Str(tok.text.clone())
            }
            TokenKind::Error => {
                self.error(Some(tok.position.clone()), tok.text.to_string());
                Ast::Null
            }
            TokenKind::Eoi => {
                self.error(Some(tok.position), "unexpected end of input");
                Ast::Null
            }
            _ => {
                self.error(Some(tok.position.clone()), format!("unexpected token in expression position: {:?}", tok.kind));
                self.unget();
                self.recover();
                Ast::Null
            }
        }
    }

    fn parse_raw_list(&mut self) -> Ast {
        let mut items = Vec::new();
        while self.peek_kind() != TokenKind::RightBracket && self.peek_kind() != TokenKind::Eoi {
            items.push(self.parse_expr());
            if self.peek_kind() == TokenKind::Comma {
                self.advance();
            }
        }
        self.expect(TokenKind::RightBracket, "']' closing a list literal");
        let list_sym = self.intern("List");
        let of_sym = self.intern("of");
        let mut call_items = vec![Ast::list(vec![Ast::Symbol(self.known.dot), Ast::Symbol(list_sym), Ast::Symbol(of_sym)], None)];
        call_items.extend(items);
        Ast::list(call_items, None)
    }

    /// `{...}` object shorthand: `$new Null [[name val] ...]`.
    fn parse_object_literal(&mut self) -> Ast {
        let members = self.parse_object_members();
        let mut items = vec![Ast::Symbol(self.known.new), Ast::Null];
        items.extend(members);
        Ast::list(items, None)
    }

    /// `|args| body` fn literal (spec.md §4.5 "term").
    fn parse_fn_literal(&mut self, open: &Token) -> Ast {
        let mut args = Vec::new();
        while self.peek_kind() != TokenKind::Bar && self.peek_kind() != TokenKind::Eoi {
            let Some(name_tok) = self.expect(TokenKind::AlphaName, "an argument name") else {
                break;
            };
            if let Some(sym) = token_symbol(&name_tok) {
                args.push(Ast::Symbol(sym));
            }
            if self.peek_kind() == TokenKind::Comma {
                self.advance();
            }
        }
        self.expect(TokenKind::Bar, "'|' closing a fn literal's argument list");
        let body = self.parse_block_or_stmt();
        Ast::list(vec![Ast::Symbol(self.known.fn_), Ast::list(args, None), body], Some(open.position.clone()))
    }

    /// Splits a dynamic-string token at unescaped `{`/`}` boundaries and
    /// builds `[[List.of piece1 piece2 ...].join]` (spec.md §4.5 "Dynamic
    /// strings"). Each `{...}` piece is parsed with a nested lexer that
    /// shares this parser's symbol table, so captured names intern into
    /// the same table the enclosing parse is using.
    fn parse_dynamic_string(&mut self, tok: &Token) -> Ast {
        let text = match &tok.payload {
            TokenPayload::Text(s) => s.clone(),
            _ => return Ast::Null,
        };
        if !text.contains('{') {
            return Ast::Str(text);
        }

        let mut pieces: Vec<Ast> = Vec::new();
        let mut literal = String::new();
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    if !literal.is_empty() {
                        pieces.push(Ast::Str(Rc::from(std::mem::take(&mut literal).as_str())));
                    }
                    let mut expr_src = String::new();
                    let mut depth = 1;
                    for next in chars.by_ref() {
                        if next == '{' {
                            depth += 1;
                        } else if next == '}' {
                            depth -= 1;
                            if depth == 0 {
                                break;
                            }
                        }
                        expr_src.push(next);
                    }
                    pieces.push(self.parse_embedded_expr(&expr_src, &tok.position));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            pieces.push(Ast::Str(Rc::from(literal.as_str())));
        }
        if pieces.len() == 1 {
            if let Ast::Str(_) = &pieces[0] {
                return pieces.pop().unwrap();
            }
        }

        let list_sym = self.intern("List");
        let of_sym = self.intern("of");
        let join_sym = self.intern("join");
        let mut call_items = vec![Ast::list(vec![Ast::Symbol(self.known.dot), Ast::Symbol(list_sym), Ast::Symbol(of_sym)], None)];
        call_items.extend(pieces);
        let call = Ast::list(call_items, None);
        Ast::list(vec![Ast::Symbol(self.known.dot), call, Ast::Symbol(join_sym)], Some(tok.position.clone()))
    }

    fn parse_embedded_expr(&mut self, src: &str, position: &LexerPosition) -> Ast {
        // Leaked so the nested lexer's borrow outlives this call without
        // needing `self`'s own input lifetime; small and one-shot per
        // interpolated piece, freed with the process like other interned data.
        let leaked: &'a [u8] = Box::leak(src.as_bytes().to_vec().into_boxed_slice());
        let sub_lexer = Lexer::new(leaked, 0, leaked.len(), position.filename.clone(), position.line, self.symbols.clone());
        let mut sub_parser = Parser {
            lexer: sub_lexer,
            symbols: self.symbols.clone(),
            known: self.known,
            diagnostics: DiagnosticList::new(),
            scope: self.scope.clone(),
        };
        let ast = sub_parser.parse_expr();
        for diagnostic in sub_parser.diagnostics.iter() {
            self.diagnostics.push(diagnostic.clone());
        }
        ast
    }

    fn method_call(&mut self, receiver: Ast, op_text: &str, args: Vec<Ast>, position: LexerPosition) -> Ast {
        let op_sym = self.intern(op_text);
        let dot = Ast::list(vec![Ast::Symbol(self.known.dot), receiver, Ast::Symbol(op_sym)], Some(position));
        let mut items = vec![dot];
        items.extend(args);
        Ast::list(items, None)
    }
}

fn token_symbol(tok: &Token) -> Option<Symbol> {
    match &tok.payload {
        TokenPayload::Symbol(s) => Some(*s),
        _ => None,
    }
}

fn literal(tok: &Token, extract: impl Fn(&TokenPayload) -> Option<Primitive>) -> Ast {
    match extract(&tok.payload) {
        Some(p) => Ast::Primitive(p),
        None => Ast::Null,
    }
}

/// Replace every template symbol spelled identically to a capture's class
/// name with that capture's parsed subtree (see `parse_syntax_def`'s doc
/// comment for why this positional-by-name scheme, not a fuller
/// substitution language, is what this parser implements).
fn substitute_template(template: &Ast, captures: &[(Symbol, Ast)]) -> Ast {
    match template {
        Ast::Symbol(sym) => {
            for (class, ast) in captures {
                if class == sym {
                    return ast.clone();
                }
            }
            template.clone()
        }
        Ast::Cons(cell) => Ast::cons(
            substitute_template(&cell.car, captures),
            substitute_template(&cell.cdr, captures),
            cell.position.clone(),
        ),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Ast, DiagnosticList) {
        let symbols = Rc::new(RefCell::new(SymbolTable::new()));
        let known = KnownSymbols::new(&mut symbols.borrow_mut());
        let bytes = src.as_bytes();
        let lexer = Lexer::new(bytes, 0, bytes.len(), "t.sm", 1, symbols.clone());
        let mut parser = Parser::new(lexer, symbols, &known);
        let ast = parser.parse_module();
        (ast, parser.diagnostics)
    }

    #[test]
    fn minimal_arithmetic_expression_is_a_method_call() {
        let (ast, diags) = parse("1 + 2");
        assert!(!diags.has_errors());
        let items = ast.as_proper_list().unwrap();
        // [$scope [] [[1.+ 2]]]
        let body = &items[2];
        let call_items = body.as_proper_list().unwrap();
        assert_eq!(call_items.len(), 2);
        let dot = call_items[0].as_proper_list().unwrap();
        assert_eq!(dot.len(), 3);
    }

    #[test]
    fn variable_declaration_declares_in_root_scope() {
        let (ast, diags) = parse("var x = 42\nx * 2");
        assert!(!diags.has_errors());
        let items = ast.as_proper_list().unwrap();
        let decls = items[1].as_proper_list().unwrap();
        assert_eq!(decls.len(), 1);
    }

    #[test]
    fn if_then_else_produces_dollar_if() {
        let (ast, diags) = parse("if 1 then 2 else 3");
        assert!(!diags.has_errors());
        let items = ast.as_proper_list().unwrap();
        let stmt = items[2].as_proper_list().unwrap();
        assert_eq!(stmt.len(), 4);
    }

    #[test]
    fn dynamic_string_without_interpolation_is_a_plain_string() {
        let (ast, _diags) = parse(r#""hello""#);
        let items = ast.as_proper_list().unwrap();
        assert!(matches!(items[2], Ast::Str(_)));
    }

    #[test]
    fn unclosed_paren_recovers_without_panicking() {
        let (_ast, diags) = parse("(1 2");
        assert!(diags.has_errors());
    }

    #[test]
    fn int128_suffixed_literal_parses_without_error() {
        let (ast, diags) = parse("5x");
        assert!(!diags.has_errors());
        let items = ast.as_proper_list().unwrap();
        assert!(matches!(items[2], Ast::Primitive(Primitive::Int128(5))));
    }

    #[test]
    fn till_when_produces_a_flat_handler_list_not_pairs() {
        let (ast, diags) = parse("till done do { 1 } when done: { 2 }");
        assert!(!diags.has_errors());
        let items = ast.as_proper_list().unwrap();
        let stmt = items[2].as_proper_list().unwrap();
        // [$till [done] body h1] — h1 is the handler itself, not [done h1].
        assert_eq!(stmt.len(), 4);
        let handler = stmt[3].as_proper_list().unwrap();
        assert!(handler[0].as_symbol().is_some());
    }

    #[test]
    fn compound_assignment_lowers_to_opset() {
        let (ast, diags) = parse("var x = 1\nx += 2");
        assert!(!diags.has_errors());
        let items = ast.as_proper_list().unwrap();
        let stmt = items[3].as_proper_list().unwrap();
        assert_eq!(stmt.len(), 4);
    }

    #[test]
    fn dynamic_string_with_interpolation_builds_a_join_call() {
        let (ast, diags) = parse(r#"var name = 1
"hi {name}""#);
        assert!(!diags.has_errors());
        let items = ast.as_proper_list().unwrap();
        let stmt = items[3].as_proper_list().unwrap();
        // [$dot [[List.of ...] .join]] has a dot-form head.
        assert_eq!(stmt.len(), 3);
    }
}
