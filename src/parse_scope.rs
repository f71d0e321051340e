// ABOUTME: Scope tree holding per-scope declarations, syntax rules, and loanword rules

use crate::position::LexerPosition;
use crate::symbol::Symbol;
use crate::token::TokenKind;
use crate::value::Ast;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Argument,
    Variable,
    Const,
    Auto,
    SetOnceConst,
    SetOnceAuto,
    Primitive,
    TillFlag,
    Include,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Outermost,
    Function,
    ScopeDecl,
    PostCondition,
    TillDo,
    Syntax,
    Explicit,
}

impl ScopeKind {
    /// Pseudo-scopes delegate declarations to their nearest non-pseudo
    /// ancestor (spec.md §4.4).
    pub fn is_pseudo(self) -> bool {
        matches!(
            self,
            ScopeKind::Function | ScopeKind::PostCondition | ScopeKind::TillDo
        )
    }
}

#[derive(Debug, Clone)]
pub struct ParseDecl {
    pub symbol: Symbol,
    pub kind: DeclKind,
    pub scope_index: usize,
    pub position: Option<LexerPosition>,
}

#[derive(Debug, Clone)]
pub struct SyntaxRule {
    pub class: Symbol,
    pub pattern: Vec<PatternElement>,
    pub template: Ast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    One,
    ZeroOrMore,
    OneOrMore,
    ZeroOrOne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenMatch {
    Keyword(TokenKind),
    Word(Symbol),
}

#[derive(Debug, Clone)]
pub enum PatternElement {
    Terminal(TokenMatch),
    Nonterminal {
        class: Symbol,
        repeat: Repeat,
        separator: Option<TokenMatch>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoanwordKind {
    Include,
    Syntax,
    Regex,
    Json,
    Xml,
    Brk,
    Custom,
}

#[derive(Debug, Clone)]
pub struct LoanwordRule {
    pub word: Symbol,
    pub kind: LoanwordKind,
}

type SyntaxMap = HashMap<Symbol, Vec<Rc<SyntaxRule>>>;
type LoanwordMap = HashMap<Symbol, Rc<LoanwordRule>>;

/// A reference-counted, copy-on-write table: cloning it shares storage with
/// the parent scope until a rule is added, at which point it forks
/// (spec.md §4.4) so sibling/child scopes never see each other's additions.
#[derive(Debug, Clone)]
pub struct CowTable<T: Clone> {
    inner: Rc<T>,
}

impl<T: Clone + Default> Default for CowTable<T> {
    fn default() -> Self {
        CowTable { inner: Rc::new(T::default()) }
    }
}

impl<T: Clone> CowTable<T> {
    pub fn get(&self) -> &T {
        &self.inner
    }

    /// Fork (clone) the underlying table only if another scope still shares
    /// it (refcount > 1), then hand back a mutable view.
    pub fn make_mut(&mut self) -> &mut T {
        Rc::make_mut(&mut self.inner)
    }
}

pub type SyntaxTable = CowTable<SyntaxMap>;
pub type LoanwordTable = CowTable<LoanwordMap>;

#[derive(Debug)]
pub struct ParseScope {
    pub parent: Option<Rc<RefCell<ParseScope>>>,
    pub kind: ScopeKind,
    pub decls: Vec<ParseDecl>,
    by_symbol: HashMap<Symbol, usize>,
    pub syntax_table: SyntaxTable,
    pub loanword_table: LoanwordTable,
}

impl ParseScope {
    pub fn root() -> Rc<RefCell<ParseScope>> {
        Rc::new(RefCell::new(ParseScope {
            parent: None,
            kind: ScopeKind::Outermost,
            decls: Vec::new(),
            by_symbol: HashMap::new(),
            syntax_table: SyntaxTable::default(),
            loanword_table: LoanwordTable::default(),
        }))
    }

    pub fn child(parent: &Rc<RefCell<ParseScope>>, kind: ScopeKind) -> Rc<RefCell<ParseScope>> {
        let (syntax_table, loanword_table) = {
            let p = parent.borrow();
            (p.syntax_table.clone(), p.loanword_table.clone())
        };
        Rc::new(RefCell::new(ParseScope {
            parent: Some(parent.clone()),
            kind,
            decls: Vec::new(),
            by_symbol: HashMap::new(),
            syntax_table,
            loanword_table,
        }))
    }

    /// Declare `symbol` directly in this scope (no pseudo-scope delegation).
    /// Returns an error if it's already declared here with an incompatible
    /// kind (spec.md §4.4).
    pub fn declare_here(
        scope: &Rc<RefCell<ParseScope>>,
        symbol: Symbol,
        kind: DeclKind,
        position: Option<LexerPosition>,
    ) -> Result<(), String> {
        let mut this = scope.borrow_mut();
        if let Some(&idx) = this.by_symbol.get(&symbol) {
            let existing = this.decls[idx].kind;
            if existing != kind {
                return Err(format!(
                    "symbol already declared in this scope with an incompatible kind ({existing:?} vs {kind:?})"
                ));
            }
            return Ok(());
        }
        let index = this.decls.len();
        this.decls.push(ParseDecl {
            symbol,
            kind,
            scope_index: index,
            position,
        });
        this.by_symbol.insert(symbol, index);
        Ok(())
    }

    /// Declare `symbol`, walking up through pseudo-scopes to the nearest
    /// real (non-pseudo) scope first (spec.md §4.4).
    pub fn declare(
        scope: &Rc<RefCell<ParseScope>>,
        symbol: Symbol,
        kind: DeclKind,
        position: Option<LexerPosition>,
    ) -> Result<(), String> {
        let target = Self::nearest_real_scope(scope);
        Self::declare_here(&target, symbol, kind, position)
    }

    fn nearest_real_scope(scope: &Rc<RefCell<ParseScope>>) -> Rc<RefCell<ParseScope>> {
        let mut current = scope.clone();
        loop {
            let is_pseudo = current.borrow().kind.is_pseudo();
            if !is_pseudo {
                return current;
            }
            let parent = current.borrow().parent.clone();
            match parent {
                Some(p) => current = p,
                None => return current,
            }
        }
    }

    /// Look up `symbol` in this scope only.
    pub fn find_here(scope: &Rc<RefCell<ParseScope>>, symbol: Symbol) -> Option<ParseDecl> {
        let this = scope.borrow();
        this.by_symbol.get(&symbol).map(|&idx| this.decls[idx].clone())
    }

    /// Walk the parent chain looking for `symbol`'s declaration.
    pub fn find(scope: &Rc<RefCell<ParseScope>>, symbol: Symbol) -> Option<ParseDecl> {
        let mut current = Some(scope.clone());
        while let Some(s) = current {
            if let Some(decl) = Self::find_here(&s, symbol) {
                return Some(decl);
            }
            current = s.borrow().parent.clone();
        }
        None
    }

    pub fn is_declared(scope: &Rc<RefCell<ParseScope>>, symbol: Symbol) -> bool {
        Self::find(scope, symbol).is_some()
    }

    pub fn add_syntax_rule(scope: &Rc<RefCell<ParseScope>>, rule: SyntaxRule) {
        let mut this = scope.borrow_mut();
        let class = rule.class;
        this.syntax_table.make_mut().entry(class).or_default().push(Rc::new(rule));
    }

    pub fn syntax_rules_for(scope: &Rc<RefCell<ParseScope>>, class: Symbol) -> Vec<Rc<SyntaxRule>> {
        scope
            .borrow()
            .syntax_table
            .get()
            .get(&class)
            .cloned()
            .unwrap_or_default()
    }

    pub fn add_loanword_rule(scope: &Rc<RefCell<ParseScope>>, rule: LoanwordRule) {
        let mut this = scope.borrow_mut();
        let word = rule.word;
        this.loanword_table.make_mut().insert(word, Rc::new(rule));
    }

    pub fn loanword_rule(scope: &Rc<RefCell<ParseScope>>, word: Symbol) -> Option<Rc<LoanwordRule>> {
        scope.borrow().loanword_table.get().get(&word).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(n: u32) -> Symbol {
        Symbol(n)
    }

    #[test]
    fn child_without_redeclare_sees_parent_decl() {
        let a = ParseScope::root();
        ParseScope::declare_here(&a, sym(1), DeclKind::Variable, None).unwrap();
        let b = ParseScope::child(&a, ScopeKind::Explicit);

        let found = ParseScope::find(&b, sym(1)).unwrap();
        assert_eq!(found.scope_index, 0);
    }

    #[test]
    fn redeclare_in_child_shadows_without_affecting_parent() {
        let a = ParseScope::root();
        ParseScope::declare_here(&a, sym(1), DeclKind::Variable, None).unwrap();
        let b = ParseScope::child(&a, ScopeKind::Explicit);
        ParseScope::declare_here(&b, sym(1), DeclKind::Const, None).unwrap();

        assert_eq!(ParseScope::find(&b, sym(1)).unwrap().kind, DeclKind::Const);
        assert_eq!(ParseScope::find(&a, sym(1)).unwrap().kind, DeclKind::Variable);
    }

    #[test]
    fn pseudo_scope_delegates_declaration_to_real_ancestor() {
        let real = ParseScope::root();
        let func = ParseScope::child(&real, ScopeKind::Function);
        ParseScope::declare(&func, sym(2), DeclKind::Variable, None).unwrap();

        // The declaration landed in `real`, not in the function pseudo-scope.
        assert!(ParseScope::find_here(&func, sym(2)).is_none());
        assert!(ParseScope::find_here(&real, sym(2)).is_some());
        assert!(ParseScope::is_declared(&func, sym(2)));
    }

    #[test]
    fn syntax_rule_fork_does_not_leak_to_sibling() {
        let root = ParseScope::root();
        let left = ParseScope::child(&root, ScopeKind::Explicit);
        let right = ParseScope::child(&root, ScopeKind::Explicit);

        ParseScope::add_syntax_rule(
            &left,
            SyntaxRule {
                class: sym(10),
                pattern: vec![],
                template: Ast::Null,
            },
        );

        assert_eq!(ParseScope::syntax_rules_for(&left, sym(10)).len(), 1);
        assert_eq!(ParseScope::syntax_rules_for(&right, sym(10)).len(), 0);
    }
}
