use std::collections::HashMap;
use std::mem;

use crate::error::{Diagnostics, SourceError};
use crate::interpreter::Interpreter;
use crate::syntax::{expr, stmt, Expr, LiteralValue, Stmt};
use crate::token::Token;

/// Tracks what kind of function body the resolver is currently inside, so
/// `return` and `this` can be rejected where they don't make sense.
#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionType {
    None,
    Function,
    Initializer,
    Method,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

/// A single static pass over the parsed program that resolves every
/// variable reference to a lexical depth, ahead of interpretation. Scopes
/// are tracked as a stack of maps from name to "has its initializer
/// finished" — mirroring the environment chain the interpreter builds at
/// runtime, but walked once up front instead of on every access.
pub struct Resolver<'i> {
    interpreter: &'i mut Interpreter,
    scopes: Vec<HashMap<String, bool>>,
    current_function: FunctionType,
    current_class: ClassType,
    diagnostics: Diagnostics,
}

impl<'i> Resolver<'i> {
    pub fn new(interpreter: &'i mut Interpreter) -> Self {
        Resolver {
            interpreter,
            scopes: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn resolve(mut self, statements: &[Stmt]) -> Result<(), Diagnostics> {
        self.resolve_stmts(statements);
        if self.diagnostics.is_empty() {
            Ok(())
        } else {
            Err(self.diagnostics)
        }
    }

    fn error(&mut self, token: &Token, message: &str) {
        self.diagnostics.push(SourceError::at(token, message));
    }

    fn resolve_stmt(&mut self, statement: &Stmt) {
        statement.accept(self);
    }

    fn resolve_stmts(&mut self, statements: &[Stmt]) {
        for statement in statements {
            self.resolve_stmt(statement);
        }
    }

    fn resolve_expr(&mut self, expression: &Expr) {
        expression.accept(self);
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    // Binds the name to `false` ("declared but not ready") so that
    // `var a = a;` is caught: resolving the initializer sees `a` present but
    // unready and reports an error instead of silently reading the outer `a`.
    fn declare(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(&name.lexeme) {
                self.diagnostics.push(SourceError::at(name, "Already a variable with this name in this scope."));
            }
            scope.insert(name.lexeme.clone(), false);
        }
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), true);
        }
    }

    // Walks outward from the innermost scope; the first match wins, since
    // shadowing means an outer scope's binding of the same name is not the
    // one this reference means. Unmatched names are left unresolved and
    // treated as global at interpretation time.
    fn resolve_local(&mut self, expr_id: usize, name: &Token) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(&name.lexeme) {
                self.interpreter.resolve(expr_id, depth);
                return;
            }
        }
    }

    fn resolve_function(&mut self, params: &[Token], body: &[Stmt], kind: FunctionType) {
        let enclosing_function = self.current_function;
        self.current_function = kind;

        self.begin_scope();
        for param in params {
            self.declare(param);
            self.define(param);
        }
        self.resolve_stmts(body);
        self.end_scope();

        self.current_function = enclosing_function;
    }
}

impl<'i> expr::Visitor<()> for Resolver<'i> {
    fn visit_assign_expr(&mut self, id: usize, name: &Token, value: &Expr) {
        self.resolve_expr(value);
        self.resolve_local(id, name);
    }

    fn visit_binary_expr(&mut self, left: &Expr, _operator: &Token, right: &Expr) {
        self.resolve_expr(left);
        self.resolve_expr(right);
    }

    fn visit_call_expr(&mut self, callee: &Expr, _paren: &Token, arguments: &[Expr]) {
        self.resolve_expr(callee);
        for argument in arguments {
            self.resolve_expr(argument);
        }
    }

    // The property name itself is looked up dynamically at runtime, so only
    // the object expression needs resolving here.
    fn visit_get_expr(&mut self, object: &Expr, _name: &Token) {
        self.resolve_expr(object);
    }

    fn visit_grouping_expr(&mut self, expression: &Expr) {
        self.resolve_expr(expression);
    }

    fn visit_literal_expr(&mut self, _value: &LiteralValue) {}

    // No short-circuiting happens during static resolution, so a logical
    // expression resolves exactly like any other binary one.
    fn visit_logical_expr(&mut self, left: &Expr, _operator: &Token, right: &Expr) {
        self.resolve_expr(left);
        self.resolve_expr(right);
    }

    fn visit_set_expr(&mut self, object: &Expr, _name: &Token, value: &Expr) {
        self.resolve_expr(value);
        self.resolve_expr(object);
    }

    fn visit_super_expr(&mut self, id: usize, keyword: &Token, _method: &Token) {
        match self.current_class {
            ClassType::None => self.error(keyword, "Can't use 'super' outside of a class."),
            ClassType::Class => self.error(keyword, "Can't use 'super' in a class with no superclass."),
            ClassType::Subclass => self.resolve_local(id, keyword),
        }
    }

    fn visit_this_expr(&mut self, id: usize, keyword: &Token) {
        if self.current_class == ClassType::None {
            self.error(keyword, "Can't use 'this' outside of a class.");
        } else {
            self.resolve_local(id, keyword);
        }
    }

    fn visit_unary_expr(&mut self, _operator: &Token, right: &Expr) {
        self.resolve_expr(right);
    }

    fn visit_variable_expr(&mut self, id: usize, name: &Token) {
        if let Some(scope) = self.scopes.last() {
            if scope.get(&name.lexeme) == Some(&false) {
                self.error(name, "Can't read local variable in its own initializer.");
            }
        }
        self.resolve_local(id, name);
    }
}

impl<'i> stmt::Visitor<()> for Resolver<'i> {
    fn visit_block_stmt(&mut self, statements: &[Stmt]) {
        self.begin_scope();
        self.resolve_stmts(statements);
        self.end_scope();
    }

    fn visit_class_stmt(&mut self, name: &Token, superclass: &Option<Expr>, methods: &[Stmt]) {
        let enclosing_class = mem::replace(&mut self.current_class, ClassType::Class);

        self.declare(name);
        self.define(name);

        if let Some(superclass_expr) = superclass {
            if let Expr::Variable { name: super_name, .. } = superclass_expr {
                if super_name.lexeme == name.lexeme {
                    self.error(super_name, "A class can't inherit from itself.");
                }
            }
            self.current_class = ClassType::Subclass;
            self.resolve_expr(superclass_expr);

            self.begin_scope();
            self.scopes.last_mut().expect("scope just pushed").insert("super".to_owned(), true);
        }

        self.begin_scope();
        self.scopes.last_mut().expect("scope just pushed").insert("this".to_owned(), true);

        for method in methods {
            if let Stmt::Function { name: method_name, params, body } = method {
                let kind = if method_name.lexeme == "init" {
                    FunctionType::Initializer
                } else {
                    FunctionType::Method
                };
                self.resolve_function(params, body, kind);
            }
        }

        self.end_scope();

        if superclass.is_some() {
            self.end_scope();
        }

        self.current_class = enclosing_class;
    }

    fn visit_expression_stmt(&mut self, expression: &Expr) {
        self.resolve_expr(expression);
    }

    fn visit_function_stmt(&mut self, name: &Token, params: &std::rc::Rc<Vec<Token>>, body: &std::rc::Rc<Vec<Stmt>>) {
        self.declare(name);
        self.define(name);
        self.resolve_function(params, body, FunctionType::Function);
    }

    fn visit_if_stmt(&mut self, condition: &Expr, then_branch: &Stmt, else_branch: &Option<Box<Stmt>>) {
        self.resolve_expr(condition);
        self.resolve_stmt(then_branch);
        if let Some(else_stmt) = else_branch {
            self.resolve_stmt(else_stmt);
        }
    }

    fn visit_print_stmt(&mut self, expression: &Expr) {
        self.resolve_expr(expression);
    }

    fn visit_return_stmt(&mut self, keyword: &Token, value: &Option<Expr>) {
        if self.current_function == FunctionType::None {
            self.error(keyword, "Can't return from top-level code.");
        }

        if let Some(return_value) = value {
            if self.current_function == FunctionType::Initializer {
                self.error(keyword, "Can't return a value from an initializer.");
            }
            self.resolve_expr(return_value);
        }
    }

    fn visit_var_stmt(&mut self, name: &Token, initializer: &Option<Expr>) {
        self.declare(name);
        if let Some(init) = initializer {
            self.resolve_expr(init);
        }
        self.define(name);
    }

    fn visit_while_stmt(&mut self, condition: &Expr, body: &Stmt) {
        self.resolve_expr(condition);
        self.resolve_stmt(body);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Interpreter;
    use crate::parser::Parser;
    use crate::scanner::Scanner;

    fn resolve(source: &str) -> Result<(), Diagnostics> {
        let tokens = Scanner::new(source).scan_tokens().unwrap();
        let statements = Parser::new(tokens).parse().unwrap();
        let mut interpreter = Interpreter::new(Box::new(std::io::sink()));
        Resolver::new(&mut interpreter).resolve(&statements)
    }

    #[test]
    fn self_referential_initializer_is_rejected() {
        let err = resolve("{ var a = a; }").unwrap_err();
        assert_eq!(err.0.len(), 1);
        assert!(err.0[0].message.contains("own initializer"));
    }

    #[test]
    fn duplicate_local_declaration_is_rejected() {
        let err = resolve("{ var a = 1; var a = 2; }").unwrap_err();
        assert_eq!(err.0.len(), 1);
    }

    #[test]
    fn top_level_return_is_rejected() {
        let err = resolve("return 1;").unwrap_err();
        assert!(err.0[0].message.contains("top-level"));
    }

    #[test]
    fn this_outside_class_is_rejected() {
        let err = resolve("print this;").unwrap_err();
        assert!(err.0[0].message.contains("'this'"));
    }

    #[test]
    fn self_inheriting_class_is_rejected() {
        let err = resolve("class Oops < Oops {}").unwrap_err();
        assert!(err.0[0].message.contains("inherit from itself"));
    }

    #[test]
    fn super_without_superclass_is_rejected() {
        let err = resolve("class A { bad() { return super.bad(); } }").unwrap_err();
        assert!(err.0[0].message.contains("no superclass"));
    }

    #[test]
    fn well_formed_program_resolves_cleanly() {
        resolve("var a = 1; { var b = a + 1; print b; } fun f(x) { return x; }").unwrap();
    }

    #[test]
    fn deeply_nested_blocks_resolve_correctly() {
        let depth = 100;
        let source = format!("var x = 1;{}print x;{}", "{".repeat(depth), "}".repeat(depth));
        resolve(&source).unwrap();
    }
}
