use crate::error::{Diagnostics, SourceError};
use crate::syntax::{next_expr_id, Expr, LiteralValue, Stmt};
use crate::token::{Token, TokenType};

/// Parsing unwinds through this empty error whenever the current token
/// doesn't fit the grammar; `synchronize` discards tokens up to the next
/// likely statement boundary so the parser can keep going and collect more
/// diagnostics in one pass, rather than bailing at the first mistake.
struct ParseError;

pub struct Parser {
    tokens: Vec<Token>,
    current: usize,
    diagnostics: Diagnostics,
}

macro_rules! check_any {
    ( $sel:ident, $( $x:expr ),* ) => {
        {
            if $( $sel.check($x) )||* {
                $sel.advance();
                true
            } else {
                false
            }
        }
    };
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            current: 0,
            diagnostics: Diagnostics::default(),
        }
    }

    // program        → declaration* EOF ;
    pub fn parse(mut self) -> Result<Vec<Stmt>, Diagnostics> {
        let mut statements: Vec<Stmt> = Vec::new();
        while !self.is_at_end() {
            match self.declaration() {
                Ok(statement) => statements.push(statement),
                Err(ParseError) => self.synchronize(),
            }
        }

        if self.diagnostics.is_empty() {
            Ok(statements)
        } else {
            Err(self.diagnostics)
        }
    }

    // declaration    → classDecl | funDecl | varDecl | statement ;
    fn declaration(&mut self) -> Result<Stmt, ParseError> {
        if check_any!(self, TokenType::Var) {
            self.var_declaration()
        } else if check_any!(self, TokenType::Class) {
            self.class_declaration()
        } else if check_any!(self, TokenType::Fun) {
            self.function("function")
        } else {
            self.statement()
        }
    }

    // classDecl      → "class" IDENTIFIER ( "<" IDENTIFIER )? "{" function* "}" ;
    fn class_declaration(&mut self) -> Result<Stmt, ParseError> {
        let name = self.consume(TokenType::Identifier, "Expect class name.")?;
        let superclass = if check_any!(self, TokenType::Less) {
            let super_name = self.consume(TokenType::Identifier, "Expect superclass name.")?;
            Some(Expr::Variable {
                id: next_expr_id(),
                name: super_name,
            })
        } else {
            None
        };
        self.consume(TokenType::LeftBrace, "Expect '{' before class body.")?;

        let mut methods: Vec<Stmt> = Vec::new();
        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            methods.push(self.function("method")?);
        }

        self.consume(TokenType::RightBrace, "Expect '}' after class body.")?;

        Ok(Stmt::Class { name, superclass, methods })
    }

    // funDecl        → "fun" function ;
    // function       → IDENTIFIER "(" parameters? ")" block ;
    // parameters     → IDENTIFIER ( "," IDENTIFIER )* ;
    fn function(&mut self, kind: &str) -> Result<Stmt, ParseError> {
        let name = self.consume(TokenType::Identifier, &format!("Expect {kind} name."))?;

        self.consume(TokenType::LeftParen, &format!("Expect '(' after {kind} name."))?;
        let mut params: Vec<Token> = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if params.len() >= 255 {
                    let peeked = self.peek().clone();
                    self.error(peeked, "Can't have more than 255 parameters.");
                }
                params.push(self.consume(TokenType::Identifier, "Expect parameter name.")?);
                if !check_any!(self, TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenType::RightParen, "Expect ')' after parameters.")?;

        self.consume(TokenType::LeftBrace, &format!("Expect '{{' before {kind} body."))?;
        let body = self.block()?;
        Ok(Stmt::Function {
            name,
            params: std::rc::Rc::new(params),
            body: std::rc::Rc::new(body),
        })
    }

    // statement      → exprStmt | printStmt | ifStmt | block | returnStmt | whileStmt | forStmt ;
    fn statement(&mut self) -> Result<Stmt, ParseError> {
        if check_any!(self, TokenType::For) {
            self.for_statement()
        } else if check_any!(self, TokenType::If) {
            self.if_statement()
        } else if check_any!(self, TokenType::Print) {
            self.print_statement()
        } else if check_any!(self, TokenType::Return) {
            self.return_statement()
        } else if check_any!(self, TokenType::While) {
            self.while_statement()
        } else if check_any!(self, TokenType::LeftBrace) {
            Ok(Stmt::Block { statements: self.block()? })
        } else {
            self.expression_statement()
        }
    }

    // returnStmt     → "return" expression? ";" ;
    fn return_statement(&mut self) -> Result<Stmt, ParseError> {
        let keyword = self.previous().clone();
        let value = if !self.check(TokenType::Semicolon) { Some(self.expression()?) } else { None };

        self.consume(TokenType::Semicolon, "Expect ';' after return value.")?;
        Ok(Stmt::Return { keyword, value })
    }

    // ifStmt         → "if" "(" expression ")" statement ( "else" statement )? ;
    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after if condition.")?;

        let then_branch = Box::new(self.statement()?);
        let else_branch = if check_any!(self, TokenType::Else) { Some(Box::new(self.statement()?)) } else { None };

        Ok(Stmt::If { condition, then_branch, else_branch })
    }

    // block          → "{" declaration* "}" ;
    fn block(&mut self) -> Result<Vec<Stmt>, ParseError> {
        let mut statements: Vec<Stmt> = Vec::new();

        while !self.check(TokenType::RightBrace) && !self.is_at_end() {
            match self.declaration() {
                Ok(statement) => statements.push(statement),
                Err(ParseError) => {
                    self.synchronize();
                }
            }
        }

        self.consume(TokenType::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }

    // whileStmt      → "while" "(" expression ")" statement ;
    fn while_statement(&mut self) -> Result<Stmt, ParseError> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(TokenType::RightParen, "Expect ')' after condition.")?;
        let body = self.statement()?;

        Ok(Stmt::While { condition, body: Box::new(body) })
    }

    // forStmt        → "for" "(" ( varDecl | exprStmt | ";" ) expression? ";" expression? ")" statement ;
    // Desugared directly into a `while` wrapped in a block; there's no
    // dedicated `Stmt::For` variant at all.
    fn for_statement(&mut self) -> Result<Stmt, ParseError> {
        self.consume(TokenType::LeftParen, "Expect '(' after 'for'.")?;

        let initializer = if check_any!(self, TokenType::Semicolon) {
            None
        } else if check_any!(self, TokenType::Var) {
            Some(self.var_declaration()?)
        } else {
            Some(self.expression_statement()?)
        };

        let condition = if !self.check(TokenType::Semicolon) { Some(self.expression()?) } else { None };
        self.consume(TokenType::Semicolon, "Expect ';' after loop condition.")?;

        let increment = if !self.check(TokenType::RightParen) { Some(self.expression()?) } else { None };
        self.consume(TokenType::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;

        if let Some(increment) = increment {
            body = Stmt::Block {
                statements: vec![body, Stmt::Expression { expression: increment }],
            };
        }

        body = Stmt::While {
            condition: condition.unwrap_or(Expr::Literal { value: LiteralValue::Boolean(true) }),
            body: Box::new(body),
        };

        if let Some(initializer) = initializer {
            body = Stmt::Block {
                statements: vec![initializer, body],
            };
        }

        Ok(body)
    }

    // varDecl        → "var" IDENTIFIER ( "=" expression )? ";" ;
    fn var_declaration(&mut self) -> Result<Stmt, ParseError> {
        let name = self.consume(TokenType::Identifier, "Expect variable name.")?;
        let initializer = if check_any!(self, TokenType::Equal) { Some(self.expression()?) } else { None };

        self.consume(TokenType::Semicolon, "Expect ';' after variable declaration.")?;
        Ok(Stmt::Var { name, initializer })
    }

    // expression     → assignment ;
    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.assignment()
    }

    // assignment     → ( call "." )? IDENTIFIER "=" assignment | logic_or ;
    // The left side is parsed as an ordinary expression first, then
    // reinterpreted as an assignment target if `=` follows — every valid
    // target also happens to be valid expression syntax.
    fn assignment(&mut self) -> Result<Expr, ParseError> {
        let expr = self.logic_or()?;

        if check_any!(self, TokenType::Equal) {
            let equals = self.previous().clone();
            let value = Box::new(self.assignment()?);

            return match expr {
                Expr::Variable { name, .. } => Ok(Expr::Assign { id: next_expr_id(), name, value }),
                Expr::Get { object, name } => Ok(Expr::Set { object, name, value }),
                _ => {
                    self.error(equals, "Invalid assignment target.");
                    Ok(expr)
                }
            };
        }

        Ok(expr)
    }

    // logic_or       → logic_and ( "or" logic_and )* ;
    fn logic_or(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.logic_and()?;

        while check_any!(self, TokenType::Or) {
            let operator = self.previous().clone();
            let right = self.logic_and()?;
            expr = Expr::Logical { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Ok(expr)
    }

    // logic_and      → equality ( "and" equality )* ;
    fn logic_and(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.equality()?;

        while check_any!(self, TokenType::And) {
            let operator = self.previous().clone();
            let right = self.equality()?;
            expr = Expr::Logical { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Ok(expr)
    }

    // equality       → comparison ( ( "!=" | "==" ) comparison )* ;
    fn equality(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.comparison()?;

        while check_any!(self, TokenType::BangEqual, TokenType::EqualEqual) {
            let operator = self.previous().clone();
            let right = self.comparison()?;
            expr = Expr::Binary { left: Box::new(expr), operator, right: Box::new(right) };
        }
        Ok(expr)
    }

    // comparison     → term ( ( ">" | ">=" | "<" | "<=" ) term )* ;
    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.term()?;

        while check_any!(self, TokenType::GreaterEqual, TokenType::Greater, TokenType::LessEqual, TokenType::Less) {
            let operator = self.previous().clone();
            let right = self.term()?;
            expr = Expr::Binary { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Ok(expr)
    }

    // term           → factor ( ( "-" | "+" ) factor )* ;
    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.factor()?;

        while check_any!(self, TokenType::Minus, TokenType::Plus) {
            let operator = self.previous().clone();
            let right = self.factor()?;
            expr = Expr::Binary { left: Box::new(expr), operator, right: Box::new(right) };
        }
        Ok(expr)
    }

    // factor         → unary ( ( "/" | "*" ) unary )* ;
    fn factor(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.unary()?;

        while check_any!(self, TokenType::Slash, TokenType::Star) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            expr = Expr::Binary { left: Box::new(expr), operator, right: Box::new(right) };
        }

        Ok(expr)
    }

    // unary          → ( "!" | "-" ) unary | call ;
    fn unary(&mut self) -> Result<Expr, ParseError> {
        if check_any!(self, TokenType::Bang, TokenType::Minus) {
            let operator = self.previous().clone();
            let right = self.unary()?;
            return Ok(Expr::Unary { operator, right: Box::new(right) });
        }

        self.call()
    }

    // call           → primary ( "(" arguments? ")" | "." IDENTIFIER )* ;
    fn call(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;

        loop {
            if check_any!(self, TokenType::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if check_any!(self, TokenType::Dot) {
                let name = self.consume(TokenType::Identifier, "Expect property name after '.'.")?;
                expr = Expr::Get { object: Box::new(expr), name };
            } else {
                break;
            }
        }

        Ok(expr)
    }

    // arguments      → expression ( "," expression )* ;
    fn finish_call(&mut self, callee: Expr) -> Result<Expr, ParseError> {
        let mut arguments: Vec<Expr> = Vec::new();
        if !self.check(TokenType::RightParen) {
            loop {
                if arguments.len() >= 255 {
                    let peeked = self.peek().clone();
                    self.error(peeked, "Can't have more than 255 arguments.");
                }
                arguments.push(self.expression()?);
                if !check_any!(self, TokenType::Comma) {
                    break;
                }
            }
        }

        let paren = self.consume(TokenType::RightParen, "Expect ')' after arguments.")?;

        Ok(Expr::Call { callee: Box::new(callee), paren, arguments })
    }

    // primary        → NUMBER | STRING | "true" | "false" | "nil" | "(" expression ")"
    //                | IDENTIFIER | "this" | "super" "." IDENTIFIER ;
    fn primary(&mut self) -> Result<Expr, ParseError> {
        if check_any!(self, TokenType::False) {
            return Ok(Expr::Literal { value: LiteralValue::Boolean(false) });
        }
        if check_any!(self, TokenType::True) {
            return Ok(Expr::Literal { value: LiteralValue::Boolean(true) });
        }
        if check_any!(self, TokenType::Nil) {
            return Ok(Expr::Literal { value: LiteralValue::Null });
        }

        match &self.peek().token_type {
            TokenType::Number { literal } => {
                let literal = *literal;
                self.advance();
                return Ok(Expr::Literal { value: LiteralValue::Number(literal) });
            }
            TokenType::String { literal } => {
                let literal = literal.clone();
                self.advance();
                return Ok(Expr::Literal { value: LiteralValue::String(literal) });
            }
            _ => {}
        }

        if check_any!(self, TokenType::Super) {
            let keyword = self.previous().clone();
            self.consume(TokenType::Dot, "Expect '.' after 'super'.")?;
            let method = self.consume(TokenType::Identifier, "Expect superclass method name.")?;
            return Ok(Expr::Super { id: next_expr_id(), keyword, method });
        }

        if check_any!(self, TokenType::This) {
            return Ok(Expr::This { id: next_expr_id(), keyword: self.previous().clone() });
        }

        if check_any!(self, TokenType::Identifier) {
            return Ok(Expr::Variable { id: next_expr_id(), name: self.previous().clone() });
        }

        if check_any!(self, TokenType::LeftParen) {
            let expr = self.expression()?;
            self.consume(TokenType::RightParen, "Expect ')' after expression.")?;
            return Ok(Expr::Grouping { expression: Box::new(expr) });
        }

        let peeked = self.peek().clone();
        Err(self.error(peeked, "Expect expression."))
    }

    // printStmt      → "print" expression ";" ;
    fn print_statement(&mut self) -> Result<Stmt, ParseError> {
        let value = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after value.")?;
        Ok(Stmt::Print { expression: value })
    }

    // exprStmt       → expression ";" ;
    fn expression_statement(&mut self) -> Result<Stmt, ParseError> {
        let value = self.expression()?;
        self.consume(TokenType::Semicolon, "Expect ';' after expression.")?;
        Ok(Stmt::Expression { expression: value })
    }

    // Discards tokens until it's plausibly at the start of the next
    // statement, so one syntax error doesn't cascade into dozens of bogus
    // follow-on ones.
    fn synchronize(&mut self) {
        self.advance();

        while !self.is_at_end() {
            if self.previous().token_type == TokenType::Semicolon {
                return;
            }

            match self.peek().token_type {
                TokenType::Class | TokenType::Fun | TokenType::Var | TokenType::For | TokenType::If | TokenType::While | TokenType::Print | TokenType::Return => {
                    return;
                }
                _ => {
                    self.advance();
                }
            }
        }
    }

    fn check(&self, token_type: TokenType) -> bool {
        if self.is_at_end() {
            return false;
        }
        self.peek().token_type == token_type
    }

    fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    fn is_at_end(&self) -> bool {
        self.peek().token_type == TokenType::Eof
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.current).expect("token stream always ends in Eof")
    }

    fn previous(&self) -> &Token {
        self.tokens.get(self.current - 1).expect("advance is only called past index 0")
    }

    fn consume(&mut self, token_type: TokenType, message: &str) -> Result<Token, ParseError> {
        if self.check(token_type) {
            Ok(self.advance().clone())
        } else {
            let peeked = self.peek().clone();
            Err(self.error(peeked, message))
        }
    }

    fn error(&mut self, token: Token, message: &str) -> ParseError {
        self.diagnostics.push(SourceError::at(&token, message));
        ParseError
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::Scanner;

    fn parse(source: &str) -> Result<Vec<Stmt>, Diagnostics> {
        let tokens = Scanner::new(source).scan_tokens().expect("scan");
        Parser::new(tokens).parse()
    }

    #[test]
    fn parses_arithmetic_with_precedence() {
        let statements = parse("1 + 2 * 3;").unwrap();
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn missing_semicolon_is_a_diagnostic() {
        let err = parse("var a = 1").unwrap_err();
        assert_eq!(err.0.len(), 1);
    }

    #[test]
    fn multiple_errors_accumulate_instead_of_stopping_at_the_first() {
        let err = parse("var; var;").unwrap_err();
        assert_eq!(err.0.len(), 2);
    }

    #[test]
    fn for_loop_desugars_to_a_block_and_while() {
        let statements = parse("for (var i = 0; i < 3; i = i + 1) print i;").unwrap();
        assert!(matches!(statements[0], Stmt::Block { .. }));
    }

    #[test]
    fn class_with_superclass_parses() {
        let statements = parse("class A {} class B < A {}").unwrap();
        assert!(matches!(&statements[1], Stmt::Class { superclass: Some(_), .. }));
    }

    #[test]
    fn invalid_assignment_target_is_a_diagnostic() {
        let err = parse("1 = 2;").unwrap_err();
        assert_eq!(err.0.len(), 1);
    }

    #[test]
    fn function_with_255_parameters_parses() {
        let params = (0..255).map(|i| format!("p{i}")).collect::<Vec<_>>().join(",");
        let source = format!("fun f({params}) {{}}");
        let statements = parse(&source).unwrap();
        assert_eq!(statements.len(), 1);
    }

    #[test]
    fn function_with_256_parameters_is_a_diagnostic() {
        let params = (0..256).map(|i| format!("p{i}")).collect::<Vec<_>>().join(",");
        let source = format!("fun f({params}) {{}}");
        let err = parse(&source).unwrap_err();
        assert!(err.to_string().contains("Can't have more than 255 parameters."));
    }
}
