use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::instrument;

use crate::class::{LoxClass, LoxInstance};
use crate::environment::{EnvRef, Environment};
use crate::error::RuntimeError;
use crate::function::{Callable, LoxFunction, NativeFunction};
use crate::object::Value;
use crate::syntax::{expr, stmt, Expr, LiteralValue, Stmt};
use crate::token::{Token, TokenType};

/// The tree-walking evaluator. `locals` is the side table the resolver fills
/// in ahead of time: expression node id to lexical depth. A miss in that
/// table means the name is assumed global and looked up in `globals`
/// directly, since top-level declarations aren't tracked by the resolver.
pub struct Interpreter {
    globals: EnvRef,
    environment: EnvRef,
    locals: HashMap<usize, usize>,
    out: Box<dyn Write>,
}

impl Interpreter {
    pub fn new(out: Box<dyn Write>) -> Self {
        let globals = Environment::new();
        globals.borrow_mut().define(
            "clock",
            Value::Callable(Callable::Native(Rc::new(NativeFunction {
                name: "clock",
                arity: 0,
                body: |_arguments| {
                    let seconds = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .expect("system clock is before the Unix epoch")
                        .as_secs_f64();
                    Value::Number(seconds)
                },
            }))),
        );

        Self {
            environment: Rc::clone(&globals),
            globals,
            locals: HashMap::new(),
            out,
        }
    }

    /// Called by the resolver once per variable reference it manages to
    /// pin down statically.
    pub fn resolve(&mut self, expr_id: usize, depth: usize) {
        self.locals.insert(expr_id, depth);
    }

    #[instrument(skip(self, statements), level = "trace")]
    pub fn interpret(&mut self, statements: &[Stmt]) -> Result<(), RuntimeError> {
        for statement in statements {
            self.execute(statement)?;
        }
        Ok(())
    }

    fn execute(&mut self, statement: &Stmt) -> Result<ControlFlow<Value>, RuntimeError> {
        statement.accept(self)
    }

    /// Runs `statements` in `environment`, restoring the previous
    /// environment on every exit path (normal completion, a `return`
    /// signal, or a propagated error) so a failing call never leaves the
    /// interpreter pointed at a dead scope.
    pub fn execute_block(&mut self, statements: &[Stmt], environment: EnvRef) -> Result<ControlFlow<Value>, RuntimeError> {
        let previous = std::mem::replace(&mut self.environment, environment);
        let mut result = Ok(ControlFlow::Continue(()));
        for statement in statements {
            match self.execute(statement) {
                Ok(ControlFlow::Continue(())) => continue,
                other => {
                    result = other;
                    break;
                }
            }
        }
        self.environment = previous;
        result
    }

    fn evaluate(&mut self, expression: &Expr) -> Result<Value, RuntimeError> {
        expression.accept(self)
    }

    fn lookup_variable(&self, expr_id: usize, name: &Token) -> Result<Value, RuntimeError> {
        match self.locals.get(&expr_id) {
            Some(&distance) => Ok(Environment::get_at(&self.environment, distance, &name.lexeme)),
            None => self.globals.borrow().get(name),
        }
    }
}

fn number_operand_error(operator: &Token) -> RuntimeError {
    RuntimeError::new(operator.clone(), "Operand must be a number.".to_string())
}

fn number_operands_error(operator: &Token) -> RuntimeError {
    RuntimeError::new(operator.clone(), "Operands must be numbers.".to_string())
}

fn numeric_op(operator: &Token, left: Value, right: Value, op: impl Fn(f64, f64) -> f64) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(op(a, b))),
        _ => Err(number_operands_error(operator)),
    }
}

fn comparison(operator: &Token, left: Value, right: Value, op: impl Fn(f64, f64) -> bool) -> Result<Value, RuntimeError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Boolean(op(a, b))),
        _ => Err(number_operands_error(operator)),
    }
}

impl expr::Visitor<Result<Value, RuntimeError>> for Interpreter {
    fn visit_assign_expr(&mut self, id: usize, name: &Token, value: &Expr) -> Result<Value, RuntimeError> {
        let value = self.evaluate(value)?;
        match self.locals.get(&id) {
            Some(&distance) => Environment::assign_at(&self.environment, distance, name, value.clone()),
            None => self.globals.borrow_mut().assign(name, value.clone())?,
        }
        Ok(value)
    }

    fn visit_binary_expr(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Value, RuntimeError> {
        let left = self.evaluate(left)?;
        let right = self.evaluate(right)?;

        match operator.token_type {
            TokenType::Minus => numeric_op(operator, left, right, |a, b| a - b),
            TokenType::Slash => numeric_op(operator, left, right, |a, b| a / b),
            TokenType::Star => numeric_op(operator, left, right, |a, b| a * b),
            TokenType::Plus => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(a), Value::String(b)) => Ok(Value::string(format!("{a}{b}"))),
                _ => Err(RuntimeError::new(operator.clone(), "Operands must be two numbers or two strings.".to_string())),
            },
            TokenType::Greater => comparison(operator, left, right, |a, b| a > b),
            TokenType::GreaterEqual => comparison(operator, left, right, |a, b| a >= b),
            TokenType::Less => comparison(operator, left, right, |a, b| a < b),
            TokenType::LessEqual => comparison(operator, left, right, |a, b| a <= b),
            TokenType::BangEqual => Ok(Value::Boolean(left != right)),
            TokenType::EqualEqual => Ok(Value::Boolean(left == right)),
            _ => unreachable!("parser never emits another operator for a binary expression"),
        }
    }

    fn visit_call_expr(&mut self, callee: &Expr, paren: &Token, arguments: &[Expr]) -> Result<Value, RuntimeError> {
        let callee = self.evaluate(callee)?;

        let mut args = Vec::with_capacity(arguments.len());
        for argument in arguments {
            args.push(self.evaluate(argument)?);
        }

        match callee {
            Value::Callable(callable) => {
                if args.len() != callable.arity() {
                    return Err(RuntimeError::new(
                        paren.clone(),
                        format!("Expected {} arguments but got {}.", callable.arity(), args.len()),
                    ));
                }
                callable.call(self, &args)
            }
            Value::Class(class) => {
                let initializer = class.find_method("init");
                let arity = initializer.as_ref().map_or(0, |init| init.arity());
                if args.len() != arity {
                    return Err(RuntimeError::new(paren.clone(), format!("Expected {arity} arguments but got {}.", args.len())));
                }
                let instance = Rc::new(RefCell::new(LoxInstance::new(Rc::clone(&class))));
                if let Some(initializer) = initializer {
                    initializer.bind(Value::Instance(Rc::clone(&instance))).call(self, &args)?;
                }
                Ok(Value::Instance(instance))
            }
            _ => Err(RuntimeError::new(paren.clone(), "Can only call functions and classes.".to_string())),
        }
    }

    fn visit_get_expr(&mut self, object: &Expr, name: &Token) -> Result<Value, RuntimeError> {
        let object = self.evaluate(object)?;
        match object {
            Value::Instance(instance) => {
                let this = Value::Instance(Rc::clone(&instance));
                instance.borrow().get(name, this)
            }
            _ => Err(RuntimeError::new(name.clone(), "Only instances have properties.".to_string())),
        }
    }

    fn visit_grouping_expr(&mut self, expression: &Expr) -> Result<Value, RuntimeError> {
        self.evaluate(expression)
    }

    fn visit_literal_expr(&mut self, value: &LiteralValue) -> Result<Value, RuntimeError> {
        Ok(match value {
            LiteralValue::Boolean(b) => Value::Boolean(*b),
            LiteralValue::Number(n) => Value::Number(*n),
            LiteralValue::String(s) => Value::string(s.clone()),
            LiteralValue::Null => Value::Nil,
        })
    }

    fn visit_logical_expr(&mut self, left: &Expr, operator: &Token, right: &Expr) -> Result<Value, RuntimeError> {
        let left = self.evaluate(left)?;
        let short_circuits = if operator.token_type == TokenType::Or { left.is_truthy() } else { !left.is_truthy() };
        if short_circuits {
            Ok(left)
        } else {
            self.evaluate(right)
        }
    }

    fn visit_set_expr(&mut self, object: &Expr, name: &Token, value: &Expr) -> Result<Value, RuntimeError> {
        let object = self.evaluate(object)?;
        match object {
            Value::Instance(instance) => {
                let value = self.evaluate(value)?;
                instance.borrow_mut().set(name, value.clone());
                Ok(value)
            }
            _ => Err(RuntimeError::new(name.clone(), "Only instances have fields.".to_string())),
        }
    }

    fn visit_super_expr(&mut self, id: usize, _keyword: &Token, method: &Token) -> Result<Value, RuntimeError> {
        let distance = *self.locals.get(&id).expect("resolver always resolves a 'super' expression");
        let superclass = match Environment::get_at(&self.environment, distance, "super") {
            Value::Class(class) => class,
            _ => unreachable!("'super' is only ever bound to a class"),
        };
        // `this` sits one environment closer than `super`: see LoxFunction::bind.
        let instance = Environment::get_at(&self.environment, distance - 1, "this");

        superclass
            .find_method(&method.lexeme)
            .map(|found| Value::Callable(Callable::Function(Rc::new(found.bind(instance)))))
            .ok_or_else(|| RuntimeError::new(method.clone(), format!("Undefined property '{}'.", method.lexeme)))
    }

    fn visit_this_expr(&mut self, id: usize, keyword: &Token) -> Result<Value, RuntimeError> {
        self.lookup_variable(id, keyword)
    }

    fn visit_unary_expr(&mut self, operator: &Token, right: &Expr) -> Result<Value, RuntimeError> {
        let right = self.evaluate(right)?;
        match operator.token_type {
            TokenType::Minus => match right {
                Value::Number(n) => Ok(Value::Number(-n)),
                _ => Err(number_operand_error(operator)),
            },
            TokenType::Bang => Ok(Value::Boolean(!right.is_truthy())),
            _ => unreachable!("parser never emits another operator for a unary expression"),
        }
    }

    fn visit_variable_expr(&mut self, id: usize, name: &Token) -> Result<Value, RuntimeError> {
        self.lookup_variable(id, name)
    }
}

impl stmt::Visitor<Result<ControlFlow<Value>, RuntimeError>> for Interpreter {
    fn visit_block_stmt(&mut self, statements: &[Stmt]) -> Result<ControlFlow<Value>, RuntimeError> {
        self.execute_block(statements, Environment::with_enclosing(&self.environment))
    }

    fn visit_class_stmt(&mut self, name: &Token, superclass: &Option<Expr>, methods: &[Stmt]) -> Result<ControlFlow<Value>, RuntimeError> {
        let superclass_value = match superclass {
            Some(Expr::Variable { name: super_name, .. }) => {
                match self.evaluate(superclass.as_ref().expect("just matched Some"))? {
                    Value::Class(class) => Some(class),
                    _ => return Err(RuntimeError::new(super_name.clone(), "Superclass must be a class.".to_string())),
                }
            }
            Some(_) => unreachable!("parser only emits a Variable expression for a superclass"),
            None => None,
        };

        self.environment.borrow_mut().define(name.lexeme.clone(), Value::Nil);

        let previous_environment = superclass_value.as_ref().map(|superclass| {
            let environment = Environment::with_enclosing(&self.environment);
            environment.borrow_mut().define("super", Value::Class(Rc::clone(superclass)));
            std::mem::replace(&mut self.environment, environment)
        });

        let mut method_table = HashMap::new();
        for method in methods {
            if let Stmt::Function { name: method_name, params, body } = method {
                let is_initializer = method_name.lexeme == "init";
                let function = LoxFunction::new(method_name.clone(), Rc::clone(params), Rc::clone(body), Rc::clone(&self.environment), is_initializer);
                method_table.insert(method_name.lexeme.clone(), Rc::new(function));
            }
        }

        let class = Rc::new(LoxClass::new(name.lexeme.clone(), superclass_value, method_table));

        if let Some(previous) = previous_environment {
            self.environment = previous;
        }

        self.environment.borrow_mut().assign(name, Value::Class(class))?;
        Ok(ControlFlow::Continue(()))
    }

    fn visit_expression_stmt(&mut self, expression: &Expr) -> Result<ControlFlow<Value>, RuntimeError> {
        self.evaluate(expression)?;
        Ok(ControlFlow::Continue(()))
    }

    fn visit_function_stmt(&mut self, name: &Token, params: &Rc<Vec<Token>>, body: &Rc<Vec<Stmt>>) -> Result<ControlFlow<Value>, RuntimeError> {
        let function = LoxFunction::new(name.clone(), Rc::clone(params), Rc::clone(body), Rc::clone(&self.environment), false);
        self.environment
            .borrow_mut()
            .define(name.lexeme.clone(), Value::Callable(Callable::Function(Rc::new(function))));
        Ok(ControlFlow::Continue(()))
    }

    fn visit_if_stmt(&mut self, condition: &Expr, then_branch: &Stmt, else_branch: &Option<Box<Stmt>>) -> Result<ControlFlow<Value>, RuntimeError> {
        if self.evaluate(condition)?.is_truthy() {
            self.execute(then_branch)
        } else if let Some(else_branch) = else_branch {
            self.execute(else_branch)
        } else {
            Ok(ControlFlow::Continue(()))
        }
    }

    fn visit_print_stmt(&mut self, expression: &Expr) -> Result<ControlFlow<Value>, RuntimeError> {
        let value = self.evaluate(expression)?;
        writeln!(self.out, "{value}").expect("write to the configured output sink should not fail");
        Ok(ControlFlow::Continue(()))
    }

    fn visit_return_stmt(&mut self, _keyword: &Token, value: &Option<Expr>) -> Result<ControlFlow<Value>, RuntimeError> {
        let value = match value {
            Some(expression) => self.evaluate(expression)?,
            None => Value::Nil,
        };
        Ok(ControlFlow::Break(value))
    }

    fn visit_var_stmt(&mut self, name: &Token, initializer: &Option<Expr>) -> Result<ControlFlow<Value>, RuntimeError> {
        let value = match initializer {
            Some(expression) => self.evaluate(expression)?,
            None => Value::Nil,
        };
        self.environment.borrow_mut().define(name.lexeme.clone(), value);
        Ok(ControlFlow::Continue(()))
    }

    fn visit_while_stmt(&mut self, condition: &Expr, body: &Stmt) -> Result<ControlFlow<Value>, RuntimeError> {
        while self.evaluate(condition)?.is_truthy() {
            match self.execute(body)? {
                ControlFlow::Continue(()) => continue,
                signal => return Ok(signal),
            }
        }
        Ok(ControlFlow::Continue(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;
    use crate::resolver::Resolver;
    use crate::scanner::Scanner;

    #[derive(Clone, Default)]
    struct SharedBuffer(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().write(buf)
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run(source: &str) -> String {
        let tokens = Scanner::new(source).scan_tokens().expect("scan");
        let statements = Parser::new(tokens).parse().expect("parse");
        let buffer = SharedBuffer::default();
        let mut interpreter = Interpreter::new(Box::new(buffer.clone()));
        Resolver::new(&mut interpreter).resolve(&statements).expect("resolve");
        interpreter.interpret(&statements).expect("interpret");
        let bytes = buffer.0.borrow().clone();
        String::from_utf8(bytes).expect("utf8 output")
    }

    #[test]
    fn arithmetic_and_string_concat() {
        assert_eq!(run("print 1 + 2 * 3;"), "7\n");
        assert_eq!(run(r#"print "a" + "b";"#), "ab\n");
    }

    #[test]
    fn numbers_print_without_trailing_zero() {
        assert_eq!(run("print 3.0;"), "3\n");
    }

    #[test]
    fn division_by_zero_yields_infinity() {
        assert_eq!(run("print 1 / 0;"), "inf\n");
    }

    #[test]
    fn closures_capture_their_defining_environment() {
        let output = run(
            r#"
            fun makeCounter() {
              var count = 0;
              fun counter() {
                count = count + 1;
                return count;
              }
              return counter;
            }
            var counter = makeCounter();
            print counter();
            print counter();
            "#,
        );
        assert_eq!(output, "1\n2\n");
    }

    #[test]
    fn classes_support_fields_methods_and_this() {
        let output = run(
            r#"
            class Greeter {
              init(name) {
                this.name = name;
              }
              greet() {
                return "hi " + this.name;
              }
            }
            var g = Greeter("Ada");
            print g.greet();
            "#,
        );
        assert_eq!(output, "hi Ada\n");
    }

    #[test]
    fn inheritance_resolves_super_methods() {
        let output = run(
            r#"
            class Animal {
              speak() {
                return "...";
              }
            }
            class Dog < Animal {
              speak() {
                return "woof (" + super.speak() + ")";
              }
            }
            print Dog().speak();
            "#,
        );
        assert_eq!(output, "woof (...)\n");
    }

    #[test]
    fn calling_a_non_callable_is_a_runtime_error() {
        let tokens = Scanner::new("var x = 1; x();").scan_tokens().unwrap();
        let statements = Parser::new(tokens).parse().unwrap();
        let mut interpreter = Interpreter::new(Box::new(std::io::sink()));
        Resolver::new(&mut interpreter).resolve(&statements).unwrap();
        let err = interpreter.interpret(&statements).unwrap_err();
        assert!(err.message.contains("Can only call"));
    }
}
