use std::fmt;
use std::ops::ControlFlow;
use std::rc::Rc;

use crate::environment::{EnvRef, Environment};
use crate::error::RuntimeError;
use crate::interpreter::Interpreter;
use crate::object::Value;
use crate::syntax::Stmt;
use crate::token::Token;

/// A user-defined function or method, closed over the environment active at
/// its declaration site. `params`/`body` are shared behind an `Rc` so that
/// `bind` (called every time a method is looked up on an instance) doesn't
/// clone the whole statement list.
pub struct LoxFunction {
    pub name: Token,
    pub params: Rc<Vec<Token>>,
    pub body: Rc<Vec<Stmt>>,
    pub closure: EnvRef,
    pub is_initializer: bool,
}

impl LoxFunction {
    pub fn new(name: Token, params: Rc<Vec<Token>>, body: Rc<Vec<Stmt>>, closure: EnvRef, is_initializer: bool) -> Self {
        Self {
            name,
            params,
            body,
            closure,
            is_initializer,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    // Each call gets its own environment nested in the closure, so that
    // recursive and concurrently-live calls to the same function don't
    // stomp on each other's locals.
    pub fn call(&self, interpreter: &mut Interpreter, arguments: &[Value]) -> Result<Value, RuntimeError> {
        let environment = Environment::with_enclosing(&self.closure);
        for (param, argument) in self.params.iter().zip(arguments.iter()) {
            environment.borrow_mut().define(param.lexeme.clone(), argument.clone());
        }

        let signal = interpreter.execute_block(&self.body, environment)?;

        if self.is_initializer {
            // `return;` with no value inside `init` still yields `this`.
            return Ok(Environment::get_at(&self.closure, 0, "this"));
        }

        Ok(match signal {
            ControlFlow::Break(value) => value,
            ControlFlow::Continue(()) => Value::Nil,
        })
    }

    // Creates a new environment nestled inside the method's original
    // closure — a closure-within-a-closure. When the method runs, that
    // becomes the parent of the call's own environment. `this` is declared
    // there, bound to the instance the method was looked up on.
    pub fn bind(&self, instance: Value) -> LoxFunction {
        let environment = Environment::with_enclosing(&self.closure);
        environment.borrow_mut().define("this", instance);
        LoxFunction {
            name: self.name.clone(),
            params: Rc::clone(&self.params),
            body: Rc::clone(&self.body),
            closure: environment,
            is_initializer: self.is_initializer,
        }
    }
}

impl fmt::Display for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.name.lexeme)
    }
}

impl fmt::Debug for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoxFunction").field("name", &self.name.lexeme).finish()
    }
}

/// Functions the interpreter exposes to user code but that are implemented
/// in the host language ("foreign"/"native" functions). Lox only ever
/// defines one of these (`clock`), but the shape generalizes if more show up.
pub struct NativeFunction {
    pub name: &'static str,
    pub arity: usize,
    pub body: fn(&[Value]) -> Value,
}

impl NativeFunction {
    pub fn call(&self, arguments: &[Value]) -> Value {
        (self.body)(arguments)
    }
}

impl fmt::Display for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn>")
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

/// The callable side of `Value`: either a user function/method closure or a
/// native one. Kept separate from `Value::Class`, which is callable too
/// (constructing an instance) but carries its own identity and method table.
#[derive(Clone, Debug)]
pub enum Callable {
    Function(Rc<LoxFunction>),
    Native(Rc<NativeFunction>),
}

impl Callable {
    pub fn arity(&self) -> usize {
        match self {
            Callable::Function(f) => f.arity(),
            Callable::Native(n) => n.arity,
        }
    }

    pub fn call(&self, interpreter: &mut Interpreter, arguments: &[Value]) -> Result<Value, RuntimeError> {
        match self {
            Callable::Function(f) => f.call(interpreter, arguments),
            Callable::Native(n) => Ok(n.call(arguments)),
        }
    }

    pub fn identity_eq(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Function(a), Callable::Function(b)) => Rc::ptr_eq(a, b),
            (Callable::Native(a), Callable::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Function(fun) => write!(f, "{fun}"),
            Callable::Native(nat) => write!(f, "{nat}"),
        }
    }
}
