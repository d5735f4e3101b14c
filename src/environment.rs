use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::object::Value;
use crate::token::Token;

/// A shared handle to a lexical scope frame. Every block, function call, and
/// method binding gets its own `Environment`; closures extend a frame's
/// lifetime simply by holding a clone of this handle.
pub type EnvRef = Rc<RefCell<Environment>>;

pub struct Environment {
    values: HashMap<String, Value>,
    enclosing: Option<EnvRef>,
}

impl Environment {
    pub fn new() -> EnvRef {
        Rc::new(RefCell::new(Self {
            values: HashMap::new(),
            enclosing: None,
        }))
    }

    pub fn with_enclosing(enclosing: &EnvRef) -> EnvRef {
        Rc::new(RefCell::new(Self {
            values: HashMap::new(),
            enclosing: Some(Rc::clone(enclosing)),
        }))
    }

    /// Never fails; redefining a name in the same frame (including globals)
    /// just overwrites the previous binding.
    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &Token) -> Result<Value, RuntimeError> {
        if let Some(value) = self.values.get(&name.lexeme) {
            return Ok(value.clone());
        }
        match &self.enclosing {
            Some(enclosing) => enclosing.borrow().get(name),
            None => Err(undefined(name)),
        }
    }

    pub fn assign(&mut self, name: &Token, value: Value) -> Result<(), RuntimeError> {
        if self.values.contains_key(&name.lexeme) {
            self.values.insert(name.lexeme.clone(), value);
            return Ok(());
        }
        match &self.enclosing {
            Some(enclosing) => enclosing.borrow_mut().assign(name, value),
            None => Err(undefined(name)),
        }
    }

    /// Walks exactly `distance` enclosing links. The resolver guarantees the
    /// name exists at the resulting frame, so callers index it unconditionally.
    fn ancestor(env: &EnvRef, distance: usize) -> EnvRef {
        let mut current = Rc::clone(env);
        for _ in 0..distance {
            let next = current
                .borrow()
                .enclosing
                .clone()
                .expect("resolver-reported distance exceeds the environment chain");
            current = next;
        }
        current
    }

    pub fn get_at(env: &EnvRef, distance: usize, name: &str) -> Value {
        Self::ancestor(env, distance)
            .borrow()
            .values
            .get(name)
            .cloned()
            .expect("resolver guarantees the name is bound at this distance")
    }

    pub fn assign_at(env: &EnvRef, distance: usize, name: &Token, value: Value) {
        Self::ancestor(env, distance)
            .borrow_mut()
            .values
            .insert(name.lexeme.clone(), value);
    }
}

fn undefined(name: &Token) -> RuntimeError {
    RuntimeError::new(name.clone(), format!("Undefined variable '{}'.", name.lexeme))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenType;

    fn token(lexeme: &str) -> Token {
        Token::new(TokenType::Identifier, lexeme, 1)
    }

    #[test]
    fn define_then_get_round_trips() {
        let env = Environment::new();
        env.borrow_mut().define("a", Value::Number(1.0));
        assert_eq!(env.borrow().get(&token("a")).unwrap(), Value::Number(1.0));
    }

    #[test]
    fn assign_overwrites_existing_binding() {
        let env = Environment::new();
        env.borrow_mut().define("a", Value::Number(1.0));
        env.borrow_mut().assign(&token("a"), Value::Number(2.0)).unwrap();
        assert_eq!(env.borrow().get(&token("a")).unwrap(), Value::Number(2.0));
    }

    #[test]
    fn get_on_unbound_name_errors() {
        let env = Environment::new();
        assert!(env.borrow().get(&token("missing")).is_err());
    }

    #[test]
    fn assign_on_unbound_name_errors() {
        let env = Environment::new();
        assert!(env.borrow_mut().assign(&token("missing"), Value::Nil).is_err());
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let outer = Environment::new();
        outer.borrow_mut().define("a", Value::Number(1.0));
        let inner = Environment::with_enclosing(&outer);
        inner.borrow_mut().define("a", Value::Number(2.0));

        assert_eq!(inner.borrow().get(&token("a")).unwrap(), Value::Number(2.0));
        assert_eq!(outer.borrow().get(&token("a")).unwrap(), Value::Number(1.0));
    }

    #[test]
    fn get_at_and_assign_at_index_by_exact_distance() {
        let outer = Environment::new();
        outer.borrow_mut().define("a", Value::Number(1.0));
        let inner = Environment::with_enclosing(&outer);

        assert_eq!(Environment::get_at(&inner, 1, "a"), Value::Number(1.0));
        Environment::assign_at(&inner, 1, &token("a"), Value::Number(9.0));
        assert_eq!(outer.borrow().get(&token("a")).unwrap(), Value::Number(9.0));
    }
}
