use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use lox_interpreter_rs::Lox;

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

fn run(source: &str) -> Result<String, String> {
    let buffer = SharedBuffer::default();
    let mut lox = Lox::with_output(Box::new(buffer.clone()));
    match lox.run(source) {
        Ok(()) => Ok(String::from_utf8(buffer.0.borrow().clone()).unwrap()),
        Err(err) => Err(err.to_string()),
    }
}

#[test]
fn hello_world() {
    assert_eq!(run(r#"print "Hello, world!";"#).unwrap(), "Hello, world!\n");
}

#[test]
fn arithmetic_respects_operator_precedence() {
    assert_eq!(run("print 2 + 3 * 4;").unwrap(), "14\n");
}

#[test]
fn fibonacci_via_recursion() {
    let source = r#"
        fun fib(n) {
          if (n < 2) return n;
          return fib(n - 1) + fib(n - 2);
        }
        print fib(10);
    "#;
    assert_eq!(run(source).unwrap(), "55\n");
}

#[test]
fn closures_remember_their_defining_scope() {
    let source = r#"
        fun makeCounter() {
          var count = 0;
          fun increment() {
            count = count + 1;
            return count;
          }
          return increment;
        }
        var a = makeCounter();
        var b = makeCounter();
        print a();
        print a();
        print b();
    "#;
    assert_eq!(run(source).unwrap(), "1\n2\n1\n");
}

#[test]
fn classes_inheritance_and_super_calls() {
    let source = r#"
        class Shape {
          area() {
            return 0;
          }
          describe() {
            return "a shape with area " + this.area();
          }
        }
        class Square < Shape {
          init(side) {
            this.side = side;
          }
          area() {
            return this.side * this.side;
          }
          describe() {
            return "square: " + super.describe();
          }
        }
        print Square(3).describe();
    "#;
    assert_eq!(run(source).unwrap(), "square: a shape with area 9\n");
}

#[test]
fn for_loop_desugars_correctly() {
    let source = r#"
        var total = 0;
        for (var i = 1; i <= 5; i = i + 1) {
          total = total + i;
        }
        print total;
    "#;
    assert_eq!(run(source).unwrap(), "15\n");
}

#[test]
fn lex_error_is_reported_with_byte_stable_format() {
    let err = run("@").unwrap_err();
    assert_eq!(err, "[line 1] Error: Unexpected character.");
}

#[test]
fn parse_error_is_reported_with_byte_stable_format() {
    let err = run("var x = ;").unwrap_err();
    assert!(err.starts_with("[line 1 at ';'] Error:"));
}

#[test]
fn resolver_error_prevents_interpretation() {
    let err = run("{ var a = a; }").unwrap_err();
    assert!(err.contains("own initializer"));
}

#[test]
fn runtime_type_error_on_non_numeric_operand() {
    let err = run(r#"print "a" - 1;"#).unwrap_err();
    assert!(err.contains("Operands must be numbers."));
}

#[test]
fn undefined_variable_is_a_runtime_error() {
    let err = run("print nope;").unwrap_err();
    assert!(err.contains("Undefined variable 'nope'."));
}
