pub mod class;
pub mod environment;
pub mod error;
pub mod function;
pub mod interpreter;
pub mod object;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod syntax;
pub mod token;

use std::fs;
use std::io::{self, BufRead, Write};

use error::Error;
use interpreter::Interpreter;
use parser::Parser;
use resolver::Resolver;
use scanner::Scanner;

/// The facade the CLI (and the integration tests) drive. Owns the
/// interpreter across calls so a REPL session's globals and the resolver's
/// depth table persist from one line to the next.
pub struct Lox {
    interpreter: Interpreter,
}

impl Lox {
    pub fn new() -> Self {
        Self {
            interpreter: Interpreter::new(Box::new(io::stdout())),
        }
    }

    /// Builds a `Lox` that writes `print` output to `out` instead of
    /// stdout, for embedding or test capture.
    pub fn with_output(out: Box<dyn Write>) -> Self {
        Self {
            interpreter: Interpreter::new(out),
        }
    }

    pub fn run_file(&mut self, path: &str) -> Result<(), Error> {
        let source = fs::read_to_string(path)?;
        self.run(&source)
    }

    pub fn run_prompt(&mut self) -> Result<(), Error> {
        let stdin = io::stdin();
        print!("> ");
        io::stdout().flush()?;

        for line in stdin.lock().lines() {
            let line = line?;
            // A mistake on one line shouldn't kill the session — report it
            // and keep prompting, the way a REPL should behave.
            if let Err(err) = self.run(&line) {
                eprintln!("{err}");
            }
            print!("> ");
            io::stdout().flush()?;
        }

        Ok(())
    }

    /// Scans, parses, resolves, then interprets `source`. Each stage's
    /// diagnostics short-circuit the next one: a syntax error means nothing
    /// downstream is worth resolving, and an unresolved program never runs.
    pub fn run(&mut self, source: &str) -> Result<(), Error> {
        let tokens = Scanner::new(source).scan_tokens()?;
        let statements = Parser::new(tokens).parse()?;
        Resolver::new(&mut self.interpreter).resolve(&statements)?;
        self.interpreter.interpret(&statements)?;
        Ok(())
    }
}

impl Default for Lox {
    fn default() -> Self {
        Self::new()
    }
}
