//! Transaction program contract and the program registry.
//!
//! Programs are registered as factory closures at startup. Each session keeps
//! its own instances, created on first use and reused on later turns.

use std::collections::HashMap;
use std::fmt;

use crate::runtime::TransactionContext;
use crate::{CicsError, CicsResult};

/// How a program run ended.
#[derive(Debug)]
pub enum Outcome {
    /// Normal completion (RETURN)
    Normal,
    /// ABEND with a four-character code
    Abend(String),
    /// Unexpected failure
    Fault(CicsError),
}

impl Outcome {
    /// Completion status: 0 for normal completion, 12 otherwise.
    pub fn status(&self) -> i32 {
        match self {
            Outcome::Normal => 0,
            Outcome::Abend(_) | Outcome::Fault(_) => 12,
        }
    }

    pub fn is_normal(&self) -> bool {
        matches!(self, Outcome::Normal)
    }

    /// Fold a program result into an outcome; errors become faults.
    pub fn from_result(result: CicsResult<Outcome>) -> Self {
        result.unwrap_or_else(Outcome::Fault)
    }

    /// Turn a failed outcome into an error attributed to `program`.
    pub fn into_result(self, program: &str) -> CicsResult<()> {
        match self {
            Outcome::Normal => Ok(()),
            Outcome::Abend(code) => Err(CicsError::Abend {
                program: program.to_string(),
                code,
            }),
            Outcome::Fault(err) => Err(err),
        }
    }
}

/// A translated transaction program.
pub trait TransactionProgram: Send {
    /// Run the program for one turn (dispatch, LINK or XCTL target).
    fn run(&mut self, ctx: &mut TransactionContext) -> CicsResult<Outcome>;

    /// Run the program as a CALL subroutine with by-reference arguments.
    fn call(&mut self, ctx: &mut TransactionContext, args: &mut [Vec<u8>]) -> CicsResult<Outcome> {
        let _ = args;
        self.run(ctx)
    }
}

/// Adapter that runs a closure as a program.
pub struct FnProgram<F>(pub F);

impl<F> TransactionProgram for FnProgram<F>
where
    F: FnMut(&mut TransactionContext) -> CicsResult<Outcome> + Send,
{
    fn run(&mut self, ctx: &mut TransactionContext) -> CicsResult<Outcome> {
        (self.0)(ctx)
    }
}

/// Program factory.
pub type ProgramFactory = Box<dyn Fn() -> Box<dyn TransactionProgram> + Send + Sync>;

/// Registry of available programs.
#[derive(Default)]
pub struct ProgramRegistry {
    factories: HashMap<String, ProgramFactory>,
}

impl ProgramRegistry {
    /// Create a new registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a program factory.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn TransactionProgram> + Send + Sync + 'static,
    {
        self.factories
            .insert(name.trim().to_uppercase(), Box::new(factory));
    }

    /// Register a stateless program written as a closure.
    pub fn register_fn<F>(&mut self, name: &str, entry: F)
    where
        F: Fn(&mut TransactionContext) -> CicsResult<Outcome> + Clone + Send + Sync + 'static,
    {
        self.register(name, move || Box::new(FnProgram(entry.clone())));
    }

    /// Check if program exists.
    pub fn exists(&self, name: &str) -> bool {
        self.factories.contains_key(&name.trim().to_uppercase())
    }

    /// Create a fresh instance of a program.
    pub fn instantiate(&self, name: &str) -> CicsResult<Box<dyn TransactionProgram>> {
        self.factories
            .get(&name.trim().to_uppercase())
            .map(|factory| factory())
            .ok_or_else(|| CicsError::ProgramNotFound {
                program: name.trim().to_string(),
            })
    }

    /// Registered program names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for ProgramRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgramRegistry")
            .field("programs", &self.names())
            .finish()
    }
}
