//! Function tests.
//!
//! A FunctionTest names a ValueFunction or ResourceFunction and a list of
//! cases. Functions are compiled once per document revision into a
//! [`PreparedFunction`]; running a test evaluates it with the dry-run
//! evaluator, so no resource ever leaves the process.

mod compare;
mod function;
mod runner;

use thiserror::Error;

use crate::model::ResourceKind;

pub use compare::{compare, Mismatch};
pub use function::{
    prepare, DryRunEvaluator, FunctionEvaluator, FunctionLookup, FunctionResult, MutationIntent,
    PreparedFunction, Template,
};
pub use runner::{
    run_function_test, CaseResult, CaseStatus, InputFinding, InputFindingKind, InputSource, RunStatus,
    TestRun,
};

/// Why a function spec could not be compiled for evaluation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PrepareError {
    #[error("{0} is not a function")]
    NotAFunction(ResourceKind),
    #[error("`{path}`: {message}")]
    Expression { path: String, message: String },
    #[error("{0}")]
    Structure(String),
}
