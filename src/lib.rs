//! A runtime for a declarative policy language in the Datalog family:
//! Horn-clause rules over relational tables, update atoms for effects, and
//! action invocations for simulating external side effects.

pub mod engine;
pub mod error;
pub mod runtime;
pub mod tracer;
pub mod unify;

pub use error::{Result, RuntimeError};
pub use runtime::Runtime;
