use thiserror::Error;

/// Precondition violations (spec §7). These are programming errors: they
/// bubble out of the call that triggered them unchanged, rather than being
/// papered over. Evaluation outcomes that merely fail to find a proof (no
/// unifier, no result) are ordinary empty/`None` values, never an `Err` of
/// this type.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("negated literal not ground when evaluated: {0:?}")]
    UngroundNegation(policy_syntax::Atom),

    #[error("unknown theory target: {0}")]
    UnknownTheory(String),

    #[error("cannot directly modify view table `{0}` computed from other tables")]
    ViewDirectWrite(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
