use thiserror::Error;

/// Structured errors surfaced by the context core.
#[derive(Debug, Error)]
pub enum ContextError {
    /// A distinct object was added under a type that is already occupied.
    #[error("a different object is already registered under type '{type_name}'")]
    AmbiguousRegistration { type_name: &'static str },

    /// The same object was added to the same context more than once.
    #[error("the same object was added under type '{type_name}' more than once")]
    DuplicateRegistration { type_name: &'static str },

    /// A context was made current before its construction completed.
    #[error("attempted to make a context current before its construction completed")]
    PrematureCurrentContext,

    /// An error was neither filtered locally nor by any ancestor.
    #[error("error was not handled by any filter in the context chain")]
    Unhandled(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ContextError>;
