//! Error types for the reactive runtime.

use std::any::Any;

use thiserror::Error;

use crate::graph::{NodeId, Phase};

/// Failures surfaced by reads, writes and flushes.
///
/// Every variant is reported synchronously to the call that triggered the
/// faulty computation. The runtime never retries.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReactiveError {
    /// A derived formula read itself, directly or through other derived values.
    #[error("dependency cycle detected while computing derived {node}")]
    DependencyCycle { node: NodeId },

    /// A state cell was written from inside a derived formula.
    #[error("cannot write state {cell} while computing derived {derived}")]
    WriteDuringDerivation { cell: NodeId, derived: NodeId },

    /// Effects kept dirtying each other past the configured pass limit.
    #[error("effects still pending after {passes} {phase:?} flush passes: {effects:?}")]
    RunawayUpdate {
        phase: Phase,
        passes: usize,
        effects: Vec<NodeId>,
    },

    /// An effect body or its cleanup failed.
    #[error("effect {node} failed: {message}")]
    EffectBody { node: NodeId, message: String },

    /// A derived formula panicked.
    #[error("derived {node} failed: {message}")]
    DerivedBody { node: NodeId, message: String },

    /// Several isolated failures from one flush.
    #[error("{} reactive errors", .0.len())]
    Multiple(Vec<ReactiveError>),
}

impl ReactiveError {
    /// Fold a list of errors into one.
    ///
    /// Returns `None` if the list is empty, unwraps single-element lists,
    /// and flattens nested `Multiple` variants.
    pub fn from_multiple(errors: Vec<ReactiveError>) -> Option<ReactiveError> {
        let mut flattened: Vec<ReactiveError> = errors
            .into_iter()
            .flat_map(|e| match e {
                ReactiveError::Multiple(inner) => inner,
                other => vec![other],
            })
            .collect();
        match flattened.len() {
            0 => None,
            1 => flattened.pop(),
            _ => Some(ReactiveError::Multiple(flattened)),
        }
    }

    /// Iterate over the individual errors, unpacking `Multiple`.
    pub fn iter(&self) -> impl Iterator<Item = &ReactiveError> {
        match self {
            ReactiveError::Multiple(inner) => inner.iter().collect::<Vec<_>>().into_iter(),
            other => vec![other].into_iter(),
        }
    }

    /// Unwind with this error as payload.
    ///
    /// Used by the infallible accessors; the enclosing derived or effect
    /// catches the unwind and surfaces the original error. The panic hook is
    /// not invoked, so a caught error prints nothing.
    pub(crate) fn raise(self) -> ! {
        std::panic::resume_unwind(Box::new(self))
    }

    /// Recover an error from a caught panic payload.
    ///
    /// A payload that already is a `ReactiveError` passes through unchanged;
    /// anything else is turned into a message and handed to `wrap`.
    pub(crate) fn from_panic(
        payload: Box<dyn Any + Send>,
        wrap: impl FnOnce(String) -> ReactiveError,
    ) -> ReactiveError {
        match payload.downcast::<ReactiveError>() {
            Ok(err) => *err,
            Err(payload) => wrap(panic_message(payload.as_ref())),
        }
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_multiple_flattens() {
        let a = ReactiveError::DependencyCycle { node: NodeId::from(1) };
        let b = ReactiveError::EffectBody {
            node: NodeId::from(2),
            message: "boom".into(),
        };

        assert_eq!(ReactiveError::from_multiple(vec![]), None);
        assert_eq!(ReactiveError::from_multiple(vec![a.clone()]), Some(a.clone()));

        let nested = ReactiveError::Multiple(vec![a.clone(), b.clone()]);
        let folded = ReactiveError::from_multiple(vec![nested, a.clone()]).unwrap();
        assert_eq!(folded.iter().count(), 3);
    }

    #[test]
    fn from_panic_keeps_reactive_payload() {
        let original = ReactiveError::DependencyCycle { node: NodeId::from(9) };
        let payload: Box<dyn Any + Send> = Box::new(original.clone());

        let recovered = ReactiveError::from_panic(payload, |message| ReactiveError::DerivedBody {
            node: NodeId::from(1),
            message,
        });
        assert_eq!(recovered, original);
    }

    #[test]
    fn raise_unwinds_with_error_payload() {
        let original = ReactiveError::DependencyCycle { node: NodeId::from(3) };
        let raised = original.clone();

        let payload = std::panic::catch_unwind(move || raised.raise()).unwrap_err();
        let recovered = ReactiveError::from_panic(payload, |message| ReactiveError::DerivedBody {
            node: NodeId::from(1),
            message,
        });
        assert_eq!(recovered, original);
    }

    #[test]
    fn from_panic_wraps_messages() {
        let payload: Box<dyn Any + Send> = Box::new("bad input");

        let recovered = ReactiveError::from_panic(payload, |message| ReactiveError::EffectBody {
            node: NodeId::from(4),
            message,
        });
        assert_eq!(recovered.to_string(), "effect #4 failed: bad input");
    }
}
