use std::fmt;

/// Check the argument count of a built-in, returning `EmberError::Arity` on
/// mismatch.
///
/// ```ignore
/// check_arity!(args, "len", 1);
/// ```
#[macro_export]
macro_rules! check_arity {
    ($args:expr, $name:expr, $exact:literal) => {
        if $args.len() != $exact {
            return Err($crate::EmberError::arity($name, $exact, $args.len()));
        }
    };
}

/// A single frame in a VM stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub name: String,
    /// Offset of the instruction that was executing in this frame.
    pub ip: usize,
}

/// A captured VM stack trace (innermost frame first).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackTrace(pub Vec<TraceFrame>);

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.0 {
            writeln!(f, "  at {} (ip {:04})", frame.name, frame.ip)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EmberError {
    #[error("opcode {0} undefined")]
    UnknownOpcode(u8),

    #[error("Type error: expected {expected}, got {got}")]
    Type { expected: String, got: String },

    #[error("unsupported types for {op}: {left} {right}")]
    UnsupportedOperator {
        op: &'static str,
        left: String,
        right: String,
    },

    #[error("Arity error: {name} expects {expected} args, got {got}")]
    Arity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("calling non-function: {0}")]
    NotCallable(String),

    #[error("unusable as hash key: {0}")]
    Unhashable(String),

    #[error("index operator not supported: {0}")]
    IndexNotSupported(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("stack overflow (capacity {capacity})")]
    StackOverflow { capacity: usize },

    #[error("frame overflow (max depth {capacity})")]
    FrameOverflow { capacity: usize },

    #[error("global slot {index} out of range (capacity {capacity})")]
    GlobalOutOfRange { index: usize, capacity: usize },

    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),

    #[error("return outside of function")]
    ReturnOutsideFunction,

    #[error("step limit of {0} instructions exceeded")]
    StepLimitExceeded(usize),

    #[error("execution interrupted")]
    Interrupted,

    #[error("config error: {0}")]
    Config(String),

    #[error("{inner}")]
    WithTrace {
        inner: Box<EmberError>,
        trace: StackTrace,
    },
}

impl EmberError {
    pub fn type_error(expected: impl Into<String>, got: impl Into<String>) -> Self {
        EmberError::Type {
            expected: expected.into(),
            got: got.into(),
        }
    }

    pub fn arity(name: impl Into<String>, expected: usize, got: usize) -> Self {
        EmberError::Arity {
            name: name.into(),
            expected,
            got,
        }
    }

    pub fn unsupported_operator(
        op: &'static str,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        EmberError::UnsupportedOperator {
            op,
            left: left.into(),
            right: right.into(),
        }
    }

    pub fn invalid_bytecode(msg: impl Into<String>) -> Self {
        EmberError::InvalidBytecode(msg.into())
    }

    /// Wrap this error with a stack trace (no-op if already wrapped or empty).
    pub fn with_stack_trace(self, trace: StackTrace) -> Self {
        if trace.0.is_empty() {
            return self;
        }
        match self {
            EmberError::WithTrace { .. } => self,
            other => EmberError::WithTrace {
                inner: Box::new(other),
                trace,
            },
        }
    }

    pub fn stack_trace(&self) -> Option<&StackTrace> {
        match self {
            EmberError::WithTrace { trace, .. } => Some(trace),
            _ => None,
        }
    }

    pub fn inner(&self) -> &EmberError {
        match self {
            EmberError::WithTrace { inner, .. } => inner.inner(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(EmberError::UnknownOpcode(200).to_string(), "opcode 200 undefined");
        assert_eq!(
            EmberError::type_error("INTEGER", "STRING").to_string(),
            "Type error: expected INTEGER, got STRING"
        );
        assert_eq!(
            EmberError::arity("fib", 1, 2).to_string(),
            "Arity error: fib expects 1 args, got 2"
        );
        assert_eq!(
            EmberError::unsupported_operator("+", "INTEGER", "BOOLEAN").to_string(),
            "unsupported types for +: INTEGER BOOLEAN"
        );
    }

    #[test]
    fn test_with_stack_trace_wraps_once() {
        let trace = StackTrace(vec![TraceFrame {
            name: "<main>".to_string(),
            ip: 3,
        }]);
        let err = EmberError::DivisionByZero.with_stack_trace(trace.clone());
        assert_eq!(err.to_string(), "division by zero");
        assert_eq!(err.inner(), &EmberError::DivisionByZero);
        assert_eq!(err.stack_trace(), Some(&trace));

        let again = err.clone().with_stack_trace(StackTrace(vec![TraceFrame {
            name: "other".to_string(),
            ip: 0,
        }]));
        assert_eq!(again, err);
    }

    #[test]
    fn test_empty_trace_is_noop() {
        let err = EmberError::Interrupted.with_stack_trace(StackTrace::default());
        assert_eq!(err, EmberError::Interrupted);
        assert!(err.stack_trace().is_none());
    }

    #[test]
    fn test_stack_trace_display() {
        let trace = StackTrace(vec![
            TraceFrame {
                name: "inner".to_string(),
                ip: 12,
            },
            TraceFrame {
                name: "<main>".to_string(),
                ip: 4,
            },
        ]);
        assert_eq!(trace.to_string(), "  at inner (ip 0012)\n  at <main> (ip 0004)\n");
    }
}
