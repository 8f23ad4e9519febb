use std::io::Write;

use ember_core::{EmberError, Value};

/// Print each argument's display form on its own line. Always returns null.
pub(crate) fn puts(args: &[Value]) -> Result<Value, EmberError> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for arg in args {
        // A closed stdout is not a runtime error for the program.
        let _ = writeln!(out, "{arg}");
    }
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_puts_returns_null() {
        assert_eq!(
            puts(&[Value::string("hello"), Value::Int(1)]).unwrap(),
            Value::Null
        );
        assert_eq!(puts(&[]).unwrap(), Value::Null);
    }
}
