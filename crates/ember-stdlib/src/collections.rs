use ember_core::{check_arity, EmberError, Value};

pub(crate) fn len(args: &[Value]) -> Result<Value, EmberError> {
    check_arity!(args, "len", 1);
    match &args[0] {
        Value::String(s) => Ok(Value::Int(s.len() as i64)),
        Value::Array(items) => Ok(Value::Int(items.len() as i64)),
        other => Ok(unsupported("len", other)),
    }
}

pub(crate) fn first(args: &[Value]) -> Result<Value, EmberError> {
    check_arity!(args, "first", 1);
    match &args[0] {
        Value::Array(items) => Ok(items.first().cloned().unwrap_or_default()),
        other => Ok(must_be_array("first", other)),
    }
}

pub(crate) fn last(args: &[Value]) -> Result<Value, EmberError> {
    check_arity!(args, "last", 1);
    match &args[0] {
        Value::Array(items) => Ok(items.last().cloned().unwrap_or_default()),
        other => Ok(must_be_array("last", other)),
    }
}

/// Everything but the first element, as a new array. Null for an empty array.
pub(crate) fn rest(args: &[Value]) -> Result<Value, EmberError> {
    check_arity!(args, "rest", 1);
    match &args[0] {
        Value::Array(items) if items.is_empty() => Ok(Value::Null),
        Value::Array(items) => Ok(Value::array(items[1..].to_vec())),
        other => Ok(must_be_array("rest", other)),
    }
}

/// A new array with the value appended; the argument is left untouched.
pub(crate) fn push(args: &[Value]) -> Result<Value, EmberError> {
    check_arity!(args, "push", 2);
    match &args[0] {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len() + 1);
            out.extend(items.iter().cloned());
            out.push(args[1].clone());
            Ok(Value::array(out))
        }
        other => Ok(must_be_array("push", other)),
    }
}

fn unsupported(name: &str, got: &Value) -> Value {
    Value::error(format!(
        "argument to `{name}` not supported, got {}",
        got.type_name()
    ))
}

fn must_be_array(name: &str, got: &Value) -> Value {
    Value::error(format!(
        "argument to `{name}` must be ARRAY, got {}",
        got.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(ns: &[i64]) -> Value {
        Value::array(ns.iter().map(|n| Value::Int(*n)).collect())
    }

    #[test]
    fn test_len() {
        assert_eq!(len(&[Value::string("")]).unwrap(), Value::Int(0));
        assert_eq!(len(&[Value::string("four")]).unwrap(), Value::Int(4));
        assert_eq!(len(&[ints(&[1, 2, 3])]).unwrap(), Value::Int(3));
        assert_eq!(
            len(&[Value::Int(1)]).unwrap(),
            Value::error("argument to `len` not supported, got INTEGER")
        );
    }

    #[test]
    fn test_len_arity_is_fatal() {
        let err = len(&[Value::string("one"), Value::string("two")]).unwrap_err();
        assert_eq!(err, EmberError::arity("len", 1, 2));
    }

    #[test]
    fn test_first_last_rest() {
        let arr = ints(&[1, 2, 3]);
        assert_eq!(first(&[arr.clone()]).unwrap(), Value::Int(1));
        assert_eq!(last(&[arr.clone()]).unwrap(), Value::Int(3));
        assert_eq!(rest(&[arr]).unwrap(), ints(&[2, 3]));

        let empty = ints(&[]);
        assert_eq!(first(&[empty.clone()]).unwrap(), Value::Null);
        assert_eq!(last(&[empty.clone()]).unwrap(), Value::Null);
        assert_eq!(rest(&[empty]).unwrap(), Value::Null);

        assert_eq!(
            first(&[Value::Int(1)]).unwrap(),
            Value::error("argument to `first` must be ARRAY, got INTEGER")
        );
    }

    #[test]
    fn test_push_does_not_mutate() {
        let arr = ints(&[1]);
        let pushed = push(&[arr.clone(), Value::Int(2)]).unwrap();
        assert_eq!(pushed, ints(&[1, 2]));
        assert_eq!(arr, ints(&[1]));
        assert_eq!(
            push(&[Value::Int(1), Value::Int(1)]).unwrap(),
            Value::error("argument to `push` must be ARRAY, got INTEGER")
        );
    }
}
