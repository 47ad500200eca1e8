use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::operation::Operation;

/// A native object reflected into script: "Engine", "Message", "Channel",
/// "SharedVars", … all implement this, dispatching by method name the way
/// a native-binding registry dispatches registered natives by signature.
pub trait NativeObject: Send + Sync {
    /// Invokes the named native method, popping its arguments off `args`
    /// (already extracted by the caller via [`extract_args`]) and
    /// returning exactly one result operation — `Operation::undefined()`
    /// if the native produces no script-visible value.
    fn call_native(
        &self,
        method: &str,
        args: Vec<Operation>,
        context: &Context,
    ) -> CoreResult<Operation>;
}

/// Pops `oper`'s declared argument count off the calling operation and
/// packs them into a vector in source order, failing if the count falls
/// outside `[min, max]` (`max == 0` means unbounded).
///
/// `raw_args` is the already-popped-in-reverse argument list a caller
/// read off its evaluation stack; this only validates arity and restores
/// source order.
pub fn extract_args(min: usize, max: usize, mut raw_args: Vec<Operation>) -> CoreResult<Vec<Operation>> {
    let count = raw_args.len();
    if count < min || (max > 0 && count > max) {
        return Err(CoreError::ArgCount { min, max, found: count });
    }
    raw_args.reverse();
    Ok(raw_args)
}

/// Evaluates a field reference by reading it off `context`; a plain
/// literal operation is returned unchanged.
pub fn pop_value(op: Operation, context: &Context) -> CoreResult<Operation> {
    match op.name() {
        Some(name) => Ok(context.get_global(name)?.unwrap_or_else(Operation::undefined)),
        None => Ok(op),
    }
}

/// Fails when `op` is missing (null/undefined) — the "required field"
/// helper native methods use to validate an argument before acting on it.
pub fn require_present(op: &Operation, field_name: &str) -> CoreResult<()> {
    if op.is_missing() {
        Err(CoreError::RequiredFieldMissing(field_name.to_string()))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_args_enforces_bounds() {
        let args = vec![Operation::integer(1), Operation::integer(2)];
        assert!(extract_args(1, 3, args.clone()).is_ok());
        assert!(matches!(extract_args(3, 0, args.clone()), Err(CoreError::ArgCount { .. })));
        assert!(matches!(extract_args(0, 1, args), Err(CoreError::ArgCount { .. })));
    }

    #[test]
    fn extract_args_restores_source_order() {
        // Simulating a caller that popped arguments off a stack in reverse.
        let reversed = vec![Operation::integer(3), Operation::integer(2), Operation::integer(1)];
        let ordered = extract_args(0, 0, reversed).unwrap();
        let values: Vec<i64> = ordered.iter().map(|o| o.as_integer().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn require_present_rejects_missing() {
        assert!(require_present(&Operation::null(), "x").is_err());
        assert!(require_present(&Operation::undefined(), "x").is_err());
        assert!(require_present(&Operation::integer(0), "x").is_ok());
    }
}
