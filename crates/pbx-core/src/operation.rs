use crate::object::ObjectRef;
use std::sync::Arc;

/// A single script-level value, carrying an optional field name (for
/// assignment targets) and an optional source line.
///
/// Every value a script sees is one of these variants, plus the two
/// missing-ness sentinels `Null`/`Undefined`.
#[derive(Clone, Debug)]
pub struct Operation {
    kind: OperationKind,
    name: Option<Arc<str>>,
    line: Option<u32>,
}

#[derive(Clone, Debug)]
pub enum OperationKind {
    String(Arc<str>),
    Integer(i64),
    Boolean(bool),
    /// A non-number ("NaN") result, e.g. of a failed numeric conversion.
    NotANumber,
    Object(ObjectRef),
    /// A reference to a callable script or native function, by name.
    FunctionRef(Arc<str>),
    /// An opcode with its associated argument, for bridging into a host
    /// bytecode interpreter. The concrete opcode set belongs to the
    /// pluggable `CompiledCode` backend and is opaque here.
    Opcode { code: u32, arg: i64 },
    /// Tagged null pointer wrapper.
    Null,
    /// Wrapper with an absent payload.
    Undefined,
}

impl Operation {
    pub fn new(kind: OperationKind) -> Self {
        Self { kind, name: None, line: None }
    }

    pub fn undefined() -> Self {
        Self::new(OperationKind::Undefined)
    }

    pub fn null() -> Self {
        Self::new(OperationKind::Null)
    }

    pub fn string(s: impl Into<Arc<str>>) -> Self {
        Self::new(OperationKind::String(s.into()))
    }

    pub fn integer(v: i64) -> Self {
        Self::new(OperationKind::Integer(v))
    }

    pub fn boolean(v: bool) -> Self {
        Self::new(OperationKind::Boolean(v))
    }

    pub fn object(obj: ObjectRef) -> Self {
        Self::new(OperationKind::Object(obj))
    }

    pub fn function_ref(name: impl Into<Arc<str>>) -> Self {
        Self::new(OperationKind::FunctionRef(name.into()))
    }

    pub fn with_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// *missing*: null or undefined.
    pub fn is_missing(&self) -> bool {
        matches!(self.kind, OperationKind::Null | OperationKind::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self.kind, OperationKind::Null)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self.kind, OperationKind::Undefined)
    }

    /// *empty*: missing, or an empty string.
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            OperationKind::Null | OperationKind::Undefined => true,
            OperationKind::String(s) => s.is_empty(),
            _ => false,
        }
    }

    /// *present*: not missing.
    pub fn is_present(&self) -> bool {
        !self.is_missing()
    }

    /// *filled*: not empty.
    pub fn is_filled(&self) -> bool {
        !self.is_empty()
    }

    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            OperationKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match &self.kind {
            OperationKind::Integer(i) => Some(*i),
            OperationKind::Boolean(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match &self.kind {
            OperationKind::Boolean(b) => Some(*b),
            OperationKind::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match &self.kind {
            OperationKind::Object(o) => Some(o),
            _ => None,
        }
    }

    /// A human-readable rendering used by `trace()`/`toString` style natives.
    pub fn display_string(&self) -> String {
        match &self.kind {
            OperationKind::String(s) => s.to_string(),
            OperationKind::Integer(i) => i.to_string(),
            OperationKind::Boolean(b) => b.to_string(),
            OperationKind::NotANumber => "nan".to_string(),
            OperationKind::Null => "null".to_string(),
            OperationKind::Undefined => "undefined".to_string(),
            OperationKind::FunctionRef(name) => format!("[function {name}]"),
            OperationKind::Opcode { code, arg } => format!("[opcode {code}:{arg}]"),
            OperationKind::Object(_) => "[object]".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // isNull(op) implies !isUndefined(op); isMissing == isNull || isUndefined
    #[test]
    fn null_and_undefined_are_distinct_forms_of_missing() {
        let null = Operation::null();
        let undef = Operation::undefined();
        let present = Operation::integer(5);

        assert!(null.is_null() && !null.is_undefined());
        assert!(undef.is_undefined() && !undef.is_null());
        assert_eq!(null.is_missing(), null.is_null() || null.is_undefined());
        assert_eq!(undef.is_missing(), undef.is_null() || undef.is_undefined());
        assert!(!present.is_missing());
    }

    #[test]
    fn empty_includes_missing_and_empty_string() {
        assert!(Operation::null().is_empty());
        assert!(Operation::undefined().is_empty());
        assert!(Operation::string("").is_empty());
        assert!(!Operation::string("x").is_empty());
        assert!(!Operation::integer(0).is_empty());
    }

    #[test]
    fn filled_and_present_are_negations() {
        let op = Operation::string("hi");
        assert!(op.is_present());
        assert!(op.is_filled());
        assert!(!Operation::string("").is_filled());
    }
}
