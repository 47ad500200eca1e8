use std::sync::Arc;

/// Identifies *why* a runner exists, so native code and diagnostic
/// commands (`allocations`, `info`) can attribute work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptInfoType {
    Unknown,
    Static,
    Dynamic,
    MsgHandler,
    Eval,
    Route,
}

impl ScriptInfoType {
    pub fn type_name(self) -> &'static str {
        match self {
            ScriptInfoType::Unknown => "unknown",
            ScriptInfoType::Static => "static",
            ScriptInfoType::Dynamic => "dynamic",
            ScriptInfoType::MsgHandler => "handler",
            ScriptInfoType::Eval => "eval",
            ScriptInfoType::Route => "route",
        }
    }
}

/// A refcounted record attached to each runner.
#[derive(Debug, Clone)]
pub struct ScriptInfo {
    pub kind: ScriptInfoType,
    pub type_name: String,
}

impl ScriptInfo {
    pub fn new(kind: ScriptInfoType) -> Arc<Self> {
        Arc::new(Self { kind, type_name: kind.type_name().to_string() })
    }

    pub fn named(kind: ScriptInfoType, type_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { kind, type_name: type_name.into() })
    }
}
