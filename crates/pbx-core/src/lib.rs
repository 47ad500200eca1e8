//! Data model, runner and native bridge contract for the PBX script
//! runtime.
//!
//! The concrete parser/bytecode/compiler of the script language is an
//! external collaborator; this crate only fixes the trait boundary
//! (`CompiledCode`, `ExecutionBackend`) a host-supplied implementation
//! must satisfy.

pub mod bridge;
pub mod compiled;
pub mod context;
pub mod error;
pub mod object;
pub mod operation;
pub mod runner;
pub mod script_info;

pub mod prelude {
    pub use crate::bridge::{extract_args, pop_value, require_present, NativeObject};
    pub use crate::compiled::{CompiledCode, SourceLocation};
    pub use crate::context::Context;
    pub use crate::error::{CoreError, CoreResult};
    pub use crate::object::{NativeParams, Object, ObjectRef};
    pub use crate::operation::{Operation, OperationKind};
    pub use crate::runner::{AsyncUnit, ExecutionBackend, Runner, RunnerState};
    pub use crate::script_info::{ScriptInfo, ScriptInfoType};
}
