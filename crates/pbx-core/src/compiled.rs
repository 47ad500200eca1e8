use crate::context::Context;
use crate::error::CoreResult;
use crate::runner::Runner;
use std::sync::Arc;

/// Recovered source location for a code line index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

/// An immutable, ref-counted, sharable parsed representation of a script
/// file.
///
/// The concrete parser/bytecode/compiler of the script language is an
/// external collaborator; this trait only fixes the boundary a
/// host-supplied implementation must satisfy so the rest of the runtime
/// (contexts, runners, the global script manager) never needs to know the
/// language's grammar or instruction set.
pub trait CompiledCode: Send + Sync {
    /// Absolute or catalog-relative path this code was parsed from.
    fn file_path(&self) -> &str;

    /// Seeds a freshly allocated context's globals (e.g. built-in object
    /// prototypes) before the context's top-level code runs.
    fn init_context(&self, context: &Context) -> CoreResult<()>;

    /// Creates a new suspendable execution of this code bound to `context`.
    fn create_runner(self: Arc<Self>, context: Arc<Context>) -> Runner;

    /// Recovers the source file/line for an emitted instruction's line
    /// index, so diagnostics and `Message.trace()` can report a location.
    fn source_location(&self, line_index: u32) -> Option<SourceLocation>;
}
