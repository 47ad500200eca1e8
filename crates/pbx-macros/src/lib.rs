//! Proc macros for wiring a Rust struct up to the native bridge in
//! `pbx-core` without hand-writing a `call_native` dispatch table.

use proc_macro::TokenStream;

mod attrs;
mod derive_native;

/// Derives [`pbx_core::bridge::NativeObject`] for a struct whose fields
/// are individually exposed to script.
///
/// Fields marked `#[native(get)]`/`#[native(set)]` must be `Mutex<Operation>`
/// (the context's serialising mutex is the caller's, not this field's —
/// this is purely interior mutability for the bridge's `&self` signature).
/// A getter dispatches on `"get<Field>"`, a setter on `"set<Field>"`, using
/// the field's Rust name unless overridden with `#[native(name = "...")]`.
/// Any other method name produces `CoreError::UnknownNative`.
///
/// ```ignore
/// #[derive(NativeObject)]
/// struct Channel {
///     #[native(get, set)]
///     message: Mutex<Operation>,
///     #[native(get)]
///     id: Mutex<Operation>,
/// }
/// ```
#[proc_macro_derive(NativeObject, attributes(native))]
pub fn derive_native_object(input: TokenStream) -> TokenStream {
    derive_native::derive_native_object_impl(input)
}
