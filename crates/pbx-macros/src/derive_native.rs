//! Implementation of `#[derive(NativeObject)]`.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

use crate::attrs::FieldAttrs;

pub fn derive_native_object_impl(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match derive_native_object_inner(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn pascal_case(field_name: &str) -> String {
    let mut chars = field_name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn derive_native_object_inner(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;

    let Data::Struct(data) = &input.data else {
        return Err(syn::Error::new_spanned(input, "NativeObject can only be derived for structs"));
    };
    let Fields::Named(fields) = &data.fields else {
        return Err(syn::Error::new_spanned(input, "NativeObject requires named fields"));
    };

    let mut getters = Vec::new();
    let mut setters = Vec::new();

    for field in &fields.named {
        let attrs = FieldAttrs::from_attrs(&field.attrs)?;
        if !attrs.get && !attrs.set {
            continue;
        }

        let field_ident = field.ident.as_ref().unwrap();
        let prop_name = attrs.name.clone().unwrap_or_else(|| field_ident.to_string());
        let pascal = pascal_case(&prop_name);

        if attrs.get {
            let method_name = format!("get{pascal}");
            getters.push(quote! {
                #method_name => Ok(self.#field_ident.lock().unwrap().clone()),
            });
        }

        if attrs.set {
            let method_name = format!("set{pascal}");
            setters.push(quote! {
                #method_name => {
                    let args = ::pbx_core::bridge::extract_args(1, 1, args)?;
                    let mut value = args.into_iter().next().unwrap();
                    value = ::pbx_core::bridge::pop_value(value, context)?;
                    *self.#field_ident.lock().unwrap() = value;
                    Ok(::pbx_core::operation::Operation::undefined())
                }
            });
        }
    }

    Ok(quote! {
        impl ::pbx_core::bridge::NativeObject for #name {
            fn call_native(
                &self,
                method: &str,
                args: ::std::vec::Vec<::pbx_core::operation::Operation>,
                context: &::pbx_core::context::Context,
            ) -> ::pbx_core::error::CoreResult<::pbx_core::operation::Operation> {
                match method {
                    #(#getters)*
                    #(#setters)*
                    other => Err(::pbx_core::error::CoreError::UnknownNative(other.to_string())),
                }
            }
        }
    })
}
