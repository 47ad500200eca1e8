use syn::{Attribute, LitStr, Token};

/// Parsed contents of a field's `#[native(...)]` attribute.
#[derive(Default)]
pub struct FieldAttrs {
    pub get: bool,
    pub set: bool,
    pub name: Option<String>,
}

impl FieldAttrs {
    pub fn from_attrs(attrs: &[Attribute]) -> syn::Result<Self> {
        let mut parsed = FieldAttrs::default();

        for attr in attrs {
            if !attr.path().is_ident("native") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("get") {
                    parsed.get = true;
                } else if meta.path.is_ident("set") {
                    parsed.set = true;
                } else if meta.path.is_ident("name") {
                    let _: Token![=] = meta.input.parse()?;
                    let lit: LitStr = meta.input.parse()?;
                    parsed.name = Some(lit.value());
                } else {
                    return Err(meta.error("unrecognized native field attribute"));
                }
                Ok(())
            })?;
        }

        Ok(parsed)
    }
}
