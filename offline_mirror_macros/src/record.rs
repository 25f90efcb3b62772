use proc_macro::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr};

pub fn derive_record(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let store = extract_store(&input);

    let key_fields = match extract_key_fields(&input) {
        Ok(fields) => fields,
        Err(err) => return TokenStream::from(err.to_compile_error()),
    };

    let key_expr = if key_fields.len() == 1 {
        let field = &key_fields[0];
        quote! {
            offline_mirror::Key::simple(self.#field.to_string())
        }
    } else {
        quote! {
            offline_mirror::Key::composite([#(self.#key_fields.to_string()),*])
        }
    };

    let expanded = quote! {
        impl offline_mirror::Record for #name {
            const STORE: &'static str = #store;

            fn key(&self) -> offline_mirror::Key {
                #key_expr
            }
        }
    };

    TokenStream::from(expanded)
}

fn extract_store(input: &DeriveInput) -> String {
    for attr in &input.attrs {
        if !attr.path().is_ident("record") {
            continue;
        }

        let mut store = None;
        let _ = attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("store") {
                let value: LitStr = meta.value()?.parse()?;
                store = Some(value.value());
            }
            Ok(())
        });

        if let Some(s) = store {
            return s;
        }
    }

    let name = input.ident.to_string();
    format!("{}s", to_snake_case(&name))
}

fn extract_key_fields(input: &DeriveInput) -> syn::Result<Vec<syn::Ident>> {
    let Data::Struct(data_struct) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Record derive: only structs with named fields are supported",
        ));
    };
    let Fields::Named(fields) = &data_struct.fields else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "Record derive: only structs with named fields are supported",
        ));
    };

    let mut marked = Vec::new();
    for field in &fields.named {
        for attr in &field.attrs {
            if !attr.path().is_ident("record") {
                continue;
            }
            let mut is_key = false;
            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("key") {
                    is_key = true;
                }
                Ok(())
            })?;
            if is_key {
                if let Some(ident) = &field.ident {
                    marked.push(ident.clone());
                }
            }
        }
    }

    if !marked.is_empty() {
        return Ok(marked);
    }

    // Default: a field named "id"
    for field in &fields.named {
        if let Some(ident) = &field.ident {
            if ident == "id" {
                return Ok(vec![ident.clone()]);
            }
        }
    }

    Err(syn::Error::new_spanned(
        &input.ident,
        "Record derive: no field marked with #[record(key)] and no field named `id`",
    ))
}

fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}
