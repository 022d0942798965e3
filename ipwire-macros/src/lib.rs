// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2024 Nathaniel Bennett <me[at]nathanielbennett[dotcom]>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use proc_macro2::TokenStream;
use quote::quote;
use syn::parse_macro_input;
use syn::spanned::Spanned;

// ======================================================
//               Registry Enum Conversions
// ======================================================

// Protocol registries (IP protocol numbers, option kinds, routing types...) are open-ended: the
// wire carries a `u8`, only some of which have names. `WireEnum` is derived on an enum whose named
// variants each carry a `#[wire(N)]` attribute and which has exactly one `#[wire(other)]` tuple
// variant holding the raw value of anything unnamed. For instance:
//
// ```
// #[derive(WireEnum)]
// pub enum RoutingType {
//     #[wire(0)]
//     SourceRoute,
//     #[wire(2)]
//     Type2,
//     #[wire(other)]
//     Unknown(u8),
// }
// ```
//
// generates `From<u8> for RoutingType` and `From<RoutingType> for u8`, so the conversion is total
// in both directions and `u8::from(RoutingType::from(x)) == x` for every `x`. The catch-all can
// still be constructed with a named value (`Unknown(2)`), so `canonical()` maps such a value to
// the variant decoding would produce.

#[proc_macro_derive(WireEnum, attributes(wire))]
pub fn derive_wire_enum(input: proc_macro::TokenStream) -> proc_macro::TokenStream {
    let ast = parse_macro_input!(input as syn::DeriveInput);
    match wire_enum_impl(&ast) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

enum WireAttr {
    Value(syn::LitInt),
    Other,
}

fn wire_attr(variant: &syn::Variant) -> syn::Result<WireAttr> {
    let attr = variant
        .attrs
        .iter()
        .find(|a| a.path.is_ident("wire"))
        .ok_or_else(|| {
            syn::Error::new(
                variant.span(),
                "every variant requires a `#[wire(N)]` or `#[wire(other)]` attribute",
            )
        })?;

    if let Ok(ident) = attr.parse_args::<syn::Ident>() {
        if ident == "other" {
            return Ok(WireAttr::Other);
        }
        return Err(syn::Error::new(ident.span(), "expected `other` or an integer literal"));
    }

    Ok(WireAttr::Value(attr.parse_args::<syn::LitInt>()?))
}

fn wire_enum_impl(ast: &syn::DeriveInput) -> syn::Result<TokenStream> {
    let name = &ast.ident;
    let data = match &ast.data {
        syn::Data::Enum(data) => data,
        _ => {
            return Err(syn::Error::new(
                ast.span(),
                "`WireEnum` can only be derived for enums",
            ))
        }
    };

    let mut from_wire = Vec::new();
    let mut to_wire = Vec::new();
    let mut other = None;

    for variant in &data.variants {
        let ident = &variant.ident;
        match wire_attr(variant)? {
            WireAttr::Value(value) => {
                if !matches!(variant.fields, syn::Fields::Unit) {
                    return Err(syn::Error::new(
                        variant.span(),
                        "`#[wire(N)]` variants must not carry fields",
                    ));
                }
                from_wire.push(quote! { #value => #name::#ident, });
                to_wire.push(quote! { #name::#ident => #value, });
            }
            WireAttr::Other => {
                let single_field = match &variant.fields {
                    syn::Fields::Unnamed(fields) => fields.unnamed.len() == 1,
                    _ => false,
                };
                if !single_field || other.is_some() {
                    return Err(syn::Error::new(
                        variant.span(),
                        "exactly one `#[wire(other)]` variant holding a single `u8` is required",
                    ));
                }
                other = Some(ident.clone());
            }
        }
    }

    let other = other.ok_or_else(|| {
        syn::Error::new(
            ast.span(),
            "`WireEnum` requires a `#[wire(other)]` catch-all variant",
        )
    })?;

    Ok(quote! {
        impl From<u8> for #name {
            #[inline]
            fn from(value: u8) -> Self {
                match value {
                    #(#from_wire)*
                    other => #name::#other(other),
                }
            }
        }

        impl #name {
            /// The variant decoding `u8::from(self)` would produce.
            #[inline]
            pub fn canonical(self) -> Self {
                #name::from(u8::from(self))
            }
        }

        impl From<#name> for u8 {
            #[inline]
            fn from(value: #name) -> u8 {
                match value {
                    #(#to_wire)*
                    #name::#other(other) => other,
                }
            }
        }
    })
}
