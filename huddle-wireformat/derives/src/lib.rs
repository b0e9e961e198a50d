use proc_macro::TokenStream;
use quote::{ToTokens, quote};
use syn::{parse_macro_input, DeriveInput, Data, Fields, Field, Ident, Index, Type, DataStruct};
use proc_macro2::{Span, TokenStream as TokenStream2};


#[proc_macro_derive(ToBytes)]
pub fn derive_tobytes(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match input.data {
        Data::Struct(s) => derive_tobytes_struct(input.ident, s),
        Data::Enum(_) | Data::Union(_) => unsupported(input.ident.span(), "ToBytes"),
    }
}

#[proc_macro_derive(FromBytes)]
pub fn derive_frombytes(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match input.data {
        Data::Struct(s) => derive_frombytes_struct(input.ident, s),
        Data::Enum(_) | Data::Union(_) => unsupported(input.ident.span(), "FromBytes"),
    }
}

/// Only structs have a layout that can be derived, tagged enums are written by hand
fn unsupported(span: Span, which: &str) -> TokenStream {
    syn::Error::new(span, format!("{} can only be derived for structs", which))
        .to_compile_error()
        .into()
}

fn field_name_type_iter(fields: impl Iterator<Item = Field>) -> (Vec<TokenStream2>, Vec<Type>) {
    fields
        .enumerate()
        .map(|(idx, v)| (
                v
                    .ident
                    .map(|i| i.to_token_stream())
                    .unwrap_or(Index::from(idx).to_token_stream()),
                v.ty
            )
        ).unzip::<_, _, Vec<_>, Vec<_>>()
}

fn derive_tobytes_struct(ident: Ident, data: DataStruct) -> TokenStream {
    let (name, ty) = field_name_type_iter(data.fields.into_iter());

    let implementation = quote !{
        impl ::huddle_wireformat::ToBytes for #ident {
            fn encode<B: ::huddle_wireformat::ByteWriter>(&self, writer: &mut B) -> ::core::result::Result<(), ::huddle_wireformat::ToBytesError> {
                #( <#ty as ::huddle_wireformat::ToBytes>::encode(&self.#name, writer)?; )*
                ::core::result::Result::<(), ::huddle_wireformat::ToBytesError>::Ok(())
            }

            fn size_hint(&self) -> usize {
                0 #( + <#ty as ::huddle_wireformat::ToBytes>::size_hint(&self.#name) )*
            }
        }
    };

    TokenStream::from(implementation)
}

fn derive_frombytes_struct(ident: Ident, data: DataStruct) -> TokenStream {
    let is_named = matches!(data.fields, Fields::Named(_));
    let is_unit = !is_named && data.fields.len() == 0;
    let (name, ty) = field_name_type_iter(data.fields.into_iter());

    // Tuple struct fields are bound to locals before construction, so give them identifiers
    let binding = name
        .iter()
        .enumerate()
        .map(|(idx, n)| match is_named {
            true => n.clone(),
            false => Ident::new(&format!("field{}", idx), Span::call_site()).to_token_stream(),
        })
        .collect::<Vec<_>>();

    let constructor = match is_named {
        true => quote!{ #ident { #(#binding),* } },
        false => match is_unit {
            true => quote!{ #ident },
            false => quote!{ #ident(#(#binding),*) },
        }
    };

    let implementation = quote !{
        impl<'a> ::huddle_wireformat::FromBytes<'a> for #ident {
            fn decode(reader: &mut ::huddle_wireformat::untrusted::Reader<'a>) -> ::core::result::Result<Self, ::huddle_wireformat::FromBytesError> {
                #( let #binding = <#ty as ::huddle_wireformat::FromBytes<'a>>::decode(reader)?; )*

                Ok(#constructor)
            }
        }
    };

    TokenStream::from(implementation)
}
