use darling::FromDeriveInput;
use darling::FromField;
use darling::FromVariant;
use darling::ast::Data;
use darling::ast::Fields;
use darling::ast::Style;
use proc_macro2::TokenStream;
use quote::format_ident;
use quote::quote;
use syn::DeriveInput;
use syn::Ident;
use syn::Type;

const DEFAULT_STATUS: u16 = 400;

#[derive(FromDeriveInput)]
#[darling(attributes(service_error), supports(enum_any))]
struct ErrorOptions {
    ident: Ident,
    generics: syn::Generics,
    data: Data<VariantOptions, ()>,
    base_id: String,
    #[darling(default)]
    default_status: Option<u16>,
}

#[derive(FromVariant)]
#[darling(attributes(service_error))]
struct VariantOptions {
    ident: Ident,
    fields: Fields<FieldOptions>,
    #[darling(default)]
    status: Option<u16>,
    #[darling(default)]
    no_context: bool,
}

#[derive(FromField)]
struct FieldOptions {
    ident: Option<Ident>,
    ty: Type,
}

struct Variant {
    ident: Ident,
    status: u16,
    error_type: String,
    context_fields: Vec<(Ident, String)>,
}

fn check_status(status: u16, variant: &Ident) -> darling::Result<u16> {
    if (100..=599).contains(&status) {
        Ok(status)
    } else {
        Err(darling::Error::custom(format!("invalid HTTP status code {status}")).with_span(variant))
    }
}

/// Last path segment of a type, used to describe the context in the OpenAPI
fn type_label(ty: &Type) -> String {
    match ty {
        Type::Path(path) => path
            .path
            .segments
            .last()
            .map(|segment| segment.ident.to_string())
            .unwrap_or_else(|| String::from("Object")),
        _ => String::from("Object"),
    }
}

pub(super) fn expand(input: &DeriveInput) -> darling::Result<TokenStream> {
    let options = ErrorOptions::from_derive_input(input)?;
    let default_status = options.default_status.unwrap_or(DEFAULT_STATUS);
    let Data::Enum(variants) = options.data else {
        return Err(darling::Error::unsupported_shape("struct"));
    };

    let mut errors = darling::Error::accumulator();
    let variants: Vec<Variant> = variants
        .into_iter()
        .filter_map(|variant| {
            let status = errors.handle(check_status(
                variant.status.unwrap_or(default_status),
                &variant.ident,
            ))?;
            let context_fields = if variant.no_context || !matches!(variant.fields.style, Style::Struct) {
                Vec::new()
            } else {
                variant
                    .fields
                    .fields
                    .iter()
                    .filter_map(|field| Some((field.ident.clone()?, type_label(&field.ty))))
                    .collect()
            };
            Some(Variant {
                error_type: format!("orefox:{}:{}", options.base_id, variant.ident),
                ident: variant.ident,
                status,
                context_fields,
            })
        })
        .collect();
    errors.finish()?;

    let name = &options.ident;
    let (impl_generics, ty_generics, where_clause) = options.generics.split_for_impl();

    let status_arms = variants.iter().map(|Variant { ident, status, .. }| {
        quote! {
            Self::#ident { .. } => axum::http::StatusCode::from_u16(#status)
                .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    });
    let type_arms = variants.iter().map(
        |Variant {
             ident, error_type, ..
         }| quote! { Self::#ident { .. } => #error_type },
    );
    let context_arms = variants.iter().map(
        |Variant {
             ident,
             context_fields,
             ..
         }| {
            if context_fields.is_empty() {
                return quote! { Self::#ident { .. } => Default::default() };
            }
            let fields = context_fields.iter().map(|(field, _)| field);
            let keys = context_fields.iter().map(|(field, _)| field.to_string());
            let values = context_fields.iter().map(|(field, _)| field);
            quote! {
                Self::#ident { #(#fields,)* .. } => [
                    #((
                        String::from(#keys),
                        serde_json::to_value(#values).unwrap_or(serde_json::Value::Null),
                    )),*
                ]
                .into_iter()
                .collect()
            }
        },
    );
    let definitions = variants.iter().map(
        |Variant {
             ident,
             status,
             error_type,
             context_fields,
         }| {
            let static_name = format_ident!(
                "__{}_{}_ERROR_DEFINITION",
                name.to_string().to_uppercase(),
                ident.to_string().to_uppercase()
            );
            let namespace = name.to_string();
            let variant_name = ident.to_string();
            let context = serde_json::Value::Object(
                context_fields
                    .iter()
                    .map(|(field, label)| (field.to_string(), serde_json::Value::from(label.as_str())))
                    .collect(),
            )
            .to_string();
            quote! {
                #[doc(hidden)]
                #[linkme::distributed_slice(crate::error::ERROR_DEFINITIONS)]
                static #static_name: crate::error::ErrorDefinition = crate::error::ErrorDefinition::new(
                    #error_type,
                    #variant_name,
                    #namespace,
                    #status,
                    #context,
                );
            }
        },
    );

    Ok(quote! {
        impl #impl_generics crate::error::ServiceError for #name #ty_generics #where_clause {
            fn get_status(&self) -> axum::http::StatusCode {
                match self {
                    #(#status_arms,)*
                }
            }

            fn get_type(&self) -> &str {
                match self {
                    #(#type_arms,)*
                }
            }

            fn context(&self) -> std::collections::HashMap<String, serde_json::Value> {
                match self {
                    #(#context_arms,)*
                }
            }
        }

        #(#definitions)*
    })
}
