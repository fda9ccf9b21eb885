use std::hash::DefaultHasher;
use std::hash::Hash as _;
use std::hash::Hasher as _;

use proc_macro2::TokenStream;
use quote::format_ident;
use quote::quote;
use syn::ItemFn;

pub(super) fn route(input: &ItemFn) -> darling::Result<TokenStream> {
    if input.sig.asyncness.is_none() {
        return Err(darling::Error::custom("a route handler must be an async function")
            .with_span(&input.sig.fn_token));
    }
    let name = &input.sig.ident;
    // handlers of different modules share names (get, list, delete...), so the
    // registration static is suffixed with a hash of the whole item
    let digest = {
        let mut hasher = DefaultHasher::new();
        quote!(#input).to_string().hash(&mut hasher);
        hasher.finish()
    };
    let static_name = format_ident!(
        "__{}_OPENAPI_ROUTE_{:X}",
        name.to_string().to_uppercase(),
        digest
    );
    let path_struct = format_ident!("__path_{}", name);
    Ok(quote! {
        #[doc(hidden)]
        #[linkme::distributed_slice(crate::views::router::OPENAPI_ROUTES)]
        static #static_name: crate::views::router::OpenApiRouteSliceItem = |type_name: &str| {
            if type_name != std::any::type_name_of_val(&#name) {
                return None;
            }
            let documentation: fn() -> crate::views::router::RouteDocumentation = || {
                let mut schemas = Vec::new();
                <#path_struct as utoipa::__dev::SchemaReferences>::schemas(&mut schemas);
                crate::views::router::RouteDocumentation {
                    http_methods: <#path_struct as utoipa::Path>::methods(),
                    operation: <#path_struct as utoipa::Path>::operation(),
                    tags: <#path_struct as utoipa::__dev::Tags>::tags(),
                    schemas,
                }
            };
            Some(documentation)
        };

        #input
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_async_handlers() {
        let handler: ItemFn = syn::parse_quote! {
            async fn list() -> &'static str { "ok" }
        };
        let expanded = route(&handler).unwrap().to_string();
        assert!(expanded.contains("__path_list"));
        assert!(expanded.contains("OPENAPI_ROUTES"));
        assert!(expanded.contains("__LIST_OPENAPI_ROUTE_"));
    }

    #[test]
    fn rejects_sync_handlers() {
        let handler: ItemFn = syn::parse_quote! {
            fn list() -> &'static str { "ok" }
        };
        assert!(route(&handler).is_err());
    }
}
