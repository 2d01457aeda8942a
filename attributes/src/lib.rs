//! Procedural macros for the `async-leaktest` crate.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, spanned::Spanned, ItemFn};

/// Include the annotated async function in task dumps and leak reports.
///
/// This:
/// ```ignore
/// #[async_leaktest::framed]
/// async fn foo() {
///     bar().await;
/// }
/// ```
/// ...expands to:
/// ```ignore
/// async fn foo() {
///     ::async_leaktest::location!().frame(async move {
///         bar().await;
///     }).await
/// }
/// ```
#[proc_macro_attribute]
pub fn framed(args: TokenStream, item: TokenStream) -> TokenStream {
    if !args.is_empty() {
        let args = proc_macro2::TokenStream::from(args);
        return syn::Error::new(args.span(), "`#[framed]` takes no arguments")
            .to_compile_error()
            .into();
    }

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new(sig.fn_token.span(), "`#[framed]` requires an `async fn`")
            .to_compile_error()
            .into();
    }

    let stmts = &block.stmts;

    quote!(
        #(#attrs)*
        #vis #sig {
            ::async_leaktest::location!().frame(async move { #(#stmts)* }).await
        }
    )
    .into()
}
