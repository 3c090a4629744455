use proc_macro::TokenStream;
use quote::quote;
use syn::{ItemFn, parse_macro_input};

/// Marks a function as a test, running `nrtdir_test::setup_test()` before the
/// test body.
#[proc_macro_attribute]
pub fn test(_args: TokenStream, input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as ItemFn);
    let ItemFn { attrs, vis, sig, block } = input;

    let statements = block.stmts;

    quote!(
        #(#attrs)*
        #[test]
        #vis #sig {
            nrtdir_test::setup_test();
            #(#statements)*
        }
    )
    .into()
}
