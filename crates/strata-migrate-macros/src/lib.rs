//! Proc macros for `strata-migrate`.
//!
//! - **`#[migration]`** turns a forward-action function (and optionally a
//!   reverse one) into a `Migration` implementation plus a `register_*`
//!   helper returning it boxed.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, punctuated::Punctuated, token::Comma, ItemFn, Meta};

/// Attribute macro that wraps an action function into a `Migration`.
///
/// The function must have the shape
/// `fn(&Context, &mut Tx) -> Result<(), E>` where `E: Into<BoxError>`. The
/// transaction type `Tx` is taken from the second parameter and becomes the
/// type parameter of the generated `Migration<Tx>` impl.
///
/// # Attributes
///
/// - `version = N` **Required.** The migration version.
/// - `down = path` Optional. Reverse-action function with the same shape.
///   Without it the reverse action does nothing.
/// - `name = "text"` Optional. Defaults to the function name.
///
/// # Generated Code
///
/// A unit struct `{FnName}Migration` implementing `Migration<Tx>`, and a
/// `register_{fn_name}` function returning `Box<dyn Migration<Tx>>`.
///
/// # Example
///
/// ```ignore
/// use strata_migrate::{migration, BoxError, Context};
/// use strata_store::MemoryTx;
///
/// #[migration(version = 1, down = drop_users)]
/// fn create_users(_ctx: &Context, tx: &mut MemoryTx) -> Result<(), BoxError> {
///     tx.execute("CREATE TABLE users (id INTEGER)")?;
///     Ok(())
/// }
///
/// fn drop_users(_ctx: &Context, tx: &mut MemoryTx) -> Result<(), BoxError> {
///     tx.execute("DROP TABLE users")?;
///     Ok(())
/// }
/// // Generates: CreateUsersMigration + impl Migration<MemoryTx>
/// // Generates: fn register_create_users() -> Box<dyn Migration<MemoryTx>>
/// ```
#[proc_macro_attribute]
pub fn migration(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let args = parse_macro_input!(attr with Punctuated::<Meta, Comma>::parse_terminated);

    match expand_migration(&input, &args) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_migration(
    input: &ItemFn,
    args: &Punctuated<Meta, Comma>,
) -> syn::Result<proc_macro2::TokenStream> {
    let mut version: Option<i64> = None;
    let mut down: Option<syn::Path> = None;
    let mut name: Option<String> = None;

    for meta in args {
        let Meta::NameValue(nv) = meta else {
            return Err(syn::Error::new_spanned(meta, "expected `key = value`"));
        };
        let key = nv
            .path
            .get_ident()
            .map(|i| i.to_string())
            .unwrap_or_default();
        match key.as_str() {
            "version" => version = Some(parse_version(&nv.value)?),
            "down" => match &nv.value {
                syn::Expr::Path(p) => down = Some(p.path.clone()),
                other => {
                    return Err(syn::Error::new_spanned(
                        other,
                        "`down` must name a function",
                    ))
                }
            },
            "name" => match &nv.value {
                syn::Expr::Lit(syn::ExprLit {
                    lit: syn::Lit::Str(lit),
                    ..
                }) => name = Some(lit.value()),
                other => {
                    return Err(syn::Error::new_spanned(other, "`name` must be a string"))
                }
            },
            _ => {
                return Err(syn::Error::new_spanned(
                    &nv.path,
                    format!("unknown attribute `{key}`"),
                ))
            }
        }
    }

    let version = version.ok_or_else(|| {
        syn::Error::new(
            proc_macro2::Span::call_site(),
            "missing required attribute `version`",
        )
    })?;

    let fn_name = &input.sig.ident;
    let tx_type = transaction_type(input)?;
    let name = name.unwrap_or_else(|| fn_name.to_string());

    let struct_name = {
        let pascal: String = fn_name
            .to_string()
            .split('_')
            .map(|part| {
                let mut chars = part.chars();
                match chars.next() {
                    Some(c) => c.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect();
        syn::Ident::new(&format!("{pascal}Migration"), fn_name.span())
    };
    let register_fn = syn::Ident::new(&format!("register_{fn_name}"), fn_name.span());

    let down_body = match &down {
        Some(path) => quote! {
            #path(ctx, tx).map_err(::core::convert::Into::into)
        },
        None => quote! {
            let _ = (ctx, tx);
            ::core::result::Result::Ok(())
        },
    };
    let vis = &input.vis;

    Ok(quote! {
        #input

        /// Generated by `#[migration]`.
        #vis struct #struct_name;

        impl ::strata_migrate::Migration<#tx_type> for #struct_name {
            fn version(&self) -> i64 {
                #version
            }

            fn name(&self) -> &str {
                #name
            }

            fn up(
                &self,
                ctx: &::strata_migrate::Context,
                tx: &mut #tx_type,
            ) -> ::core::result::Result<(), ::strata_migrate::BoxError> {
                #fn_name(ctx, tx).map_err(::core::convert::Into::into)
            }

            fn down(
                &self,
                ctx: &::strata_migrate::Context,
                tx: &mut #tx_type,
            ) -> ::core::result::Result<(), ::strata_migrate::BoxError> {
                #down_body
            }
        }

        /// Box this migration for registration with a `Migrator`.
        #vis fn #register_fn() -> ::std::boxed::Box<dyn ::strata_migrate::Migration<#tx_type>> {
            ::std::boxed::Box::new(#struct_name)
        }
    })
}

fn parse_version(expr: &syn::Expr) -> syn::Result<i64> {
    match expr {
        syn::Expr::Lit(syn::ExprLit {
            lit: syn::Lit::Int(lit),
            ..
        }) => lit.base10_parse(),
        syn::Expr::Unary(syn::ExprUnary {
            op: syn::UnOp::Neg(_),
            expr,
            ..
        }) => parse_version(expr).map(|v| -v),
        other => Err(syn::Error::new_spanned(
            other,
            "`version` must be an integer literal",
        )),
    }
}

/// The `Tx` in the second parameter `tx: &mut Tx`.
fn transaction_type(input: &ItemFn) -> syn::Result<&syn::Type> {
    let inputs = &input.sig.inputs;
    if inputs.len() != 2 {
        return Err(syn::Error::new_spanned(
            &input.sig,
            "migration function must take `(&Context, &mut Tx)`",
        ));
    }
    match inputs.iter().nth(1) {
        Some(syn::FnArg::Typed(pat_type)) => match pat_type.ty.as_ref() {
            syn::Type::Reference(r) if r.mutability.is_some() => Ok(r.elem.as_ref()),
            other => Err(syn::Error::new_spanned(
                other,
                "second parameter must be `&mut Tx`",
            )),
        },
        _ => Err(syn::Error::new_spanned(
            &input.sig,
            "migration function must take `(&Context, &mut Tx)`",
        )),
    }
}
