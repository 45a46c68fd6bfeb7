//! The `#[traced]` attribute used throughout herald.
//!
//! ```ignore
//! #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "us"))]
//! pub fn check(&self, key: &str) -> bool { .. }
//! ```
//!
//! A `trace` event marks entry to the function and another marks exit, when
//! the guard placed at the top of the body is dropped. With `timing(..)` the
//! exit event carries an `elapsed` field in the requested unit. With
//! `instrument(..)` the arguments are forwarded to `#[tracing::instrument(..)]`.

extern crate proc_macro;

use proc_macro2::TokenStream;
use quote::quote;
use syn::{
    ItemFn, LitStr, Stmt,
    parse::{Parse, ParseStream},
    parse_macro_input, parse_quote,
};

mod kw {
    syn::custom_keyword!(timing);
    syn::custom_keyword!(precision);
    syn::custom_keyword!(instrument);
}

/// Unit the elapsed time is reported in
#[derive(Clone, Copy, Default)]
enum Unit {
    Nanos,
    Micros,
    #[default]
    Millis,
    Seconds,
}

impl Unit {
    fn parse_lit(lit: &LitStr) -> syn::Result<Self> {
        match lit.value().as_str() {
            "ns" | "nanos" => Ok(Self::Nanos),
            "us" | "micros" => Ok(Self::Micros),
            "ms" | "millis" => Ok(Self::Millis),
            "s" | "secs" => Ok(Self::Seconds),
            other => Err(syn::Error::new(
                lit.span(),
                format!("unknown precision {other:?}, expected one of \"ns\", \"us\", \"ms\", \"s\""),
            )),
        }
    }

    /// Expression rendering `elapsed` (a `Duration`) as text with its unit
    fn render(self, elapsed: &TokenStream) -> TokenStream {
        match self {
            Self::Nanos => quote!(format!("{}ns", #elapsed.as_nanos())),
            Self::Micros => quote!(format!("{}us", #elapsed.as_micros())),
            Self::Millis => quote!(format!("{}ms", #elapsed.as_millis())),
            Self::Seconds => quote!(format!("{:.3}s", #elapsed.as_secs_f64())),
        }
    }
}

#[derive(Default)]
struct Args {
    timing: Option<Unit>,
    instrument: Option<TokenStream>,
}

impl Args {
    fn parse_timing(input: ParseStream) -> syn::Result<Unit> {
        if !input.peek(syn::token::Paren) {
            return Ok(Unit::default());
        }

        let content;
        syn::parenthesized!(content in input);
        content.parse::<kw::precision>()?;
        content.parse::<syn::Token![=]>()?;
        Unit::parse_lit(&content.parse()?)
    }
}

impl Parse for Args {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let mut args = Self::default();

        while !input.is_empty() {
            let lookahead = input.lookahead1();

            if lookahead.peek(kw::timing) {
                let keyword = input.parse::<kw::timing>()?;
                if args.timing.is_some() {
                    return Err(syn::Error::new(keyword.span, "duplicate `timing` argument"));
                }
                args.timing = Some(Self::parse_timing(input)?);
            } else if lookahead.peek(kw::instrument) {
                let keyword = input.parse::<kw::instrument>()?;
                if args.instrument.is_some() {
                    return Err(syn::Error::new(keyword.span, "duplicate `instrument` argument"));
                }
                args.instrument = Some(if input.peek(syn::token::Paren) {
                    let content;
                    syn::parenthesized!(content in input);
                    content.parse()?
                } else {
                    TokenStream::new()
                });
            } else {
                return Err(lookahead.error());
            }

            if !input.is_empty() {
                input.parse::<syn::Token![,]>()?;
            }
        }

        Ok(args)
    }
}

/// Trace entry to and exit from the attributed function
///
/// The guard only holds an `Instant`, so `async fn` futures stay `Send`.
#[proc_macro_attribute]
pub fn traced(
    args: proc_macro::TokenStream,
    item: proc_macro::TokenStream,
) -> proc_macro::TokenStream {
    let args = parse_macro_input!(args as Args);
    let mut item_fn = parse_macro_input!(item as ItemFn);

    item_fn
        .attrs
        .push(parse_quote! { #[allow(clippy::items_after_statements)] });

    if let Some(fields) = &args.instrument {
        item_fn
            .attrs
            .push(parse_quote! { #[tracing::instrument(#fields)] });
    }

    let name = item_fn.sig.ident.to_string();
    let exit: TokenStream = match args.timing {
        None => quote! { tracing::trace!(function = #name, "exit"); },
        Some(unit) => {
            let elapsed = unit.render(&quote!(self.started.elapsed()));
            quote! {
                let elapsed = #elapsed;
                tracing::trace!(function = #name, %elapsed, "exit");
            }
        }
    };

    let guard: Vec<Stmt> = parse_quote! {
        struct __Traced {
            started: std::time::Instant,
        }

        impl std::ops::Drop for __Traced {
            fn drop(&mut self) {
                #exit
            }
        }

        tracing::trace!(function = #name, "enter");
        let __traced = __Traced {
            started: std::time::Instant::now(),
        };
    };

    item_fn.block.stmts.splice(0..0, guard);

    proc_macro::TokenStream::from(quote! { #item_fn })
}
