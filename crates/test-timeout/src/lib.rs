//! Test attributes that fail a test which runs past its wall-clock budget
//! instead of letting it hang the whole suite.
//!
//! - `#[test_timeout::timeout]` / `#[test_timeout::timeout(5)]` for sync tests.
//! - `#[test_timeout::tokio_timeout_test]` for async tests on a current-thread
//!   runtime. Accepts a budget in seconds and/or `paused`, which starts the
//!   runtime with a paused clock so timer-driven code (backoff, expiry) runs
//!   instantly.

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::parse::Parser;
use syn::punctuated::Punctuated;
use syn::{parse_macro_input, Attribute, Expr, ExprLit, ItemFn, Lit, Token};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

struct TestArgs {
    timeout_secs: u64,
    paused: bool,
}

fn parse_args(attr: TokenStream) -> syn::Result<TestArgs> {
    let mut args = TestArgs {
        timeout_secs: DEFAULT_TIMEOUT_SECS,
        paused: false,
    };
    let exprs = Punctuated::<Expr, Token![,]>::parse_terminated.parse(attr)?;
    for expr in exprs {
        match &expr {
            Expr::Lit(ExprLit {
                lit: Lit::Int(lit), ..
            }) => {
                let secs: u64 = lit.base10_parse()?;
                if secs == 0 {
                    return Err(syn::Error::new_spanned(lit, "timeout must be greater than zero"));
                }
                args.timeout_secs = secs;
            }
            Expr::Path(path) if path.path.is_ident("paused") => args.paused = true,
            other => {
                return Err(syn::Error::new_spanned(
                    other,
                    "expected a timeout in seconds or `paused`",
                ))
            }
        }
    }
    Ok(args)
}

/// Wraps `body` (an expression producing the test result) in a watchdog
/// thread that reports back within `timeout_secs`.
fn watchdog(timeout_secs: u64, body: TokenStream2) -> TokenStream2 {
    quote! {
        let timeout_duration = std::time::Duration::from_secs(#timeout_secs);
        let (sender, receiver) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| { #body }));
            let _ = sender.send(result);
        });
        match receiver.recv_timeout(timeout_duration) {
            Ok(Ok(_)) => {}
            Ok(Err(payload)) => std::panic::resume_unwind(payload),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => panic!("test timed out"),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                panic!("test thread failed before reporting result")
            }
        }
    }
}

#[proc_macro_attribute]
pub fn tokio_timeout_test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match parse_args(attr) {
        Ok(args) => args,
        Err(err) => return err.to_compile_error().into(),
    };

    let ItemFn {
        attrs,
        vis,
        mut sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_none() {
        return syn::Error::new_spanned(
            &sig.ident,
            "tokio_timeout_test can only be applied to async functions",
        )
        .to_compile_error()
        .into();
    }
    sig.asyncness = None;

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_tokio_test_attribute(attr))
        .collect();

    let timeout = args.timeout_secs;
    // A paused clock auto-advances whenever the runtime idles, so an inner
    // tokio timeout would fire spuriously; only the watchdog applies there.
    let runtime_body = if args.paused {
        quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .start_paused(true)
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async move #block);
        }
    } else {
        quote! {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to build Tokio runtime");
            runtime.block_on(async {
                tokio::time::timeout(std::time::Duration::from_secs(#timeout), async move #block)
                    .await
                    .expect("test timed out");
            });
        }
    };
    let guarded = watchdog(timeout, runtime_body);

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            #guarded
        }
    })
}

#[proc_macro_attribute]
pub fn timeout(attr: TokenStream, item: TokenStream) -> TokenStream {
    let args = match parse_args(attr) {
        Ok(args) => args,
        Err(err) => return err.to_compile_error().into(),
    };
    if args.paused {
        return syn::Error::new(
            proc_macro2::Span::call_site(),
            "`paused` only applies to tokio_timeout_test",
        )
        .to_compile_error()
        .into();
    }

    let ItemFn {
        attrs,
        vis,
        sig,
        block,
    } = parse_macro_input!(item as ItemFn);

    if sig.asyncness.is_some() {
        return syn::Error::new_spanned(
            &sig.ident,
            "timeout attribute expects a synchronous test function",
        )
        .to_compile_error()
        .into();
    }

    let filtered_attrs: Vec<Attribute> = attrs
        .into_iter()
        .filter(|attr| !is_test_attribute(attr))
        .collect();

    let guarded = watchdog(args.timeout_secs, quote! { #block });

    TokenStream::from(quote! {
        #[test]
        #(#filtered_attrs)*
        #vis #sig {
            #guarded
        }
    })
}

fn is_tokio_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(first), Some(second), None)
            if first.ident == "tokio" && second.ident == "test"
    )
}

fn is_test_attribute(attr: &Attribute) -> bool {
    let mut segments = attr.path().segments.iter();
    matches!((segments.next(), segments.next()), (Some(first), None) if first.ident == "test")
}
