//! Procedural macros for `corio`.
//!
//! These are re-exported by the `corio` crate; depend on `corio` rather
//! than on this crate directly.

mod utils;

use proc_macro::{TokenStream, TokenTree};

/// Polls several futures concurrently and returns their outputs as a
/// tuple, in argument order, once all of them completed.
///
/// Must be used inside an `async` context.
///
/// ```rust,ignore
/// let (client, accepted) = corio::join!(io.connect(addr), io.accept(&server));
/// ```
#[proc_macro]
pub fn join(input: TokenStream) -> TokenStream {
    let args = utils::split_args(input);
    let count = args.len();

    if count == 0 {
        return "()".parse().unwrap_or_default();
    }

    let mut output = String::new();
    output.push_str("{\n");
    output.push_str("use ::std::future::Future as _;\n");

    for (i, expr_tokens) in args.iter().enumerate() {
        let idx = i + 1;
        let expr = utils::tokens_to_string(expr_tokens);
        output.push_str(&format!(
            "let mut __f{idx} = (::std::boxed::Box::pin({expr}), ::core::option::Option::None::<_>);\n"
        ));
    }

    output.push_str("::std::future::poll_fn(move |cx| {\n");
    output.push_str("    use ::std::task::Poll;\n");

    for i in 1..=count {
        output.push_str(&format!(
            "    if __f{i}.1.is_none() {{\n\
                    if let Poll::Ready(val) = __f{i}.0.as_mut().poll(cx) {{\n\
                        __f{i}.1 = ::core::option::Option::Some(val);\n\
                    }}\n\
                }}\n"
        ));
    }

    let all_done = (1..=count)
        .map(|i| format!("__f{i}.1.is_some()"))
        .collect::<Vec<_>>()
        .join(" && ");

    output.push_str(&format!("    if {all_done} {{\n"));
    output.push_str("        Poll::Ready((\n");

    for i in 1..=count {
        output.push_str(&format!("            __f{i}.1.take().unwrap(),\n"));
    }

    output.push_str("        ))\n");
    output.push_str("    } else {\n");
    output.push_str("        Poll::Pending\n");
    output.push_str("    }\n");
    output.push_str("}).await\n");
    output.push_str("}\n");

    output
        .parse::<TokenStream>()
        .unwrap_or_else(|err| utils::compile_error(&format!("join macro error: {err}")))
}

/// Runs an `async fn main` to completion on the calling thread.
///
/// An identifier argument binds a freshly built reactor
/// (`Arc<dyn corio::AsyncIo>`) under that name for the body, shut down
/// when the body returns. `prefer_uring` asks for the `io_uring` backend;
/// otherwise `CORIO_BACKEND` decides.
///
/// ```rust,ignore
/// #[corio::main(io)]
/// async fn main() {
///     let server = corio::net::ServerSocket::bind("127.0.0.1:0").unwrap();
///     let client = io.accept(&server).await;
/// }
/// ```
#[proc_macro_attribute]
pub fn main(attr: TokenStream, item: TokenStream) -> TokenStream {
    let tokens = utils::parse_entry_args(attr).and_then(|args| utils::rewrite_entry(&args, item));

    match tokens {
        Ok(tokens) => tokens.into_iter().collect(),
        Err(msg) => utils::compile_error(&msg),
    }
}

/// Like [`main`](macro@main), for `#[test]` functions.
///
/// ```rust,ignore
/// #[corio::test(io, prefer_uring)]
/// async fn echoes() {
///     assert!(io.schedule().await);
/// }
/// ```
#[proc_macro_attribute]
pub fn test(attr: TokenStream, item: TokenStream) -> TokenStream {
    let tokens = match utils::parse_entry_args(attr).and_then(|args| utils::rewrite_entry(&args, item)) {
        Ok(tokens) => tokens,
        Err(msg) => return utils::compile_error(&msg),
    };

    let test_attr: TokenStream = "#[test]".parse().unwrap_or_default();
    let mut result: Vec<TokenTree> = test_attr.into_iter().collect();
    result.extend(tokens);

    result.into_iter().collect()
}
