use proc_macro::{Delimiter, Group, TokenStream, TokenTree};

/// Splits a `TokenStream` into comma-separated arguments.
///
/// Only top-level commas separate arguments; commas inside delimited
/// groups belong to their group. Commas inside generic arguments or
/// closure parameters are not recognized, so such expressions must be
/// parenthesized.
pub(crate) fn split_args(input: TokenStream) -> Vec<Vec<TokenTree>> {
    let mut args = Vec::new();
    let mut current = Vec::new();

    for token in input {
        match &token {
            TokenTree::Punct(p) if p.as_char() == ',' => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(token),
        }
    }

    if !current.is_empty() {
        args.push(current);
    }

    args
}

/// Renders tokens back to source, letting `TokenStream` decide spacing.
pub(crate) fn tokens_to_string(tokens: &[TokenTree]) -> String {
    tokens.iter().cloned().collect::<TokenStream>().to_string()
}

/// Options accepted by `#[corio::main]` and `#[corio::test]`.
#[derive(Default)]
pub(crate) struct EntryArgs {
    /// Name to bind the reactor to inside the body.
    pub(crate) io: Option<String>,

    /// Prefer the `io_uring` backend.
    pub(crate) prefer_uring: bool,
}

/// Parses `ident` / `prefer_uring` attribute arguments.
pub(crate) fn parse_entry_args(attr: TokenStream) -> Result<EntryArgs, String> {
    let mut args = EntryArgs::default();

    for arg in split_args(attr) {
        let [TokenTree::Ident(ident)] = arg.as_slice() else {
            return Err(format!(
                "expected an identifier, found `{}`",
                tokens_to_string(&arg)
            ));
        };

        let name = ident.to_string();
        if name == "prefer_uring" {
            args.prefer_uring = true;
        } else if args.io.is_some() {
            return Err(format!("unexpected argument `{name}`"));
        } else {
            args.io = Some(name);
        }
    }

    Ok(args)
}

/// Wraps the body of an `async fn` so it runs to completion with
/// `corio::sync_wait`, optionally inside a fresh reactor.
///
/// The `async` keyword is removed from the signature; the rest of the
/// item is kept as is.
pub(crate) fn rewrite_entry(args: &EntryArgs, item: TokenStream) -> Result<Vec<TokenTree>, String> {
    let mut tokens: Vec<TokenTree> = item.into_iter().collect();

    let Some(async_pos) = tokens
        .iter()
        .position(|t| matches!(t, TokenTree::Ident(id) if id.to_string() == "async"))
    else {
        return Err("the function must be `async`".to_owned());
    };
    tokens.remove(async_pos);

    let Some(pos) = tokens
        .iter()
        .rposition(|t| matches!(t, TokenTree::Group(g) if g.delimiter() == Delimiter::Brace))
    else {
        return Err("expected a function body".to_owned());
    };

    let body = match &tokens[pos] {
        TokenTree::Group(g) => g.stream().to_string(),
        _ => unreachable!(),
    };

    let new_body = match &args.io {
        None => format!("{{ ::corio::sync_wait(async move {{ {body} }}) }}"),
        Some(name) => {
            let prefer = if args.prefer_uring {
                ".prefer(::corio::Backend::IoUring)"
            } else {
                ""
            };

            format!(
                "{{
                    let __corio_io = ::corio::AsyncIoBuilder::from_env(){prefer}
                        .build()
                        .expect(\"failed to start the corio reactor\");
                    let {name} = ::std::sync::Arc::clone(&__corio_io);
                    let __corio_out = ::corio::sync_wait(async move {{ {body} }});
                    __corio_io.shutdown();
                    __corio_out
                }}"
            )
        }
    };

    let stream = new_body
        .parse::<TokenStream>()
        .map_err(|err| format!("failed to expand entry point: {err}"))?;
    tokens[pos] = TokenTree::Group(Group::new(Delimiter::Brace, stream));

    Ok(tokens)
}

/// Emits `compile_error!` with `msg`.
pub(crate) fn compile_error(msg: &str) -> TokenStream {
    format!("::core::compile_error!({msg:?});")
        .parse()
        .unwrap_or_default()
}
