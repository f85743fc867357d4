//! Static validation run over the token stream before a script is parsed
//! or executed.

use super::lexer::{Token, TokenKind};
use crate::domain::error::ScriptError;

/// Longest accepted script, in bytes.
pub const MAX_SOURCE_LEN: usize = 16 * 1024;

/// Identifiers that name host evaluation, reflection, or ambient objects.
pub const DENYLIST: &[&str] = &[
    "eval",
    "Function",
    "constructor",
    "__proto__",
    "prototype",
    "globalThis",
    "window",
    "global",
    "self",
    "process",
    "require",
    "import",
    "module",
    "exports",
    "this",
    "Reflect",
    "Proxy",
    "fetch",
    "setTimeout",
    "setInterval",
    "document",
    "XMLHttpRequest",
    "WebSocket",
];

/// Property names that reach into an object model when used as string keys.
const DENIED_KEYS: &[&str] = &["constructor", "__proto__", "prototype"];

pub fn check_source_len(source: &str) -> Result<(), ScriptError> {
    if source.len() > MAX_SOURCE_LEN {
        return Err(ScriptError::Rejected {
            construct: format!("script longer than {MAX_SOURCE_LEN} bytes"),
            position: MAX_SOURCE_LEN,
        });
    }
    Ok(())
}

pub fn check_tokens(tokens: &[Token]) -> Result<(), ScriptError> {
    for token in tokens {
        let denied = match &token.kind {
            TokenKind::Ident(name) => DENYLIST.contains(&name.as_str()),
            TokenKind::Str(s) => DENIED_KEYS.contains(&s.as_str()),
            _ => false,
        };
        if denied {
            let construct = match &token.kind {
                TokenKind::Ident(name) | TokenKind::Str(name) => name.clone(),
                _ => String::new(),
            };
            return Err(ScriptError::Rejected {
                construct,
                position: token.position,
            });
        }
    }
    Ok(())
}
