//! C source analysis.
//!
//! Operates on preprocessed C. Comments and string literals are blanked
//! first, then function definitions at file scope become symbol defs and
//! referenced function symbols (call sites and prototypes) become symbol
//! deps. Fidelity beyond that is not required: unresolved references are
//! warned in aggregate downstream, never fatal.

use super::{Analysis, AnalysedFile};
use crate::{error::Result, sources::HashedFile};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_IDENT_PAREN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Za-z_]\w*)\s*\(").unwrap());

/// Keywords and builtins that look like calls.
const NON_SYMBOLS: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "case", "return", "goto", "sizeof", "typedef",
    "defined", "_alignof", "_static_assert",
];

pub(crate) fn analyse(hashed: &HashedFile, content: &str) -> Result<Analysis> {
    let code = blank_comments_and_strings(content);
    if code.trim().is_empty() {
        return Ok(Analysis::EmptySource(hashed.path.clone()));
    }

    let mut af = AnalysedFile::new(hashed.path.clone(), hashed.hash);
    let depth = brace_depths(&code);
    let bytes = code.as_bytes();

    for cap in RE_IDENT_PAREN.captures_iter(&code) {
        let ident = cap.get(1).unwrap();
        let name = ident.as_str();
        if NON_SYMBOLS.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        let open = cap.get(0).unwrap().end() - 1;
        let Some(close) = matching_paren(bytes, open) else { continue };
        match next_significant(bytes, close + 1) {
            // `name(args) {` at file scope is a definition
            Some(b'{') if depth[ident.start()] == 0 => af.add_symbol_def(name),
            // a prototype or a call site is a reference either way
            Some(_) | None => af.add_symbol_dep(name),
        }
    }

    // references satisfied within this file are not external deps
    af.symbol_deps = &af.symbol_deps - &af.symbol_defs;

    Ok(Analysis::Analysed(af))
}

/// Replaces comments, string literals and char literals with spaces,
/// keeping byte offsets stable.
fn blank_comments_and_strings(content: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Block,
        Line,
        Str,
        Char,
    }
    let mut state = State::Code;
    let bytes = content.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Code => match b {
                b'/' if next == Some(b'*') => {
                    state = State::Block;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                b'/' if next == Some(b'/') => {
                    state = State::Line;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                b'"' => {
                    state = State::Str;
                    out.push(b' ');
                }
                b'\'' => {
                    state = State::Char;
                    out.push(b' ');
                }
                _ => out.push(b),
            },
            State::Block => {
                if b == b'*' && next == Some(b'/') {
                    state = State::Code;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                out.push(if b == b'\n' { b'\n' } else { b' ' });
            }
            State::Line => {
                if b == b'\n' {
                    state = State::Code;
                    out.push(b'\n');
                } else {
                    out.push(b' ');
                }
            }
            State::Str | State::Char => {
                let quote = if state == State::Str { b'"' } else { b'\'' };
                if b == b'\\' {
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                if b == quote {
                    state = State::Code;
                }
                out.push(b' ');
            }
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Brace depth at every byte of comment-free code.
fn brace_depths(code: &str) -> Vec<u16> {
    let mut depths = Vec::with_capacity(code.len());
    let mut depth: u16 = 0;
    for b in code.bytes() {
        match b {
            b'{' => {
                depths.push(depth);
                depth = depth.saturating_add(1);
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                depths.push(depth);
            }
            _ => depths.push(depth),
        }
    }
    depths
}

fn matching_paren(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (idx, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn next_significant(bytes: &[u8], from: usize) -> Option<u8> {
    bytes[from..].iter().copied().find(|b| !b.is_ascii_whitespace())
}
