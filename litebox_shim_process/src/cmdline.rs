// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Windows command-line codec
//!
//! A Windows process receives a single command-line string and splits it
//! itself (`CommandLineToArgvW` / the CRT startup code). Whatever builds a
//! command line for a child must therefore use the exact inverse of that
//! splitting algorithm, or argument boundaries are corrupted.
//!
//! Quoting rules produced by [`build_command_line`]:
//! - an argument that is empty or contains a space or tab is wrapped in `"`
//! - an embedded `"` is written as `\"`, and every backslash immediately
//!   preceding it is doubled, giving an odd run of backslashes
//! - backslashes immediately preceding a closing `"` are doubled, giving an
//!   even run of backslashes
//! - any other backslash is copied as is

/// Build a command line from an argument list.
///
/// [`parse_command_line`] maps the result back to exactly `args` for any list
/// not containing NUL characters.
pub fn build_command_line<S: AsRef<str>>(args: &[S]) -> String {
    let capacity = args.iter().map(|a| 3 + 2 * a.as_ref().len()).sum();
    let mut line = String::with_capacity(capacity);

    for (index, arg) in args.iter().enumerate() {
        if index > 0 {
            line.push(' ');
        }
        append_argument(&mut line, arg.as_ref());
    }
    line
}

/// Append a single quoted/escaped argument to `line`
fn append_argument(line: &mut String, arg: &str) {
    let has_space = arg.is_empty() || arg.contains([' ', '\t']);
    let has_quote = arg.contains('"');

    if !has_space && !has_quote {
        line.push_str(arg);
        return;
    }

    if has_space {
        line.push('"');
    }

    let mut backslashes = 0usize;
    for c in arg.chars() {
        match c {
            '\\' => backslashes += 1,
            '"' => {
                // Double the pending run and add one to escape the quote itself
                push_backslashes(line, backslashes + 1);
                backslashes = 0;
            }
            _ => backslashes = 0,
        }
        line.push(c);
    }

    if has_space {
        // The closing quote must not be escaped by a trailing run
        push_backslashes(line, backslashes);
        line.push('"');
    }
}

fn push_backslashes(line: &mut String, count: usize) {
    for _ in 0..count {
        line.push('\\');
    }
}

/// Parse a Windows command-line string into a vector of argument strings.
///
/// Implements the standard Windows command-line parsing algorithm:
/// - Unquoted space/tab separates arguments
/// - `2n` backslashes followed by `"` → `n` backslashes + starts/ends quoted section
/// - `2n+1` backslashes followed by `"` → `n` backslashes + literal `"`
/// - Backslashes not followed by `"` are treated literally
/// - A quoted section with nothing in it (`""`) still produces an argument
pub fn parse_command_line(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    // Distinguishes an empty quoted argument from no argument at all
    let mut in_arg = false;
    let mut in_quotes = false;
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            let bs_start = i;
            while i < chars.len() && chars[i] == '\\' {
                i += 1;
            }
            let num_bs = i - bs_start;
            in_arg = true;
            if i < chars.len() && chars[i] == '"' {
                push_backslashes_into(&mut current, num_bs / 2);
                if num_bs % 2 == 1 {
                    current.push('"');
                } else {
                    in_quotes = !in_quotes;
                }
                i += 1;
            } else {
                push_backslashes_into(&mut current, num_bs);
            }
        } else if c == '"' {
            in_quotes = !in_quotes;
            in_arg = true;
            i += 1;
        } else if (c == ' ' || c == '\t') && !in_quotes {
            if in_arg {
                args.push(core::mem::take(&mut current));
                in_arg = false;
            }
            while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t') {
                i += 1;
            }
        } else {
            current.push(c);
            in_arg = true;
            i += 1;
        }
    }
    if in_arg {
        args.push(current);
    }
    args
}

fn push_backslashes_into(current: &mut String, count: usize) {
    for _ in 0..count {
        current.push('\\');
    }
}

/// Encode a string as a NUL-terminated UTF-16 buffer
pub fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(core::iter::once(0)).collect()
}

/// Decode a UTF-16 buffer up to (not including) the first NUL
pub fn from_wide(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    String::from_utf16_lossy(&wide[..len])
}

/// Parse a wide (UTF-16) command line, stopping at the first NUL
pub fn parse_command_line_w(wide: &[u16]) -> Vec<String> {
    parse_command_line(&from_wide(wide))
}
