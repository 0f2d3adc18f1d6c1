//! Sanitizes request paths and titles into cache file names
//!
//! Every character a request path can contain maps to a deterministic,
//! filesystem-safe replacement, so the same path always lands in the same
//! cache file and two different paths never collide.

/// Readable replacement names for the special characters that show up in
/// request paths and resource titles. Anything not listed falls back to
/// hex-coded UTF-16 units.
const CHAR_NAMES: &[(char, &str)] = &[
    ('`', "tick"),
    ('~', "tilde"),
    ('!', "bang"),
    ('@', "at"),
    ('#', "hash"),
    ('$', "cash"),
    ('%', "percent"),
    ('^', "hat"),
    ('&', "and"),
    ('*', "start"),
    ('(', "lparen"),
    (')', "rparen"),
    ('-', "dash"),
    ('_', "sub"),
    ('=', "eq"),
    ('+', "plus"),
    ('[', "lsquare"),
    (']', "rsquare"),
    ('{', "lcurly"),
    ('}', "rcurly"),
    ('\\', "back"),
    ('|', "pipe"),
    (';', "semi"),
    (':', "colon"),
    ('\'', "apos"),
    ('"', "quote"),
    (',', "comma"),
    ('.', "dot"),
    ('<', "lt"),
    ('>', "gt"),
    ('/', "slash"),
    ('?', "q"),
];

/// Looks up the replacement name for a special character
fn char_name(c: char) -> Option<&'static str> {
    CHAR_NAMES
        .iter()
        .find(|(special, _)| *special == c)
        .map(|(_, name)| *name)
}

/// Sanitizes a request path into a cache key
///
/// Path separators become dots, so `/v1/users/me` and `/v1/users.me` map to
/// different files (`v1.users.me` vs `v1.users_dot_me`) while queries and
/// other punctuation become named or hex-coded segments.
///
/// # Arguments
/// * `path` - The request path, with or without a leading slash
///
/// # Returns
/// A file name (without extension) that is unique to the path
pub fn cache_key(path: &str) -> String {
    sanitize(path, true)
}

/// Sanitizes free text (e.g. a resource title) into a single file name
/// component. Unlike [`cache_key`], slashes do not survive as separators.
pub fn file_component(text: &str) -> String {
    sanitize(text, false)
}

fn sanitize(input: &str, allow_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else if c == '/' && allow_slash {
            out.push('.');
        } else if c == ' ' {
            out.push('-');
        } else if let Some(name) = char_name(c) {
            out.push('_');
            out.push_str(name);
            out.push('_');
        } else {
            // Outside the table: hex-code each UTF-16 unit, so an
            // astral-plane character becomes two segments
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                out.push_str(&format!("_-{:04x}_", *unit));
            }
        }
    }
    out
}
