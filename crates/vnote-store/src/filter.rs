//! Builders for PocketBase filter expressions.
//!
//! Values are always emitted as double-quoted string literals so user data
//! cannot change the shape of the expression.

/// Quote a value as a filter string literal.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// `field = "value"`
pub fn eq(field: &str, value: &str) -> String {
    format!("{} = {}", field, quote(value))
}

/// `field != "value"`
pub fn neq(field: &str, value: &str) -> String {
    format!("{} != {}", field, quote(value))
}

/// Join expressions with `&&`, parenthesising each one.
pub fn and<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    parts
        .into_iter()
        .map(|p| format!("({})", p.as_ref()))
        .collect::<Vec<_>>()
        .join(" && ")
}
