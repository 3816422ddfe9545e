//! Delimiter-joined list values and the comparison policy for their tokens.
//!
//! Tokens compare with ASCII case folding. The policy is fixed so duplicate
//! detection does not depend on the locale of the host.

/// Separator between the tokens of a list-valued variable.
pub const DELIMITER: char = ';';

/// Split a stored value into its tokens, in stored order.
pub fn split_tokens(value: &str) -> impl Iterator<Item = &str> {
    value.split(DELIMITER)
}

/// True if `a` and `b` are the same token under ASCII case folding.
pub fn tokens_equal(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// True if any token of `value` equals `token`.
pub fn contains_token(value: &str, token: &str) -> bool {
    split_tokens(value).any(|existing| tokens_equal(existing, token))
}

/// Append `token` at the end of `value`, keeping existing tokens in order.
pub fn join_token(value: &str, token: &str) -> String {
    let mut joined = String::with_capacity(value.len() + token.len() + 1);
    joined.push_str(value);
    joined.push(DELIMITER);
    joined.push_str(token);
    joined
}
