use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

// Everything outside the unreserved set is percent-encoded. Space is carved
// out and substituted with `+` afterwards, per the form-urlencoded
// convention.
const FORM_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b' ');

/// Percent-encodes `s` as a form-urlencoded token.
///
/// The string is encoded to UTF-8 bytes first, then every byte outside the
/// unreserved set is percent-encoded, with a literal space encoding to `+`.
/// This never fails.
pub fn url_encode(s: &str) -> String {
    utf8_percent_encode(s, FORM_ENCODE_SET).to_string().replace(' ', "+")
}

/// Makes `s` safe for a quoted `Content-Disposition` attribute value.
///
/// Embedded backslashes and double quotes are backslash-escaped, and every
/// codepoint above ASCII is written as a decimal numeric character reference
/// (`&#<codepoint>;`) so the header stays pure ASCII. This never fails.
pub fn quote_header_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());

    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ if ch.is_ascii() => out.push(ch),
            _ => out.push_str(&format!("&#{};", ch as u32)),
        }
    }

    out
}
