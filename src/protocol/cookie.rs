//! Cookie header grammar and `Set-Cookie` formatting.
//!
//! # Grammar
//! ```text
//! Cookie: [$Version="n";] name=value [; $Path=p] [; $Domain=d] [; name=value ...]
//! ```
//! - `$Version` applies to every cookie on the line
//! - each `name=value` starts a new cookie
//! - `$Path` / `$Domain` attach to the most recent cookie

use std::fmt::Write as _;

/// Name of the cookie carrying the servlet session id.
pub const SESSION_COOKIE_NAME: &str = "JSESSIONID";

/// A request or response cookie.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub version: u32,
    /// Seconds until expiry; negative means "until the browser closes".
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
}

impl Cookie {
    /// A version-0 session cookie.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            version: 0,
            max_age: -1,
            secure: false,
            http_only: false,
        }
    }

    /// Render as the value of a `Set-Cookie` header.
    pub fn to_set_cookie(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        if self.version > 0 {
            let _ = write!(out, "; Version={}", self.version);
        }
        if self.max_age >= 0 {
            let _ = write!(out, "; Max-Age={}", self.max_age);
            if self.max_age == 0 {
                out.push_str("; Expires=Thu, 01 Jan 1970 00:00:00 GMT");
            }
        }
        if let Some(domain) = &self.domain {
            let _ = write!(out, "; Domain={}", domain);
        }
        if let Some(path) = &self.path {
            let _ = write!(out, "; Path={}", path);
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out
    }
}

fn unquote(value: &str) -> &str {
    let v = value.trim();
    if v.len() >= 2 && v.starts_with('"') && v.ends_with('"') {
        &v[1..v.len() - 1]
    } else {
        v
    }
}

/// Split on `;` outside double quotes.
fn split_tokens(value: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    for (i, b) in value.bytes().enumerate() {
        match b {
            b'"' => quoted = !quoted,
            b';' if !quoted => {
                tokens.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    tokens.push(&value[start..]);
    tokens
}

/// Parse one `Cookie` header value, appending the cookies it carries.
pub fn parse_header(value: &str, out: &mut Vec<Cookie>) {
    let first = out.len();
    let mut version = 0u32;
    let mut current: Option<usize> = None;

    for token in split_tokens(value).into_iter().map(str::trim).filter(|t| !t.is_empty()) {
        let Some((name, raw)) = token.split_once('=') else {
            tracing::debug!(token = %token, "Ignoring cookie token without '='");
            continue;
        };
        let name = name.trim();
        let raw = unquote(raw);

        if name.eq_ignore_ascii_case("$Version") {
            version = raw.parse().unwrap_or(0);
        } else if name.eq_ignore_ascii_case("$Path") {
            if let Some(idx) = current {
                out[idx].path = Some(raw.to_string());
            }
        } else if name.eq_ignore_ascii_case("$Domain") {
            if let Some(idx) = current {
                out[idx].domain = Some(raw.to_string());
            }
        } else if name.starts_with('$') {
            // $Port and other RFC 2965 attributes are not tracked.
        } else {
            out.push(Cookie::new(name, raw));
            current = Some(out.len() - 1);
        }
    }

    for cookie in &mut out[first..] {
        cookie.version = version;
    }
}
