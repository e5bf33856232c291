//! Raw header line helpers.
//!
//! Headers are kept as `Name: value` strings in arrival order. Lookup is a
//! case-insensitive match on `name + ":"` and the first matching line wins.

/// Split a raw header line into trimmed name and value.
///
/// Returns `None` for lines without a colon.
pub fn split_line(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    Some((name.trim(), value.trim()))
}

/// Build the normalized raw form stored in header lists.
pub fn join_line(name: &str, value: &str) -> String {
    format!("{}: {}", name.trim(), value.trim())
}

/// Value of `line` if it is a header called `name`.
pub fn value_of<'a>(line: &'a str, name: &str) -> Option<&'a str> {
    let n = name.len();
    let bytes = line.as_bytes();
    if bytes.len() <= n || bytes[n] != b':' || !line.is_char_boundary(n) {
        return None;
    }
    if line[..n].eq_ignore_ascii_case(name) {
        Some(line[n + 1..].trim())
    } else {
        None
    }
}

/// First value of header `name` in `lines`.
pub fn find<'a>(lines: &'a [String], name: &str) -> Option<&'a str> {
    lines.iter().find_map(|line| value_of(line, name))
}

/// All values of header `name` in `lines`, in arrival order.
pub fn find_all<'a>(lines: &'a [String], name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
    lines.iter().filter_map(move |line| value_of(line, name))
}

/// Remove every line named `name`.
pub fn remove(lines: &mut Vec<String>, name: &str) {
    lines.retain(|line| value_of(line, name).is_none());
}

/// Whether a comma-separated token list (e.g. `Connection`) contains `token`.
pub fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn lookup_is_case_insensitive_and_first_wins() {
        let headers = lines(&["X-A: 1", "X-a: 2"]);
        assert_eq!(find(&headers, "x-a"), Some("1"));
        assert_eq!(find_all(&headers, "X-A").collect::<Vec<_>>(), vec!["1", "2"]);
    }

    #[test]
    fn lookup_requires_full_name() {
        let headers = lines(&["Content-Type: text/plain"]);
        assert_eq!(find(&headers, "Content"), None);
        assert_eq!(find(&headers, "content-type"), Some("text/plain"));
        assert_eq!(find(&headers, "Content-Type-Extra"), None);
    }

    #[test]
    fn split_and_join() {
        assert_eq!(split_line("Host :  example.com "), Some(("Host", "example.com")));
        assert_eq!(split_line("no colon here"), None);
        assert_eq!(join_line(" Host ", " a:1 "), "Host: a:1");
    }

    #[test]
    fn remove_and_tokens() {
        let mut headers = lines(&["Connection: close", "Date: x", "connection: keep-alive"]);
        remove(&mut headers, "Connection");
        assert_eq!(headers, lines(&["Date: x"]));
        assert!(has_token("keep-alive, Close", "close"));
        assert!(!has_token("keep-alive", "close"));
    }
}
