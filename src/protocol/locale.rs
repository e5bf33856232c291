//! `Accept-Language` quality lists.

/// Parse an `Accept-Language` value into language tags ordered by preference.
///
/// Entries default to `q=1`; entries whose quality falls outside `(0, 1]`
/// (or does not parse) are dropped, as is the `*` wildcard. The sort is
/// stable, so equally-weighted tags keep their original order.
pub fn parse_accept_language(value: &str) -> Vec<String> {
    let mut ranked: Vec<(f32, String)> = value
        .split(',')
        .filter_map(|clause| {
            let mut parts = clause.split(';');
            let tag = parts.next()?.trim();
            if tag.is_empty() || tag == "*" {
                return None;
            }
            let mut quality = 1.0f32;
            for param in parts {
                if let Some((key, q)) = param.split_once('=') {
                    if key.trim().eq_ignore_ascii_case("q") {
                        quality = q.trim().parse().unwrap_or(-1.0);
                    }
                }
            }
            (quality > 0.0 && quality <= 1.0).then(|| (quality, tag.to_string()))
        })
        .collect();

    ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
    ranked.into_iter().map(|(_, tag)| tag).collect()
}
