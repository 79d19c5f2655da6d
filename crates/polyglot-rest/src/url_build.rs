//! URL construction for controller REST calls.
//!
//! `<scheme>://<host>:<port>/rest/ns/<profile_number>/<segments...>?<query>`

use std::fmt::Write as _;

/// Build the controller REST URL for `profile_number`, joining `segments`
/// (URL-encoded, `None` entries omitted) and appending `query` pairs.
pub fn make_url(
    scheme: &str,
    host: &str,
    port: u16,
    profile_number: u32,
    segments: &[Option<&str>],
    query: &[(&str, &str)],
) -> String {
    let mut url = format!("{scheme}://{host}:{port}/rest/ns/{profile_number}");
    for seg in segments.iter().flatten() {
        url.push('/');
        url.push_str(&url::form_urlencoded::byte_serialize(seg.as_bytes()).collect::<String>());
    }
    if !query.is_empty() {
        url.push('?');
        let mut first = true;
        for (k, v) in query {
            if !first {
                url.push('&');
            }
            first = false;
            let _ = write!(
                url,
                "{}={}",
                url::form_urlencoded::byte_serialize(k.as_bytes()).collect::<String>(),
                url::form_urlencoded::byte_serialize(v.as_bytes()).collect::<String>(),
            );
        }
    }
    url
}

/// Decode a controller REST URL previously built by [`make_url`] back into
/// its path segments (URL-decoded) and query pairs, for the round-trip
/// property: encoding then decoding a path segment returns the original.
pub fn decode_url(full_url: &str) -> (Vec<String>, Vec<(String, String)>) {
    let parsed = match url::Url::parse(full_url) {
        Ok(u) => u,
        Err(_) => return (Vec::new(), Vec::new()),
    };
    let segments: Vec<String> = parsed
        .path_segments()
        .map(|it| it.map(str::to_string).collect())
        .unwrap_or_default();
    // Drop the fixed "rest", "ns", "<profile_number>" prefix.
    let segments = if segments.len() >= 3 {
        segments[3..].to_vec()
    } else {
        Vec::new()
    };
    let query: Vec<(String, String)> = parsed
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    (segments, query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn builds_expected_shape() {
        let url = make_url(
            "http",
            "127.0.0.1",
            8080,
            1,
            &[Some("nodes"), Some("n001_light"), Some("report"), Some("status"), Some("ST"), Some("80"), Some("51")],
            &[],
        );
        assert_eq!(url, "http://127.0.0.1:8080/rest/ns/1/nodes/n001_light/report/status/ST/80/51");
    }

    #[test]
    fn none_segments_are_omitted() {
        let url = make_url("http", "host", 80, 1, &[Some("a"), None, Some("b")], &[]);
        assert_eq!(url, "http://host:80/rest/ns/1/a/b");
    }

    proptest! {
        #[test]
        fn round_trip_segments_and_query(
            profnum in 1u32..999,
            seg_a in "[a-zA-Z0-9]{1,12}",
            seg_b in "[a-zA-Z0-9]{1,12}",
            key in "[a-zA-Z]{1,8}",
            val in "[a-zA-Z0-9 ]{0,12}",
        ) {
            let url = make_url(
                "http", "host.example", 8080, profnum,
                &[Some(seg_a.as_str()), Some(seg_b.as_str())],
                &[(key.as_str(), val.as_str())],
            );
            let (segments, query) = decode_url(&url);
            prop_assert_eq!(segments, vec![seg_a, seg_b]);
            prop_assert_eq!(query.len(), 1);
            prop_assert_eq!(&query[0].0, &key);
            prop_assert_eq!(&query[0].1, &val);
        }
    }
}
