/// Split a `key=value&key=value` string into decoded pairs.
///
/// Accepts an optional leading `?` or `#` and parses the rest as
/// `application/x-www-form-urlencoded`, like a browser's `URLSearchParams`:
/// `+` is a space, invalid UTF-8 decodes lossily, pairs without `=` get an
/// empty value and empty segments are skipped.
pub fn parse_query(query: &str) -> Vec<(String, String)> {
    let query = query
        .strip_prefix('?')
        .or_else(|| query.strip_prefix('#'))
        .unwrap_or(query);

    form_urlencoded::parse(query.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// First value for `key` in already-parsed pairs.
pub fn first_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Percent-decode a single URL component.
///
/// Returns `None` when the decoded bytes are not valid UTF-8.
pub fn decode_component(raw: &str) -> Option<String> {
    urlencoding::decode(raw).ok().map(|s| s.into_owned())
}

/// Percent-encode a single URL component.
pub fn encode_component(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}
