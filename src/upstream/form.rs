use percent_encoding::percent_decode_str;

/// Split a raw `key=value&key=value` payload into pairs, percent-decoding the
/// values. Segments without `=` are dropped.
pub fn parse_form_encoded(raw: &str) -> Vec<(String, String)> {
    raw.split('&')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| {
            let value = percent_decode_str(v).decode_utf8_lossy().into_owned();
            (k.trim().to_string(), value)
        })
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::parse_form_encoded;

    #[test]
    fn decodes_percent_escapes_in_values() {
        let pairs = parse_form_encoded("user=7944&password=10-16-2025%40Swi");
        assert_eq!(
            pairs,
            vec![
                ("user".to_string(), "7944".to_string()),
                ("password".to_string(), "10-16-2025@Swi".to_string()),
            ]
        );
    }

    #[test]
    fn keeps_plus_and_broken_escapes_literal() {
        let pairs = parse_form_encoded("a=x+y&b=50%&c=%zz&junk");
        assert_eq!(pairs[0].1, "x+y");
        assert_eq!(pairs[1].1, "50%");
        assert_eq!(pairs[2].1, "%zz");
        assert_eq!(pairs.len(), 3);
    }

    #[test]
    fn invalid_utf8_escapes_are_replaced() {
        let pairs = parse_form_encoded("name=caf%C3%A9&raw=%FF");
        assert_eq!(pairs[0].1, "café");
        assert_eq!(pairs[1].1, "\u{fffd}");
    }

    #[test]
    fn value_may_contain_equals() {
        let pairs = parse_form_encoded("token=a=b");
        assert_eq!(pairs, vec![("token".to_string(), "a=b".to_string())]);
    }
}
