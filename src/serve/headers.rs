//! Header helpers shared by the router and the file server.

use axum::http::HeaderMap;
use axum::http::header::{ACCEPT_ENCODING, HeaderName, HeaderValue};
use chrono::{DateTime, NaiveDateTime, Utc};

/// Format a timestamp as an IMF-fixdate, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub(crate) fn http_date_value(time: DateTime<Utc>) -> Option<HeaderValue> {
    HeaderValue::try_from(http_date(time)).ok()
}

/// Parse an HTTP date in IMF-fixdate or the obsolete RFC 850 form.
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .map(|time| time.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%A, %d-%b-%y %H:%M:%S GMT")
                .ok()
                .map(|time| time.and_utc())
        })
}

pub(crate) fn header_date(headers: &HeaderMap, name: HeaderName) -> Option<DateTime<Utc>> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date)
}

/// Whether `Accept-Encoding` lists `coding` without refusing it (`q=0`).
pub fn accepts_encoding(headers: &HeaderMap, coding: &str) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|item| {
            let mut params = item.split(';');
            let name = params.next().unwrap_or_default().trim();
            name.eq_ignore_ascii_case(coding) && !params.any(is_zero_quality)
        })
}

fn is_zero_quality(param: &str) -> bool {
    let Some((key, value)) = param.split_once('=') else {
        return false;
    };
    key.trim().eq_ignore_ascii_case("q") && value.trim().parse::<f32>().is_ok_and(|q| q == 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(ACCEPT_ENCODING, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_accepts_encoding() {
        assert!(accepts_encoding(&accept(&["gzip, deflate, br"]), "deflate"));
        assert!(accepts_encoding(&accept(&["gzip", "DEFLATE;q=0.5"]), "deflate"));
        assert!(!accepts_encoding(&accept(&["gzip, br"]), "deflate"));
        assert!(!accepts_encoding(&accept(&["deflate;q=0"]), "deflate"));
        assert!(!accepts_encoding(&accept(&["x-deflate"]), "deflate"));
        assert!(!accepts_encoding(&HeaderMap::new(), "deflate"));
    }

    #[test]
    fn test_http_date_round_trip() {
        let time = DateTime::from_timestamp(784_111_777, 0).unwrap();
        assert_eq!(http_date(time), "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT"), Some(time));
        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), Some(time));
        assert_eq!(parse_http_date("yesterday"), None);
    }
}
