use std::time::{Duration, SystemTime, UNIX_EPOCH};

use hoard::http::error::FieldError;
use hoard::http::field::{self, FieldValue, join_list, split_list};
use hoard::http::headers::Headers;

#[test]
fn test_lookup_is_case_insensitive() {
    let mut headers = Headers::new();
    headers.set("content-TYPE", "text/html");

    assert_eq!(headers.get("Content-Type"), Some("text/html"));
    assert_eq!(headers.get("CONTENT-type"), Some("text/html"));
    assert_eq!(headers.keys().collect::<Vec<_>>(), vec!["Content-Type"]);
}

#[test]
fn test_set_overwrites_last_value_only() {
    let mut headers = Headers::new();
    headers.append_at("Via", "a");
    headers.append_at("Via", "b");
    headers.set("via", "c");

    assert_eq!(headers.get_all("Via"), ["a".to_string(), "c".to_string()]);
    assert_eq!(headers.get("Via"), Some("c"));
}

#[test]
fn test_delete_removes_every_value() {
    let mut headers = Headers::new();
    headers.append_at("Set-Cookie", "a=1");
    headers.append_at("Set-Cookie", "b=2");
    headers.delete("set-cookie");
    headers.delete("Not-There");

    assert!(!headers.contains("Set-Cookie"));
    assert_eq!(headers.len_at("Set-Cookie"), 0);
    assert!(headers.is_empty());
}

#[test]
fn test_indexed_access() {
    let mut headers = Headers::new();
    headers.append_at("Warning", "one");
    headers.append_at("Warning", "two");
    headers.append_at("Warning", "three");

    assert_eq!(headers.get_at("Warning", 1), Some("two"));
    assert!(headers.set_at("Warning", 1, "deux"));
    assert_eq!(headers.delete_at("Warning", 0), Some("one".to_string()));
    assert_eq!(headers.get_all("Warning"), ["deux".to_string(), "three".to_string()]);
    assert_eq!(headers.len(), 2);
}

#[test]
fn test_iteration_is_sorted_by_key() {
    let headers: Headers = [("Zeta", "1"), ("alpha", "2"), ("Mid", "3"), ("alpha", "4")]
        .into_iter()
        .collect();

    let pairs: Vec<_> = headers.iter().collect();
    assert_eq!(
        pairs,
        vec![("Alpha", "2"), ("Alpha", "4"), ("Mid", "3"), ("Zeta", "1")]
    );
    assert_eq!(headers.to_string(), "Alpha: 2\r\nAlpha: 4\r\nMid: 3\r\nZeta: 1\r\n");
}

#[test]
fn test_clone_is_deep() {
    let mut original = Headers::new();
    original.set("Host", "a.example");
    let mut copy = original.clone();
    copy.set("Host", "b.example");

    assert_eq!(original.get("Host"), Some("a.example"));
    assert_eq!(copy.get("Host"), Some("b.example"));
}

#[test]
fn test_integer_field() {
    let mut headers = Headers::new();
    assert_eq!(headers.field(&field::CONTENT_LENGTH), Ok(None));

    headers.set_field(&field::CONTENT_LENGTH, Some(&42));
    assert_eq!(headers.get("Content-Length"), Some("42"));
    assert_eq!(headers.field(&field::CONTENT_LENGTH), Ok(Some(42)));

    headers.set_field(&field::CONTENT_LENGTH, None);
    assert!(!headers.contains("Content-Length"));
}

#[test]
fn test_invalid_integer_is_an_error() {
    let mut headers = Headers::new();
    headers.set("Content-Length", "lots");

    assert!(matches!(
        headers.field(&field::CONTENT_LENGTH),
        Err(FieldError::InvalidInteger { header: "Content-Length", .. })
    ));
}

#[test]
fn test_date_field() {
    let mut headers = Headers::new();
    headers.set("Date", "Sun, 06 Nov 1994 08:49:37 GMT");

    let expected = UNIX_EPOCH + Duration::from_secs(784_111_777);
    assert_eq!(headers.field(&field::DATE), Ok(Some(expected)));

    headers.set_field(&field::EXPIRES, Some(&expected));
    assert_eq!(headers.get("Expires"), Some("Sun, 06 Nov 1994 08:49:37 GMT"));

    headers.set("Last-Modified", "yesterday");
    assert!(matches!(
        headers.field(&field::LAST_MODIFIED),
        Err(FieldError::InvalidDate { .. })
    ));
}

#[test]
fn test_list_field_trims_and_unquotes() {
    let mut headers = Headers::new();
    headers.set("Cache-Control", " no-cache ,max-age=0, \"a, b\",, ");

    assert_eq!(
        headers.field(&field::CACHE_CONTROL),
        Ok(Some(vec![
            "no-cache".to_string(),
            "max-age=0".to_string(),
            "a, b".to_string()
        ]))
    );
}

#[test]
fn test_list_encoding_quotes_commas_and_quotes() {
    assert_eq!(join_list(&["gzip", "a,b", "say \"hi\""]), "gzip, \"a,b\", \"say \"\"hi\"\"\"");
    assert_eq!(
        split_list(&join_list(&["gzip", "a,b", "say \"hi\""])),
        vec!["gzip", "a,b", "say \"hi\""]
    );
}

#[test]
fn test_typed_access_uses_field_table() {
    let mut headers = Headers::new();
    headers.set("Age", "12");
    headers.set("Vary", "Accept, Cookie");
    headers.set("X-Custom", "1, 2");

    assert_eq!(headers.typed("age"), Ok(Some(FieldValue::Integer(12))));
    assert_eq!(
        headers.typed("Vary"),
        Ok(Some(FieldValue::List(vec!["Accept".to_string(), "Cookie".to_string()])))
    );
    assert_eq!(headers.typed("X-Custom"), Ok(Some(FieldValue::Text("1, 2".to_string()))));
    assert_eq!(headers.typed("Etag"), Ok(None));
}

#[test]
fn test_set_typed_checks_kind() {
    let mut headers = Headers::new();

    assert!(headers.set_typed("Max-Forwards", Some(FieldValue::Integer(3))).is_ok());
    assert_eq!(headers.get("Max-Forwards"), Some("3"));

    assert!(matches!(
        headers.set_typed("Max-Forwards", Some(FieldValue::Text("three".to_string()))),
        Err(FieldError::WrongKind { .. })
    ));

    let now = SystemTime::now();
    assert!(headers.set_typed("If-Modified-Since", Some(FieldValue::Date(now))).is_ok());
    assert!(headers.set_typed("Max-Forwards", None).is_ok());
    assert!(!headers.contains("Max-Forwards"));
}
