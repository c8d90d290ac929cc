//! Validation of an uploaded approved search-term list.
//!
//! The payload is the same shape the download produces: a JSON list of
//! `[search_string, count]` pairs. Browsers post it as a file field of a
//! `multipart/form-data` form.

use std::convert::Infallible;

use serde_json::Value;

use crate::CloudTerm;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub(crate) enum UploadError {
    #[error("The uploaded file is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("The JSON data must be a list of [search string, count] pairs")]
    NotAList,

    #[error("Row {row} must be a list of exactly two items: a search string and a count")]
    RowNotPair { row: usize },

    #[error("Row {row}: the count {value} is not a whole number")]
    CountNotInteger { row: usize, value: String },

    #[error("Row {row}: the search string must be non-empty text")]
    EmptySearchString { row: usize },

    #[error("No file was uploaded in the \"{0}\" field")]
    MissingFile(String),

    #[error("The upload could not be read: {0}")]
    Multipart(String),
}

/// Text of the form field `name` in a `multipart/form-data` body.
pub(crate) fn read_multipart_field(
    content_type: &str,
    body: &[u8],
    name: &str,
) -> Result<String, UploadError> {
    let boundary =
        multer::parse_boundary(content_type).map_err(|e| UploadError::Multipart(e.to_string()))?;
    let body = bytes::Bytes::copy_from_slice(body);
    let stream = futures::stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    futures::executor::block_on(find_field(&mut multipart, name))
        .map_err(|e| UploadError::Multipart(e.to_string()))?
        .ok_or_else(|| UploadError::MissingFile(name.to_string()))
}

async fn find_field(
    multipart: &mut multer::Multipart<'_>,
    name: &str,
) -> multer::Result<Option<String>> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(name) {
            return Ok(Some(field.text().await?));
        }
    }
    Ok(None)
}

/// Parse and validate an upload. Rows are numbered from 1 in errors.
pub(crate) fn parse_upload(text: &str) -> Result<Vec<CloudTerm>, UploadError> {
    let data: Value =
        serde_json::from_str(text).map_err(|e| UploadError::InvalidJson(e.to_string()))?;
    let Value::Array(rows) = data else {
        return Err(UploadError::NotAList);
    };

    let mut terms = Vec::with_capacity(rows.len());
    for (index, row) in rows.iter().enumerate() {
        let row_number = index + 1;
        let pair = match row {
            Value::Array(items) if items.len() == 2 => items,
            _ => return Err(UploadError::RowNotPair { row: row_number }),
        };

        let count = parse_count(&pair[1]).ok_or_else(|| UploadError::CountNotInteger {
            row: row_number,
            value: pair[1].to_string(),
        })?;

        let search_string = match &pair[0] {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return Err(UploadError::EmptySearchString { row: row_number }),
        };

        terms.push(CloudTerm::new(search_string, count));
    }
    Ok(terms)
}

fn parse_count(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn accepts_pairs_with_numeric_or_string_counts() {
        let terms = parse_upload(r#"[["Health", 3], [" Statistics ", "12"]]"#).unwrap();
        assert_eq!(
            terms,
            vec![
                CloudTerm::new("Health", 3),
                CloudTerm::new("Statistics", 12),
            ]
        );
    }

    const BOUNDARY_TYPE: &str = "multipart/form-data; boundary=XyZ";

    fn multipart_body(field: &str, content: &str) -> String {
        format!(
            "--XyZ\r\n\
             Content-Disposition: form-data; name=\"note\"\r\n\r\n\
             ignored\r\n\
             --XyZ\r\n\
             Content-Disposition: form-data; name=\"{field}\"; filename=\"cloud.json\"\r\n\
             Content-Type: application/json\r\n\r\n\
             {content}\r\n\
             --XyZ--\r\n"
        )
    }

    #[test]
    fn reads_the_uploaded_file_field() {
        let body = multipart_body("searchcloud", r#"[["Health", 3]]"#);
        let text = read_multipart_field(BOUNDARY_TYPE, body.as_bytes(), "searchcloud").unwrap();
        assert_eq!(text, r#"[["Health", 3]]"#);
        assert_eq!(parse_upload(&text).unwrap(), vec![CloudTerm::new("Health", 3)]);
    }

    #[test]
    fn missing_file_field() {
        let body = multipart_body("other", "[]");
        assert_eq!(
            read_multipart_field(BOUNDARY_TYPE, body.as_bytes(), "searchcloud"),
            Err(UploadError::MissingFile("searchcloud".to_string()))
        );
    }

    #[test]
    fn multipart_without_boundary() {
        assert!(matches!(
            read_multipart_field("multipart/form-data", b"", "searchcloud"),
            Err(UploadError::Multipart(_))
        ));
    }

    #[test]
    fn empty_list_is_valid() {
        assert_eq!(parse_upload("[]").unwrap(), Vec::<CloudTerm>::new());
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(matches!(
            parse_upload("[[\"Health\", 3"),
            Err(UploadError::InvalidJson(_))
        ));
    }

    #[test]
    fn rejects_non_list() {
        assert_eq!(
            parse_upload(r#"{"Health": 3}"#),
            Err(UploadError::NotAList)
        );
    }

    #[test]
    fn rejects_rows_that_are_not_pairs() {
        assert_eq!(
            parse_upload(r#"[["Health", 3], ["Energy", 1, 2]]"#),
            Err(UploadError::RowNotPair { row: 2 })
        );
        assert_eq!(
            parse_upload(r#"["Health"]"#),
            Err(UploadError::RowNotPair { row: 1 })
        );
    }

    #[test]
    fn rejects_non_integer_counts() {
        assert_eq!(
            parse_upload(r#"[["Health", "many"]]"#),
            Err(UploadError::CountNotInteger {
                row: 1,
                value: "\"many\"".to_string()
            })
        );
        assert!(matches!(
            parse_upload(r#"[["Health", 2.5]]"#),
            Err(UploadError::CountNotInteger { row: 1, .. })
        ));
    }

    #[test]
    fn count_is_checked_before_search_string() {
        assert!(matches!(
            parse_upload(r#"[["", null]]"#),
            Err(UploadError::CountNotInteger { row: 1, .. })
        ));
    }

    #[test]
    fn rejects_blank_search_strings() {
        assert_eq!(
            parse_upload(r#"[["Health", 1], ["   ", 4]]"#),
            Err(UploadError::EmptySearchString { row: 2 })
        );
        assert_eq!(
            parse_upload(r#"[[42, 4]]"#),
            Err(UploadError::EmptySearchString { row: 1 })
        );
    }
}
