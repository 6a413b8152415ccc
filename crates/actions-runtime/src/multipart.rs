//! Multipart adapter.
//!
//! Splitting a multipart body is the transport's job: it attaches the parts
//! it decoded to the request as a [`RawParts`] extension. While building an
//! [`ActionContext`](crate::ActionContext), [`take_parts`] hands those parts
//! to the context for `multipart/*` requests and yields nothing for every
//! other content type. The request body itself is never consumed here.

use http::HeaderMap;
use indexmap::IndexMap;
use serde::Serialize;

use crate::context::InboundRequest;

/// One undecoded part of a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPart {
    name: Option<String>,
    filename: Option<String>,
    content_type: Option<String>,
    headers: HeaderMap,
    data: Vec<u8>,
}

impl RawPart {
    /// Builds a part named `name` carrying `data`.
    #[must_use]
    pub fn new(name: Option<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name,
            filename: None,
            content_type: None,
            headers: HeaderMap::new(),
            data: data.into(),
        }
    }

    /// Marks the part as a file upload.
    #[must_use]
    pub fn with_filename(mut self, filename: Option<String>) -> Self {
        self.filename = filename;
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: Option<String>) -> Self {
        self.content_type = content_type;
        self
    }

    #[must_use]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Form field name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Client-supplied filename; present only for file uploads.
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.filename.as_deref()
    }

    /// Declared content type of the part.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// All part headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw part content.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Request extension carrying the parts a transport decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParts(pub Vec<RawPart>);

/// An uploaded file extracted from a multipart body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePart {
    name: String,
    filename: String,
    content_type: Option<String>,
    size: usize,
    #[serde(skip)]
    data: Vec<u8>,
}

impl FilePart {
    /// Form field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client-supplied filename.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Declared content type.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// File content.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Field and file view over a set of parts.
///
/// Repeated field names keep every value in arrival order. Parts without a
/// name are skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MultipartData {
    fields: IndexMap<String, Vec<String>>,
    files: Vec<FilePart>,
}

impl MultipartData {
    /// Derives the normalised view from `parts`.
    #[must_use]
    pub fn from_parts(parts: &[RawPart]) -> Self {
        let mut data = Self::default();
        for part in parts {
            let Some(name) = part.name() else {
                continue;
            };
            match part.filename() {
                Some(filename) => data.files.push(FilePart {
                    name: name.to_owned(),
                    filename: filename.to_owned(),
                    content_type: part.content_type().map(str::to_owned),
                    size: part.data().len(),
                    data: part.data().to_vec(),
                }),
                None => data
                    .fields
                    .entry(name.to_owned())
                    .or_default()
                    .push(String::from_utf8_lossy(part.data()).into_owned()),
            }
        }
        data
    }

    /// First value of a text field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every value of a text field.
    #[must_use]
    pub fn field_values(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// All text fields, in arrival order.
    #[must_use]
    pub fn fields(&self) -> &IndexMap<String, Vec<String>> {
        &self.fields
    }

    /// First file uploaded under `name`.
    #[must_use]
    pub fn file(&self, name: &str) -> Option<&FilePart> {
        self.files.iter().find(|file| file.name == name)
    }

    /// All uploaded files, in arrival order.
    #[must_use]
    pub fn files(&self) -> &[FilePart] {
        &self.files
    }

    /// True when the body carried no named parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.files.is_empty()
    }
}

/// Whether a declared content type denotes a multipart body.
///
/// An absent content type is never multipart.
#[must_use]
pub fn is_multipart(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|value| {
        value
            .trim_start()
            .get(..9)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("multipart"))
    })
}

/// Takes the decoded parts off a multipart request.
///
/// Total: non-multipart requests and multipart requests the transport could
/// not decode both yield no parts. The body is left for the flow either way.
pub fn take_parts(content_type: Option<&str>, request: &mut InboundRequest) -> Vec<RawPart> {
    let decoded = request.extensions_mut().remove::<RawParts>();
    if !is_multipart(content_type) {
        return Vec::new();
    }
    decoded.map(|RawParts(parts)| parts).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use http::Request;
    use rstest::rstest;

    use super::*;
    use crate::context::RequestBody;

    fn sample_parts() -> Vec<RawPart> {
        vec![
            RawPart::new(Some("title".to_owned()), "Quarterly report"),
            RawPart::new(Some("tag".to_owned()), "finance"),
            RawPart::new(Some("tag".to_owned()), "q3"),
            RawPart::new(Some("attachment".to_owned()), "a,b\r\n1,2")
                .with_filename(Some("r.csv".to_owned()))
                .with_content_type(Some("text/csv".to_owned())),
            RawPart::new(None, "anonymous"),
        ]
    }

    fn request_with_parts(content_type: Option<&str>, body: &'static [u8]) -> InboundRequest {
        let mut builder = Request::post("/actions/upload").extension(RawParts(sample_parts()));
        if let Some(content_type) = content_type {
            builder = builder.header("Content-Type", content_type);
        }
        builder
            .body(Box::new(Cursor::new(body)) as RequestBody)
            .expect("request")
    }

    #[rstest]
    fn normalises_fields_and_files() {
        let data = MultipartData::from_parts(&sample_parts());
        assert_eq!(data.field("title"), Some("Quarterly report"));
        assert_eq!(data.field_values("tag"), ["finance", "q3"]);
        assert_eq!(data.fields().len(), 2);

        let file = data.file("attachment").expect("file part");
        assert_eq!(file.filename(), "r.csv");
        assert_eq!(file.content_type(), Some("text/csv"));
        assert_eq!(file.data(), b"a,b\r\n1,2");
    }

    #[rstest]
    #[case(Some("multipart/form-data; boundary=XyZ"), true)]
    #[case(Some("Multipart/Mixed; boundary=XyZ"), true)]
    #[case(Some("application/json"), false)]
    #[case(Some(""), false)]
    #[case(None, false)]
    fn recognises_multipart_content_types(#[case] content_type: Option<&str>, #[case] expected: bool) {
        assert_eq!(is_multipart(content_type), expected);
    }

    #[rstest]
    #[case(None)]
    #[case(Some("application/json"))]
    #[case(Some("text/plain"))]
    fn non_multipart_requests_yield_no_parts(#[case] content_type: Option<&str>) {
        let mut request = request_with_parts(content_type, b"payload");
        assert!(take_parts(content_type, &mut request).is_empty());
        assert!(request.extensions().get::<RawParts>().is_none());

        let mut body = String::new();
        request.into_body().read_to_string(&mut body).expect("read body");
        assert_eq!(body, "payload");
    }

    #[rstest]
    fn multipart_requests_hand_over_decoded_parts() {
        let content_type = Some("multipart/form-data; boundary=XyZ");
        let mut request = request_with_parts(content_type, b"--XyZ--");
        assert_eq!(take_parts(content_type, &mut request), sample_parts());

        let mut body = String::new();
        request.into_body().read_to_string(&mut body).expect("read body");
        assert_eq!(body, "--XyZ--");
    }

    #[rstest]
    fn undecoded_multipart_requests_yield_no_parts() {
        let content_type = Some("multipart/form-data; boundary=zzz");
        let mut request = Request::post("/actions/upload")
            .header("Content-Type", "multipart/form-data; boundary=zzz")
            .body(Box::new(std::io::empty()) as RequestBody)
            .expect("request");
        assert!(take_parts(content_type, &mut request).is_empty());
    }
}
