//! Remote data gateway for the document/relationship service.
//!
//! Every network exchange goes through one primitive, [`Transport::call`]
//! (plus [`Transport::download`] for binary exports). [`HttpTransport`] speaks
//! HTTP via `ureq`; [`crate::demo::DemoService`] answers the same contract
//! in-process. [`Gateway`] layers the typed operations on top and is the only
//! place wire payloads are parsed and normalised.

use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use miette::Diagnostic;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    BulkSaveOutcome, CandidateRelationship, CprtDocument, Document, Element, ElementRow,
    ExportFormat, ProvenanceDocument, RelationshipType, ValidatedRelationship,
};

// ---------------------------------------------------------------------------
// Client error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, Diagnostic, PartialEq, Eq)]
pub enum ClientError {
    #[error("request failed: {message}")]
    #[diagnostic(
        code(crosswalk::client::request),
        help("Is the document service running at the configured server URL?")
    )]
    Request {
        /// HTTP status, `None` for transport failures.
        status: Option<u16>,
        message: String,
    },

    #[error("unexpected response from server: {message}")]
    #[diagnostic(code(crosswalk::client::response), help("Server version mismatch?"))]
    Response { message: String },
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Request { status, .. } => *status,
            ClientError::Response { .. } => None,
        }
    }

    /// Build a request error from a status code and optional server detail.
    pub fn from_status(status: u16, status_text: &str, detail: Option<&str>) -> Self {
        let message = match detail {
            Some(detail) if !detail.is_empty() => format!("{status} {status_text}: {detail}"),
            _ => format!("{status} {status_text}"),
        };
        ClientError::Request {
            status: Some(status),
            message,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

// ---------------------------------------------------------------------------
// Transport contract
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// A service endpoint: unencoded path segments plus query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    segments: Vec<String>,
    query: Vec<(String, String)>,
}

impl Endpoint {
    pub fn new<S: AsRef<str>>(segments: &[S]) -> Self {
        Self {
            segments: segments.iter().map(|s| s.as_ref().to_string()).collect(),
            query: Vec::new(),
        }
    }

    pub fn with_query(mut self, key: &str, value: impl Into<String>) -> Self {
        self.query.push((key.to_string(), value.into()));
        self
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// Value of the first query pair named `key`.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Percent-encoded path, e.g. `/documents/NIST%20CSF/elements`.
    pub fn path(&self) -> String {
        let mut path = String::new();
        for segment in &self.segments {
            path.push('/');
            path.push_str(&encode_component(segment));
        }
        if path.is_empty() {
            path.push('/');
        }
        path
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())?;
        for (i, (k, v)) in self.query.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{sep}{}={}", encode_component(k), encode_component(v))?;
        }
        Ok(())
    }
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

/// A downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    /// Bare file name suggested by the server.
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Uniform request/response contract with the document service.
pub trait Transport: Send + Sync {
    /// Issue one JSON request. Non-success statuses fail with
    /// [`ClientError::Request`].
    fn call(
        &self,
        method: Method,
        endpoint: &Endpoint,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<serde_json::Value>;

    /// Fetch a binary file (GET).
    fn download(&self, endpoint: &Endpoint) -> ClientResult<Download>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn call(
        &self,
        method: Method,
        endpoint: &Endpoint,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<serde_json::Value> {
        (**self).call(method, endpoint, body)
    }

    fn download(&self, endpoint: &Endpoint) -> ClientResult<Download> {
        (**self).download(endpoint)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn call(
        &self,
        method: Method,
        endpoint: &Endpoint,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<serde_json::Value> {
        (**self).call(method, endpoint, body)
    }

    fn download(&self, endpoint: &Endpoint) -> ClientResult<Download> {
        (**self).download(endpoint)
    }
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// HTTP transport bound to the service's base URL.
pub struct HttpTransport {
    base_url: String,
    http: ureq::Agent,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self::with_timeout(base_url, None)
    }

    /// Optional overall request timeout; `None` keeps the agent default.
    pub fn with_timeout(base_url: &str, timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: builder.build(),
        }
    }

    fn request(&self, method: Method, endpoint: &Endpoint) -> ureq::Request {
        let url = format!("{}{}", self.base_url, endpoint.path());
        let mut request = self.http.request(method.as_str(), &url);
        for (key, value) in endpoint.query() {
            request = request.query(key, value);
        }
        request
    }
}

/// Map a ureq failure onto [`ClientError::Request`], keeping the server's
/// `detail` text when the body carries one.
fn request_error(err: ureq::Error) -> ClientError {
    match err {
        ureq::Error::Status(code, response) => {
            let status_text = response.status_text().to_string();
            let detail = response
                .into_string()
                .ok()
                .and_then(|body| serde_json::from_str::<serde_json::Value>(&body).ok())
                .and_then(|json| json.get("detail").map(detail_text));
            ClientError::from_status(code, &status_text, detail.as_deref())
        }
        ureq::Error::Transport(transport) => ClientError::Request {
            status: None,
            message: transport.to_string(),
        },
    }
}

fn detail_text(detail: &serde_json::Value) -> String {
    match detail {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl Transport for HttpTransport {
    fn call(
        &self,
        method: Method,
        endpoint: &Endpoint,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<serde_json::Value> {
        let request = self.request(method, endpoint);
        let resp = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        }
        .map_err(request_error)?;
        resp.into_json().map_err(|e| ClientError::Response {
            message: format!("failed to parse JSON: {e}"),
        })
    }

    fn download(&self, endpoint: &Endpoint) -> ClientResult<Download> {
        let resp = self
            .request(Method::Get, endpoint)
            .call()
            .map_err(request_error)?;
        let filename = resp
            .header("Content-Disposition")
            .and_then(content_disposition_filename)
            .unwrap_or_default();
        let content_type = Some(resp.content_type().to_string());
        let mut bytes = Vec::new();
        resp.into_reader()
            .read_to_end(&mut bytes)
            .map_err(|e| ClientError::Response {
                message: format!("failed to read download body: {e}"),
            })?;
        Ok(Download {
            filename,
            content_type,
            bytes,
        })
    }
}

/// Extract the `filename=` parameter of a `Content-Disposition` header.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    header.split(';').map(str::trim).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let value = value.trim().trim_matches('"').trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Typed operations over a [`Transport`].
pub struct Gateway {
    transport: Box<dyn Transport>,
}

#[derive(Deserialize)]
struct DocumentsResp {
    #[serde(default)]
    documents: Vec<Document>,
}

#[derive(Deserialize)]
struct ElementsResp {
    #[serde(default)]
    elements: Vec<ElementRow>,
}

#[derive(Deserialize)]
struct DocumentIdResp {
    document_id: i64,
}

#[derive(Serialize)]
struct ProvenanceReq<'a> {
    target_doc_identifier: &'a str,
    source_doc_identifier: &'a str,
}

#[derive(Serialize)]
struct BulkReq<'a> {
    provenance_doc_id: i64,
    relationships: &'a [ValidatedRelationship],
}

impl Gateway {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Box::new(transport),
        }
    }

    /// Gateway speaking HTTP to `base_url`.
    pub fn http(base_url: &str, timeout: Option<Duration>) -> Self {
        Self::new(HttpTransport::with_timeout(base_url, timeout))
    }

    fn call_as<R: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: Endpoint,
        body: Option<serde_json::Value>,
    ) -> ClientResult<R> {
        let result = self
            .transport
            .call(method, &endpoint, body.as_ref())
            .and_then(|value| {
                serde_json::from_value(value).map_err(|e| ClientError::Response {
                    message: format!("{} {endpoint}: {e}", method.as_str()),
                })
            });
        match &result {
            Ok(_) => tracing::debug!(method = method.as_str(), %endpoint, "request ok"),
            Err(e) => tracing::warn!(method = method.as_str(), %endpoint, error = %e, "request failed"),
        }
        result
    }

    fn to_body<B: Serialize>(body: &B) -> ClientResult<serde_json::Value> {
        serde_json::to_value(body).map_err(|e| ClientError::Response {
            message: format!("failed to encode request body: {e}"),
        })
    }

    // -----------------------------------------------------------------------
    // Documents
    // -----------------------------------------------------------------------

    pub fn list_documents(&self) -> ClientResult<Vec<Document>> {
        let resp: DocumentsResp =
            self.call_as(Method::Get, Endpoint::new(&["documents"]), None)?;
        Ok(resp.documents)
    }

    /// The full CPRT bundle for one document.
    pub fn get_document(&self, doc_identifier: &str) -> ClientResult<CprtDocument> {
        self.call_as(
            Method::Get,
            Endpoint::new(&["getDocument"]).with_query("document_identifier", doc_identifier),
            None,
        )
    }

    /// Relationship-type catalog, read from the first document only.
    ///
    /// The service keeps one global type table, so every document reports the
    /// same list; asking one is enough.
    pub fn relationship_types(&self, documents: &[Document]) -> ClientResult<Vec<RelationshipType>> {
        let Some(first) = documents.first() else {
            return Ok(Vec::new());
        };
        Ok(self.get_document(&first.doc_identifier)?.relationship_types)
    }

    /// Elements of `doc_identifier`, optionally filtered by `search`.
    pub fn list_elements(
        &self,
        doc_identifier: &str,
        search: Option<&str>,
    ) -> ClientResult<Vec<Element>> {
        let mut endpoint = Endpoint::new(&["documents", doc_identifier, "elements"]);
        if let Some(term) = search.map(str::trim).filter(|t| !t.is_empty()) {
            endpoint = endpoint.with_query("search", term);
        }
        let resp: ElementsResp = self.call_as(Method::Get, endpoint, None)?;
        Ok(resp
            .elements
            .into_iter()
            .map(|row| Element::from_row(doc_identifier, row))
            .collect())
    }

    pub fn resolve_document_id(&self, doc_identifier: &str) -> ClientResult<i64> {
        let resp: DocumentIdResp = self.call_as(
            Method::Get,
            Endpoint::new(&["documents", doc_identifier, "id"]),
            None,
        )?;
        Ok(resp.document_id)
    }

    // -----------------------------------------------------------------------
    // Relationships
    // -----------------------------------------------------------------------

    /// Ask the service to validate one candidate. A rejection surfaces as
    /// [`ClientError::Request`].
    pub fn validate_relationship(
        &self,
        candidate: &CandidateRelationship,
    ) -> ClientResult<ValidatedRelationship> {
        self.call_as(
            Method::Post,
            Endpoint::new(&["relationships"]),
            Some(Self::to_body(candidate)?),
        )
    }

    pub fn create_provenance_document(
        &self,
        target_doc_identifier: &str,
        source_doc_identifier: &str,
    ) -> ClientResult<ProvenanceDocument> {
        let body = Self::to_body(&ProvenanceReq {
            target_doc_identifier,
            source_doc_identifier,
        })?;
        self.call_as(
            Method::Post,
            Endpoint::new(&["provenance-documents"]),
            Some(body),
        )
    }

    pub fn bulk_save(
        &self,
        provenance_doc_id: i64,
        relationships: &[ValidatedRelationship],
    ) -> ClientResult<BulkSaveOutcome> {
        let body = Self::to_body(&BulkReq {
            provenance_doc_id,
            relationships,
        })?;
        self.call_as(
            Method::Post,
            Endpoint::new(&["relationships", "bulk"]),
            Some(body),
        )
    }

    /// Download persisted relationships, optionally restricted to a
    /// comma-joined list of provenance document identifiers.
    pub fn export(&self, format: ExportFormat, provenance_scope: Option<&str>) -> ClientResult<Download> {
        let mut endpoint =
            Endpoint::new(&["relationships", "export"]).with_query("format", format.as_str());
        if let Some(scope) = provenance_scope.filter(|s| !s.is_empty()) {
            endpoint = endpoint.with_query("provenance_docs", scope);
        }
        let mut download = self.transport.download(&endpoint).map_err(|e| {
            tracing::warn!(%endpoint, error = %e, "export failed");
            e
        })?;
        if download.filename.is_empty() {
            download.filename = format!("relationships.{}", format.extension());
        }
        tracing::info!(
            %endpoint,
            filename = %download.filename,
            bytes = download.bytes.len(),
            "export downloaded"
        );
        Ok(download)
    }
}
