pub mod contentful;
pub mod listing;
pub mod pending;
pub mod webflow;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::richtext::{encode_from_html, Document};

pub use contentful::ContentfulClient;
pub use listing::{DraftFilter, ItemSummary, SortOrder};
pub use pending::PendingChanges;
pub use webflow::WebflowClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmsKind {
    Contentful,
    Webflow,
}

impl CmsKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CmsKind::Contentful => "contentful",
            CmsKind::Webflow => "webflow",
        }
    }

    /// Prompt metadata key paired with the field id that holds it.
    pub fn context_fields(self) -> &'static [(&'static str, &'static str)] {
        match self {
            CmsKind::Contentful => &[
                ("title", "title"),
                ("subtitle", "subtitle"),
                ("metaTitle", "metaTitle"),
                ("metaDescription", "metaDescription"),
                ("slug", "slug"),
                ("category", "category"),
                ("tags", "tags"),
            ],
            CmsKind::Webflow => &[
                ("title", "name"),
                ("subtitle", "subtitle"),
                ("metaTitle", "meta-title-seo"),
                ("metaDescription", "meta-description-seo"),
                ("slug", "slug"),
                ("category", "choose-category"),
                ("tags", "tags-2"),
            ],
        }
    }

    pub fn title_field(self) -> &'static str {
        match self {
            CmsKind::Contentful => "title",
            CmsKind::Webflow => "name",
        }
    }
}

impl fmt::Display for CmsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A link to another entry or asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub link_type: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Flag(bool),
    Document(Document),
    List(Vec<String>),
    Reference(Reference),
    References(Vec<Reference>),
    /// Anything the editor does not model; sent back unchanged.
    Json(Value),
}

impl FieldValue {
    /// Human readable rendering, used for prompts and previews.
    pub fn display_text(&self) -> String {
        match self {
            FieldValue::Text(s) => s.clone(),
            FieldValue::Flag(b) => b.to_string(),
            FieldValue::Document(doc) => doc
                .content
                .iter()
                .map(|block| block.plain_text())
                .collect::<Vec<_>>()
                .join("\n"),
            FieldValue::List(items) => items.join(", "),
            FieldValue::Reference(r) => r.id.clone(),
            FieldValue::References(refs) => refs
                .iter()
                .map(|r| r.id.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            FieldValue::Json(v) => v.to_string(),
        }
    }
}

pub type FieldMap = BTreeMap<String, FieldValue>;

/// Opaque optimistic-concurrency token for an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version(pub String);

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    Draft,
    Published,
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Draft => f.write_str("Draft"),
            ItemStatus::Published => f.write_str("Published"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    LongText,
    RichText,
    Flag,
    Number,
    Date,
    Symbols,
    Link { link_type: String },
    Links { link_type: String },
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub id: String,
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl FieldSpec {
    /// Interpret raw user input for this field. Link fields accept bare
    /// entry or asset ids and wrap them in a reference.
    pub fn coerce(&self, raw: &str) -> Result<FieldValue, FieldViolation> {
        let invalid = |detail: String| FieldViolation {
            path: self.id.clone(),
            rule: "invalid".to_string(),
            detail,
        };
        Ok(match &self.kind {
            FieldKind::Text | FieldKind::LongText | FieldKind::Date => FieldValue::Text(raw.to_string()),
            FieldKind::RichText => FieldValue::Document(encode_from_html(raw)),
            FieldKind::Flag => match raw.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => FieldValue::Flag(true),
                "false" | "no" | "0" => FieldValue::Flag(false),
                other => return Err(invalid(format!("`{}` is not true or false", other))),
            },
            FieldKind::Number => {
                let n: serde_json::Number = raw
                    .trim()
                    .parse()
                    .map_err(|_| invalid(format!("`{}` is not a number", raw.trim())))?;
                FieldValue::Json(Value::Number(n))
            }
            FieldKind::Symbols => FieldValue::List(split_list(raw)),
            FieldKind::Link { link_type } => {
                let id = raw.trim();
                if id.is_empty() {
                    return Err(invalid("a link needs an id".to_string()));
                }
                FieldValue::Reference(Reference {
                    link_type: link_type.clone(),
                    id: id.to_string(),
                })
            }
            FieldKind::Links { link_type } => FieldValue::References(
                split_list(raw)
                    .into_iter()
                    .map(|id| Reference {
                        link_type: link_type.clone(),
                        id,
                    })
                    .collect(),
            ),
            FieldKind::Json => FieldValue::Json(
                serde_json::from_str(raw).map_err(|e| invalid(format!("not valid JSON: {}", e)))?,
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CmsItem {
    pub id: String,
    pub fields: FieldMap,
    pub version: Version,
    pub status: ItemStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    /// Field definitions, when the CMS exposes them.
    pub schema: Vec<FieldSpec>,
    /// The field payload exactly as the CMS returned it, including locales
    /// and fields that `fields` leaves out. Updates are written over a copy.
    pub raw_fields: Map<String, Value>,
}

impl CmsItem {
    pub fn field_spec(&self, field: &str) -> Option<&FieldSpec> {
        self.schema.iter().find(|s| s.id == field)
    }

    /// Interpret raw input for `field`, using the schema when there is one
    /// and otherwise the shape of the current value.
    pub fn coerce(&self, field: &str, raw: &str) -> Result<FieldValue, CmsError> {
        if let Some(spec) = self.field_spec(field) {
            return spec.coerce(raw).map_err(|v| CmsError::Validation {
                message: format!("Invalid value for `{}`", field),
                violations: vec![v],
            });
        }
        let shape = match self.fields.get(field) {
            Some(FieldValue::Flag(_)) => FieldKind::Flag,
            Some(FieldValue::List(_)) => FieldKind::Symbols,
            Some(FieldValue::Document(_)) => FieldKind::RichText,
            _ => FieldKind::Text,
        };
        let spec = FieldSpec {
            id: field.to_string(),
            name: field.to_string(),
            kind: shape,
            required: false,
        };
        spec.coerce(raw).map_err(|v| CmsError::Validation {
            message: format!("Invalid value for `{}`", field),
            violations: vec![v],
        })
    }

    pub fn text(&self, field: &str) -> Option<String> {
        self.fields.get(field).map(FieldValue::display_text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    pub path: String,
    pub rule: String,
    pub detail: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.rule)?;
        if !self.detail.is_empty() {
            write!(f, " ({})", self.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CmsError {
    /// The CMS rejected field values. `violations` may be empty when the
    /// response carried no per-field detail.
    Validation {
        message: String,
        violations: Vec<FieldViolation>,
    },
    /// The item changed since its version token was read.
    Conflict(String),
    NotFound(String),
    Http { status: u16, message: String },
    Request(String),
    Decode(String),
}

impl fmt::Display for CmsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CmsError::Validation {
                message,
                violations,
            } => {
                write!(f, "Validation failed: {}", message)?;
                for v in violations {
                    write!(f, "\n- {}", v)?;
                }
                Ok(())
            }
            CmsError::Conflict(msg) => write!(
                f,
                "The item was changed elsewhere ({}). Reopen it and reapply your changes.",
                msg
            ),
            CmsError::NotFound(what) => write!(f, "Not found: {}", what),
            CmsError::Http { status, message } => write!(f, "CMS returned {}: {}", status, message),
            CmsError::Request(msg) => write!(f, "CMS request failed: {}", msg),
            CmsError::Decode(msg) => write!(f, "Unexpected CMS response: {}", msg),
        }
    }
}

impl std::error::Error for CmsError {}

impl From<reqwest::Error> for CmsError {
    fn from(e: reqwest::Error) -> Self {
        CmsError::Request(e.to_string())
    }
}

/// Read a response body as JSON. An empty body reads as `null`.
pub(crate) async fn read_json(resp: reqwest::Response) -> Result<(u16, Value), CmsError> {
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    if text.trim().is_empty() {
        return Ok((status, Value::Null));
    }
    let body = serde_json::from_str(&text)
        .map_err(|e| CmsError::Decode(format!("body is not JSON ({}): {}", status, e)))?;
    Ok((status, body))
}

pub(crate) fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

pub(crate) fn error_message(body: &Value, fallback: &str) -> String {
    body["message"]
        .as_str()
        .or_else(|| body["error"].as_str())
        .unwrap_or(fallback)
        .to_string()
}

/// Read and write access to one CMS account. `container` is the Contentful
/// space id or the Webflow collection id.
#[async_trait]
pub trait CmsClient: Send + Sync {
    async fn get_item(&self, container: &str, item_id: &str) -> Result<CmsItem, CmsError>;

    /// Write `fields` over `base` in one request guarded by `base.version`.
    async fn update_item(
        &self,
        container: &str,
        base: &CmsItem,
        fields: &FieldMap,
    ) -> Result<CmsItem, CmsError>;

    async fn list_items(&self, container: &str) -> Result<Vec<ItemSummary>, CmsError>;
}

#[cfg(test)]
pub(crate) mod stub {
    //! A local HTTP server that answers with scripted responses, one per
    //! connection, and records what it was sent.

    use std::sync::{Arc, Mutex};

    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Debug, Clone)]
    pub struct Recorded {
        pub method: String,
        pub path: String,
        pub headers: Vec<(String, String)>,
        pub body: String,
    }

    impl Recorded {
        pub fn header(&self, name: &str) -> Option<&str> {
            let name = name.to_ascii_lowercase();
            self.headers
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| v.as_str())
        }

        pub fn json(&self) -> Value {
            serde_json::from_str(&self.body).unwrap()
        }
    }

    pub struct StubServer {
        pub url: String,
        requests: Arc<Mutex<Vec<Recorded>>>,
    }

    impl StubServer {
        pub async fn start(responses: Vec<(u16, Value)>) -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let url = format!("http://{}", listener.local_addr().unwrap());
            let requests = Arc::new(Mutex::new(Vec::new()));
            let log = requests.clone();
            tokio::spawn(async move {
                for (status, body) in responses {
                    let Ok((mut socket, _)) = listener.accept().await else {
                        return;
                    };
                    let Some(request) = read_request(&mut socket).await else {
                        return;
                    };
                    log.lock().unwrap().push(request);
                    let body = body.to_string();
                    let reply = format!(
                        "HTTP/1.1 {} Stub\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = socket.write_all(reply.as_bytes()).await;
                    let _ = socket.shutdown().await;
                }
            });
            Self { url, requests }
        }

        pub fn requests(&self) -> Vec<Recorded> {
            self.requests.lock().unwrap().clone()
        }
    }

    async fn read_request(socket: &mut TcpStream) -> Option<Recorded> {
        let mut buf = Vec::new();
        let mut chunk = [0_u8; 4096];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                return None;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };

        let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
        let mut lines = head.split("\r\n");
        let mut start = lines.next()?.split_whitespace();
        let method = start.next()?.to_string();
        let path = start.next()?.to_string();
        let headers: Vec<(String, String)> = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        let length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .and_then(|(_, v)| v.parse::<usize>().ok())
            .unwrap_or(0);

        while buf.len() < head_end + length {
            let n = socket.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        let body = String::from_utf8_lossy(&buf[head_end..]).to_string();
        Some(Recorded {
            method,
            path,
            headers,
            body,
        })
    }
}
