use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::{
    error_message, parse_timestamp, read_json, CmsClient, CmsError, CmsItem, FieldKind,
    FieldMap, FieldSpec, FieldValue, FieldViolation, ItemStatus, ItemSummary, Reference, Version,
};
use crate::richtext::Document;

pub const DEFAULT_BASE_URL: &str = "https://api.contentful.com";
pub const DEFAULT_LOCALE: &str = "en-US";
const ENVIRONMENT: &str = "master";
const CONTENT_TYPE: &str = "application/vnd.contentful.management.v1+json";

/// Contentful Content Management API, one space per connection.
#[derive(Clone)]
pub struct ContentfulClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    locale: String,
}

impl ContentfulClient {
    pub fn new(http: reqwest::Client, token: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            locale: locale.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, space: &str, path: &str) -> String {
        format!(
            "{}/spaces/{}/environments/{}/{}",
            self.base_url.trim_end_matches('/'),
            space,
            ENVIRONMENT,
            path
        )
    }

    async fn get_json(&self, url: String) -> Result<Value, CmsError> {
        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header("Content-Type", CONTENT_TYPE)
            .send()
            .await?;
        let (status, body) = read_json(resp).await?;
        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(error_from_response(status, &body))
        }
    }

    async fn content_type(&self, space: &str, id: &str) -> Result<Vec<FieldSpec>, CmsError> {
        let body = self.get_json(self.url(space, &format!("content_types/{}", id))).await?;
        Ok(decode_schema(&body))
    }
}

#[async_trait]
impl CmsClient for ContentfulClient {
    async fn get_item(&self, space: &str, entry_id: &str) -> Result<CmsItem, CmsError> {
        debug!(space, entry = entry_id, "Fetching Contentful entry");
        let body = self.get_json(self.url(space, &format!("entries/{}", entry_id))).await?;

        let schema = match body["sys"]["contentType"]["sys"]["id"].as_str() {
            Some(ct) => self.content_type(space, ct).await?,
            None => Vec::new(),
        };
        decode_entry(&body, &self.locale, schema)
    }

    async fn update_item(
        &self,
        space: &str,
        base: &CmsItem,
        fields: &FieldMap,
    ) -> Result<CmsItem, CmsError> {
        let entry_id = base.id.as_str();
        let payload = encode_fields(fields, &base.raw_fields, &self.locale);
        debug!(space, entry = entry_id, version = %base.version, fields = fields.len(), "Updating Contentful entry");

        let resp = self
            .http
            .put(self.url(space, &format!("entries/{}", entry_id)))
            .bearer_auth(&self.token)
            .header("Content-Type", CONTENT_TYPE)
            .header("X-Contentful-Version", base.version.0.as_str())
            .body(payload.to_string())
            .send()
            .await?;
        let (status, body) = read_json(resp).await?;
        if !(200..300).contains(&status) {
            return Err(error_from_response(status, &body));
        }
        let item = decode_entry(&body, &self.locale, Vec::new())?;
        info!(space, entry = entry_id, version = %item.version, "Contentful entry updated");
        Ok(item)
    }

    async fn list_items(&self, space: &str) -> Result<Vec<ItemSummary>, CmsError> {
        let body = self
            .get_json(self.url(space, "entries?order=-sys.createdAt&limit=100"))
            .await?;
        let items = body["items"]
            .as_array()
            .ok_or_else(|| CmsError::Decode("entries response has no items".to_string()))?;
        Ok(items
            .iter()
            .map(|entry| summarize(entry, &self.locale))
            .collect())
    }
}

fn status_of(sys: &Value) -> ItemStatus {
    if sys["publishedVersion"].is_null() {
        ItemStatus::Draft
    } else {
        ItemStatus::Published
    }
}

fn summarize(entry: &Value, locale: &str) -> ItemSummary {
    let sys = &entry["sys"];
    ItemSummary {
        id: sys["id"].as_str().unwrap_or_default().to_string(),
        title: entry["fields"]["title"][locale]
            .as_str()
            .unwrap_or("(untitled)")
            .to_string(),
        status: status_of(sys),
        created_at: parse_timestamp(&sys["createdAt"]),
    }
}

fn decode_entry(body: &Value, locale: &str, schema: Vec<FieldSpec>) -> Result<CmsItem, CmsError> {
    let sys = &body["sys"];
    let id = sys["id"]
        .as_str()
        .ok_or_else(|| CmsError::Decode("entry has no sys.id".to_string()))?;
    let version = sys["version"]
        .as_u64()
        .ok_or_else(|| CmsError::Decode("entry has no sys.version".to_string()))?;

    let raw_fields = body["fields"].as_object().cloned().unwrap_or_default();
    let mut fields = FieldMap::new();
    for (name, localized) in &raw_fields {
        let Some(value) = localized.get(locale) else {
            continue;
        };
        let kind = schema.iter().find(|s| &s.id == name).map(|s| &s.kind);
        fields.insert(name.clone(), decode_value(value, kind));
    }

    Ok(CmsItem {
        id: id.to_string(),
        fields,
        version: Version(version.to_string()),
        status: status_of(sys),
        created_at: parse_timestamp(&sys["createdAt"]),
        updated_at: parse_timestamp(&sys["updatedAt"]),
        schema,
        raw_fields,
    })
}

fn decode_link(value: &Value) -> Option<Reference> {
    let sys = value.get("sys")?;
    if sys["type"] != "Link" {
        return None;
    }
    Some(Reference {
        link_type: sys["linkType"].as_str()?.to_string(),
        id: sys["id"].as_str()?.to_string(),
    })
}

fn decode_value(value: &Value, kind: Option<&FieldKind>) -> FieldValue {
    if matches!(kind, Some(FieldKind::RichText)) || value["nodeType"] == "document" {
        if let Ok(doc) = serde_json::from_value::<Document>(value.clone()) {
            return FieldValue::Document(doc);
        }
    }
    match value {
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Bool(b) => FieldValue::Flag(*b),
        Value::Object(_) => match decode_link(value) {
            Some(r) => FieldValue::Reference(r),
            None => FieldValue::Json(value.clone()),
        },
        Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_string) => {
            FieldValue::List(items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        }
        Value::Array(items) => {
            let links: Option<Vec<Reference>> = items.iter().map(decode_link).collect();
            match links {
                Some(refs) if !refs.is_empty() => FieldValue::References(refs),
                _ if items.is_empty() && matches!(kind, Some(FieldKind::Links { .. })) => {
                    FieldValue::References(Vec::new())
                }
                _ if items.is_empty() && matches!(kind, Some(FieldKind::Symbols)) => {
                    FieldValue::List(Vec::new())
                }
                _ => FieldValue::Json(value.clone()),
            }
        }
        other => FieldValue::Json(other.clone()),
    }
}

fn encode_link(r: &Reference) -> Value {
    json!({ "sys": { "type": "Link", "linkType": r.link_type, "id": r.id } })
}

fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(s) => Value::String(s.clone()),
        FieldValue::Flag(b) => Value::Bool(*b),
        FieldValue::Document(doc) => serde_json::to_value(doc).unwrap_or(Value::Null),
        FieldValue::List(items) => json!(items),
        FieldValue::Reference(r) => encode_link(r),
        FieldValue::References(refs) => Value::Array(refs.iter().map(encode_link).collect()),
        FieldValue::Json(v) => v.clone(),
    }
}

/// `{"fields": {name: {locale: value}}}`, starting from the stored payload
/// so other locales and unedited fields go back unchanged.
fn encode_fields(fields: &FieldMap, stored: &Map<String, Value>, locale: &str) -> Value {
    let mut out = stored.clone();
    for (name, value) in fields {
        let slot = out
            .entry(name.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(localized) = slot {
            localized.insert(locale.to_string(), encode_value(value));
        }
    }
    json!({ "fields": out })
}

fn decode_schema(body: &Value) -> Vec<FieldSpec> {
    let Some(fields) = body["fields"].as_array() else {
        return Vec::new();
    };
    fields
        .iter()
        .filter_map(|f| {
            let id = f["id"].as_str()?;
            let link_type = |v: &Value| v["linkType"].as_str().unwrap_or("Entry").to_string();
            let kind = match f["type"].as_str()? {
                "Symbol" => FieldKind::Text,
                "Text" => FieldKind::LongText,
                "RichText" => FieldKind::RichText,
                "Boolean" => FieldKind::Flag,
                "Integer" | "Number" => FieldKind::Number,
                "Date" => FieldKind::Date,
                "Link" => FieldKind::Link {
                    link_type: link_type(f),
                },
                "Array" => match f["items"]["type"].as_str() {
                    Some("Link") => FieldKind::Links {
                        link_type: link_type(&f["items"]),
                    },
                    _ => FieldKind::Symbols,
                },
                _ => FieldKind::Json,
            };
            Some(FieldSpec {
                id: id.to_string(),
                name: f["name"].as_str().unwrap_or(id).to_string(),
                kind,
                required: f["required"].as_bool().unwrap_or(false),
            })
        })
        .collect()
}

fn path_string(path: &Value) -> String {
    match path.as_array() {
        Some(parts) => parts
            .iter()
            .map(|p| match p {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("."),
        None => String::new(),
    }
}

fn error_from_response(status: u16, body: &Value) -> CmsError {
    let error_id = body["sys"]["id"].as_str().unwrap_or_default();
    let message = error_message(body, "request failed");

    if status == 409 || error_id == "VersionMismatch" {
        return CmsError::Conflict(message);
    }
    if status == 404 || error_id == "NotFound" {
        return CmsError::NotFound(message);
    }
    if let Some(errors) = body["details"]["errors"].as_array() {
        let violations = errors
            .iter()
            .map(|e| FieldViolation {
                path: path_string(&e["path"]),
                rule: e["name"].as_str().unwrap_or("invalid").to_string(),
                detail: match &e["details"] {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                },
            })
            .collect();
        return CmsError::Validation {
            message,
            violations,
        };
    }
    if status == 422 || error_id == "ValidationFailed" {
        return CmsError::Validation {
            message,
            violations: Vec::new(),
        };
    }
    CmsError::Http { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::stub::StubServer;
    use crate::richtext::{Block, TextRun};

    fn entry() -> Value {
        json!({
            "sys": {
                "id": "entry1",
                "version": 7,
                "createdAt": "2024-05-01T10:00:00.000Z",
                "updatedAt": "2024-05-02T10:00:00.000Z",
                "contentType": { "sys": { "id": "article" } }
            },
            "fields": {
                "title": { "en-US": "Hello" },
                "tags": { "en-US": ["rust", "cms"] },
                "featured": { "en-US": true },
                "heroImage": { "en-US": { "sys": { "type": "Link", "linkType": "Asset", "id": "img9" } } },
                "content": { "en-US": {
                    "nodeType": "document", "data": {},
                    "content": [{ "nodeType": "paragraph", "data": {}, "content": [
                        { "nodeType": "text", "value": "Body", "marks": [], "data": {} }
                    ]}]
                }},
                "other": { "de-DE": "Hallo" }
            }
        })
    }

    #[test]
    fn test_decode_entry_unwraps_locale() {
        let item = decode_entry(&entry(), "en-US", Vec::new()).unwrap();
        assert_eq!(item.id, "entry1");
        assert_eq!(item.version, Version("7".to_string()));
        assert_eq!(item.status, ItemStatus::Draft);
        assert_eq!(item.fields["title"], FieldValue::Text("Hello".to_string()));
        assert_eq!(
            item.fields["tags"],
            FieldValue::List(vec!["rust".to_string(), "cms".to_string()])
        );
        assert_eq!(item.fields["featured"], FieldValue::Flag(true));
        assert_eq!(
            item.fields["heroImage"],
            FieldValue::Reference(Reference {
                link_type: "Asset".to_string(),
                id: "img9".to_string()
            })
        );
        assert_eq!(
            item.fields["content"],
            FieldValue::Document(Document::new(vec![Block::Paragraph(vec![TextRun::plain("Body")])]))
        );
        assert!(!item.fields.contains_key("other"));
        assert_eq!(item.raw_fields["other"], json!({ "de-DE": "Hallo" }));
    }

    #[test]
    fn test_published_version_marks_published() {
        let mut body = entry();
        body["sys"]["publishedVersion"] = json!(6);
        assert_eq!(
            decode_entry(&body, "en-US", Vec::new()).unwrap().status,
            ItemStatus::Published
        );
    }

    #[test]
    fn test_encode_wraps_locale_and_links() {
        let mut fields = FieldMap::new();
        fields.insert("title".to_string(), FieldValue::Text("T".to_string()));
        fields.insert(
            "related".to_string(),
            FieldValue::References(vec![Reference {
                link_type: "Entry".to_string(),
                id: "e2".to_string(),
            }]),
        );
        let body = encode_fields(&fields, &Map::new(), "en-US");
        assert_eq!(body["fields"]["title"]["en-US"], "T");
        assert_eq!(
            body["fields"]["related"]["en-US"][0],
            json!({ "sys": { "type": "Link", "linkType": "Entry", "id": "e2" } })
        );
    }

    #[test]
    fn test_document_survives_encode_decode() {
        let item = decode_entry(&entry(), "en-US", Vec::new()).unwrap();
        let body = encode_fields(&item.fields, &item.raw_fields, "en-US");
        let value = decode_value(&body["fields"]["content"]["en-US"], None);
        assert_eq!(value, item.fields["content"]);
    }

    #[test]
    fn test_encode_keeps_other_locales_and_fields() {
        let mut body = entry();
        body["fields"]["title"] = json!({ "en-US": "Hello", "de-DE": "Hallo" });
        body["fields"]["teaser"] = json!({ "de-DE": "Nur Deutsch" });
        let item = decode_entry(&body, "en-US", Vec::new()).unwrap();

        let mut fields = item.fields.clone();
        fields.insert("title".to_string(), FieldValue::Text("Hello again".to_string()));
        let out = encode_fields(&fields, &item.raw_fields, "en-US");

        assert_eq!(
            out["fields"]["title"],
            json!({ "en-US": "Hello again", "de-DE": "Hallo" })
        );
        assert_eq!(out["fields"]["teaser"], json!({ "de-DE": "Nur Deutsch" }));
        assert_eq!(out["fields"]["other"], json!({ "de-DE": "Hallo" }));
    }

    #[test]
    fn test_decode_schema() {
        let schema = decode_schema(&json!({
            "fields": [
                { "id": "title", "name": "Title", "type": "Symbol", "required": true },
                { "id": "heroImage", "name": "Hero", "type": "Link", "linkType": "Asset" },
                { "id": "related", "name": "Related", "type": "Array",
                  "items": { "type": "Link", "linkType": "Entry" } },
                { "id": "tags", "name": "Tags", "type": "Array", "items": { "type": "Symbol" } },
                { "id": "content", "name": "Content", "type": "RichText" }
            ]
        }));
        assert_eq!(schema.len(), 5);
        assert!(schema[0].required);
        assert_eq!(
            schema[1].kind,
            FieldKind::Link {
                link_type: "Asset".to_string()
            }
        );
        assert_eq!(
            schema[2].kind,
            FieldKind::Links {
                link_type: "Entry".to_string()
            }
        );
        assert_eq!(schema[3].kind, FieldKind::Symbols);
        assert_eq!(schema[4].kind, FieldKind::RichText);
    }

    #[test]
    fn test_validation_errors_are_extracted() {
        let body = json!({
            "sys": { "type": "Error", "id": "ValidationFailed" },
            "message": "Validation error",
            "details": { "errors": [
                { "name": "required", "path": ["fields", "slug"], "details": "The property \"slug\" is required here" },
                { "name": "size", "path": ["fields", "tags", "en-US", 0], "max": 3 }
            ]}
        });
        match error_from_response(422, &body) {
            CmsError::Validation {
                message,
                violations,
            } => {
                assert_eq!(message, "Validation error");
                assert_eq!(violations[0].path, "fields.slug");
                assert_eq!(violations[0].rule, "required");
                assert_eq!(violations[1].path, "fields.tags.en-US.0");
                assert_eq!(violations[1].detail, "");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_version_mismatch_is_conflict() {
        let body = json!({ "sys": { "type": "Error", "id": "VersionMismatch" }, "message": "Version mismatch" });
        assert_eq!(
            error_from_response(409, &body),
            CmsError::Conflict("Version mismatch".to_string())
        );
        assert!(matches!(
            error_from_response(500, &json!({})),
            CmsError::Http { status: 500, .. }
        ));
    }

    fn client(server: &StubServer) -> ContentfulClient {
        ContentfulClient::new(reqwest::Client::new(), "cfpat-test", "en-US").with_base_url(&server.url)
    }

    #[tokio::test]
    async fn test_update_puts_with_version_header() {
        let mut updated = entry();
        updated["sys"]["version"] = json!(8);
        updated["fields"]["title"] = json!({ "en-US": "Hello again" });
        let server = StubServer::start(vec![(200, updated)]).await;

        let base = decode_entry(&entry(), "en-US", Vec::new()).unwrap();
        let mut fields = base.fields.clone();
        fields.insert("title".to_string(), FieldValue::Text("Hello again".to_string()));
        let item = client(&server).update_item("space1", &base, &fields).await.unwrap();
        assert_eq!(item.version, Version("8".to_string()));

        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        let put = &requests[0];
        assert_eq!(put.method, "PUT");
        assert_eq!(put.path, "/spaces/space1/environments/master/entries/entry1");
        assert_eq!(put.header("X-Contentful-Version"), Some("7"));
        assert_eq!(put.header("authorization"), Some("Bearer cfpat-test"));
        let sent = put.json();
        assert_eq!(sent["fields"]["title"]["en-US"], "Hello again");
        assert_eq!(sent["fields"]["other"], json!({ "de-DE": "Hallo" }));
    }

    #[tokio::test]
    async fn test_update_maps_http_errors() {
        let server = StubServer::start(vec![
            (
                409,
                json!({ "sys": { "type": "Error", "id": "VersionMismatch" }, "message": "Version mismatch" }),
            ),
            (
                422,
                json!({
                    "sys": { "type": "Error", "id": "ValidationFailed" },
                    "message": "Validation error",
                    "details": { "errors": [{ "name": "unique", "path": ["fields", "slug", "en-US"] }] }
                }),
            ),
        ])
        .await;
        let base = decode_entry(&entry(), "en-US", Vec::new()).unwrap();
        let cms = client(&server);

        let conflict = cms.update_item("space1", &base, &base.fields).await;
        assert!(matches!(conflict, Err(CmsError::Conflict(_))));

        match cms.update_item("space1", &base, &base.fields).await {
            Err(CmsError::Validation { violations, .. }) => {
                assert_eq!(violations[0].path, "fields.slug.en-US");
                assert_eq!(violations[0].rule, "unique");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(server.requests().len(), 2);
    }
}
