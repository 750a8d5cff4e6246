use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use super::{
    error_message, parse_timestamp, read_json, CmsClient, CmsError, CmsItem, FieldMap,
    FieldValue, FieldViolation, ItemStatus, ItemSummary, Version,
};

pub const DEFAULT_BASE_URL: &str = "https://api.webflow.com/v2";
const API_VERSION: &str = "1.0.0";

/// Webflow Data API v2, one collection per connection.
///
/// Webflow has no conditional update, so the concurrency token is the item's
/// `lastUpdated` timestamp: an update first re-reads the item and refuses to
/// write if that timestamp moved.
#[derive(Clone)]
pub struct WebflowClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl WebflowClient {
    pub fn new(http: reqwest::Client, token: impl Into<String>) -> Self {
        Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, collection: &str, path: &str) -> String {
        format!(
            "{}/collections/{}/items{}",
            self.base_url.trim_end_matches('/'),
            collection,
            path
        )
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header("accept-version", API_VERSION)
    }
}

#[async_trait]
impl CmsClient for WebflowClient {
    async fn get_item(&self, collection: &str, item_id: &str) -> Result<CmsItem, CmsError> {
        debug!(collection, item = item_id, "Fetching Webflow item");
        let resp = self
            .request(reqwest::Method::GET, self.url(collection, &format!("/{}", item_id)))
            .send()
            .await?;
        let (status, body) = read_json(resp).await?;
        if !(200..300).contains(&status) {
            return Err(error_from_response(status, &body));
        }
        decode_item(&body)
    }

    async fn update_item(
        &self,
        collection: &str,
        base: &CmsItem,
        fields: &FieldMap,
    ) -> Result<CmsItem, CmsError> {
        let item_id = base.id.as_str();
        let current = self.get_item(collection, item_id).await?;
        if current.version != base.version {
            warn!(collection, item = item_id, expected = %base.version, found = %current.version, "Webflow item moved");
            return Err(CmsError::Conflict(format!(
                "last updated {} but {} was loaded",
                current.version, base.version
            )));
        }

        debug!(collection, item = item_id, fields = fields.len(), "Updating Webflow item");
        let resp = self
            .request(reqwest::Method::PATCH, self.url(collection, &format!("/{}", item_id)))
            .json(&json!({ "fieldData": encode_fields(fields), "isDraft": true }))
            .send()
            .await?;
        let (status, body) = read_json(resp).await?;
        if !(200..300).contains(&status) {
            return Err(error_from_response(status, &body));
        }
        let item = decode_item(&body)?;
        info!(collection, item = item_id, "Webflow item saved as draft");
        Ok(item)
    }

    async fn list_items(&self, collection: &str) -> Result<Vec<ItemSummary>, CmsError> {
        let resp = self
            .request(reqwest::Method::GET, self.url(collection, ""))
            .send()
            .await?;
        let (status, body) = read_json(resp).await?;
        if !(200..300).contains(&status) {
            return Err(error_from_response(status, &body));
        }
        let items = body["items"]
            .as_array()
            .ok_or_else(|| CmsError::Decode("items response has no items".to_string()))?;
        debug!(collection, count = items.len(), "Listed Webflow items");
        Ok(items.iter().map(summarize).collect())
    }
}

fn status_of(item: &Value) -> ItemStatus {
    if item["isDraft"].as_bool().unwrap_or(false) {
        ItemStatus::Draft
    } else {
        ItemStatus::Published
    }
}

fn summarize(item: &Value) -> ItemSummary {
    ItemSummary {
        id: item["id"].as_str().unwrap_or_default().to_string(),
        title: item["fieldData"]["name"]
            .as_str()
            .unwrap_or("(untitled)")
            .to_string(),
        status: status_of(item),
        created_at: parse_timestamp(&item["createdOn"]),
    }
}

fn decode_value(value: &Value) -> FieldValue {
    match value {
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Bool(b) => FieldValue::Flag(*b),
        Value::Array(items) if items.iter().all(Value::is_string) => {
            FieldValue::List(items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        }
        other => FieldValue::Json(other.clone()),
    }
}

fn decode_item(body: &Value) -> Result<CmsItem, CmsError> {
    let id = body["id"]
        .as_str()
        .ok_or_else(|| CmsError::Decode("item has no id".to_string()))?;
    let version = body["lastUpdated"]
        .as_str()
        .ok_or_else(|| CmsError::Decode("item has no lastUpdated".to_string()))?;

    let raw_fields = body["fieldData"].as_object().cloned().unwrap_or_default();
    let fields = raw_fields
        .iter()
        .map(|(k, v)| (k.clone(), decode_value(v)))
        .collect();

    Ok(CmsItem {
        id: id.to_string(),
        fields,
        version: Version(version.to_string()),
        status: status_of(body),
        created_at: parse_timestamp(&body["createdOn"]),
        updated_at: parse_timestamp(&body["lastUpdated"]),
        schema: Vec::new(),
        raw_fields,
    })
}

/// Webflow has no structured rich text; documents and references are sent in
/// their nearest flat shape.
fn encode_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Text(s) => Value::String(s.clone()),
        FieldValue::Flag(b) => Value::Bool(*b),
        FieldValue::Document(doc) => Value::String(crate::richtext::decode_to_html(doc)),
        FieldValue::List(items) => json!(items),
        FieldValue::Reference(r) => Value::String(r.id.clone()),
        FieldValue::References(refs) => json!(refs.iter().map(|r| r.id.as_str()).collect::<Vec<_>>()),
        FieldValue::Json(v) => v.clone(),
    }
}

fn encode_fields(fields: &FieldMap) -> Value {
    Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), encode_value(v)))
            .collect::<Map<_, _>>(),
    )
}

fn error_from_response(status: u16, body: &Value) -> CmsError {
    let message = error_message(body, "request failed");
    match status {
        404 => CmsError::NotFound(message),
        409 => CmsError::Conflict(message),
        400 | 422 => {
            let rule = body["code"].as_str().unwrap_or("invalid").to_string();
            let violations = body["details"]
                .as_array()
                .map(|details| {
                    details
                        .iter()
                        .map(|d| FieldViolation {
                            path: d["param"].as_str().unwrap_or_default().to_string(),
                            rule: rule.clone(),
                            detail: d["description"].as_str().unwrap_or_default().to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default();
            CmsError::Validation {
                message,
                violations,
            }
        }
        _ => CmsError::Http { status, message },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::stub::StubServer;

    fn item_json() -> Value {
        json!({
            "id": "item1",
            "isDraft": true,
            "isArchived": false,
            "createdOn": "2024-01-10T08:00:00.000Z",
            "lastUpdated": "2024-01-12T09:30:00.000Z",
            "fieldData": {
                "name": "Post",
                "content": "<p>Body</p>",
                "is-this-a-featured-article": false,
                "related-posts": ["a", "b"],
                "preview-image": { "fileId": "f", "url": "https://x/y.png", "alt": null }
            }
        })
    }

    #[test]
    fn test_decode_item() {
        let item = decode_item(&item_json()).unwrap();
        assert_eq!(item.id, "item1");
        assert_eq!(item.status, ItemStatus::Draft);
        assert_eq!(item.version, Version("2024-01-12T09:30:00.000Z".to_string()));
        assert_eq!(item.fields["content"], FieldValue::Text("<p>Body</p>".to_string()));
        assert_eq!(item.fields["is-this-a-featured-article"], FieldValue::Flag(false));
        assert_eq!(
            item.fields["related-posts"],
            FieldValue::List(vec!["a".to_string(), "b".to_string()])
        );
        assert!(matches!(item.fields["preview-image"], FieldValue::Json(_)));
    }

    #[test]
    fn test_explicit_draft_flag_decides_status() {
        let mut body = item_json();
        body["isDraft"] = json!(false);
        // Same created and updated time must not imply a draft.
        body["lastUpdated"] = body["createdOn"].clone();
        assert_eq!(summarize(&body).status, ItemStatus::Published);
    }

    #[test]
    fn test_encode_preserves_untouched_values() {
        let item = decode_item(&item_json()).unwrap();
        let encoded = encode_fields(&item.fields);
        assert_eq!(encoded, item_json()["fieldData"]);
    }

    #[test]
    fn test_validation_details() {
        let body = json!({
            "code": "validation_error",
            "message": "Validation Error",
            "details": [{ "param": "slug", "description": "Unique value is already in database" }]
        });
        match error_from_response(400, &body) {
            CmsError::Validation { violations, .. } => {
                assert_eq!(violations.len(), 1);
                assert_eq!(violations[0].path, "slug");
                assert_eq!(violations[0].rule, "validation_error");
                assert_eq!(violations[0].detail, "Unique value is already in database");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(error_from_response(404, &json!({})), CmsError::NotFound(_)));
    }

    fn client(server: &StubServer) -> WebflowClient {
        WebflowClient::new(reqwest::Client::new(), "wf-test").with_base_url(&server.url)
    }

    #[tokio::test]
    async fn test_update_refuses_when_item_moved() {
        let mut moved = item_json();
        moved["lastUpdated"] = json!("2024-01-13T10:00:00.000Z");
        let server = StubServer::start(vec![(200, moved)]).await;

        let base = decode_item(&item_json()).unwrap();
        let result = client(&server).update_item("col1", &base, &base.fields).await;

        assert!(matches!(result, Err(CmsError::Conflict(_))));
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, "GET");
    }

    #[tokio::test]
    async fn test_update_sends_one_patch_as_draft() {
        let mut saved = item_json();
        saved["fieldData"]["name"] = json!("Renamed");
        saved["lastUpdated"] = json!("2024-01-14T10:00:00.000Z");
        let server = StubServer::start(vec![(200, item_json()), (200, saved)]).await;

        let base = decode_item(&item_json()).unwrap();
        let mut fields = base.fields.clone();
        fields.insert("name".to_string(), FieldValue::Text("Renamed".to_string()));
        let item = client(&server).update_item("col1", &base, &fields).await.unwrap();
        assert_eq!(item.version, Version("2024-01-14T10:00:00.000Z".to_string()));

        let requests = server.requests();
        let patches: Vec<_> = requests.iter().filter(|r| r.method == "PATCH").collect();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].path, "/collections/col1/items/item1");
        assert_eq!(patches[0].header("accept-version"), Some(API_VERSION));
        let body = patches[0].json();
        assert_eq!(body["isDraft"], json!(true));
        assert_eq!(body["fieldData"]["name"], "Renamed");
    }

    #[tokio::test]
    async fn test_update_maps_validation_response() {
        let server = StubServer::start(vec![
            (200, item_json()),
            (
                400,
                json!({
                    "code": "validation_error",
                    "message": "Validation Error",
                    "details": [{ "param": "slug", "description": "Unique value is already in database" }]
                }),
            ),
        ])
        .await;
        let base = decode_item(&item_json()).unwrap();
        match client(&server).update_item("col1", &base, &base.fields).await {
            Err(CmsError::Validation { violations, .. }) => assert_eq!(violations[0].path, "slug"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
