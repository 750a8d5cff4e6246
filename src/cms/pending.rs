use tracing::{info, warn};

use super::{CmsClient, CmsError, CmsItem, FieldMap, FieldValue};

/// Field edits waiting to be published. Repeated edits to a field keep only
/// the latest value.
#[derive(Debug, Clone, Default)]
pub struct PendingChanges {
    fields: FieldMap,
}

impl PendingChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) {
        self.fields.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn is_dirty(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn discard(&mut self) {
        self.fields.clear();
    }

    /// The base fields overlaid with every pending value. `base` is not
    /// touched.
    pub fn merged(&self, base: &FieldMap) -> FieldMap {
        let mut merged = base.clone();
        merged.extend(self.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Snapshot a publish: the merged fields and the version they are based
    /// on. Nothing changes until the answer is passed to [`Self::settle`].
    pub fn prepare(&self, base: &CmsItem) -> Outgoing {
        Outgoing {
            base: base.clone(),
            fields: self.merged(&base.fields),
            staged: self.fields.clone(),
        }
    }

    /// Apply the CMS's answer to a prepared publish. On success `base`
    /// becomes the returned item and every pending value that went out is
    /// cleared; values staged after [`Self::prepare`] stay. On error both
    /// are left as they were.
    pub fn settle(
        &mut self,
        outgoing: Outgoing,
        answer: Result<CmsItem, CmsError>,
        base: &mut CmsItem,
    ) -> Result<FieldMap, CmsError> {
        match answer {
            Ok(mut updated) => {
                if updated.schema.is_empty() {
                    updated.schema = std::mem::take(&mut base.schema);
                }
                info!(
                    item = %base.id,
                    fields = outgoing.staged.len(),
                    version = %updated.version,
                    "Published"
                );
                *base = updated;
                for (field, sent) in &outgoing.staged {
                    if self.fields.get(field) == Some(sent) {
                        self.fields.remove(field);
                    }
                }
                Ok(outgoing.fields)
            }
            Err(e) => {
                warn!(item = %base.id, pending = self.fields.len(), error = %e, "Publish failed; keeping pending changes");
                Err(e)
            }
        }
    }
}

/// A publish on its way to the CMS: one update carrying the base fields
/// overlaid with every pending value, guarded by the base version.
#[derive(Debug, Clone)]
pub struct Outgoing {
    base: CmsItem,
    fields: FieldMap,
    staged: FieldMap,
}

impl Outgoing {
    /// Number of pending values this publish carries.
    pub fn staged(&self) -> usize {
        self.staged.len()
    }

    pub async fn send(&self, cms: &dyn CmsClient, container: &str) -> Result<CmsItem, CmsError> {
        cms.update_item(container, &self.base, &self.fields).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! An in-memory CMS that records update requests.

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::cms::*;

    #[derive(Default)]
    pub struct MemoryCms {
        pub items: Mutex<HashMap<String, CmsItem>>,
        pub updates: Mutex<Vec<(String, FieldMap, Version)>>,
        pub fail_with: Mutex<Option<CmsError>>,
    }

    impl MemoryCms {
        pub fn with_item(item: CmsItem) -> Self {
            let cms = Self::default();
            cms.items.lock().unwrap().insert(item.id.clone(), item);
            cms
        }

        pub fn fail_next(&self, error: CmsError) {
            *self.fail_with.lock().unwrap() = Some(error);
        }

        pub fn update_count(&self) -> usize {
            self.updates.lock().unwrap().len()
        }
    }

    pub fn item(id: &str, fields: &[(&str, &str)]) -> CmsItem {
        CmsItem {
            id: id.to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), FieldValue::Text(v.to_string())))
                .collect(),
            version: Version("1".to_string()),
            status: ItemStatus::Draft,
            created_at: None,
            updated_at: None,
            schema: Vec::new(),
            raw_fields: Default::default(),
        }
    }

    #[async_trait]
    impl CmsClient for MemoryCms {
        async fn get_item(&self, _container: &str, item_id: &str) -> Result<CmsItem, CmsError> {
            self.items
                .lock()
                .unwrap()
                .get(item_id)
                .cloned()
                .ok_or_else(|| CmsError::NotFound(item_id.to_string()))
        }

        async fn update_item(
            &self,
            _container: &str,
            base: &CmsItem,
            fields: &FieldMap,
        ) -> Result<CmsItem, CmsError> {
            let (item_id, version) = (base.id.as_str(), &base.version);
            self.updates
                .lock()
                .unwrap()
                .push((item_id.to_string(), fields.clone(), version.clone()));
            if let Some(e) = self.fail_with.lock().unwrap().take() {
                return Err(e);
            }
            let mut items = self.items.lock().unwrap();
            let stored = items
                .get_mut(item_id)
                .ok_or_else(|| CmsError::NotFound(item_id.to_string()))?;
            if &stored.version != version {
                return Err(CmsError::Conflict(format!("version {} is stale", version)));
            }
            let next: u64 = stored.version.0.parse().unwrap_or(0) + 1;
            stored.fields = fields.clone();
            stored.version = Version(next.to_string());
            Ok(stored.clone())
        }

        async fn list_items(&self, _container: &str) -> Result<Vec<ItemSummary>, CmsError> {
            Ok(self
                .items
                .lock()
                .unwrap()
                .values()
                .map(|i| ItemSummary {
                    id: i.id.clone(),
                    title: i.text("title").unwrap_or_default(),
                    status: i.status,
                    created_at: i.created_at,
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{item, MemoryCms};
    use super::*;
    use crate::cms::Version;

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    async fn publish(
        pending: &mut PendingChanges,
        cms: &MemoryCms,
        base: &mut CmsItem,
    ) -> Result<FieldMap, CmsError> {
        let outgoing = pending.prepare(base);
        let answer = outgoing.send(cms, "space").await;
        pending.settle(outgoing, answer, base)
    }

    #[test]
    fn test_last_write_wins() {
        let mut pending = PendingChanges::new();
        assert!(!pending.is_dirty());
        pending.set("title", text("one"));
        pending.set("title", text("two"));
        assert!(pending.is_dirty());
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get("title"), Some(&text("two")));
    }

    #[tokio::test]
    async fn test_publish_sends_merged_fields_once_and_clears() {
        let base = item("entry", &[("title", "A"), ("subtitle", "B")]);
        let cms = MemoryCms::with_item(base.clone());
        let mut local = base.clone();
        let mut pending = PendingChanges::new();
        pending.set("title", text("A2"));

        let sent = publish(&mut pending, &cms, &mut local).await.unwrap();

        assert_eq!(cms.update_count(), 1);
        let (_, fields, version) = cms.updates.lock().unwrap()[0].clone();
        assert_eq!(fields, sent);
        assert_eq!(fields["title"], text("A2"));
        assert_eq!(fields["subtitle"], text("B"));
        assert_eq!(version, Version("1".to_string()));

        assert!(!pending.is_dirty());
        assert_eq!(local.version, Version("2".to_string()));
        assert_eq!(local.fields["title"], text("A2"));
        // The caller's copy of the old base is untouched.
        assert_eq!(base.fields["title"], text("A"));
    }

    #[tokio::test]
    async fn test_values_staged_while_sending_survive() {
        let base = item("entry", &[("title", "A"), ("subtitle", "B")]);
        let cms = MemoryCms::with_item(base.clone());
        let mut local = base;
        let mut pending = PendingChanges::new();
        pending.set("title", text("A2"));
        pending.set("subtitle", text("B2"));

        let outgoing = pending.prepare(&local);
        assert_eq!(outgoing.staged(), 2);
        pending.set("subtitle", text("B3"));
        pending.set("slug", text("a"));
        let answer = outgoing.send(&cms, "space").await;
        pending.settle(outgoing, answer, &mut local).unwrap();

        assert_eq!(local.fields["subtitle"], text("B2"));
        assert_eq!(pending.len(), 2);
        assert_eq!(pending.get("title"), None);
        assert_eq!(pending.get("subtitle"), Some(&text("B3")));
        assert_eq!(pending.get("slug"), Some(&text("a")));
    }

    #[tokio::test]
    async fn test_conflict_keeps_buffer_and_base() {
        let base = item("entry", &[("title", "A"), ("subtitle", "B")]);
        let cms = MemoryCms::with_item(base.clone());
        cms.fail_next(CmsError::Conflict("VersionMismatch".to_string()));
        let mut local = base.clone();
        let mut pending = PendingChanges::new();
        pending.set("title", text("A2"));

        let err = publish(&mut pending, &cms, &mut local).await.unwrap_err();

        assert!(matches!(err, CmsError::Conflict(_)));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get("title"), Some(&text("A2")));
        assert_eq!(local, base);
    }

    #[tokio::test]
    async fn test_validation_error_surfaces_verbatim() {
        let base = item("entry", &[("title", "A")]);
        let cms = MemoryCms::with_item(base.clone());
        let violation = crate::cms::FieldViolation {
            path: "fields.slug.en-US".to_string(),
            rule: "required".to_string(),
            detail: String::new(),
        };
        cms.fail_next(CmsError::Validation {
            message: "Validation error".to_string(),
            violations: vec![violation.clone()],
        });
        let mut local = base;
        let mut pending = PendingChanges::new();
        pending.set("slug", text(""));

        match publish(&mut pending, &cms, &mut local).await {
            Err(CmsError::Validation { violations, .. }) => assert_eq!(violations, vec![violation]),
            other => panic!("unexpected {:?}", other),
        }
        assert!(pending.is_dirty());
    }

    #[tokio::test]
    async fn test_publish_keeps_schema_when_response_has_none() {
        let mut base = item("entry", &[("title", "A")]);
        base.schema.push(crate::cms::FieldSpec {
            id: "title".to_string(),
            name: "Title".to_string(),
            kind: crate::cms::FieldKind::Text,
            required: true,
        });
        let cms = MemoryCms::with_item(item("entry", &[("title", "A")]));
        let mut pending = PendingChanges::new();
        pending.set("title", text("B"));
        publish(&mut pending, &cms, &mut base).await.unwrap();
        assert_eq!(base.schema.len(), 1);
    }
}
