use crate::error::DbError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    /// Dotted field path the index is keyed on.
    pub key_path: String,
    #[serde(default)]
    pub unique: bool,
    /// Array values produce one index entry per element.
    #[serde(default)]
    pub multi_entry: bool,
}

impl IndexSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            key_path: name.to_string(),
            unique: false,
            multi_entry: false,
        }
    }

    pub fn on(name: &str, key_path: &str) -> Self {
        Self {
            key_path: key_path.to_string(),
            ..Self::new(name)
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn multi_entry(mut self) -> Self {
        self.multi_entry = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSchema {
    pub name: String,
    /// In-line key path. `None` means keys are supplied out of line or generated.
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub auto_increment: bool,
    #[serde(default)]
    pub indexes: Vec<IndexSchema>,
}

impl StoreSchema {
    pub fn new(name: &str, key_path: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            key_path: key_path.map(str::to_string),
            auto_increment: false,
            indexes: Vec::new(),
        }
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexSchema> {
        self.indexes.iter().find(|idx| idx.name == name)
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.index(name).is_some()
    }

    pub fn require_index(&self, name: &str) -> Result<&IndexSchema, DbError> {
        self.index(name)
            .ok_or_else(|| DbError::index_not_found(&self.name, name))
    }

    /// The index a where-clause field can be answered from, matching either
    /// the index name or its key path.
    pub fn index_for_field(&self, field: &str) -> Option<&IndexSchema> {
        self.index(field)
            .or_else(|| self.indexes.iter().find(|idx| idx.key_path == field))
    }

    pub fn is_primary_field(&self, field: &str) -> bool {
        self.key_path.as_deref() == Some(field)
    }

    /// Column used to order rows when no index drives the scan.
    pub fn order_column(&self) -> Option<&str> {
        self.key_path.as_deref()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseSchema {
    #[serde(default)]
    pub version: Option<u32>,
    #[serde(default)]
    pub stores: Vec<StoreSchema>,
}

impl DatabaseSchema {
    pub fn new(stores: Vec<StoreSchema>) -> Self {
        Self {
            version: None,
            stores,
        }
    }

    pub fn with_store(mut self, store: StoreSchema) -> Self {
        self.stores.push(store);
        self
    }

    pub fn store(&self, name: &str) -> Option<&StoreSchema> {
        self.stores.iter().find(|s| s.name == name)
    }

    pub fn has_store(&self, name: &str) -> bool {
        self.store(name).is_some()
    }

    pub fn require_store(&self, name: &str) -> Result<&StoreSchema, DbError> {
        self.store(name).ok_or_else(|| DbError::store_not_found(name))
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{DatabaseSchema, IndexSchema, StoreSchema};
    use crate::error::DbErrorCode;

    fn sample() -> DatabaseSchema {
        DatabaseSchema::new(vec![
            StoreSchema::new("t1", Some("id"))
                .with_index(IndexSchema::new("value"))
                .with_index(IndexSchema::on("by_x", "x"))
                .with_index(IndexSchema::new("tag").multi_entry()),
        ])
    }

    #[test]
    fn index_lookup_matches_name_or_key_path() {
        let schema = sample();
        let store = schema.store("t1").expect("store");
        assert_eq!(store.index_for_field("value").map(|i| i.name.as_str()), Some("value"));
        assert_eq!(store.index_for_field("x").map(|i| i.name.as_str()), Some("by_x"));
        assert!(store.index_for_field("id").is_none());
        assert!(store.is_primary_field("id"));
    }

    #[test]
    fn missing_store_and_index_report_not_found() {
        let schema = sample();
        let err = schema.require_store("nope").expect_err("missing store");
        assert_eq!(err.code(), DbErrorCode::StoreNotFound);
        let store = schema.require_store("t1").expect("store");
        let err = store.require_index("nope").expect_err("missing index");
        assert_eq!(err.code(), DbErrorCode::IndexNotFound);
    }

    #[test]
    fn schema_loads_from_json() {
        let schema: DatabaseSchema = serde_json::from_value(serde_json::json!({
            "stores": [{
                "name": "st",
                "key_path": "id",
                "indexes": [{"name": "tag", "key_path": "tag", "multi_entry": true}]
            }]
        }))
        .expect("schema json");
        let store = schema.store("st").expect("store");
        assert!(store.index("tag").expect("index").multi_entry);
        assert!(!store.auto_increment);
    }
}
