//! Class schemas, field types and class-level permissions.

use crate::error::{AdapterError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Prefix of the auxiliary tables backing relation fields.
pub const JOIN_TABLE_PREFIX: &str = "_Join:";

/// System classes accepted despite the leading underscore.
pub const SYSTEM_CLASSES: &[&str] = &[
    "_User",
    "_Installation",
    "_Role",
    "_Session",
    "_Product",
    "_PushStatus",
    "_JobStatus",
    "_JobSchedule",
    "_Hooks",
    "_GlobalConfig",
    "_Audience",
];

/// Read and write permission columns present on every class table.
pub const PERMISSION_FIELDS: &[&str] = &["_rperm", "_wperm"];

static CLASS_NAME_RE: OnceLock<Regex> = OnceLock::new();

fn class_name_re() -> &'static Regex {
    CLASS_NAME_RE.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").expect("valid regex"))
}

/// Document field type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Object,
    Array {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        contents: Option<Box<FieldType>>,
    },
    Bytes,
    File,
    GeoPoint,
    Pointer {
        #[serde(rename = "targetClass")]
        target_class: String,
    },
    Relation {
        #[serde(rename = "targetClass")]
        target_class: String,
    },
}

impl FieldType {
    pub fn array() -> Self {
        FieldType::Array { contents: None }
    }

    pub fn array_of(contents: FieldType) -> Self {
        FieldType::Array {
            contents: Some(Box::new(contents)),
        }
    }

    pub fn pointer(target_class: impl Into<String>) -> Self {
        FieldType::Pointer {
            target_class: target_class.into(),
        }
    }

    pub fn relation(target_class: impl Into<String>) -> Self {
        FieldType::Relation {
            target_class: target_class.into(),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, FieldType::Array { .. })
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, FieldType::Relation { .. })
    }

    /// Array whose declared element type is `String`.
    pub fn is_string_array(&self) -> bool {
        matches!(self, FieldType::Array { contents: Some(c) } if **c == FieldType::String)
    }

    pub fn target_class(&self) -> Option<&str> {
        match self {
            FieldType::Pointer { target_class } | FieldType::Relation { target_class } => {
                Some(target_class)
            }
            _ => None,
        }
    }
}

/// Role-or-`*` to allowed map for one operation.
pub type PermissionMap = BTreeMap<String, bool>;

/// Class-level permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassLevelPermissions {
    #[serde(default)]
    pub find: PermissionMap,
    #[serde(default)]
    pub get: PermissionMap,
    #[serde(default)]
    pub create: PermissionMap,
    #[serde(default)]
    pub update: PermissionMap,
    #[serde(default)]
    pub delete: PermissionMap,
    #[serde(default, rename = "addField")]
    pub add_field: PermissionMap,
    /// Host-specific entries (`protectedFields`, `readUserFields`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ClassLevelPermissions {
    /// Every operation open to `*`.
    pub fn open() -> Self {
        let public = || PermissionMap::from([("*".to_string(), true)]);
        Self {
            find: public(),
            get: public(),
            create: public(),
            update: public(),
            delete: public(),
            add_field: public(),
            extra: Map::new(),
        }
    }
}

impl Default for ClassLevelPermissions {
    fn default() -> Self {
        Self::open()
    }
}

/// Schema of one document class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassSchema {
    #[serde(rename = "className")]
    pub class_name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldType>,
    #[serde(
        rename = "classLevelPermissions",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub class_level_permissions: Option<ClassLevelPermissions>,
}

impl ClassSchema {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            fields: BTreeMap::new(),
            class_level_permissions: None,
        }
    }

    /// Builder-style field insertion.
    pub fn field(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(name.into(), field_type);
        self
    }

    /// Schema with the default columns every class carries.
    pub fn with_default_fields(class_name: impl Into<String>) -> Self {
        Self::new(class_name)
            .field("objectId", FieldType::String)
            .field("createdAt", FieldType::Date)
            .field("updatedAt", FieldType::Date)
    }

    pub fn field_type(&self, name: &str) -> Option<&FieldType> {
        self.fields.get(name)
    }

    /// Relation fields, in field order.
    pub fn relation_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|(_, t)| t.is_relation())
            .map(|(name, _)| name.as_str())
    }

    /// Names of the join tables implied by this schema's relation fields.
    pub fn join_tables(&self) -> Vec<String> {
        self.relation_fields()
            .map(|field| join_table_name(&self.class_name, field))
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        validate_class_name(&self.class_name)?;
        for name in self.fields.keys() {
            validate_field_name(name)?;
        }
        Ok(())
    }

    /// The view compilers operate on: permission columns and, for `_User`,
    /// the internal authentication fields.
    pub fn to_storage(&self) -> ClassSchema {
        let mut storage = self.clone();
        for name in PERMISSION_FIELDS {
            storage
                .fields
                .insert(name.to_string(), FieldType::array_of(FieldType::String));
        }
        if self.class_name == "_User" {
            storage
                .fields
                .entry("_hashed_password".to_string())
                .or_insert(FieldType::String);
            storage
                .fields
                .entry("authData".to_string())
                .or_insert(FieldType::Object);
            for (name, field_type) in user_internal_fields() {
                storage.fields.entry(name.to_string()).or_insert(field_type);
            }
        }
        storage
    }

    /// The view returned to the host: internal columns stripped, CLPs filled.
    pub fn to_host(&self) -> ClassSchema {
        let mut host = self.clone();
        host.fields.remove("_hashed_password");
        for name in PERMISSION_FIELDS {
            host.fields.remove(*name);
        }
        if self.class_name == "_User" {
            for (name, _) in user_internal_fields() {
                host.fields.remove(name);
            }
        }
        host.class_level_permissions = Some(self.class_level_permissions.clone().unwrap_or_default());
        host
    }

    /// Decode a registry row's `schema` JSON; `class_name` wins over any
    /// name stored inside the blob.
    pub fn from_registry(class_name: &str, schema: &Value) -> Result<ClassSchema> {
        let mut object = match schema {
            Value::Object(map) => map.clone(),
            Value::String(text) => match serde_json::from_str::<Value>(text)? {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            _ => Map::new(),
        };
        object.insert("className".to_string(), Value::String(class_name.to_string()));
        Ok(serde_json::from_value(Value::Object(object))?)
    }
}

/// `_Join:<field>:<ownerClass>`.
pub fn join_table_name(owner_class: &str, field: &str) -> String {
    format!("{}{}:{}", JOIN_TABLE_PREFIX, field, owner_class)
}

pub fn is_join_table(class_name: &str) -> bool {
    class_name.starts_with(JOIN_TABLE_PREFIX)
}

pub fn validate_class_name(class_name: &str) -> Result<()> {
    if SYSTEM_CLASSES.contains(&class_name)
        || class_name_re().is_match(class_name)
        || is_join_table(class_name)
    {
        return Ok(());
    }
    Err(AdapterError::InvalidClassName(class_name.to_string()))
}

pub fn validate_field_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') || name.contains('$') {
        return Err(AdapterError::InvalidFieldName(name.to_string()));
    }
    Ok(())
}

/// Authentication and lockout columns injected into `_User` tables.
pub fn user_internal_fields() -> Vec<(&'static str, FieldType)> {
    vec![
        ("_email_verify_token_expires_at", FieldType::Date),
        ("_email_verify_token", FieldType::String),
        ("_account_lockout_expires_at", FieldType::Date),
        ("_failed_login_count", FieldType::Number),
        ("_perishable_token", FieldType::String),
        ("_perishable_token_expires_at", FieldType::Date),
        ("_password_changed_at", FieldType::Date),
        ("_password_history", FieldType::array()),
    ]
}

/// Bootstrap classes materialized by `perform_initialization`.
pub fn volatile_class_schemas() -> Vec<ClassSchema> {
    vec![
        ClassSchema::with_default_fields("_PushStatus")
            .field("pushTime", FieldType::String)
            .field("source", FieldType::String)
            .field("query", FieldType::String)
            .field("payload", FieldType::String)
            .field("title", FieldType::String)
            .field("expiry", FieldType::Number)
            .field("expiration_interval", FieldType::Number)
            .field("status", FieldType::String)
            .field("numSent", FieldType::Number)
            .field("numFailed", FieldType::Number)
            .field("pushHash", FieldType::String)
            .field("errorMessage", FieldType::Object)
            .field("sentPerType", FieldType::Object)
            .field("failedPerType", FieldType::Object)
            .field("sentPerUTCOffset", FieldType::Object)
            .field("failedPerUTCOffset", FieldType::Object)
            .field("count", FieldType::Number),
        ClassSchema::with_default_fields("_JobStatus")
            .field("jobName", FieldType::String)
            .field("source", FieldType::String)
            .field("status", FieldType::String)
            .field("message", FieldType::String)
            .field("params", FieldType::Object)
            .field("finishedAt", FieldType::Date),
        ClassSchema::with_default_fields("_JobSchedule")
            .field("jobName", FieldType::String)
            .field("description", FieldType::String)
            .field("params", FieldType::String)
            .field("startAfter", FieldType::String)
            .field("daysOfWeek", FieldType::array())
            .field("timeOfDay", FieldType::String)
            .field("lastRun", FieldType::Number)
            .field("repeatMinutes", FieldType::Number),
        ClassSchema::with_default_fields("_Hooks")
            .field("functionName", FieldType::String)
            .field("className", FieldType::String)
            .field("triggerName", FieldType::String)
            .field("url", FieldType::String),
        ClassSchema::with_default_fields("_GlobalConfig").field("params", FieldType::Object),
        ClassSchema::with_default_fields("_Audience")
            .field("name", FieldType::String)
            .field("query", FieldType::String)
            .field("lastUsed", FieldType::Date)
            .field("timesUsed", FieldType::Number),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_type_json_shape() {
        let pointer: FieldType = serde_json::from_value(json!({"type": "Pointer", "targetClass": "_User"})).unwrap();
        assert_eq!(pointer, FieldType::pointer("_User"));

        let tags: FieldType =
            serde_json::from_value(json!({"type": "Array", "contents": {"type": "String"}})).unwrap();
        assert!(tags.is_string_array());

        assert_eq!(
            serde_json::to_value(FieldType::relation("Post")).unwrap(),
            json!({"type": "Relation", "targetClass": "Post"})
        );
        assert_eq!(serde_json::to_value(FieldType::array()).unwrap(), json!({"type": "Array"}));
    }

    #[test]
    fn test_unknown_field_type_is_rejected() {
        let result: std::result::Result<FieldType, _> = serde_json::from_value(json!({"type": "Polygon"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_class_name_validation() {
        assert!(validate_class_name("Widget").is_ok());
        assert!(validate_class_name("_User").is_ok());
        assert!(validate_class_name("_Join:likes:Post").is_ok());
        assert!(validate_class_name("_Secret").is_err());
        assert!(validate_class_name("9lives").is_err());
        assert!(validate_class_name("has space").is_err());
    }

    #[test]
    fn test_field_name_validation() {
        assert!(validate_field_name("score").is_ok());
        assert!(validate_field_name("a.b").is_err());
        assert!(validate_field_name("$set").is_err());
    }

    #[test]
    fn test_storage_view_adds_permission_columns() {
        let schema = ClassSchema::with_default_fields("Widget");
        let storage = schema.to_storage();
        assert!(storage.field_type("_rperm").unwrap().is_string_array());
        assert!(storage.field_type("_wperm").unwrap().is_string_array());
        assert!(storage.field_type("_hashed_password").is_none());
    }

    #[test]
    fn test_user_storage_and_host_views() {
        let schema = ClassSchema::with_default_fields("_User").field("username", FieldType::String);
        let storage = schema.to_storage();
        assert_eq!(storage.field_type("_hashed_password"), Some(&FieldType::String));
        assert_eq!(storage.field_type("_failed_login_count"), Some(&FieldType::Number));
        assert_eq!(storage.field_type("authData"), Some(&FieldType::Object));

        let host = storage.to_host();
        assert!(host.field_type("_hashed_password").is_none());
        assert!(host.field_type("_rperm").is_none());
        assert!(host.field_type("_perishable_token").is_none());
        assert!(host.field_type("username").is_some());
    }

    #[test]
    fn test_host_view_fills_default_permissions() {
        let host = ClassSchema::new("Widget").to_host();
        let clp = host.class_level_permissions.unwrap();
        assert_eq!(clp.find.get("*"), Some(&true));
        assert_eq!(clp.add_field.get("*"), Some(&true));
    }

    #[test]
    fn test_partial_permissions_default_to_empty() {
        let clp: ClassLevelPermissions =
            serde_json::from_value(json!({"find": {"role:admin": true}, "protectedFields": {}})).unwrap();
        assert_eq!(clp.find.get("role:admin"), Some(&true));
        assert!(clp.get.is_empty());
        assert!(clp.extra.contains_key("protectedFields"));
    }

    #[test]
    fn test_join_tables() {
        let schema = ClassSchema::new("Post")
            .field("likes", FieldType::relation("_User"))
            .field("title", FieldType::String);
        assert_eq!(schema.join_tables(), vec!["_Join:likes:Post".to_string()]);
        assert!(is_join_table("_Join:likes:Post"));
    }

    #[test]
    fn test_from_registry_uses_row_class_name() {
        let stored = json!({"fields": {"name": {"type": "String"}}});
        let schema = ClassSchema::from_registry("Widget", &stored).unwrap();
        assert_eq!(schema.class_name, "Widget");
        assert_eq!(schema.field_type("name"), Some(&FieldType::String));

        let as_text = Value::String(stored.to_string());
        assert_eq!(ClassSchema::from_registry("Widget", &as_text).unwrap(), schema);
    }

    #[test]
    fn test_volatile_classes_are_valid() {
        for schema in volatile_class_schemas() {
            schema.validate().unwrap();
            assert!(schema.field_type("objectId").is_some());
        }
    }
}
