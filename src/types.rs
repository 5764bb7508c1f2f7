//! Mapping of document field types to MySQL column types.

use crate::schema::FieldType;

/// Field names stored as bounded strings so they can carry unique keys.
pub const NATURAL_KEY_FIELDS: &[&str] = &["objectId", "username", "email", "name"];

/// MySQL column type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// `VARCHAR(120)`, the longest indexable key MySQL accepts for utf8mb4 here
    KeyString,
    /// `CHAR(10)`, the width of an object id
    ObjectId,
    Text,
    DoublePrecision,
    Boolean,
    Timestamp,
    Json,
    Point,
}

impl ColumnType {
    pub fn to_sql(&self) -> &'static str {
        match self {
            ColumnType::KeyString => "VARCHAR(120)",
            ColumnType::ObjectId => "CHAR(10)",
            ColumnType::Text => "TEXT",
            ColumnType::DoublePrecision => "DOUBLE PRECISION",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Timestamp => "TIMESTAMP(6)",
            ColumnType::Json => "JSON",
            ColumnType::Point => "POINT",
        }
    }
}

/// Column type for a field, taking natural keys into account.
///
/// Relations have no column of their own; callers route them to a join
/// table before asking, and get `CHAR(10)` if they ask anyway.
pub fn column_type(field_name: &str, field_type: &FieldType) -> ColumnType {
    if NATURAL_KEY_FIELDS.contains(&field_name) && matches!(field_type, FieldType::String) {
        return ColumnType::KeyString;
    }
    match field_type {
        FieldType::String | FieldType::File => ColumnType::Text,
        FieldType::Number => ColumnType::DoublePrecision,
        FieldType::Boolean => ColumnType::Boolean,
        FieldType::Date => ColumnType::Timestamp,
        FieldType::Object | FieldType::Array { .. } | FieldType::Bytes => ColumnType::Json,
        FieldType::GeoPoint => ColumnType::Point,
        FieldType::Pointer { .. } | FieldType::Relation { .. } => ColumnType::ObjectId,
    }
}
