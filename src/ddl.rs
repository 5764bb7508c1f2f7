//! Statements for the schema registry and for class, join and index DDL.

use crate::error::Result;
use crate::schema::{join_table_name, ClassLevelPermissions, ClassSchema, FieldType};
use crate::sql::{json_path, Params, SqlParam, Statement};
use crate::types::{column_type, ColumnType};
use serde_json::Value;

/// Column definition
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    /// Trailing clause such as `NULL` or `DEFAULT CURRENT_TIMESTAMP(6)`.
    pub modifier: Option<&'static str>,
}

impl ColumnDef {
    pub fn for_field(name: &str, field_type: &FieldType) -> Self {
        let modifier = match (name, field_type) {
            ("createdAt", FieldType::Date) => Some("DEFAULT CURRENT_TIMESTAMP(6)"),
            ("updatedAt", FieldType::Date) => {
                Some("DEFAULT CURRENT_TIMESTAMP(6) ON UPDATE CURRENT_TIMESTAMP(6)")
            }
            (_, FieldType::Date) => Some("NULL"),
            _ => None,
        };
        Self {
            name: name.to_string(),
            column_type: column_type(name, field_type),
            modifier,
        }
    }

    fn to_sql(&self, params: &mut Params) -> String {
        let name = params.push(SqlParam::ident(self.name.as_str()));
        match self.modifier {
            Some(modifier) => format!("{} {} {}", name, self.column_type.to_sql(), modifier),
            None => format!("{} {}", name, self.column_type.to_sql()),
        }
    }
}

/// Column definitions of a class table: one per non-relation field of the
/// storage view, `objectId` first.
pub fn class_columns(schema: &ClassSchema) -> Vec<ColumnDef> {
    let storage = schema.to_storage();
    let mut columns = vec![ColumnDef::for_field("objectId", &FieldType::String)];
    for (name, field_type) in &storage.fields {
        if name == "objectId" || field_type.is_relation() {
            continue;
        }
        columns.push(ColumnDef::for_field(name, field_type));
    }
    columns
}

pub fn create_registry(registry: &str) -> Statement {
    Statement::new(
        "CREATE TABLE IF NOT EXISTS $1 (`className` VARCHAR(120), `schema` JSON, \
         `isParseClass` BOOL, PRIMARY KEY (`className`))",
        vec![SqlParam::ident(registry)],
    )
}

/// The class table followed by one join table per relation field.
pub fn create_table(class_name: &str, schema: &ClassSchema) -> Vec<Statement> {
    let mut params = Params::starting_at(1);
    let table = params.push(SqlParam::ident(class_name));
    let mut defs: Vec<String> = class_columns(schema)
        .iter()
        .map(|column| column.to_sql(&mut params))
        .collect();
    let key = params.push(SqlParam::ident("objectId"));
    defs.push(format!("PRIMARY KEY ({})", key));

    let mut statements = vec![params.finish(format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table,
        defs.join(", ")
    ))];
    for field in schema.relation_fields() {
        statements.push(create_join_table(&join_table_name(class_name, field)));
    }
    statements
}

pub fn create_join_table(table: &str) -> Statement {
    Statement::new(
        "CREATE TABLE IF NOT EXISTS $1 (`relatedId` VARCHAR(120), `owningId` VARCHAR(120), \
         PRIMARY KEY (`relatedId`, `owningId`))",
        vec![SqlParam::ident(table)],
    )
}

pub fn add_column(class_name: &str, field: &str, field_type: &FieldType) -> Statement {
    let column = if matches!(field_type, FieldType::Date) {
        "TIMESTAMP(6) NULL DEFAULT NULL"
    } else {
        column_type(field, field_type).to_sql()
    };
    Statement::new(
        format!("ALTER TABLE $1 ADD COLUMN $2 {}", column),
        vec![SqlParam::ident(class_name), SqlParam::ident(field)],
    )
}

pub fn insert_registry(registry: &str, class_name: &str, schema: &Value) -> Statement {
    Statement::new(
        "INSERT INTO $1 (`className`, `schema`, `isParseClass`) VALUES ($2, CAST($3 AS JSON), TRUE)",
        vec![
            SqlParam::ident(registry),
            SqlParam::text(class_name),
            SqlParam::Json(schema.clone()),
        ],
    )
}

/// The registered type of `field`, as a one-column row (`NULL` when absent).
pub fn select_registered_field(registry: &str, class_name: &str, field: &str) -> Statement {
    Statement::new(
        "SELECT JSON_EXTRACT(`schema`, $1) AS `field` FROM $2 WHERE `className` = $3",
        vec![
            SqlParam::text(json_path(&["fields", field])),
            SqlParam::ident(registry),
            SqlParam::text(class_name),
        ],
    )
}

/// Record `field` in the registry, creating `$.fields` if needed.
pub fn register_field(registry: &str, class_name: &str, field: &str, field_type: &FieldType) -> Result<Statement> {
    Ok(Statement::new(
        "UPDATE $1 SET `schema` = JSON_SET(COALESCE(`schema`, JSON_OBJECT()), \
         $2, COALESCE(JSON_EXTRACT(`schema`, $2), JSON_OBJECT()), \
         $3, CAST($4 AS JSON)) WHERE `className` = $5",
        vec![
            SqlParam::ident(registry),
            SqlParam::text(json_path(&["fields"])),
            SqlParam::text(json_path(&["fields", field])),
            SqlParam::Json(serde_json::to_value(field_type)?),
            SqlParam::text(class_name),
        ],
    ))
}

/// Overwrite `$.fields` with `fields`.
pub fn replace_registry_fields(registry: &str, class_name: &str, fields: &Value) -> Statement {
    set_registry_member(registry, class_name, "fields", fields.clone())
}

pub fn set_class_level_permissions(
    registry: &str,
    class_name: &str,
    permissions: &ClassLevelPermissions,
) -> Result<Statement> {
    Ok(set_registry_member(
        registry,
        class_name,
        "classLevelPermissions",
        serde_json::to_value(permissions)?,
    ))
}

fn set_registry_member(registry: &str, class_name: &str, member: &str, value: Value) -> Statement {
    Statement::new(
        "UPDATE $1 SET `schema` = JSON_SET(COALESCE(`schema`, JSON_OBJECT()), $2, CAST($3 AS JSON)) \
         WHERE `className` = $4",
        vec![
            SqlParam::ident(registry),
            SqlParam::text(json_path(&[member])),
            SqlParam::Json(value),
            SqlParam::text(class_name),
        ],
    )
}

/// One `ALTER TABLE` dropping every listed column; `None` if there are none.
pub fn drop_columns(class_name: &str, columns: &[String]) -> Option<Statement> {
    if columns.is_empty() {
        return None;
    }
    let mut params = Params::starting_at(1);
    let table = params.push(SqlParam::ident(class_name));
    let drops: Vec<String> = columns
        .iter()
        .map(|column| format!("DROP COLUMN {}", params.push(SqlParam::ident(column.as_str()))))
        .collect();
    Some(params.finish(format!("ALTER TABLE {} {}", table, drops.join(", "))))
}

/// Drop the class table and its registry row.
pub fn drop_class(registry: &str, class_name: &str) -> Statement {
    Statement::batch(vec![
        Statement::new("DROP TABLE IF EXISTS $1", vec![SqlParam::ident(class_name)]),
        Statement::new(
            "DELETE FROM $1 WHERE `className` = $2",
            vec![SqlParam::ident(registry), SqlParam::text(class_name)],
        ),
    ])
}

/// One batch dropping every table, in order.
pub fn drop_tables<S: AsRef<str>>(tables: &[S]) -> Statement {
    Statement::batch(
        tables
            .iter()
            .map(|table| Statement::new("DROP TABLE IF EXISTS $1", vec![SqlParam::ident(table.as_ref())]))
            .collect(),
    )
}

/// `<prefix>_<sorted fields joined by _>`, so repeated calls agree.
pub fn index_name(prefix: &str, fields: &[String]) -> String {
    let mut sorted: Vec<&str> = fields.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    format!("{}_{}", prefix, sorted.join("_"))
}

/// `ALTER TABLE t ADD <clause> (cols)` where `clause` has a `{}` for the name.
fn add_index(class_name: &str, clause: &str, name: String, fields: &[String]) -> Statement {
    let mut params = Params::starting_at(1);
    let table = params.push(SqlParam::ident(class_name));
    let name = params.push(SqlParam::ident(name));
    let columns: Vec<String> = fields
        .iter()
        .map(|field| params.push(SqlParam::ident(field.as_str())))
        .collect();
    params.finish(format!(
        "ALTER TABLE {} ADD {} ({})",
        table,
        clause.replace("{}", &name),
        columns.join(", ")
    ))
}

pub fn add_unique_constraint(class_name: &str, fields: &[String]) -> Statement {
    add_index(class_name, "CONSTRAINT {} UNIQUE", index_name("unique", fields), fields)
}

pub fn add_fulltext_index(class_name: &str, fields: &[String]) -> Statement {
    add_index(class_name, "FULLTEXT INDEX {}", index_name("fts", fields), fields)
}

/// Registry rows, optionally for one class matched case-sensitively.
pub fn select_registry(registry: &str, class_name: Option<&str>) -> Statement {
    match class_name {
        Some(class_name) => Statement::new(
            "SELECT `className`, `schema` FROM $1 WHERE `className` COLLATE utf8mb4_bin = $2",
            vec![SqlParam::ident(registry), SqlParam::text(class_name)],
        ),
        None => Statement::new("SELECT `className`, `schema` FROM $1", vec![SqlParam::ident(registry)]),
    }
}

pub fn table_exists(class_name: &str) -> Statement {
    Statement::new(
        "SELECT COUNT(*) AS `found` FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = $1",
        vec![SqlParam::text(class_name)],
    )
}
