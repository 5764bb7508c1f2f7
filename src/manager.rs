//! Schema operations of [`StorageAdapter`]: the registry, class tables,
//! columns, constraints and indexes.

use crate::adapter::StorageAdapter;
use crate::backend::{DatabaseBackend, QueryRow};
use crate::classify::{self, Context};
use crate::ddl;
use crate::error::{AdapterError, ErrorKind, Result};
use crate::schema::{
    is_join_table, join_table_name, validate_field_name, ClassLevelPermissions, ClassSchema, FieldType,
};
use serde_json::Value;
use tracing::{debug, warn};

impl<B: DatabaseBackend> StorageAdapter<B> {
    fn registry(&self) -> &str {
        &self.config.schema_table
    }

    /// Create the schema registry table if it does not exist.
    pub async fn ensure_registry_exists(&self) -> Result<()> {
        debug!(registry = self.registry(), "ensure_registry_exists");
        self.connection
            .execute(&ddl::create_registry(self.registry()))
            .await?;
        Ok(())
    }

    /// Create the class table and one join table per relation field.
    pub async fn create_table(&self, class_name: &str, schema: &ClassSchema) -> Result<()> {
        debug!(class_name, "create_table");
        crate::schema::validate_class_name(class_name)?;
        for field in schema.fields.keys() {
            validate_field_name(field)?;
        }
        self.ensure_registry_exists().await?;
        for statement in ddl::create_table(class_name, schema) {
            self.connection.execute(&statement).await?;
        }
        Ok(())
    }

    /// Create the class and register it. Returns the host view.
    pub async fn create_class(&self, class_name: &str, schema: &ClassSchema) -> Result<ClassSchema> {
        debug!(class_name, "create_class");
        let mut schema = schema.clone();
        schema.class_name = class_name.to_string();
        self.create_table(class_name, &schema).await?;

        let registered = serde_json::to_value(&schema)?;
        let result = self
            .connection
            .execute(&ddl::insert_registry(self.registry(), class_name, &registered))
            .await;
        classify::resolve(Context::CreateClass, class_name, result)?;
        Ok(schema.to_host())
    }

    /// Add a column (or join table) for `field_name` and record it in the
    /// registry.
    ///
    /// Re-adding a field with its registered type is a no-op; a different
    /// type fails with `FieldAlreadyExists`.
    pub async fn add_field_if_not_exists(
        &self,
        class_name: &str,
        field_name: &str,
        field_type: &FieldType,
    ) -> Result<()> {
        debug!(class_name, field_name, "add_field_if_not_exists");
        validate_field_name(field_name)?;

        let statement = if field_type.is_relation() {
            ddl::create_join_table(&join_table_name(class_name, field_name))
        } else {
            ddl::add_column(class_name, field_name, field_type)
        };
        let result = self.connection.execute(&statement).await;
        classify::resolve(Context::AddField, class_name, result)?;

        let rows = self
            .connection
            .query(&ddl::select_registered_field(self.registry(), class_name, field_name))
            .await?;
        match registered_type(rows.first())? {
            Some(existing) if &existing == field_type => Ok(()),
            Some(_) => Err(AdapterError::FieldAlreadyExists {
                class_name: class_name.to_string(),
                field: field_name.to_string(),
            }),
            None => {
                let statement = ddl::register_field(self.registry(), class_name, field_name, field_type)?;
                self.connection.execute(&statement).await?;
                Ok(())
            }
        }
    }

    /// Unregister `field_names`, then drop their columns. Join tables of
    /// relation fields are left in place.
    pub async fn delete_fields(&self, class_name: &str, schema: &ClassSchema, field_names: &[String]) -> Result<()> {
        debug!(class_name, fields = ?field_names, "delete_fields");
        let mut remaining = schema.fields.clone();
        for name in field_names {
            remaining.remove(name);
        }
        let fields = serde_json::to_value(&remaining)?;
        self.connection
            .execute(&ddl::replace_registry_fields(self.registry(), class_name, &fields))
            .await?;

        let columns: Vec<String> = field_names
            .iter()
            .filter(|name| matches!(schema.field_type(name), Some(t) if !t.is_relation()))
            .cloned()
            .collect();
        if let Some(statement) = ddl::drop_columns(class_name, &columns) {
            self.connection.execute(&statement).await?;
        }
        Ok(())
    }

    /// Drop the class table and its registry row. Join tables cannot be
    /// deleted this way and yield `false`.
    pub async fn delete_class(&self, class_name: &str) -> Result<bool> {
        debug!(class_name, "delete_class");
        if is_join_table(class_name) {
            return Ok(false);
        }
        self.connection
            .execute(&ddl::drop_class(self.registry(), class_name))
            .await?;
        Ok(true)
    }

    /// Add a unique constraint over `field_names`.
    pub async fn ensure_uniqueness(&self, class_name: &str, schema: &ClassSchema, field_names: &[String]) -> Result<()> {
        debug!(class_name, fields = ?field_names, "ensure_uniqueness");
        let storage = schema.to_storage();
        if let Some(missing) = field_names.iter().find(|name| storage.field_type(name).is_none()) {
            return Err(AdapterError::UnknownField {
                class_name: class_name.to_string(),
                field: missing.clone(),
            });
        }
        let result = self
            .connection
            .execute(&ddl::add_unique_constraint(class_name, field_names))
            .await;
        classify::resolve(Context::EnsureUniqueness, class_name, result)?;
        Ok(())
    }

    pub async fn create_full_text_index(&self, class_name: &str, field_names: &[String]) -> Result<()> {
        debug!(class_name, fields = ?field_names, "create_full_text_index");
        let result = self
            .connection
            .execute(&ddl::add_fulltext_index(class_name, field_names))
            .await;
        classify::resolve(Context::FullTextIndex, class_name, result)?;
        Ok(())
    }

    /// Every registered class, in host view.
    pub async fn get_all_classes(&self) -> Result<Vec<ClassSchema>> {
        debug!("get_all_classes");
        self.ensure_registry_exists().await?;
        let rows = self
            .connection
            .query(&ddl::select_registry(self.registry(), None))
            .await?;
        rows.iter().map(registry_schema).collect()
    }

    /// The registered class named exactly `class_name`, in host view.
    pub async fn get_class(&self, class_name: &str) -> Result<Option<ClassSchema>> {
        debug!(class_name, "get_class");
        self.ensure_registry_exists().await?;
        let rows = self
            .connection
            .query(&ddl::select_registry(self.registry(), Some(class_name)))
            .await?;
        rows.first().map(registry_schema).transpose()
    }

    pub async fn set_class_level_permissions(
        &self,
        class_name: &str,
        permissions: &ClassLevelPermissions,
    ) -> Result<()> {
        debug!(class_name, "set_class_level_permissions");
        self.ensure_registry_exists().await?;
        let statement = ddl::set_class_level_permissions(self.registry(), class_name, permissions)?;
        self.connection.execute(&statement).await?;
        Ok(())
    }

    /// Whether a table named `class_name` exists. Failures count as absent.
    pub async fn class_exists(&self, class_name: &str) -> bool {
        debug!(class_name, "class_exists");
        match self.connection.query(&ddl::table_exists(class_name)).await {
            Ok(rows) => rows
                .first()
                .and_then(|row| row.get_i64("found"))
                .is_some_and(|found| found > 0),
            Err(err) => {
                warn!(class_name, "class_exists probe failed: {}", err);
                false
            }
        }
    }

    /// Drop every registered class with its join tables, the system tables
    /// and the registry itself, in one batch.
    pub async fn delete_all_classes(&self) -> Result<()> {
        debug!("delete_all_classes");
        let registry = self.registry();
        let result = self
            .connection
            .query(&ddl::select_registry(registry, None))
            .await;
        let Some(rows) = classify::resolve(Context::Read, registry, result)? else {
            return Ok(());
        };

        let mut tables = Vec::new();
        for row in &rows {
            let schema = registry_schema(row)?;
            tables.push(schema.class_name.clone());
            tables.extend(schema.join_tables());
        }
        tables.extend(self.config.system_tables.iter().cloned());
        tables.push(registry.to_string());

        let result = self.connection.execute(&ddl::drop_tables(&tables)).await;
        classify::resolve(Context::Read, registry, result)?;
        Ok(())
    }

    /// Materialize the bootstrap classes. Invalid class names are skipped.
    pub async fn perform_initialization(&self, schemas: &[ClassSchema]) -> Result<()> {
        debug!(classes = schemas.len(), "perform_initialization");
        for schema in schemas {
            match self.create_table(&schema.class_name, schema).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::InvalidClassName => {
                    warn!(class_name = %schema.class_name, "skipping bootstrap class: {}", err);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

fn registry_schema(row: &QueryRow) -> Result<ClassSchema> {
    let class_name = row
        .get_string("className")
        .ok_or_else(|| AdapterError::InternalError("registry row without className".to_string()))?;
    let schema = row.columns.get("schema").cloned().unwrap_or(Value::Null);
    Ok(ClassSchema::from_registry(&class_name, &schema)?.to_host())
}

/// Field type stored in a registry lookup row, if any.
fn registered_type(row: Option<&QueryRow>) -> Result<Option<FieldType>> {
    let Some(raw) = row.and_then(|row| row.first()) else {
        return Ok(None);
    };
    let value = match raw {
        Value::Null => return Ok(None),
        Value::String(text) => serde_json::from_str(text)?,
        other => other.clone(),
    };
    Ok(Some(serde_json::from_value(value)?))
}
