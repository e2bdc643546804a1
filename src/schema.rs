//! Destination table schemas and columnar encoding
//!
//! Each entity kind has one static `TableSchema`. The same descriptor is used to
//! create the warehouse table and to lay out every Parquet batch loaded into it,
//! so column names and order cannot drift between the two.

use arrow::array::{ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{EtlError, EtlResult};

/// Type alias for a data row (map of field names to JSON values)
pub type DataRow = HashMap<String, Value>;

/// Primitive column types supported by the destination tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Bool,
}

impl FieldKind {
    /// Name of the type in the warehouse table definition
    pub fn warehouse_type(&self) -> &'static str {
        match self {
            FieldKind::String => "STRING",
            FieldKind::Integer => "INTEGER",
            FieldKind::Float => "FLOAT",
            FieldKind::Bool => "BOOL",
        }
    }

    fn arrow_type(&self) -> DataType {
        match self {
            FieldKind::String => DataType::Utf8,
            FieldKind::Integer => DataType::Int64,
            FieldKind::Float => DataType::Float64,
            FieldKind::Bool => DataType::Boolean,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

/// Ordered column set of one destination table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub fields: &'static [FieldSpec],
}

pub const CURRENCY_SCHEMA: TableSchema = TableSchema {
    fields: &[
        field("currency_base", FieldKind::String),
        field("currency_quote", FieldKind::String),
        field("rate", FieldKind::Float),
    ],
};

pub const ITEM_SCHEMA: TableSchema = TableSchema {
    fields: &[
        field("category_id", FieldKind::String),
        field("price", FieldKind::Float),
        field("seller_id", FieldKind::Integer),
        field("title", FieldKind::String),
        field("currency_id", FieldKind::String),
        field("free_shipping", FieldKind::Bool),
        field("local_pick_up", FieldKind::Bool),
        field("logistic_type", FieldKind::String),
        field("shipping_mode", FieldKind::String),
        field("warranty_time", FieldKind::String),
        field("warranty_type", FieldKind::String),
    ],
};

pub const SELLER_SCHEMA: TableSchema = TableSchema {
    fields: &[
        field("id", FieldKind::Integer),
        field("qty_sales", FieldKind::Integer),
    ],
};

impl TableSchema {
    pub fn field_names(&self) -> Vec<&'static str> {
        self.fields.iter().map(|f| f.name).collect()
    }

    /// Arrow schema with every column nullable, in declaration order
    pub fn arrow_schema(&self) -> Arc<Schema> {
        let fields: Vec<Field> = self
            .fields
            .iter()
            .map(|f| Field::new(f.name, f.kind.arrow_type(), true))
            .collect();
        Arc::new(Schema::new(fields))
    }

    /// `schema.fields` JSON for a warehouse table or load job definition
    pub fn to_warehouse_json(&self) -> Value {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "type": f.kind.warehouse_type(),
                    "mode": "NULLABLE",
                })
            })
            .collect();
        json!({ "fields": fields })
    }
}

/// A record type that maps onto one destination table
pub trait TableRow: Serialize {
    const SCHEMA: TableSchema;

    /// Convert the record into a `DataRow` keyed by column name
    fn to_row(&self) -> EtlResult<DataRow> {
        match serde_json::to_value(self) {
            Ok(Value::Object(obj)) => Ok(obj.into_iter().collect()),
            Ok(other) => Err(EtlError::Encode(format!(
                "expected an object for a table row, got {}",
                other
            ))),
            Err(e) => Err(EtlError::Encode(e.to_string())),
        }
    }
}

/// Convert a slice of rows to a RecordBatch laid out by `schema`
pub fn record_batch(schema: &TableSchema, rows: &[DataRow]) -> EtlResult<RecordBatch> {
    if rows.is_empty() {
        return Err(EtlError::Encode("cannot create batch from empty data".to_string()));
    }

    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(schema.fields.len());

    for field in schema.fields {
        let col_name = field.name;

        let array: ArrayRef = match field.kind {
            FieldKind::String => {
                let mut builder = StringBuilder::new();
                for row in rows {
                    match row.get(col_name) {
                        Some(Value::String(s)) => builder.append_value(s),
                        Some(Value::Null) | None => builder.append_null(),
                        Some(other) => builder.append_value(other.to_string()),
                    }
                }
                Arc::new(builder.finish())
            }
            FieldKind::Integer => {
                let mut builder = Int64Builder::new();
                for row in rows {
                    match row.get(col_name) {
                        Some(Value::Null) | None => builder.append_null(),
                        Some(value) => builder.append_value(
                            value.as_i64().ok_or_else(|| type_mismatch(col_name, value))?,
                        ),
                    }
                }
                Arc::new(builder.finish())
            }
            FieldKind::Float => {
                let mut builder = Float64Builder::new();
                for row in rows {
                    match row.get(col_name) {
                        Some(Value::Null) | None => builder.append_null(),
                        Some(value) => builder.append_value(
                            value.as_f64().ok_or_else(|| type_mismatch(col_name, value))?,
                        ),
                    }
                }
                Arc::new(builder.finish())
            }
            FieldKind::Bool => {
                let mut builder = BooleanBuilder::new();
                for row in rows {
                    match row.get(col_name) {
                        Some(Value::Null) | None => builder.append_null(),
                        Some(value) => builder.append_value(
                            value.as_bool().ok_or_else(|| type_mismatch(col_name, value))?,
                        ),
                    }
                }
                Arc::new(builder.finish())
            }
        };

        arrays.push(array);
    }

    RecordBatch::try_new(schema.arrow_schema(), arrays)
        .map_err(|e| EtlError::Encode(format!("failed to create record batch: {}", e)))
}

fn type_mismatch(column: &str, value: &Value) -> EtlError {
    EtlError::Encode(format!("value {} does not fit column '{}'", value, column))
}

/// Encode rows as an in-memory Parquet file
pub fn encode_parquet(schema: &TableSchema, rows: &[DataRow]) -> EtlResult<Vec<u8>> {
    let batch = record_batch(schema, rows)?;

    let mut buffer = Vec::new();
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(&mut buffer, schema.arrow_schema(), Some(props))
        .map_err(|e| EtlError::Encode(format!("failed to create ArrowWriter: {}", e)))?;

    writer
        .write(&batch)
        .map_err(|e| EtlError::Encode(format!("failed to write batch to parquet: {}", e)))?;
    writer
        .close()
        .map_err(|e| EtlError::Encode(format!("failed to close writer: {}", e)))?;

    Ok(buffer)
}
