//! Flattening of marketplace bulk lookup responses
//!
//! Bulk endpoints answer with one `{ "code": ..., "body": { ... } }` wrapper per
//! requested id. The functions here turn a list of such wrappers into flat records.
//! A wrapper whose body lacks a required field fails the whole call with
//! `EtlError::MissingField`.

use serde_json::Value;

use crate::error::{EtlError, EtlResult};
use crate::models::{ItemRecord, SellerRecord};

const ITEM: &str = "item";
const SELLER: &str = "seller";

const WARRANTY_TYPE: &str = "WARRANTY_TYPE";
const WARRANTY_TIME: &str = "WARRANTY_TIME";

/// Flatten wrapped item bodies into `ItemRecord`s, preserving order
pub fn flatten_items(raw: &[Value]) -> EtlResult<Vec<ItemRecord>> {
    raw.iter().map(flatten_item).collect()
}

/// Flatten wrapped user bodies into `SellerRecord`s, preserving order
pub fn flatten_sellers(raw: &[Value]) -> EtlResult<Vec<SellerRecord>> {
    raw.iter().map(flatten_seller).collect()
}

fn flatten_item(wrapper: &Value) -> EtlResult<ItemRecord> {
    let body = lookup(wrapper, ITEM, "body")?;
    let shipping = lookup(body, ITEM, "shipping")?;

    let (warranty_time, warranty_type) = match body.get("sale_terms") {
        Some(Value::Array(terms)) => (
            sale_term(terms, WARRANTY_TIME),
            sale_term(terms, WARRANTY_TYPE),
        ),
        _ => (None, None),
    };

    Ok(ItemRecord {
        category_id: string_at(body, ITEM, "category_id")?,
        price: float_at(body, ITEM, "price")?,
        seller_id: int_at(body, ITEM, "seller_id")?,
        title: string_at(body, ITEM, "title")?,
        currency_id: string_at(body, ITEM, "currency_id")?,
        free_shipping: bool_at(shipping, ITEM, "shipping.free_shipping")?,
        local_pick_up: bool_at(shipping, ITEM, "shipping.local_pick_up")?,
        logistic_type: nullable_string_at(shipping, ITEM, "shipping.logistic_type")?,
        shipping_mode: nullable_string_at(shipping, ITEM, "shipping.mode")?,
        warranty_time,
        warranty_type,
    })
}

fn flatten_seller(wrapper: &Value) -> EtlResult<SellerRecord> {
    let body = lookup(wrapper, SELLER, "body")?;
    let transactions = lookup(body, SELLER, "seller_reputation")
        .and_then(|rep| lookup(rep, SELLER, "seller_reputation.transactions"))?;

    Ok(SellerRecord {
        id: int_at(body, SELLER, "id")?,
        qty_sales: int_at(transactions, SELLER, "seller_reputation.transactions.total")?,
    })
}

/// `value_name` of the first sale term with the given id
fn sale_term(terms: &[Value], id: &str) -> Option<String> {
    terms
        .iter()
        .find(|term| term.get("id").and_then(Value::as_str) == Some(id))
        .and_then(|term| term.get("value_name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Look up the last segment of `path` in `obj`; `path` is only used for error reporting
fn lookup<'a>(obj: &'a Value, entity: &'static str, path: &str) -> EtlResult<&'a Value> {
    let key = path.rsplit('.').next().unwrap_or(path);
    obj.get(key).ok_or_else(|| EtlError::missing(entity, path))
}

fn string_at(obj: &Value, entity: &'static str, path: &str) -> EtlResult<String> {
    lookup(obj, entity, path)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| EtlError::missing(entity, path))
}

fn nullable_string_at(obj: &Value, entity: &'static str, path: &str) -> EtlResult<Option<String>> {
    match lookup(obj, entity, path)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        _ => Err(EtlError::missing(entity, path)),
    }
}

fn float_at(obj: &Value, entity: &'static str, path: &str) -> EtlResult<f64> {
    lookup(obj, entity, path)?
        .as_f64()
        .ok_or_else(|| EtlError::missing(entity, path))
}

/// Integers may arrive as JSON numbers or numeric strings
fn int_at(obj: &Value, entity: &'static str, path: &str) -> EtlResult<i64> {
    let value = lookup(obj, entity, path)?;
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| EtlError::missing(entity, path))
}

fn bool_at(obj: &Value, entity: &'static str, path: &str) -> EtlResult<bool> {
    lookup(obj, entity, path)?
        .as_bool()
        .ok_or_else(|| EtlError::missing(entity, path))
}
