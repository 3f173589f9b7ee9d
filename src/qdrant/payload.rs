//! Helpers for constructing Qdrant point ids and payloads.

use crate::{
    pipeline::VectorRecord,
    qdrant::types::{DESCRIPTION_VECTOR, IMAGE_VECTOR},
};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Qdrant only accepts unsigned integers or UUIDs as point ids, so product ids are mapped to a
/// stable UUIDv5. The product id itself lives in the `product_id` payload field.
pub fn point_id_for(product_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, product_id.as_bytes()).to_string()
}

/// Compute a deterministic SHA-256 hash for a rendered description.
pub fn compute_description_hash(description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(description.as_bytes());
    hex::encode(hasher.finalize())
}

/// Serialize a record into the point body expected by `PUT /collections/{name}/points`.
pub(crate) fn build_point(record: &VectorRecord, ingested_at: &str) -> Value {
    json!({
        "id": point_id_for(&record.id),
        "vector": {
            IMAGE_VECTOR: record.image_vector,
            DESCRIPTION_VECTOR: record.description_vector,
        },
        "payload": build_payload(record, ingested_at),
    })
}

/// Build the payload object stored alongside each product point.
pub(crate) fn build_payload(record: &VectorRecord, ingested_at: &str) -> Value {
    let mut payload = Map::new();
    payload.insert("product_id".into(), Value::String(record.id.clone()));
    payload.insert("image".into(), Value::String(record.image.clone()));
    payload.insert(
        "description".into(),
        Value::String(record.description.clone()),
    );
    payload.insert(
        "description_hash".into(),
        Value::String(compute_description_hash(&record.description)),
    );
    payload.insert("metadata".into(), record.metadata.clone());
    payload.insert("date".into(), Value::String(record.date.clone()));
    payload.insert("like".into(), Value::from(record.likes));
    payload.insert("comment".into(), Value::from(record.comments));
    payload.insert("share".into(), Value::from(record.shares));
    payload.insert("platform".into(), Value::String(record.platform.clone()));
    payload.insert(
        "name_store".into(),
        Value::String(record.store_name.clone()),
    );

    if !record.link.trim().is_empty() {
        payload.insert("link_redirect".into(), Value::String(record.link.clone()));
    }

    payload.insert("ingested_at".into(), Value::String(ingested_at.to_string()));
    Value::Object(payload)
}
