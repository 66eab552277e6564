//! Property-based test generators using proptest.

use outbox_engine::RemoteError;
use outbox_store::{Row, WriteOperation};
use proptest::prelude::*;
use serde_json::Value;

/// Strategy for table names.
pub fn table_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,15}"
}

/// Strategy for scalar JSON values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
    ]
}

/// Strategy for rows carrying an integer `id` key plus a few columns.
pub fn row_strategy() -> impl Strategy<Value = Row> {
    (
        0i64..1_000,
        prop::collection::btree_map("[a-z]{1,8}", scalar_strategy(), 0..4),
    )
        .prop_map(|(id, columns)| {
            let mut row: Row = columns.into_iter().collect();
            row.insert("id".into(), Value::from(id));
            row
        })
}

/// Strategy for upserts keyed on `id` and patches filtered on `id`.
pub fn write_operation_strategy() -> impl Strategy<Value = WriteOperation> {
    prop_oneof![
        (table_name_strategy(), prop::collection::vec(row_strategy(), 1..4))
            .prop_map(|(table, rows)| WriteOperation::upsert(table, rows, "id")),
        (table_name_strategy(), 0i64..1_000, row_strategy()).prop_map(|(table, id, mut patch)| {
            patch.remove("id");
            let mut filter = Row::new();
            filter.insert("id".into(), Value::from(id));
            WriteOperation::patch(table, filter, patch)
        }),
    ]
}

/// Strategy for errors worth retrying.
pub fn transient_error_strategy() -> impl Strategy<Value = RemoteError> {
    prop_oneof![
        Just(RemoteError::Timeout),
        Just(RemoteError::connect("connection reset")),
        Just(RemoteError::from_status(429, "too many requests")),
        (500u16..600).prop_map(|status| RemoteError::from_status(status, "server error")),
    ]
}

/// Strategy for errors that will never succeed on retry.
pub fn permanent_error_strategy() -> impl Strategy<Value = RemoteError> {
    prop_oneof![
        (400u16..429).prop_map(|status| RemoteError::from_status(status, "client error")),
        (430u16..500).prop_map(|status| RemoteError::from_status(status, "client error")),
        Just(RemoteError::malformed("invalid payload")),
    ]
}
