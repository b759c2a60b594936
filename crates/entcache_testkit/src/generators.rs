//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, parameters and store action
//! sequences that keep the shapes the engine expects.

use entcache_core::{EntityAction, InsertPosition, Record, RecordId};
use entcache_protocol::Params;
use proptest::prelude::*;
use serde_json::{json, Value};

/// Strategy for generating entity names.
pub fn entity_name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z_]{0,15}"
}

/// Strategy for generating record ids from a small range, so generated
/// actions hit the same records.
pub fn record_id_strategy() -> impl Strategy<Value = u64> {
    1u64..8
}

/// Strategy for generating scalar JSON values.
pub fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z ]{0,12}".prop_map(Value::from),
    ]
}

/// Strategy for generating a record with an id and a few fields.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    (
        record_id_strategy(),
        prop::collection::btree_map("[a-z]{1,6}", scalar_strategy(), 0..4),
    )
        .prop_map(|(id, fields)| {
            let mut value = json!({ "id": id });
            if let Value::Object(map) = &mut value {
                for (name, field) in fields {
                    if name != "id" {
                        map.insert(name, field);
                    }
                }
            }
            Record::new(value)
        })
}

/// Strategy for generating request parameters.
pub fn params_strategy() -> impl Strategy<Value = Params> {
    prop::collection::btree_map("[a-z]{1,8}", scalar_strategy(), 0..5)
        .prop_map(|fields| fields.into_iter().collect())
}

fn data_key_strategy() -> impl Strategy<Value = String> {
    record_id_strategy().prop_map(|id| format!("items/{id}"))
}

fn list_key_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("list:items".to_string()),
        Just("list:items:{\"page\":2}".to_string()),
        Just("list:items:{\"done\":true}".to_string()),
    ]
}

fn position_strategy() -> impl Strategy<Value = InsertPosition> {
    prop_oneof![Just(InsertPosition::Append), Just(InsertPosition::Prepend)]
}

/// Strategy for generating confirmed-data store actions.
///
/// Optimistic actions are left out; tests drive those explicitly.
pub fn entity_action_strategy() -> impl Strategy<Value = EntityAction> {
    prop_oneof![
        3 => (data_key_strategy(), record_strategy())
            .prop_map(|(key, record)| EntityAction::SetData { key, record }),
        2 => (list_key_strategy(), prop::collection::vec(record_strategy(), 0..5))
            .prop_map(|(key, records)| EntityAction::SetList { key, records }),
        1 => (data_key_strategy(), any::<bool>())
            .prop_map(|(key, loading)| EntityAction::SetLoading { key, loading }),
        1 => Just(EntityAction::Invalidate),
        2 => (record_strategy(), position_strategy())
            .prop_map(|(record, position)| EntityAction::InsertIntoLists { record, position }),
        1 => record_strategy().prop_map(|record| EntityAction::ReplaceInLists { record }),
        1 => (record_id_strategy(), "[a-z]{1,6}")
            .prop_map(|(id, tag)| EntityAction::MergeInLists {
                id: RecordId::from(id),
                fields: json!({ "tag": tag }),
            }),
        1 => record_id_strategy()
            .prop_map(|id| EntityAction::RemoveFromLists { id: RecordId::from(id) }),
        1 => data_key_strategy().prop_map(|key| EntityAction::RemoveData { key }),
    ]
}

/// Strategy for generating a sequence of store actions.
pub fn action_sequence_strategy(
    min_actions: usize,
    max_actions: usize,
) -> impl Strategy<Value = Vec<EntityAction>> {
    prop::collection::vec(entity_action_strategy(), min_actions..max_actions)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
