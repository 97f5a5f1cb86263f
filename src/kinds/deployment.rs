use serde_json::Value;

use crate::waiter::{Observation, Verdict};

const PROGRESSING: &str = "Progressing";
const NEW_REPLICA_SET_AVAILABLE: &str = "NewReplicaSetAvailable";

/// Wait for the `Progressing` condition to report the new replica set as available.
///
/// A `Progressing` condition with status `False` means the rollout exceeded its progress
/// deadline, which no amount of polling fixes. Reads the projected `conditions` field.
pub fn rollout_complete(observation: &Observation) -> Verdict {
    let conditions = observation.data["conditions"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default();

    let field = |condition: &Value, name: &str| {
        condition
            .get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    for condition in conditions {
        if field(condition, "type") != PROGRESSING {
            continue;
        }

        match field(condition, "status").as_str() {
            "True" if field(condition, "reason") == NEW_REPLICA_SET_AVAILABLE => {
                return Verdict::Accept
            }
            "False" => {
                return Verdict::Reject(format!(
                    "{}: {}",
                    field(condition, "reason"),
                    field(condition, "message")
                ))
            }
            _ => {}
        }
    }

    Verdict::Retry
}
