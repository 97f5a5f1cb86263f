use crate::waiter::{Observation, Verdict};

/// Ready once at least one daemon pod is available. Reads the projected `number_available`.
pub fn pods_available(observation: &Observation) -> Verdict {
    observation.data["number_available"]
        .as_u64()
        .map_or(false, |available| available > 0)
        .into()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn waits_for_an_available_pod() {
        let observe = |data| pods_available(&Observation { attempt: 1, data });

        assert_eq!(observe(json!({ "number_available": null })), Verdict::Retry);
        assert_eq!(observe(json!({ "number_available": 0 })), Verdict::Retry);
        assert_eq!(observe(json!({ "number_available": 3 })), Verdict::Accept);
    }
}
