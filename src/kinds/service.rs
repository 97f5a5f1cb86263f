use crate::waiter::{Observation, Verdict};

/// `LoadBalancer` services are ready once the cloud assigned an ingress point; every other
/// service type is ready as soon as it exists.
///
/// Reads the projected `type` and `ingress` fields.
pub fn load_balancer_ready(observation: &Observation) -> Verdict {
    if observation.data["type"] != "LoadBalancer" {
        return Verdict::Accept;
    }

    observation.data["ingress"]
        .as_array()
        .map_or(false, |ingress| !ingress.is_empty())
        .into()
}
