//! Access decision resolution
//!
//! Maps a corrected plate to its stored status and an allow/block decision.
//! Plates the store has never seen are created as `visitor`; whether a
//! visitor is let through is governed by `UnknownPlatePolicy`.

use crate::domain::types::{Decision, VehicleStatus};
use crate::infra::config::UnknownPlatePolicy;
use crate::io::status_store::VehicleStatusStore;
use std::sync::Arc;
use tracing::info;

/// Resolved status and decision for one plate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessResolution {
    pub status: VehicleStatus,
    pub decision: Decision,
    /// True when this lookup created the status record
    pub created: bool,
}

pub struct DecisionResolver {
    store: Arc<dyn VehicleStatusStore>,
    unknown_policy: UnknownPlatePolicy,
}

/// Decision for a status under the given visitor policy
pub fn decision_for(status: VehicleStatus, unknown_policy: UnknownPlatePolicy) -> Decision {
    match (status, unknown_policy) {
        (VehicleStatus::Blacklisted, _) => Decision::Blocked,
        (VehicleStatus::Allowed, _) => Decision::Allowed,
        (VehicleStatus::Visitor, UnknownPlatePolicy::Allow) => Decision::Allowed,
        (VehicleStatus::Visitor, UnknownPlatePolicy::Deny) => Decision::Blocked,
    }
}

impl DecisionResolver {
    pub fn new(store: Arc<dyn VehicleStatusStore>, unknown_policy: UnknownPlatePolicy) -> Self {
        Self { store, unknown_policy }
    }

    pub fn store(&self) -> &Arc<dyn VehicleStatusStore> {
        &self.store
    }

    pub fn decide(&self, plate: &str) -> anyhow::Result<AccessResolution> {
        let (status, created) = self.store.get_or_create_status(plate)?;
        if created {
            info!(plate = %plate, status = %status, "vehicle_registered_as_visitor");
        }
        let decision = decision_for(status, self.unknown_policy);
        Ok(AccessResolution { status, decision, created })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::VehicleStatusRecord;
    use crate::io::status_store::MemoryStatusStore;

    fn resolver(policy: UnknownPlatePolicy) -> (DecisionResolver, Arc<MemoryStatusStore>) {
        let store = Arc::new(MemoryStatusStore::with_records([
            VehicleStatusRecord::new("MH20GV3260", VehicleStatus::Blacklisted),
            VehicleStatusRecord::new("MH20CP0688", VehicleStatus::Allowed),
        ]));
        (DecisionResolver::new(store.clone(), policy), store)
    }

    #[test]
    fn test_unknown_plate_becomes_visitor_and_allowed() {
        let (resolver, store) = resolver(UnknownPlatePolicy::Allow);
        let res = resolver.decide("XX00XX0000").unwrap();
        assert_eq!(res.status, VehicleStatus::Visitor);
        assert_eq!(res.decision, Decision::Allowed);
        assert!(res.created);
        assert_eq!(store.get("XX00XX0000").unwrap().unwrap().status, VehicleStatus::Visitor);
    }

    #[test]
    fn test_blacklisted_plate_blocked() {
        let (resolver, _) = resolver(UnknownPlatePolicy::Allow);
        let res = resolver.decide("MH20GV3260").unwrap();
        assert_eq!(res.decision, Decision::Blocked);
        assert!(!res.created);
    }

    #[test]
    fn test_allowed_plate_allowed_under_deny_policy() {
        let (resolver, _) = resolver(UnknownPlatePolicy::Deny);
        assert_eq!(resolver.decide("MH20CP0688").unwrap().decision, Decision::Allowed);
    }

    #[test]
    fn test_deny_policy_blocks_visitors() {
        let (resolver, _) = resolver(UnknownPlatePolicy::Deny);
        let first = resolver.decide("XX00XX0000").unwrap();
        assert_eq!(first.status, VehicleStatus::Visitor);
        assert_eq!(first.decision, Decision::Blocked);
        // still blocked on later sightings
        assert_eq!(resolver.decide("XX00XX0000").unwrap().decision, Decision::Blocked);
    }
}
