//! Server-side fault injection.
//!
//! The controller is shared between the test (which flips faults on and off)
//! and every connection task of the simulation server (which consults it).

use std::sync::{Arc, Mutex, PoisonError};

/// Active fault settings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultPlan {
    /// Acknowledge `despawn_cube` but never remove the cube
    pub ignore_despawns: bool,

    /// Honor at most this many despawns after each `get_cube_list`
    pub despawns_per_list: Option<usize>,

    /// Reply to `get_cube_state` with half the payload and no delimiter
    pub truncate_state_replies: bool,

    /// Standard deviation of noise added to reported positions
    pub position_noise_std: f64,
}

/// Network controller for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultController {
    /// Current plan
    plan: Arc<Mutex<FaultPlan>>,

    /// Despawns still honored before the next list request
    despawn_allowance: Arc<Mutex<Option<usize>>>,
}

impl FaultController {
    /// Creates a controller with no faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the current plan.
    pub fn plan(&self) -> FaultPlan {
        self.plan.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the whole plan.
    pub fn set_plan(&self, plan: FaultPlan) {
        let allowance = plan.despawns_per_list;
        *self.plan.lock().unwrap_or_else(PoisonError::into_inner) = plan;
        *self
            .despawn_allowance
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = allowance;
    }

    /// Makes the server drop every despawn.
    pub fn set_ignore_despawns(&self, ignore: bool) {
        self.update(|plan| plan.ignore_despawns = ignore);
    }

    /// Limits how many despawns are honored per list request.
    pub fn set_despawns_per_list(&self, limit: Option<usize>) {
        self.update(|plan| plan.despawns_per_list = limit);
        *self
            .despawn_allowance
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = limit;
    }

    /// Makes state replies arrive truncated.
    pub fn set_truncate_state_replies(&self, truncate: bool) {
        self.update(|plan| plan.truncate_state_replies = truncate);
    }

    /// Sets reported-position noise.
    pub fn set_position_noise(&self, std_dev: f64) {
        self.update(|plan| plan.position_noise_std = std_dev.max(0.0));
    }

    /// Clears every fault.
    pub fn heal_all(&self) {
        self.set_plan(FaultPlan::default());
    }

    /// Called on every `get_cube_list`; refills the despawn allowance.
    pub fn on_list_request(&self) {
        let limit = self.plan().despawns_per_list;
        *self
            .despawn_allowance
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = limit;
    }

    /// Decides whether a despawn is honored, consuming allowance if it is.
    pub fn admit_despawn(&self) -> bool {
        if self.plan().ignore_despawns {
            return false;
        }

        let mut allowance = self
            .despawn_allowance
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match allowance.as_mut() {
            None => true,
            Some(0) => false,
            Some(left) => {
                *left -= 1;
                true
            }
        }
    }

    /// Returns true if state replies should be truncated.
    pub fn truncate_state_replies(&self) -> bool {
        self.plan().truncate_state_replies
    }

    fn update(&self, change: impl FnOnce(&mut FaultPlan)) {
        let mut plan = self.plan.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut plan);
    }
}
