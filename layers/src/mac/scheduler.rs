//! MAC Scheduler Implementation
//!
//! Collects uplink grant requests raised by the per-user scheduling timers and
//! distributes the uplink resource blocks of a subframe among them.

use super::UlScheduler;
use crate::user::User;
use common::types::Rnti;
use common::utils::prbs_for_bits;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

/// Uplink capacity requested for one user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlGrantRequest {
    /// Requesting user
    pub c_rnti: Rnti,
    /// Requested capacity in bits
    pub bits: u32,
}

/// Resource blocks given to one user in a subframe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UlGrant {
    pub c_rnti: Rnti,
    /// First resource block
    pub first_prb: u32,
    /// Number of resource blocks
    pub n_prb: u32,
}

/// Outcome of distributing one uplink subframe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UlPlan {
    /// Grants placed in this subframe
    pub grants: Vec<UlGrant>,
    /// Requests that did not fit
    pub deferred: Vec<UlGrantRequest>,
    /// Resource blocks used
    pub n_sched_prbs: u32,
}

/// Pending uplink grant requests, first come first served
#[derive(Debug, Default)]
pub struct MacScheduler {
    pending: Mutex<VecDeque<UlGrantRequest>>,
}

impl MacScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<UlGrantRequest>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Take every pending request
    pub fn take_ul_grants(&self) -> Vec<UlGrantRequest> {
        self.pending().drain(..).collect()
    }

    /// Put requests that could not be served back in front of the queue
    pub fn requeue(&self, requests: Vec<UlGrantRequest>) {
        let mut pending = self.pending();
        for request in requests.into_iter().rev() {
            pending.push_front(request);
        }
    }

    /// Number of pending requests
    pub fn pending_grants(&self) -> usize {
        self.pending().len()
    }
}

impl UlScheduler for MacScheduler {
    fn schedule_uplink(&self, user: &User, bit_budget: u32) {
        if !user.is_c_rnti_set() {
            debug!("Skipping uplink grant for released C-RNTI {}", user.get_c_rnti());
            return;
        }
        if bit_budget == 0 {
            return;
        }

        let c_rnti = user.get_c_rnti();
        let mut pending = self.pending();
        match pending.iter_mut().find(|request| request.c_rnti == c_rnti) {
            Some(request) => request.bits = request.bits.saturating_add(bit_budget),
            None => pending.push_back(UlGrantRequest { c_rnti, bits: bit_budget }),
        }
        trace!("Uplink grant request C-RNTI {} {} bits", c_rnti, bit_budget);
    }
}

/// Place requests on consecutive resource blocks until the subframe is full
pub fn plan_uplink(
    requests: Vec<UlGrantRequest>,
    n_avail_prbs: u32,
    bits_per_prb: u32,
    max_grants: usize,
) -> UlPlan {
    let mut plan = UlPlan::default();

    for request in requests {
        let free = n_avail_prbs - plan.n_sched_prbs;
        let n_prb = prbs_for_bits(request.bits, bits_per_prb, free);
        if n_prb == 0 || plan.grants.len() >= max_grants {
            plan.deferred.push(request);
            continue;
        }

        plan.grants.push(UlGrant {
            c_rnti: request.c_rnti,
            first_prb: plan.n_sched_prbs,
            n_prb,
        });
        plan.n_sched_prbs += n_prb;

        // Whatever did not fit is requested again next subframe
        let carried = n_prb * bits_per_prb;
        if carried < request.bits {
            plan.deferred.push(UlGrantRequest {
                c_rnti: request.c_rnti,
                bits: request.bits - carried,
            });
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(rnti: u16, bits: u32) -> UlGrantRequest {
        UlGrantRequest { c_rnti: Rnti(rnti), bits }
    }

    #[test]
    fn test_plan_contiguous() {
        let plan = plan_uplink(vec![request(0x40, 176), request(0x41, 800)], 25, 120, 10);
        assert_eq!(
            plan.grants,
            vec![
                UlGrant { c_rnti: Rnti(0x40), first_prb: 0, n_prb: 2 },
                UlGrant { c_rnti: Rnti(0x41), first_prb: 2, n_prb: 7 },
            ]
        );
        assert_eq!(plan.n_sched_prbs, 9);
        assert!(plan.deferred.is_empty());
    }

    #[test]
    fn test_plan_defers_overflow() {
        let plan = plan_uplink(vec![request(0x40, 2400), request(0x41, 176)], 10, 120, 10);
        assert_eq!(plan.grants.len(), 1);
        assert_eq!(plan.grants[0].n_prb, 10);
        assert_eq!(plan.deferred, vec![request(0x40, 1200), request(0x41, 176)]);

        let plan = plan_uplink(vec![request(0x40, 100), request(0x41, 100)], 25, 120, 1);
        assert_eq!(plan.grants.len(), 1);
        assert_eq!(plan.deferred, vec![request(0x41, 100)]);
    }

    #[test]
    fn test_requeue_keeps_order() {
        let scheduler = MacScheduler::new();
        scheduler.requeue(vec![request(0x40, 1), request(0x41, 2)]);
        scheduler.requeue(vec![request(0x42, 3)]);
        assert_eq!(scheduler.pending_grants(), 3);
        assert_eq!(
            scheduler.take_ul_grants(),
            vec![request(0x42, 3), request(0x40, 1), request(0x41, 2)]
        );
        assert_eq!(scheduler.pending_grants(), 0);
    }
}
