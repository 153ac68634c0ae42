//! Medium Access Control (MAC) Layer Implementation
//!
//! Consumes the PHY -> MAC queue. Every subframe tick produces a downlink and
//! an uplink schedule for the PHY, random access detections create new users,
//! and uplink decodes are accounted.

pub mod scheduler;

use crate::user::User;
use crate::user_mgr::UserManager;
use crate::LayerHandler;
use common::types::{Layer, Rnti};
use common::utils::bytes_to_hex;
use interfaces::message_types::{
    DciAllocation, MessagePayload, PdschScheduleMsg, PrachDecodeMsg, PucchDecodeMsg,
    PuschDecodeMsg, PuschScheduleMsg, ReadyToSendMsg, MAX_PDCCH_ALLOCS,
};
use interfaces::msgq::queue_name;
use interfaces::{Message, MsgqRegistry};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

pub use scheduler::{plan_uplink, MacScheduler, UlGrant, UlGrantRequest, UlPlan};

/// MAC entry point used by the per-user uplink scheduling loop
pub trait UlScheduler: Send + Sync {
    /// Request an uplink grant of `bit_budget` bits for `user`
    ///
    /// Must not block, it runs with the user context locked.
    fn schedule_uplink(&self, user: &User, bit_budget: u32);
}

/// MAC layer configuration
#[derive(Debug, Clone)]
pub struct MacConfig {
    /// Downlink resource blocks per subframe
    pub n_dl_prbs: u32,
    /// Uplink resource blocks per subframe
    pub n_ul_prbs: u32,
    /// Uplink capacity of one resource block in bits
    pub bits_per_prb: u32,
    /// Modulation and coding scheme of uplink grants
    pub ul_mcs: u8,
    /// Name of the MAC -> PHY queue
    pub phy_queue: String,
}

impl Default for MacConfig {
    fn default() -> Self {
        Self {
            n_dl_prbs: 25,
            n_ul_prbs: 25,
            bits_per_prb: 120,
            ul_mcs: 4,
            phy_queue: queue_name(Layer::Mac, Layer::Phy),
        }
    }
}

/// MAC layer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MacStats {
    pub subframes: u64,
    pub prach_preambles: u64,
    pub users_created: u64,
    pub ul_grants: u64,
    pub pucch_decodes: u64,
    pub pusch_decodes: u64,
    pub pusch_bytes: u64,
    pub send_failures: u64,
}

/// MAC layer
pub struct MacLayer {
    config: MacConfig,
    scheduler: Arc<MacScheduler>,
    user_mgr: Arc<UserManager>,
    registry: Arc<MsgqRegistry>,
    stats: Mutex<MacStats>,
}

impl MacLayer {
    pub fn new(
        config: MacConfig,
        scheduler: Arc<MacScheduler>,
        user_mgr: Arc<UserManager>,
        registry: Arc<MsgqRegistry>,
    ) -> Arc<Self> {
        info!(
            "MAC layer: {} DL PRBs, {} UL PRBs, {} bits/PRB, sending to {}",
            config.n_dl_prbs, config.n_ul_prbs, config.bits_per_prb, config.phy_queue
        );
        Arc::new(Self {
            config,
            scheduler,
            user_mgr,
            registry,
            stats: Mutex::new(MacStats::default()),
        })
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> MacStats {
        *self.stats_mut()
    }

    fn stats_mut(&self) -> MutexGuard<'_, MacStats> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn send_to_phy(&self, payload: MessagePayload) {
        let kind = payload.kind();
        if let Err(e) = self.registry.send(&self.config.phy_queue, Layer::Phy, payload) {
            warn!("Failed to send {} to PHY: {}", kind, e);
            self.stats_mut().send_failures += 1;
        }
    }

    fn handle_ready_to_send(&self, rts: ReadyToSendMsg) {
        trace!("Ready to send DL {} UL {}", rts.dl_fn_combo, rts.ul_fn_combo);
        self.user_mgr.process_delayed_deletes();

        let pdsch = PdschScheduleMsg {
            n_avail_prbs: self.config.n_dl_prbs,
            fn_combo: rts.dl_fn_combo,
            ..Default::default()
        };
        let pusch = self.build_pusch_schedule(rts);
        let n_grants = pusch.allocations.len() as u64;

        self.send_to_phy(MessagePayload::PdschSchedule(pdsch));
        self.send_to_phy(MessagePayload::PuschSchedule(pusch));

        let mut stats = self.stats_mut();
        stats.subframes += 1;
        stats.ul_grants += n_grants;
    }

    fn build_pusch_schedule(&self, rts: ReadyToSendMsg) -> PuschScheduleMsg {
        let mut pusch = PuschScheduleMsg {
            n_avail_prbs: self.config.n_ul_prbs,
            fn_combo: rts.ul_fn_combo,
            ..Default::default()
        };

        let requests = self.scheduler.take_ul_grants();
        if requests.is_empty() {
            return pusch;
        }
        let plan = plan_uplink(
            requests,
            self.config.n_ul_prbs,
            self.config.bits_per_prb,
            MAX_PDCCH_ALLOCS,
        );

        let mut n_sched_prbs = 0;
        for grant in &plan.grants {
            let Some(ndi) = self.next_ul_ndi(grant.c_rnti) else {
                continue;
            };
            let alloc = DciAllocation {
                rnti: grant.c_rnti,
                n_prb: grant.n_prb,
                mcs: self.config.ul_mcs,
                ndi,
                tbs_bits: grant.n_prb * self.config.bits_per_prb,
            };
            // Both lists hold at most MAX_PDCCH_ALLOCS grants
            if pusch.allocations.push(alloc).is_err() || pusch.decodes.push(alloc).is_err() {
                break;
            }
            n_sched_prbs += grant.n_prb;
            debug!(
                "UL grant C-RNTI {} PRBs {}..{} NDI {}",
                grant.c_rnti,
                grant.first_prb,
                grant.first_prb + grant.n_prb,
                ndi
            );
        }
        self.scheduler.requeue(plan.deferred);

        pusch.n_sched_prbs = n_sched_prbs;
        pusch.next_prb = u8::try_from(plan.n_sched_prbs).unwrap_or(u8::MAX);
        pusch
    }

    /// Flip and return the uplink NDI of a user, `None` if it is gone
    fn next_ul_ndi(&self, c_rnti: Rnti) -> Option<bool> {
        let user = match self.user_mgr.find_user_by_c_rnti(c_rnti) {
            Ok(user) => user,
            Err(e) => {
                debug!("Dropping uplink grant: {}", e);
                return None;
            }
        };
        let mut guard = User::lock(&user);
        guard.flip_ul_ndi();
        Some(guard.get_ul_ndi())
    }

    fn handle_prach_decode(&self, prach: PrachDecodeMsg) {
        let mut created = 0;
        for attempt in prach.attempts.iter() {
            match self.user_mgr.allocate_user() {
                Ok(user) => {
                    info!(
                        "PRACH preamble {} TA {} at {} -> C-RNTI {}",
                        attempt.preamble,
                        attempt.timing_adv,
                        prach.fn_combo,
                        User::lock(&user).get_c_rnti()
                    );
                    created += 1;
                }
                Err(e) => warn!("PRACH preamble {} not served: {}", attempt.preamble, e),
            }
        }

        let mut stats = self.stats_mut();
        stats.prach_preambles += prach.attempts.len() as u64;
        stats.users_created += created;
    }

    fn handle_pucch_decode(&self, pucch: PucchDecodeMsg) {
        trace!("PUCCH decode at {}", pucch.fn_combo);
        self.stats_mut().pucch_decodes += 1;
    }

    fn handle_pusch_decode(&self, pusch: PuschDecodeMsg) {
        let len = pusch.msg.len();
        debug!(
            "PUSCH decode C-RNTI {} at {}: {} bytes [{}]",
            pusch.rnti,
            pusch.fn_combo,
            len,
            bytes_to_hex(&pusch.msg[..len.min(8)])
        );
        if self.user_mgr.find_user_by_c_rnti(pusch.rnti).is_err() {
            debug!("PUSCH decode for unknown C-RNTI {}", pusch.rnti);
        }

        let mut stats = self.stats_mut();
        stats.pusch_decodes += 1;
        stats.pusch_bytes += len as u64;
    }
}

impl LayerHandler for MacLayer {
    fn layer(&self) -> Layer {
        Layer::Mac
    }

    fn handle_message(&self, msg: Message) {
        match msg.into_payload() {
            MessagePayload::ReadyToSend(rts) => self.handle_ready_to_send(rts),
            MessagePayload::PrachDecode(prach) => self.handle_prach_decode(prach),
            MessagePayload::PucchDecode(pucch) => self.handle_pucch_decode(pucch),
            MessagePayload::PuschDecode(pusch) => self.handle_pusch_decode(pusch),
            other => warn!("MAC received unexpected {}", other.kind()),
        }
    }
}
