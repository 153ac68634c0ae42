//! Loopback PHY
//!
//! Stands in for the physical layer: consumes the MAC -> PHY queue, logs the
//! schedules and reports an empty decode back to the MAC for every uplink
//! grant. Also drives the subframe clock.

use common::types::{FnCombo, Layer};
use interfaces::message_types::{MessagePayload, PuschDecodeMsg, ReadyToSendMsg};
use interfaces::msgq::queue_name;
use interfaces::{InterfaceError, Message, MsgqRegistry};
use layers::LayerHandler;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Subframes between the downlink and the uplink subframe of a tick
const UL_SCHED_OFFSET: u32 = 4;

/// Loopback PHY layer
pub struct LoopbackPhy {
    registry: Arc<MsgqRegistry>,
    mac_queue: String,
    pdsch_schedules: AtomicU64,
    pusch_schedules: AtomicU64,
    ul_grants: AtomicU64,
}

impl LoopbackPhy {
    pub fn new(registry: Arc<MsgqRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            mac_queue: queue_name(Layer::Phy, Layer::Mac),
            pdsch_schedules: AtomicU64::new(0),
            pusch_schedules: AtomicU64::new(0),
            ul_grants: AtomicU64::new(0),
        })
    }

    /// Number of (PDSCH, PUSCH) schedules and uplink grants seen
    pub fn counters(&self) -> (u64, u64, u64) {
        (
            self.pdsch_schedules.load(Ordering::Relaxed),
            self.pusch_schedules.load(Ordering::Relaxed),
            self.ul_grants.load(Ordering::Relaxed),
        )
    }
}

impl LayerHandler for LoopbackPhy {
    fn layer(&self) -> Layer {
        Layer::Phy
    }

    fn handle_message(&self, msg: Message) {
        match msg.into_payload() {
            MessagePayload::PdschSchedule(pdsch) => {
                trace!("PDSCH schedule {} ({} allocations)", pdsch.fn_combo, pdsch.pdcch.len());
                self.pdsch_schedules.fetch_add(1, Ordering::Relaxed);
            }
            MessagePayload::PuschSchedule(pusch) => {
                self.pusch_schedules.fetch_add(1, Ordering::Relaxed);
                for alloc in pusch.decodes.iter() {
                    debug!(
                        "PUSCH {} C-RNTI {} {} PRBs {} bits",
                        pusch.fn_combo, alloc.rnti, alloc.n_prb, alloc.tbs_bits
                    );
                    self.ul_grants.fetch_add(1, Ordering::Relaxed);

                    // The MAC may be blocked sending to us, never wait on it
                    let decode = MessagePayload::PuschDecode(PuschDecodeMsg {
                        fn_combo: pusch.fn_combo,
                        rnti: alloc.rnti,
                        msg: Default::default(),
                    });
                    if let Err(e) = self.registry.try_send(&self.mac_queue, Layer::Mac, decode) {
                        warn!("Dropping PUSCH decode for C-RNTI {}: {}", alloc.rnti, e);
                    }
                }
            }
            other => warn!("PHY received unexpected {}", other.kind()),
        }
    }
}

/// Send a `ReadyToSend` tick to the MAC every millisecond
///
/// Runs until `stop` is set, the MAC queue disappears or `limit` ticks were
/// sent. Returns the number of ticks sent.
pub fn run_subframe_clock(
    registry: &MsgqRegistry,
    stop: &AtomicBool,
    limit: Option<u64>,
) -> Result<u64, InterfaceError> {
    let mac = registry.handle(&queue_name(Layer::Phy, Layer::Mac))?;
    let start = Instant::now();
    let mut ticks = 0u64;
    let mut current = FnCombo::default();

    info!("Subframe clock started");
    while !stop.load(Ordering::Relaxed) && limit.map_or(true, |limit| ticks < limit) {
        mac.send(
            Layer::Mac,
            MessagePayload::ReadyToSend(ReadyToSendMsg {
                dl_fn_combo: current,
                ul_fn_combo: current.add(UL_SCHED_OFFSET),
            }),
        )?;
        ticks += 1;
        current = current.add(1);

        let next = start + Duration::from_millis(ticks);
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }
    info!("Subframe clock stopped after {} subframes", ticks);

    Ok(ticks)
}
