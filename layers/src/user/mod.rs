//! User Context
//!
//! Per-device session state of the eNodeB: identities, NAS security context,
//! security capabilities, radio bearers, NAS procedure variables and the QoS
//! driven uplink scheduling loop.
//!
//! A context is shared as [`SharedUser`]. Radio bearers are owned exclusively
//! by their slot and refer back to the context through a weak reference.
//! Timer callbacks only hold a weak reference as well, so dropping the last
//! strong reference ends the context and its timers.

pub mod capabilities;
pub mod mme;
pub mod rb;
pub mod security;

use crate::mac::UlScheduler;
use crate::timer_mgr::{TimerCallback, TimerId, TimerManager};
use crate::user_mgr::UserDirectory;
use crate::LayerError;
use capabilities::{Capabilities, LegacyAlgorithms};
use common::types::{Guti, QosClass, RbId, Rnti, UserId};
use common::utils::ttis_to_ms;
use mme::{MmeContext, ProtocolConfigOptions};
use rb::RadioBearer;
use security::AuthVector;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use rb::{MmeProcedure, MmeState, RrcProcedure, RrcState};

/// Default C-RNTI release timer in milliseconds
pub const C_RNTI_RELEASE_TIMER_MS: u64 = 500;

/// Shared handle to a user context
pub type SharedUser = Arc<Mutex<User>>;

/// Services a user context depends on
#[derive(Clone)]
pub struct UserDeps {
    /// Timer service
    pub timer_mgr: Arc<TimerManager>,
    /// MAC uplink scheduling entry point
    pub ul_scheduler: Arc<dyn UlScheduler>,
    /// Directory owning the C-RNTI space
    pub directory: Weak<dyn UserDirectory>,
    /// C-RNTI release timer in milliseconds
    pub c_rnti_release_ms: u64,
}

/// Whether the uplink scheduling loop is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UlScheduleState {
    NoSchedule,
    Scheduled { period_ms: u64 },
}

/// Session state of one device
pub struct User {
    /// Handle to the shared cell holding this context
    self_ref: Weak<Mutex<User>>,
    deps: UserDeps,

    // Identity
    id: Option<UserId>,
    guti: Option<Guti>,
    temp_id: Option<u64>,
    c_rnti: Rnti,
    c_rnti_set: bool,
    ip_addr: Option<Ipv4Addr>,

    // Security
    auth_vec: Option<AuthVector>,
    caps: Capabilities,

    // Radio bearers, SRB0 always exists
    srb0: RadioBearer,
    srb1: Option<RadioBearer>,
    srb2: Option<RadioBearer>,
    drbs: [Option<RadioBearer>; RbId::MAX_DRBS],

    mme: MmeContext,

    // MAC
    dl_ndi: bool,
    ul_ndi: bool,

    // QoS and timers
    qos: QosClass,
    c_rnti_timer_id: Option<TimerId>,
    ul_sched_timer_id: Option<TimerId>,
    ul_sched_period: Duration,
    ul_sched_deadline: Option<Instant>,

    del_ticks: u32,
}

impl User {
    /// Create a context with SRB0 set up and no QoS
    pub fn new_shared(deps: UserDeps) -> SharedUser {
        Arc::new_cyclic(|self_ref: &Weak<Mutex<User>>| {
            Mutex::new(User {
                self_ref: self_ref.clone(),
                deps,
                id: None,
                guti: None,
                temp_id: None,
                c_rnti: Rnti::UNSET,
                c_rnti_set: false,
                ip_addr: None,
                auth_vec: None,
                caps: Capabilities::default(),
                srb0: RadioBearer::new(RbId::Srb0, self_ref.clone()),
                srb1: None,
                srb2: None,
                drbs: Default::default(),
                mme: MmeContext::new(),
                dl_ndi: false,
                ul_ndi: false,
                qos: QosClass::None,
                c_rnti_timer_id: None,
                ul_sched_timer_id: None,
                ul_sched_period: Duration::ZERO,
                ul_sched_deadline: None,
                del_ticks: 0,
            })
        })
    }

    /// Lock a shared context
    pub fn lock(user: &SharedUser) -> MutexGuard<'_, User> {
        user.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reset the context for reuse
    ///
    /// Drops SRB1, SRB2 and all DRBs, returns SRB0 to idle, invalidates the
    /// C-RNTI and resets the NAS procedure variables and NDIs. Identities,
    /// security context and QoS are kept.
    pub fn init(&mut self) {
        self.srb0.reset();
        self.srb1 = None;
        self.srb2 = None;
        self.drbs = Default::default();
        self.c_rnti = Rnti::UNSET;
        self.c_rnti_set = false;
        self.mme.reset();
        self.dl_ndi = false;
        self.ul_ndi = false;
    }

    /// Shared cell of this context, if it is still alive
    pub fn shared(&self) -> Option<SharedUser> {
        self.self_ref.upgrade()
    }

    // Identity

    pub fn set_id(&mut self, id: UserId) {
        self.id = Some(id);
    }

    pub fn get_id(&self) -> Option<&UserId> {
        self.id.as_ref()
    }

    pub fn is_id_set(&self) -> bool {
        self.id.is_some()
    }

    /// IMSI as a 15 digit string
    pub fn imsi_str(&self) -> Option<String> {
        self.id.map(|id| format!("{:015}", id.imsi))
    }

    /// IMEI as a 15 digit string
    pub fn imei_str(&self) -> Option<String> {
        self.id.map(|id| format!("{:015}", id.imei))
    }

    pub fn set_guti(&mut self, guti: Guti) {
        self.guti = Some(guti);
    }

    pub fn get_guti(&self) -> Option<&Guti> {
        self.guti.as_ref()
    }

    pub fn is_guti_set(&self) -> bool {
        self.guti.is_some()
    }

    pub fn set_temp_id(&mut self, temp_id: u64) {
        self.temp_id = Some(temp_id);
    }

    pub fn get_temp_id(&self) -> Option<u64> {
        self.temp_id
    }

    /// Assign the C-RNTI and mark it valid
    pub fn set_c_rnti(&mut self, c_rnti: Rnti) {
        self.c_rnti = c_rnti;
        self.c_rnti_set = true;
    }

    pub fn get_c_rnti(&self) -> Rnti {
        self.c_rnti
    }

    pub fn is_c_rnti_set(&self) -> bool {
        self.c_rnti_set
    }

    /// Start the timer after which the C-RNTI is invalidated and released
    ///
    /// A release timer already running is restarted.
    pub fn start_c_rnti_release_timer(&mut self) {
        self.stop_c_rnti_release_timer();
        let period_ms = self.deps.c_rnti_release_ms;
        let id = self.deps.timer_mgr.start_timer(period_ms, self.timer_callback());
        self.c_rnti_timer_id = Some(id);
        debug!("C-RNTI {} release timer {} started ({} ms)", self.c_rnti, id, period_ms);
    }

    /// Stop a running C-RNTI release timer
    pub fn stop_c_rnti_release_timer(&mut self) {
        if let Some(id) = self.c_rnti_timer_id.take() {
            self.stop_timer(id);
        }
    }

    pub fn set_ip_addr(&mut self, addr: Ipv4Addr) {
        self.ip_addr = Some(addr);
    }

    pub fn get_ip_addr(&self) -> Option<Ipv4Addr> {
        self.ip_addr
    }

    pub fn is_ip_addr_set(&self) -> bool {
        self.ip_addr.is_some()
    }

    // Security

    /// Install a new security context with fresh NAS counts
    pub fn set_auth_vec(&mut self, auth_vec: AuthVector) {
        self.auth_vec = Some(auth_vec);
    }

    pub fn get_auth_vec(&self) -> Option<&AuthVector> {
        self.auth_vec.as_ref()
    }

    pub fn is_auth_vec_set(&self) -> bool {
        self.auth_vec.is_some()
    }

    /// Advance the uplink NAS COUNT, no-op without a security context
    pub fn increment_nas_count_ul(&mut self) {
        if let Some(av) = self.auth_vec.as_mut() {
            if !av.increment_ul() {
                warn!("C-RNTI {} uplink NAS COUNT exhausted, discarding security context", self.c_rnti);
                self.auth_vec = None;
            }
        }
    }

    /// Advance the downlink NAS COUNT, no-op without a security context
    pub fn increment_nas_count_dl(&mut self) {
        if let Some(av) = self.auth_vec.as_mut() {
            if !av.increment_dl() {
                warn!("C-RNTI {} downlink NAS COUNT exhausted, discarding security context", self.c_rnti);
                self.auth_vec = None;
            }
        }
    }

    // Capabilities

    pub fn set_eea_support(&mut self, index: u8, enabled: bool) {
        self.caps.eea.set_support(index, enabled);
    }

    pub fn get_eea_support(&self, index: u8) -> bool {
        self.caps.eea.supports(index)
    }

    pub fn set_eia_support(&mut self, index: u8, enabled: bool) {
        self.caps.eia.set_support(index, enabled);
    }

    pub fn get_eia_support(&self, index: u8) -> bool {
        self.caps.eia.supports(index)
    }

    pub fn set_uea_support(&mut self, index: u8, enabled: bool) {
        set_legacy_support(&mut self.caps.uea, index, enabled);
    }

    pub fn get_uea_support(&self, index: u8) -> bool {
        self.caps.uea.supported.supports(index)
    }

    pub fn is_uea_set(&self) -> bool {
        self.caps.uea.present
    }

    pub fn set_uia_support(&mut self, index: u8, enabled: bool) {
        set_legacy_support(&mut self.caps.uia, index, enabled);
    }

    pub fn get_uia_support(&self, index: u8) -> bool {
        self.caps.uia.supported.supports(index)
    }

    pub fn is_uia_set(&self) -> bool {
        self.caps.uia.present
    }

    pub fn set_gea_support(&mut self, index: u8, enabled: bool) {
        set_legacy_support(&mut self.caps.gea, index, enabled);
    }

    pub fn get_gea_support(&self, index: u8) -> bool {
        self.caps.gea.supported.supports(index)
    }

    pub fn is_gea_set(&self) -> bool {
        self.caps.gea.present
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    // Radio bearers

    pub fn get_srb0(&self) -> &RadioBearer {
        &self.srb0
    }

    pub fn get_srb0_mut(&mut self) -> &mut RadioBearer {
        &mut self.srb0
    }

    fn slot(&self, id: RbId) -> Result<&Option<RadioBearer>, LayerError> {
        match id {
            RbId::Srb0 => Err(LayerError::InvalidBearer(id)),
            RbId::Srb1 => Ok(&self.srb1),
            RbId::Srb2 => Ok(&self.srb2),
            _ => id
                .drb_index()
                .map(|idx| &self.drbs[idx])
                .ok_or(LayerError::InvalidBearer(id)),
        }
    }

    fn slot_mut(&mut self, id: RbId) -> Result<&mut Option<RadioBearer>, LayerError> {
        match id {
            RbId::Srb0 => Err(LayerError::InvalidBearer(id)),
            RbId::Srb1 => Ok(&mut self.srb1),
            RbId::Srb2 => Ok(&mut self.srb2),
            _ => id
                .drb_index()
                .map(|idx| &mut self.drbs[idx])
                .ok_or(LayerError::InvalidBearer(id)),
        }
    }

    /// Set up a radio bearer in an empty slot
    ///
    /// SRB0 always exists and cannot be set up.
    pub fn setup_rb(&mut self, id: RbId) -> Result<&mut RadioBearer, LayerError> {
        let owner = self.self_ref.clone();
        let c_rnti = self.c_rnti;
        let slot = self.slot_mut(id)?;
        if slot.is_some() {
            return Err(LayerError::AlreadySetup(id));
        }
        debug!("C-RNTI {} setting up {}", c_rnti, id);
        Ok(slot.insert(RadioBearer::new(id, owner)))
    }

    /// Tear down a radio bearer, releasing it
    pub fn teardown_rb(&mut self, id: RbId) -> Result<(), LayerError> {
        let c_rnti = self.c_rnti;
        self.slot_mut(id)?.take().ok_or(LayerError::NotSetup(id))?;
        debug!("C-RNTI {} tore down {}", c_rnti, id);
        Ok(())
    }

    /// Look up a radio bearer, SRB0 included
    pub fn get_rb(&self, id: RbId) -> Result<&RadioBearer, LayerError> {
        if id == RbId::Srb0 {
            return Ok(&self.srb0);
        }
        self.slot(id)?.as_ref().ok_or(LayerError::NotSetup(id))
    }

    /// Mutable lookup of a radio bearer, SRB0 included
    pub fn get_rb_mut(&mut self, id: RbId) -> Result<&mut RadioBearer, LayerError> {
        if id == RbId::Srb0 {
            return Ok(&mut self.srb0);
        }
        self.slot_mut(id)?.as_mut().ok_or(LayerError::NotSetup(id))
    }

    pub fn setup_srb1(&mut self) -> Result<&mut RadioBearer, LayerError> {
        self.setup_rb(RbId::Srb1)
    }

    pub fn teardown_srb1(&mut self) -> Result<(), LayerError> {
        self.teardown_rb(RbId::Srb1)
    }

    pub fn get_srb1(&self) -> Result<&RadioBearer, LayerError> {
        self.get_rb(RbId::Srb1)
    }

    pub fn setup_srb2(&mut self) -> Result<&mut RadioBearer, LayerError> {
        self.setup_rb(RbId::Srb2)
    }

    pub fn teardown_srb2(&mut self) -> Result<(), LayerError> {
        self.teardown_rb(RbId::Srb2)
    }

    pub fn get_srb2(&self) -> Result<&RadioBearer, LayerError> {
        self.get_rb(RbId::Srb2)
    }

    pub fn setup_drb(&mut self, id: RbId) -> Result<&mut RadioBearer, LayerError> {
        check_drb(id)?;
        self.setup_rb(id)
    }

    pub fn teardown_drb(&mut self, id: RbId) -> Result<(), LayerError> {
        check_drb(id)?;
        self.teardown_rb(id)
    }

    pub fn get_drb(&self, id: RbId) -> Result<&RadioBearer, LayerError> {
        check_drb(id)?;
        self.get_rb(id)
    }

    /// Move every bearer of `other` into this context
    ///
    /// Each slot of this context takes the content of the same slot of
    /// `other`, and the moved bearers are re-pointed at this context. `other`
    /// is left with a fresh idle SRB0 and empty slots.
    pub fn transplant_bearers(&mut self, other: &mut User) {
        let owner = self.self_ref.clone();
        let reown = |mut rb: RadioBearer| {
            rb.reset_user(owner.clone());
            rb
        };

        let fresh_srb0 = RadioBearer::new(RbId::Srb0, other.self_ref.clone());
        self.srb0 = reown(std::mem::replace(&mut other.srb0, fresh_srb0));
        self.srb1 = other.srb1.take().map(reown);
        self.srb2 = other.srb2.take().map(reown);
        for (dst, src) in self.drbs.iter_mut().zip(other.drbs.iter_mut()) {
            *dst = src.take().map(reown);
        }
        debug!("Transplanted radio bearers from C-RNTI {} to C-RNTI {}", other.c_rnti, self.c_rnti);
    }

    /// Move the bearers of `src` into `dst`, locking both contexts
    ///
    /// Contexts are always locked in address order so that concurrent
    /// transplants between the same pair cannot deadlock.
    pub fn transplant_between(dst: &SharedUser, src: &SharedUser) {
        if Arc::ptr_eq(dst, src) {
            return;
        }
        let (mut dst_guard, mut src_guard) = if Arc::as_ptr(dst) < Arc::as_ptr(src) {
            let dst_guard = User::lock(dst);
            (dst_guard, User::lock(src))
        } else {
            let src_guard = User::lock(src);
            (User::lock(dst), src_guard)
        };
        dst_guard.transplant_bearers(&mut src_guard);
    }

    /// Discard all bearers and start over with a fresh SRB0
    ///
    /// Used after the bearers were moved elsewhere, no teardown is performed.
    pub fn clear_bearers(&mut self) {
        self.srb0 = RadioBearer::new(RbId::Srb0, self.self_ref.clone());
        self.srb1 = None;
        self.srb2 = None;
        self.drbs = Default::default();
    }

    // MME

    pub fn mme(&self) -> &MmeContext {
        &self.mme
    }

    pub fn mme_mut(&mut self) -> &mut MmeContext {
        &mut self.mme
    }

    pub fn set_emm_cause(&mut self, cause: u8) {
        self.mme.emm_cause = cause;
    }

    pub fn get_emm_cause(&self) -> u8 {
        self.mme.emm_cause
    }

    pub fn set_attach_type(&mut self, attach_type: u8) {
        self.mme.attach_type = attach_type;
    }

    pub fn get_attach_type(&self) -> u8 {
        self.mme.attach_type
    }

    pub fn set_pdn_type(&mut self, pdn_type: u8) {
        self.mme.pdn_type = pdn_type;
    }

    pub fn get_pdn_type(&self) -> u8 {
        self.mme.pdn_type
    }

    pub fn set_eps_bearer_id(&mut self, eps_bearer_id: u8) {
        self.mme.eps_bearer_id = eps_bearer_id;
    }

    pub fn get_eps_bearer_id(&self) -> u8 {
        self.mme.eps_bearer_id
    }

    pub fn set_proc_transaction_id(&mut self, id: u8) {
        self.mme.proc_transaction_id = id;
    }

    pub fn get_proc_transaction_id(&self) -> u8 {
        self.mme.proc_transaction_id
    }

    pub fn set_esm_info_transfer(&mut self, flag: bool) {
        self.mme.esm_info_transfer = flag;
    }

    pub fn get_esm_info_transfer(&self) -> bool {
        self.mme.esm_info_transfer
    }

    pub fn set_protocol_cnfg_opts(&mut self, opts: ProtocolConfigOptions) {
        self.mme.protocol_cnfg_opts = opts;
    }

    pub fn get_protocol_cnfg_opts(&self) -> &ProtocolConfigOptions {
        &self.mme.protocol_cnfg_opts
    }

    // MAC

    pub fn get_dl_ndi(&self) -> bool {
        self.dl_ndi
    }

    pub fn flip_dl_ndi(&mut self) {
        self.dl_ndi = !self.dl_ndi;
    }

    pub fn get_ul_ndi(&self) -> bool {
        self.ul_ndi
    }

    pub fn flip_ul_ndi(&mut self) {
        self.ul_ndi = !self.ul_ndi;
    }

    // QoS and timers

    /// Change the QoS class, restarting the uplink scheduling loop
    ///
    /// Any running loop is stopped. A class other than `None` starts a new
    /// loop whose period is the class' uplink TTI frequency.
    pub fn set_qos(&mut self, qos: QosClass) {
        self.qos = qos;
        self.cancel_ul_sched_timer();

        if qos == QosClass::None {
            info!("C-RNTI {} QoS {:?}, uplink scheduling stopped", self.c_rnti, qos);
            return;
        }

        self.ul_sched_period = Duration::from_millis(ttis_to_ms(qos.profile().ul_tti_frequency));
        let deadline = Instant::now() + self.ul_sched_period;
        self.arm_ul_sched_timer(deadline);
        info!(
            "C-RNTI {} QoS {:?}, uplink scheduling every {} ms",
            self.c_rnti,
            qos,
            self.ul_sched_period.as_millis()
        );
    }

    pub fn get_qos(&self) -> QosClass {
        self.qos
    }

    pub fn get_qos_ul_tti_freq(&self) -> u32 {
        self.qos.profile().ul_tti_frequency
    }

    pub fn get_qos_dl_tti_freq(&self) -> u32 {
        self.qos.profile().dl_tti_frequency
    }

    pub fn get_qos_ul_bytes_per_subfn(&self) -> u32 {
        self.qos.profile().ul_bytes_per_subfn
    }

    pub fn get_qos_dl_bytes_per_subfn(&self) -> u32 {
        self.qos.profile().dl_bytes_per_subfn
    }

    /// Current state of the uplink scheduling loop
    pub fn ul_schedule_state(&self) -> UlScheduleState {
        match self.ul_sched_timer_id {
            Some(_) => UlScheduleState::Scheduled {
                period_ms: self.ul_sched_period.as_millis() as u64,
            },
            None => UlScheduleState::NoSchedule,
        }
    }

    /// Dispatch an expired timer of this context
    ///
    /// C-RNTI release: the C-RNTI is invalidated and, with the context
    /// unlocked, handed back to the directory. Uplink scheduling: the MAC is
    /// asked for a grant of the QoS budget and the timer is re-armed while
    /// the C-RNTI stays valid.
    pub fn handle_timer_expiry(user: &SharedUser, timer_id: TimerId) {
        let mut guard = User::lock(user);

        if guard.c_rnti_timer_id == Some(timer_id) {
            guard.c_rnti_timer_id = None;
            guard.c_rnti_set = false;
            let c_rnti = guard.c_rnti;
            let directory = guard.deps.directory.clone();
            drop(guard);

            info!("C-RNTI {} release timer expired", c_rnti);
            if let Some(directory) = directory.upgrade() {
                directory.release_c_rnti(c_rnti, user);
            }
        } else if guard.ul_sched_timer_id == Some(timer_id) {
            guard.ul_sched_timer_id = None;
            let bits = guard.qos.profile().ul_bits_per_subfn();
            let scheduler = guard.deps.ul_scheduler.clone();
            scheduler.schedule_uplink(&guard, bits);

            if guard.c_rnti_set {
                guard.rearm_ul_sched_timer();
            } else {
                guard.ul_sched_deadline = None;
                info!("C-RNTI {} no longer valid, uplink scheduling stopped", guard.c_rnti);
            }
        } else {
            debug!("Ignoring stale timer {}", timer_id);
        }
    }

    fn timer_callback(&self) -> TimerCallback {
        let user = self.self_ref.clone();
        Arc::new(move |timer_id| {
            if let Some(user) = user.upgrade() {
                User::handle_timer_expiry(&user, timer_id);
            }
        })
    }

    fn arm_ul_sched_timer(&mut self, deadline: Instant) {
        let id = self.deps.timer_mgr.start_timer_at(deadline, self.timer_callback());
        self.ul_sched_timer_id = Some(id);
        self.ul_sched_deadline = Some(deadline);
    }

    /// Arm the next period relative to the previous deadline
    fn rearm_ul_sched_timer(&mut self) {
        let now = Instant::now();
        let next = self
            .ul_sched_deadline
            .map(|deadline| deadline + self.ul_sched_period)
            .filter(|next| *next > now)
            .unwrap_or(now + self.ul_sched_period);
        self.arm_ul_sched_timer(next);
    }

    fn cancel_ul_sched_timer(&mut self) {
        self.ul_sched_deadline = None;
        if let Some(id) = self.ul_sched_timer_id.take() {
            self.stop_timer(id);
        }
    }

    fn stop_timer(&self, id: TimerId) {
        // An expired timer no longer exists, that is fine
        if let Err(e) = self.deps.timer_mgr.stop_timer(id) {
            debug!("C-RNTI {}: {}", self.c_rnti, e);
        }
    }

    // Generic

    pub fn set_del_ticks(&mut self, ticks: u32) {
        self.del_ticks = ticks;
    }

    pub fn get_del_ticks(&self) -> u32 {
        self.del_ticks
    }

    /// Count one deletion tick down, `true` once none are left
    pub fn tick_delete(&mut self) -> bool {
        self.del_ticks = self.del_ticks.saturating_sub(1);
        self.del_ticks == 0
    }
}

impl Drop for User {
    fn drop(&mut self) {
        if let Some(id) = self.c_rnti_timer_id.take() {
            self.stop_timer(id);
        }
        if let Some(id) = self.ul_sched_timer_id.take() {
            self.stop_timer(id);
        }
    }
}

fn set_legacy_support(family: &mut LegacyAlgorithms, index: u8, enabled: bool) {
    family.supported.set_support(index, enabled);
    family.present = true;
}

fn check_drb(id: RbId) -> Result<(), LayerError> {
    match id.drb_index() {
        Some(_) => Ok(()),
        None => Err(LayerError::InvalidBearer(id)),
    }
}
