//! Radio Bearer
//!
//! Per-bearer procedure and state bookkeeping. A bearer refers back to the user
//! context that owns it through a weak reference, which is re-pointed when the
//! bearer is transplanted to another context.

use super::{SharedUser, User};
use common::types::RbId;
use std::sync::{Arc, Mutex, Weak};

/// RRC procedure running on a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RrcProcedure {
    #[default]
    Idle,
    ConnectionRequest,
    ConnectionReestablishmentRequest,
    ConnectionReconfiguration,
    ConnectionRelease,
}

/// RRC state of a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RrcState {
    #[default]
    Idle,
    Srb1Setup,
    WaitForConSetupComplete,
    RrcSecurity,
    WaitForSecurityModeComplete,
    Srb2Setup,
    WaitForConReconfigComplete,
    Connected,
}

/// NAS procedure running on a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MmeProcedure {
    #[default]
    Idle,
    Attach,
    ServiceRequest,
    Detach,
    TauRequest,
}

/// NAS state of a bearer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MmeState {
    #[default]
    Idle,
    IdRequestImsi,
    Reject,
    Authenticate,
    AuthRejected,
    EnableSecurity,
    Release,
    RrcSecurity,
    EsmInfoTransfer,
    AttachAccepted,
    Attached,
    SetupDrb,
}

/// A signalling or data radio bearer of one user
#[derive(Debug)]
pub struct RadioBearer {
    /// Bearer identity
    id: RbId,
    /// Owning user context
    owner: Weak<Mutex<User>>,
    /// Current RRC procedure
    rrc_procedure: RrcProcedure,
    /// Current RRC state
    rrc_state: RrcState,
    /// Current NAS procedure
    mme_procedure: MmeProcedure,
    /// Current NAS state
    mme_state: MmeState,
}

impl RadioBearer {
    /// Create an idle bearer owned by `owner`
    pub fn new(id: RbId, owner: Weak<Mutex<User>>) -> Self {
        Self {
            id,
            owner,
            rrc_procedure: RrcProcedure::Idle,
            rrc_state: RrcState::Idle,
            mme_procedure: MmeProcedure::Idle,
            mme_state: MmeState::Idle,
        }
    }

    pub fn id(&self) -> RbId {
        self.id
    }

    /// Owning context, if it is still alive
    pub fn owner(&self) -> Option<SharedUser> {
        self.owner.upgrade()
    }

    /// Whether this bearer belongs to `user`
    pub fn is_owned_by(&self, user: &SharedUser) -> bool {
        std::ptr::eq(self.owner.as_ptr(), Arc::as_ptr(user))
    }

    /// Re-point the bearer at a new owning context
    pub fn reset_user(&mut self, owner: Weak<Mutex<User>>) {
        self.owner = owner;
    }

    /// Return all procedures and states to idle
    pub fn reset(&mut self) {
        self.rrc_procedure = RrcProcedure::Idle;
        self.rrc_state = RrcState::Idle;
        self.mme_procedure = MmeProcedure::Idle;
        self.mme_state = MmeState::Idle;
    }

    pub fn rrc_procedure(&self) -> RrcProcedure {
        self.rrc_procedure
    }

    pub fn set_rrc_procedure(&mut self, procedure: RrcProcedure) {
        self.rrc_procedure = procedure;
    }

    pub fn rrc_state(&self) -> RrcState {
        self.rrc_state
    }

    pub fn set_rrc_state(&mut self, state: RrcState) {
        self.rrc_state = state;
    }

    pub fn mme_procedure(&self) -> MmeProcedure {
        self.mme_procedure
    }

    pub fn set_mme_procedure(&mut self, procedure: MmeProcedure) {
        self.mme_procedure = procedure;
    }

    pub fn mme_state(&self) -> MmeState {
        self.mme_state
    }

    pub fn set_mme_state(&mut self, state: MmeState) {
        self.mme_state = state;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_returns_to_idle() {
        let mut rb = RadioBearer::new(RbId::Srb1, Weak::new());
        rb.set_rrc_procedure(RrcProcedure::ConnectionRequest);
        rb.set_rrc_state(RrcState::WaitForConSetupComplete);
        rb.set_mme_procedure(MmeProcedure::Attach);
        rb.set_mme_state(MmeState::Authenticate);

        rb.reset();
        assert_eq!(rb.id(), RbId::Srb1);
        assert_eq!(rb.rrc_procedure(), RrcProcedure::Idle);
        assert_eq!(rb.rrc_state(), RrcState::Idle);
        assert_eq!(rb.mme_procedure(), MmeProcedure::Idle);
        assert_eq!(rb.mme_state(), MmeState::Idle);
        assert!(rb.owner().is_none());
    }
}
