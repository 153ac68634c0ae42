//! User Directory
//!
//! Owns the C-RNTI space and the table of live user contexts. The directory
//! lock is always taken before any context lock.

use crate::mac::UlScheduler;
use crate::timer_mgr::TimerManager;
use crate::user::{SharedUser, User, UserDeps};
use crate::LayerError;
use common::types::{QosClass, Rnti};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tracing::{debug, info};

/// Receiver of C-RNTIs released by user contexts
pub trait UserDirectory: Send + Sync {
    /// Forget `user` and make `c_rnti` reusable
    ///
    /// Nothing happens unless `c_rnti` is still bound to `user`.
    fn release_c_rnti(&self, c_rnti: Rnti, user: &SharedUser);
}

#[derive(Default)]
struct UserTable {
    users: HashMap<Rnti, SharedUser>,
    /// Users counting down to deletion
    deleting: HashSet<Rnti>,
    next_c_rnti: u16,
}

/// Directory of live user contexts keyed by C-RNTI
pub struct UserManager {
    self_ref: Weak<UserManager>,
    timer_mgr: Arc<TimerManager>,
    ul_scheduler: Arc<dyn UlScheduler>,
    c_rnti_release_ms: u64,
    table: Mutex<UserTable>,
}

impl UserManager {
    pub fn new(
        timer_mgr: Arc<TimerManager>,
        ul_scheduler: Arc<dyn UlScheduler>,
        c_rnti_release_ms: u64,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            self_ref: self_ref.clone(),
            timer_mgr,
            ul_scheduler,
            c_rnti_release_ms,
            table: Mutex::new(UserTable {
                next_c_rnti: Rnti::C_RNTI_START,
                ..Default::default()
            }),
        })
    }

    fn table(&self) -> MutexGuard<'_, UserTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Dependencies handed to every context created by this directory
    pub fn user_deps(&self) -> UserDeps {
        let directory: Weak<dyn UserDirectory> = self.self_ref.clone();
        UserDeps {
            timer_mgr: self.timer_mgr.clone(),
            ul_scheduler: self.ul_scheduler.clone(),
            directory,
            c_rnti_release_ms: self.c_rnti_release_ms,
        }
    }

    /// Next unused C-RNTI, searching round-robin through the C-RNTI range
    pub fn get_free_c_rnti(&self) -> Result<Rnti, LayerError> {
        let mut table = self.table();
        next_free_c_rnti(&mut table)
    }

    /// Create a context bound to `c_rnti`
    pub fn add_user(&self, c_rnti: Rnti) -> Result<SharedUser, LayerError> {
        let mut table = self.table();
        if table.users.contains_key(&c_rnti) {
            return Err(LayerError::CRntiInUse(c_rnti));
        }
        let user = self.create_user(c_rnti);
        table.users.insert(c_rnti, user.clone());
        info!("Added user C-RNTI {} ({} users)", c_rnti, table.users.len());
        Ok(user)
    }

    /// Create a context bound to a fresh C-RNTI
    pub fn allocate_user(&self) -> Result<SharedUser, LayerError> {
        let mut table = self.table();
        let c_rnti = next_free_c_rnti(&mut table)?;
        let user = self.create_user(c_rnti);
        table.users.insert(c_rnti, user.clone());
        info!("Added user C-RNTI {} ({} users)", c_rnti, table.users.len());
        Ok(user)
    }

    fn create_user(&self, c_rnti: Rnti) -> SharedUser {
        let user = User::new_shared(self.user_deps());
        User::lock(&user).set_c_rnti(c_rnti);
        user
    }

    pub fn find_user_by_c_rnti(&self, c_rnti: Rnti) -> Result<SharedUser, LayerError> {
        self.table()
            .users
            .get(&c_rnti)
            .cloned()
            .ok_or(LayerError::UserNotFound(c_rnti))
    }

    pub fn find_user_by_imsi(&self, imsi: u64) -> Option<SharedUser> {
        let table = self.table();
        table
            .users
            .values()
            .find(|user| User::lock(user).get_id().is_some_and(|id| id.imsi == imsi))
            .cloned()
    }

    /// Hand the C-RNTI and radio bearers of `old` over to `new`
    ///
    /// Used when a device re-establishes and its previous context is found.
    /// The directory entry of the C-RNTI then refers to `new`, and an entry
    /// `new` held under its own C-RNTI is dropped. `old` is left without
    /// C-RNTI, QoS or running timers.
    pub fn transfer_c_rnti(&self, old: &SharedUser, new: &SharedUser) -> Result<(), LayerError> {
        if Arc::ptr_eq(old, new) {
            return Ok(());
        }
        let mut table = self.table();
        let c_rnti = User::lock(old).get_c_rnti();
        if !table.users.get(&c_rnti).is_some_and(|user| Arc::ptr_eq(user, old)) {
            return Err(LayerError::UserNotFound(c_rnti));
        }

        let new_c_rnti = User::lock(new).get_c_rnti();
        let stale = if table.users.get(&new_c_rnti).is_some_and(|user| Arc::ptr_eq(user, new)) {
            table.deleting.remove(&new_c_rnti);
            table.users.remove(&new_c_rnti)
        } else {
            None
        };

        User::transplant_between(new, old);
        {
            let mut old_guard = User::lock(old);
            old_guard.stop_c_rnti_release_timer();
            old_guard.set_qos(QosClass::None);
            old_guard.init();
        }
        User::lock(new).set_c_rnti(c_rnti);
        table.deleting.remove(&c_rnti);
        let previous = table.users.insert(c_rnti, new.clone());
        drop(table);
        drop(previous);
        drop(stale);

        info!("Transferred C-RNTI {} to new context", c_rnti);
        Ok(())
    }

    /// Remove a user immediately
    pub fn del_user(&self, c_rnti: Rnti) -> Result<(), LayerError> {
        let mut table = self.table();
        let user = table.users.remove(&c_rnti).ok_or(LayerError::UserNotFound(c_rnti))?;
        table.deleting.remove(&c_rnti);
        let remaining = table.users.len();
        drop(table);
        drop(user);

        info!("Deleted user C-RNTI {} ({} users)", c_rnti, remaining);
        Ok(())
    }

    /// Remove a user after `ticks` calls of `process_delayed_deletes`
    pub fn schedule_delete(&self, c_rnti: Rnti, ticks: u32) -> Result<(), LayerError> {
        let mut table = self.table();
        let user = table.users.get(&c_rnti).ok_or(LayerError::UserNotFound(c_rnti))?;
        User::lock(user).set_del_ticks(ticks);
        table.deleting.insert(c_rnti);
        debug!("User C-RNTI {} deleted in {} ticks", c_rnti, ticks);
        Ok(())
    }

    /// Count every pending deletion down by one tick
    pub fn process_delayed_deletes(&self) {
        let mut table = self.table();
        if table.deleting.is_empty() {
            return;
        }

        let UserTable { users, deleting, .. } = &mut *table;
        let expired: Vec<Rnti> = deleting
            .iter()
            .copied()
            .filter(|c_rnti| users.get(c_rnti).map_or(true, |user| User::lock(user).tick_delete()))
            .collect();

        let mut removed = Vec::with_capacity(expired.len());
        for c_rnti in expired {
            deleting.remove(&c_rnti);
            if let Some(user) = users.remove(&c_rnti) {
                info!("Delayed delete of user C-RNTI {}", c_rnti);
                removed.push(user);
            }
        }
        drop(table);
        drop(removed);
    }

    pub fn num_users(&self) -> usize {
        self.table().users.len()
    }

    /// C-RNTIs of all live users
    pub fn c_rntis(&self) -> Vec<Rnti> {
        self.table().users.keys().copied().collect()
    }

    /// Remove every user
    pub fn clear(&self) {
        let mut table = self.table();
        let users: Vec<SharedUser> = table.users.drain().map(|(_, user)| user).collect();
        table.deleting.clear();
        drop(table);

        if !users.is_empty() {
            info!("Removed {} users", users.len());
        }
    }
}

impl UserDirectory for UserManager {
    fn release_c_rnti(&self, c_rnti: Rnti, user: &SharedUser) {
        let mut table = self.table();
        if !table.users.get(&c_rnti).is_some_and(|bound| Arc::ptr_eq(bound, user)) {
            drop(table);
            debug!("C-RNTI {} not bound to the releasing context", c_rnti);
            return;
        }
        let released = table.users.remove(&c_rnti);
        table.deleting.remove(&c_rnti);
        drop(table);
        drop(released);

        info!("Released C-RNTI {}", c_rnti);
    }
}

fn next_free_c_rnti(table: &mut UserTable) -> Result<Rnti, LayerError> {
    let span = (Rnti::C_RNTI_END - Rnti::C_RNTI_START) as u32 + 1;
    for _ in 0..span {
        let candidate = Rnti(table.next_c_rnti);
        table.next_c_rnti = if table.next_c_rnti >= Rnti::C_RNTI_END {
            Rnti::C_RNTI_START
        } else {
            table.next_c_rnti + 1
        };
        if !table.users.contains_key(&candidate) {
            return Ok(candidate);
        }
    }
    Err(LayerError::NoFreeCRnti)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::scheduler::MacScheduler;
    use crate::user::UlScheduleState;
    use common::types::{RbId, UserId};
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn user_mgr(c_rnti_release_ms: u64) -> Arc<UserManager> {
        UserManager::new(
            TimerManager::new(Handle::current()),
            Arc::new(MacScheduler::new()),
            c_rnti_release_ms,
        )
    }

    #[tokio::test]
    async fn test_c_rnti_allocation() {
        let mgr = user_mgr(500);
        let first = mgr.allocate_user().unwrap();
        let second = mgr.allocate_user().unwrap();
        assert_eq!(User::lock(&first).get_c_rnti(), Rnti(Rnti::C_RNTI_START));
        assert_eq!(User::lock(&second).get_c_rnti(), Rnti(Rnti::C_RNTI_START + 1));
        assert!(User::lock(&first).is_c_rnti_set());
        assert_eq!(mgr.num_users(), 2);

        assert!(matches!(
            mgr.add_user(Rnti(Rnti::C_RNTI_START)),
            Err(LayerError::CRntiInUse(_))
        ));
        assert_eq!(mgr.get_free_c_rnti().unwrap(), Rnti(Rnti::C_RNTI_START + 2));
    }

    #[tokio::test]
    async fn test_find_and_delete() {
        let mgr = user_mgr(500);
        let user = mgr.add_user(Rnti(0x100)).unwrap();
        User::lock(&user).set_id(UserId { imsi: 1010000000001, imei: 0 });

        assert!(Arc::ptr_eq(&mgr.find_user_by_c_rnti(Rnti(0x100)).unwrap(), &user));
        assert!(Arc::ptr_eq(&mgr.find_user_by_imsi(1010000000001).unwrap(), &user));
        assert!(mgr.find_user_by_imsi(42).is_none());

        mgr.del_user(Rnti(0x100)).unwrap();
        assert!(matches!(mgr.find_user_by_c_rnti(Rnti(0x100)), Err(LayerError::UserNotFound(_))));
        assert!(matches!(mgr.del_user(Rnti(0x100)), Err(LayerError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_delayed_delete() {
        let mgr = user_mgr(500);
        mgr.add_user(Rnti(0x200)).unwrap();
        mgr.add_user(Rnti(0x201)).unwrap();
        mgr.schedule_delete(Rnti(0x200), 3).unwrap();

        mgr.process_delayed_deletes();
        mgr.process_delayed_deletes();
        assert_eq!(mgr.num_users(), 2);
        mgr.process_delayed_deletes();
        assert_eq!(mgr.num_users(), 1);
        assert!(mgr.find_user_by_c_rnti(Rnti(0x201)).is_ok());
    }

    #[tokio::test]
    async fn test_transfer_c_rnti() {
        let mgr = user_mgr(500);
        let old = mgr.add_user(Rnti(0x300)).unwrap();
        User::lock(&old).setup_srb1().unwrap();
        let new = User::new_shared(mgr.user_deps());

        mgr.transfer_c_rnti(&old, &new).unwrap();

        let found = mgr.find_user_by_c_rnti(Rnti(0x300)).unwrap();
        assert!(Arc::ptr_eq(&found, &new));
        let guard = User::lock(&new);
        assert_eq!(guard.get_c_rnti(), Rnti(0x300));
        assert!(guard.get_rb(RbId::Srb1).unwrap().is_owned_by(&new));
        assert!(User::lock(&old).get_srb1().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_release_timer_frees_c_rnti() {
        let mgr = user_mgr(20);
        let user = mgr.add_user(Rnti(0x400)).unwrap();
        User::lock(&user).start_c_rnti_release_timer();
        drop(user);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(mgr.num_users(), 0);
        assert!(mgr.add_user(Rnti(0x400)).is_ok());
    }

    #[tokio::test]
    async fn test_transfer_drops_previous_entry_of_new() {
        let mgr = user_mgr(500);
        let old = mgr.add_user(Rnti(0x300)).unwrap();
        let new = mgr.add_user(Rnti(0x301)).unwrap();

        mgr.transfer_c_rnti(&old, &new).unwrap();
        assert_eq!(mgr.c_rntis(), vec![Rnti(0x300)]);
        assert!(matches!(mgr.find_user_by_c_rnti(Rnti(0x301)), Err(LayerError::UserNotFound(_))));

        mgr.del_user(Rnti(0x300)).unwrap();
        assert_eq!(mgr.num_users(), 0);
    }

    #[tokio::test]
    async fn test_release_from_unbound_context_ignored() {
        let mgr = user_mgr(500);
        let bound = mgr.add_user(Rnti(0x500)).unwrap();
        let other = User::new_shared(mgr.user_deps());

        mgr.release_c_rnti(Rnti(0x500), &other);
        assert!(Arc::ptr_eq(&mgr.find_user_by_c_rnti(Rnti(0x500)).unwrap(), &bound));

        mgr.release_c_rnti(Rnti(0x500), &bound);
        assert_eq!(mgr.num_users(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transfer_with_live_timers() {
        let mgr = user_mgr(30);
        let old = mgr.add_user(Rnti(0x400)).unwrap();
        {
            let mut guard = User::lock(&old);
            guard.set_qos(QosClass::DefaultData);
            guard.start_c_rnti_release_timer();
        }
        let new = User::new_shared(mgr.user_deps());

        mgr.transfer_c_rnti(&old, &new).unwrap();
        {
            let guard = User::lock(&old);
            assert!(!guard.is_c_rnti_set());
            assert_eq!(guard.get_qos(), QosClass::None);
            assert_eq!(guard.ul_schedule_state(), UlScheduleState::NoSchedule);
        }

        // Well past the release timer of the old context
        tokio::time::sleep(Duration::from_millis(100)).await;
        let found = mgr.find_user_by_c_rnti(Rnti(0x400)).unwrap();
        assert!(Arc::ptr_eq(&found, &new));
        assert!(User::lock(&new).is_c_rnti_set());
        assert_eq!(mgr.num_users(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_transfer_races_release_timer() {
        let mgr = user_mgr(1);
        for value in 0x600..0x640 {
            let old = mgr.add_user(Rnti(value)).unwrap();
            User::lock(&old).start_c_rnti_release_timer();
            let new = User::new_shared(mgr.user_deps());

            tokio::time::sleep(Duration::from_millis(1)).await;
            match mgr.transfer_c_rnti(&old, &new) {
                // Transferred first, the old timer must not evict `new`
                Ok(()) => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    assert!(Arc::ptr_eq(&mgr.find_user_by_c_rnti(Rnti(value)).unwrap(), &new));
                    mgr.del_user(Rnti(value)).unwrap();
                }
                // Released first
                Err(LayerError::UserNotFound(_)) => {
                    assert!(mgr.find_user_by_c_rnti(Rnti(value)).is_err());
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(mgr.num_users(), 0);
    }
}
