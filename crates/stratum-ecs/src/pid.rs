//! Persistent ids (PIDs).
//!
//! A PID is the `i64` under which an entity is known outside the process
//! (scene files, network peers). In [`PidMode::UsePidAsId`] the PID simply is
//! the entity id. In [`PidMode::RandomPids`] every entity gets a random,
//! store-unique positive PID drawn from a seeded `Pcg64`.

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;
use crate::StoreError;

/// How persistent ids are assigned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PidMode {
    /// The PID equals the entity id.
    #[default]
    UsePidAsId,
    /// Random positive PIDs with a PID -> id lookup map.
    RandomPids,
}

pub(crate) struct PidMap {
    mode: PidMode,
    rng: Pcg64,
    pid_by_id: HashMap<EntityId, i64>,
    id_by_pid: HashMap<i64, EntityId>,
}

impl PidMap {
    pub fn new(mode: PidMode, seed: u64) -> Self {
        Self {
            mode,
            rng: Pcg64::seed_from_u64(seed),
            pid_by_id: HashMap::new(),
            id_by_pid: HashMap::new(),
        }
    }

    pub fn mode(&self) -> PidMode {
        self.mode
    }

    /// Assign a PID to a freshly created entity.
    pub fn assign(&mut self, id: EntityId) -> i64 {
        match self.mode {
            PidMode::UsePidAsId => id.raw() as i64,
            PidMode::RandomPids => {
                let pid = loop {
                    let candidate = self.rng.gen_range(1..i64::MAX);
                    if !self.id_by_pid.contains_key(&candidate) {
                        break candidate;
                    }
                };
                self.link(id, pid);
                pid
            }
        }
    }

    /// Bind a caller-chosen PID in random mode.
    pub fn assign_explicit(&mut self, id: EntityId, pid: i64) -> Result<(), StoreError> {
        if pid <= 0 {
            return Err(StoreError::InvalidOperation(format!(
                "pid must be positive. was: {pid}"
            )));
        }
        if self.id_by_pid.contains_key(&pid) {
            return Err(StoreError::InvalidOperation(format!(
                "pid already in use. pid: {pid}"
            )));
        }
        self.link(id, pid);
        Ok(())
    }

    pub fn contains_pid(&self, pid: i64) -> bool {
        self.id_by_pid.contains_key(&pid)
    }

    fn link(&mut self, id: EntityId, pid: i64) {
        self.pid_by_id.insert(id, pid);
        self.id_by_pid.insert(pid, id);
    }

    /// The PID of a live entity.
    pub fn pid_of(&self, id: EntityId) -> i64 {
        match self.mode {
            PidMode::UsePidAsId => id.raw() as i64,
            PidMode::RandomPids => self.pid_by_id.get(&id).copied().unwrap_or(0),
        }
    }

    /// The entity id a PID maps to. In `UsePidAsId` mode the caller still has
    /// to check the id is alive.
    pub fn id_of(&self, pid: i64) -> Option<EntityId> {
        match self.mode {
            PidMode::UsePidAsId => {
                if pid <= 0 || pid > u32::MAX as i64 {
                    None
                } else {
                    Some(EntityId::new(pid as u32))
                }
            }
            PidMode::RandomPids => self.id_by_pid.get(&pid).copied(),
        }
    }

    pub fn release(&mut self, id: EntityId) {
        if let Some(pid) = self.pid_by_id.remove(&id) {
            self.id_by_pid.remove(&pid);
        }
    }
}

impl std::fmt::Debug for PidMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PidMap")
            .field("mode", &self.mode)
            .field("mapped", &self.id_by_pid.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_as_id() {
        let mut pids = PidMap::new(PidMode::UsePidAsId, 0);
        assert_eq!(pids.assign(EntityId::new(5)), 5);
        assert_eq!(pids.pid_of(EntityId::new(5)), 5);
        assert_eq!(pids.id_of(5), Some(EntityId::new(5)));
        assert_eq!(pids.id_of(0), None);
        assert_eq!(pids.id_of(-1), None);
        assert_eq!(pids.id_of(i64::MAX), None);
    }

    #[test]
    fn random_pids_are_positive_unique_and_seeded() {
        let mut a = PidMap::new(PidMode::RandomPids, 42);
        let mut b = PidMap::new(PidMode::RandomPids, 42);
        let pa: Vec<i64> = (1..=50).map(|i| a.assign(EntityId::new(i))).collect();
        let pb: Vec<i64> = (1..=50).map(|i| b.assign(EntityId::new(i))).collect();
        assert_eq!(pa, pb);
        assert!(pa.iter().all(|p| *p > 0));
        let mut dedup = pa.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), pa.len());
        assert_eq!(a.id_of(pa[3]), Some(EntityId::new(4)));
    }

    #[test]
    fn release_unmaps() {
        let mut pids = PidMap::new(PidMode::RandomPids, 1);
        let pid = pids.assign(EntityId::new(1));
        pids.release(EntityId::new(1));
        assert_eq!(pids.id_of(pid), None);
        assert_eq!(pids.pid_of(EntityId::new(1)), 0);
    }

    #[test]
    fn explicit_pid_conflicts() {
        let mut pids = PidMap::new(PidMode::RandomPids, 1);
        pids.assign_explicit(EntityId::new(1), 1000).unwrap();
        assert!(pids.assign_explicit(EntityId::new(2), 1000).is_err());
        assert!(pids.assign_explicit(EntityId::new(2), 0).is_err());
        assert!(pids.contains_pid(1000));
    }
}
