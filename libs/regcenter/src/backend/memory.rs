//! In-process coordination backend.
//!
//! Mirrors the TTL semantics of a real agent: an instance is healthy while its
//! check is passing and was renewed within the TTL, and it is reaped once the
//! check has been stale for longer than TTL plus the deregister-critical
//! grace period. Time is read from `tokio::time`, so paused-clock tests
//! drive expiry deterministically.
//!
//! Every primitive is counted per key, and failures can be injected, which
//! makes the backend suitable for exercising the registry in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::time::Instant;

use super::{
    BackendError, CheckStatus, CoordinationBackend, ServiceRecord, ServiceRegistration,
};

struct Entry {
    registration: ServiceRegistration,
    status: CheckStatus,
    last_renewal: Instant,
}

impl Entry {
    fn is_healthy(&self, now: Instant) -> bool {
        self.status == CheckStatus::Passing
            && now.saturating_duration_since(self.last_renewal) <= self.registration.check.ttl
    }

    fn is_expired(&self, now: Instant) -> bool {
        let check = &self.registration.check;
        let limit = check
            .ttl
            .saturating_add(check.deregister_critical_service_after);
        now.saturating_duration_since(self.last_renewal) > limit
    }
}

#[derive(Default)]
struct Calls {
    registrations: HashMap<String, usize>,
    deregistrations: HashMap<String, usize>,
    renewals: HashMap<String, usize>,
    probes: usize,
}

#[derive(Default)]
struct State {
    services: HashMap<String, Entry>,
    calls: Calls,
}

impl State {
    fn reap_expired(&mut self, now: Instant) {
        self.services.retain(|id, entry| {
            let keep = !entry.is_expired(now);
            if !keep {
                tracing::debug!(service_id = %id, "Reaping expired in-memory registration");
            }
            keep
        });
    }
}

/// [`CoordinationBackend`] that keeps registrations in process memory.
#[derive(Default)]
pub struct InMemoryBackend {
    state: RwLock<State>,
    unavailable: AtomicBool,
    fail_renewals: AtomicBool,
}

impl InMemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`BackendError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make liveness renewals fail while other calls keep working.
    pub fn fail_renewals(&self, fail: bool) {
        self.fail_renewals.store(fail, Ordering::SeqCst);
    }

    /// Force a check into `status`, as an operator or failing probe would.
    pub fn set_check_status(&self, service_id: &str, status: CheckStatus) {
        if let Some(entry) = self.state.write().services.get_mut(service_id) {
            entry.status = status;
        }
    }

    #[must_use]
    pub fn renewals(&self, check_id: &str) -> usize {
        self.state
            .read()
            .calls
            .renewals
            .get(check_id)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn total_renewals(&self) -> usize {
        self.state.read().calls.renewals.values().sum()
    }

    #[must_use]
    pub fn registrations(&self, id: &str) -> usize {
        self.state
            .read()
            .calls
            .registrations
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn deregistrations(&self, id: &str) -> usize {
        self.state
            .read()
            .calls
            .deregistrations
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    #[must_use]
    pub fn probes(&self) -> usize {
        self.state.read().calls.probes
    }

    /// Whether `id` is currently known, healthy or not.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().services.contains_key(id)
    }

    fn ensure_available(&self) -> Result<(), BackendError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(BackendError::Unavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CoordinationBackend for InMemoryBackend {
    async fn probe(&self) -> Result<(), BackendError> {
        self.state.write().calls.probes += 1;
        self.ensure_available()
    }

    async fn register_service(
        &self,
        registration: &ServiceRegistration,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write();
        *state
            .calls
            .registrations
            .entry(registration.id.clone())
            .or_default() += 1;
        self.ensure_available()?;

        state.services.insert(
            registration.id.clone(),
            Entry {
                registration: registration.clone(),
                status: registration.check.status,
                last_renewal: Instant::now(),
            },
        );
        Ok(())
    }

    async fn deregister_service(&self, id: &str) -> Result<(), BackendError> {
        let mut state = self.state.write();
        *state
            .calls
            .deregistrations
            .entry(id.to_owned())
            .or_default() += 1;
        self.ensure_available()?;

        state.services.remove(id);
        Ok(())
    }

    async fn renew_liveness(
        &self,
        check_id: &str,
        status: CheckStatus,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write();
        *state.calls.renewals.entry(check_id.to_owned()).or_default() += 1;
        self.ensure_available()?;
        if self.fail_renewals.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable);
        }

        let now = Instant::now();
        state.reap_expired(now);
        let entry = state
            .services
            .values_mut()
            .find(|e| e.registration.check.check_id == check_id)
            .ok_or_else(|| BackendError::NotFound(check_id.to_owned()))?;
        entry.status = status;
        entry.last_renewal = now;
        Ok(())
    }

    async fn query_healthy_instances(
        &self,
        name: &str,
    ) -> Result<Vec<ServiceRecord>, BackendError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut state = self.state.write();
        state.reap_expired(now);

        let mut records: Vec<ServiceRecord> = state
            .services
            .values()
            .filter(|e| e.registration.name == name && e.is_healthy(now))
            .map(|e| ServiceRecord::from(&e.registration))
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn get_instance(&self, id: &str) -> Result<ServiceRecord, BackendError> {
        self.ensure_available()?;
        let now = Instant::now();
        let mut state = self.state.write();
        state.reap_expired(now);
        state
            .services
            .get(id)
            .map(|e| ServiceRecord::from(&e.registration))
            .ok_or_else(|| BackendError::NotFound(id.to_owned()))
    }
}
