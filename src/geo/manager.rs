use crate::geo::{
    refresh_all, DatabaseSlot, Decoder, Deployment, GeoRecord, InitError, LookupError,
    LookupRouter, MaxMindDb, Refresher, Scheduler, SchedulerState, SlotKind,
};

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Owns every database slot and keeps them fresh.
///
/// Lifecycle: [GeoDb::start] makes sure each slot has a local file and loads it, then schedules
/// periodic refreshes; [GeoDb::stop] cancels the schedule, waits for the refresh in flight and
/// closes all handles. Lookups may run at any time and never wait for network.
pub struct GeoDb<D = MaxMindDb> {
    router: LookupRouter<D>,
    refresher: Arc<Refresher>,
    scheduler: Scheduler,
    update_interval: Duration,
}

impl<D: Decoder> GeoDb<D> {
    pub fn new(
        deployment: Deployment,
        slots: impl IntoIterator<Item = DatabaseSlot<D>>,
        update_interval: Duration,
        download_timeout: Duration,
    ) -> Self {
        Self {
            router: LookupRouter::new(deployment, slots.into_iter().map(Arc::new)),
            refresher: Arc::new(Refresher::new(download_timeout)),
            scheduler: Scheduler::new(),
            update_interval,
        }
    }

    pub fn deployment(&self) -> Deployment {
        self.router.deployment()
    }

    pub fn slot(&self, kind: SlotKind) -> Option<&Arc<DatabaseSlot<D>>> {
        self.router.slot(kind)
    }

    /// Must complete before lookups are served. Any slot that can be neither found locally nor
    /// downloaded fails the whole start.
    pub async fn start(&self) -> Result<(), InitError> {
        for slot in self.router.slots() {
            self.refresher.ensure_and_load(slot).await?;
        }

        let refresher = Arc::clone(&self.refresher);
        let slots: Arc<[Arc<DatabaseSlot<D>>]> = self.router.slots().cloned().collect();
        let started = self
            .scheduler
            .start(self.update_interval, move |token| {
                let refresher = Arc::clone(&refresher);
                let slots = Arc::clone(&slots);
                async move {
                    refresh_all(&refresher, &slots, &token).await;
                }
            });
        if started {
            log::info!(
                "database updates scheduled every {}s",
                self.update_interval.as_secs()
            );
        } else {
            log::warn!("database updates are already scheduled or stopped");
        }
        Ok(())
    }

    /// Idempotent, lookups report [LookupError::NotReady] afterwards
    pub async fn stop(&self) {
        self.scheduler.stop().await;
        for slot in self.router.slots() {
            slot.close();
        }
    }

    pub fn lookup(&self, address: &str, prefer_city: bool) -> Result<GeoRecord, LookupError> {
        self.router.lookup(address, prefer_city)
    }

    pub fn lookup_ip(&self, address: IpAddr, prefer_city: bool) -> Result<GeoRecord, LookupError> {
        self.router.lookup_ip(address, prefer_city)
    }

    /// Whether every configured slot has a live handle
    pub fn is_ready(&self) -> bool {
        self.router.slots().all(|slot| slot.is_loaded())
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler.state()
    }
}
