pub use decoder::{Decoder, GeoRecord, RawRecord};
pub use error::{
    DecodeError, FetchError, InitError, LoadError, LookupError, OpenError, RefreshError,
};
pub use manager::GeoDb;
pub use max_mind_db::MaxMindDb;
pub use refresher::Refresher;
pub use router::{slot_order, Deployment, LookupRouter, SlotOrder};
pub use scheduler::{refresh_all, Scheduler, SchedulerState};
pub use slot::DatabaseSlot;
pub use slot_kind::{SlotKind, Tier};

mod decoder;
mod error;
mod manager;
pub mod max_mind_db;
mod refresher;
mod router;
mod scheduler;
mod slot;
mod slot_kind;
#[cfg(test)]
pub(crate) mod testing;
