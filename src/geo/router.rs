use crate::geo::{DatabaseSlot, Decoder, GeoRecord, LookupError, RawRecord, SlotKind, Tier};

use smallvec::{smallvec, SmallVec};
use std::net::IpAddr;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    CountryOnly,
    CountryAndCity,
}

impl Deployment {
    pub fn slot_kinds(self) -> &'static [SlotKind] {
        match self {
            Self::CountryOnly => &[SlotKind::Country],
            Self::CountryAndCity => &SlotKind::ALL,
        }
    }
}

pub type SlotOrder = SmallVec<[SlotKind; 2]>;

/// Slots to consult for `address`, in order. `address` must already be canonical.
pub fn slot_order(deployment: Deployment, address: IpAddr, prefer_city: bool) -> SlotOrder {
    let city = match address {
        IpAddr::V4(_) => SlotKind::CityIpv4,
        IpAddr::V6(_) => SlotKind::CityIpv6,
    };
    match deployment {
        Deployment::CountryOnly => smallvec![SlotKind::Country],
        Deployment::CountryAndCity if prefer_city => smallvec![city, SlotKind::Country],
        Deployment::CountryAndCity => smallvec![SlotKind::Country, city],
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// A record without a country code is as good as no record
fn shape(tier: Tier, raw: RawRecord) -> Option<GeoRecord> {
    let country_code = non_empty(raw.country_code)?;
    Some(match tier {
        Tier::Country => GeoRecord::country(country_code),
        Tier::City => GeoRecord {
            country_code,
            postal_code: non_empty(raw.postal_code),
            latitude: raw.latitude,
            longitude: raw.longitude,
        },
    })
}

pub struct LookupRouter<D> {
    deployment: Deployment,
    slots: SmallVec<[Arc<DatabaseSlot<D>>; 3]>,
}

impl<D: Decoder> LookupRouter<D> {
    pub fn new(
        deployment: Deployment,
        slots: impl IntoIterator<Item = Arc<DatabaseSlot<D>>>,
    ) -> Self {
        Self {
            deployment,
            slots: slots.into_iter().collect(),
        }
    }

    pub fn deployment(&self) -> Deployment {
        self.deployment
    }

    pub fn slot(&self, kind: SlotKind) -> Option<&Arc<DatabaseSlot<D>>> {
        self.slots.iter().find(|slot| slot.kind() == kind)
    }

    pub fn slots(&self) -> impl Iterator<Item = &Arc<DatabaseSlot<D>>> {
        self.slots.iter()
    }

    pub fn lookup(&self, address: &str, prefer_city: bool) -> Result<GeoRecord, LookupError> {
        let address: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| LookupError::InvalidAddress)?;
        self.lookup_ip(address, prefer_city)
    }

    pub fn lookup_ip(&self, address: IpAddr, prefer_city: bool) -> Result<GeoRecord, LookupError> {
        let address = address.to_canonical();
        let mut not_ready = false;
        for kind in slot_order(self.deployment, address, prefer_city) {
            let Some(slot) = self.slot(kind) else {
                continue;
            };
            let Some(handle) = slot.snapshot() else {
                not_ready = true;
                continue;
            };
            match handle.decode(address) {
                Ok(Some(raw)) => {
                    if let Some(record) = shape(kind.tier(), raw) {
                        return Ok(record);
                    }
                }
                Ok(None) => {}
                Err(error) => log::warn!("{kind} database failed to decode {address}: {error}"),
            }
        }
        if not_ready {
            Err(LookupError::NotReady)
        } else {
            Err(LookupError::NotFound)
        }
    }
}
