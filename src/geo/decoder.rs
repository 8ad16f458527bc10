use crate::geo::{DecodeError, OpenError};

use serde::Serialize;
use std::net::IpAddr;
use std::path::Path;

/// An open, ready-to-query database file.
///
/// The handle is closed when it is dropped, so a slot releases a displaced handle simply by
/// dropping its reference, and readers that still hold one keep it alive until they finish.
pub trait Decoder: Send + Sync + Sized + 'static {
    fn open(path: &Path) -> Result<Self, OpenError>;

    /// `Ok(None)` means the address is not present in the database
    fn decode(&self, address: IpAddr) -> Result<Option<RawRecord>, DecodeError>;
}

/// Record as stored in a database, every field may be missing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub country_code: Option<String>,
    pub postal_code: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Lookup result handed out to callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeoRecord {
    pub country_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

impl GeoRecord {
    pub fn country(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
            postal_code: None,
            latitude: None,
            longitude: None,
        }
    }
}
