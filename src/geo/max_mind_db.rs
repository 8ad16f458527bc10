use crate::geo::{DecodeError, Decoder, OpenError, RawRecord};

use maxminddb::MaxMindDBError;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::Path;

/// Record layout of the ip-location-db country and city databases
#[derive(Deserialize)]
struct IpLocationRecord<'a> {
    #[serde(borrow, default)]
    country_code: Option<&'a str>,
    #[serde(borrow, default, alias = "postal_code")]
    postcode: Option<&'a str>,
    #[serde(default)]
    latitude: Option<f64>,
    #[serde(default)]
    longitude: Option<f64>,
}

impl<'a> From<IpLocationRecord<'a>> for RawRecord {
    fn from(record: IpLocationRecord<'a>) -> Self {
        Self {
            country_code: record.country_code.map(str::to_owned),
            postal_code: record.postcode.map(str::to_owned),
            latitude: record.latitude,
            longitude: record.longitude,
        }
    }
}

pub struct MaxMindDb {
    maxminddb_reader: maxminddb::Reader<Vec<u8>>,
}

impl Decoder for MaxMindDb {
    fn open(path: &Path) -> Result<Self, OpenError> {
        let bytes = std::fs::read(path).map_err(|error| OpenError::Io {
            path: path.to_owned(),
            error,
        })?;
        let maxminddb_reader =
            maxminddb::Reader::from_source(bytes).map_err(|error| OpenError::Format {
                path: path.to_owned(),
                reason: error.to_string(),
            })?;
        Ok(Self { maxminddb_reader })
    }

    fn decode(&self, address: IpAddr) -> Result<Option<RawRecord>, DecodeError> {
        match self.maxminddb_reader.lookup::<IpLocationRecord>(address) {
            Ok(record) => Ok(Some(record.into())),
            Err(MaxMindDBError::AddressNotFoundError(_)) => Ok(None),
            Err(error) => Err(DecodeError(error.to_string())),
        }
    }
}
