use crate::geo::{DatabaseSlot, Decoder, Deployment, GeoDb, SlotKind};
use crate::non_zero_duration::NonZeroDuration;

use hyper::http::Uri;
use serde::Deserialize;
use std::net::SocketAddr;
#[cfg(feature = "multi-thread")]
use std::num::NonZeroUsize;
use std::num::NonZeroU64;
use std::path::{Path, PathBuf};
use thiserror::Error;

const COUNTRY_DB_URL: &str = "https://cdn.jsdelivr.net/npm/@ip-location-db/geolite2-geo-whois-asn-country-mmdb/geolite2-geo-whois-asn-country.mmdb";
const CITY_IPV4_DB_URL: &str =
    "https://cdn.jsdelivr.net/npm/@ip-location-db/geolite2-city-mmdb/geolite2-city-ipv4.mmdb";
const CITY_IPV6_DB_URL: &str =
    "https://cdn.jsdelivr.net/npm/@ip-location-db/geolite2-city-mmdb/geolite2-city-ipv6.mmdb";

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "Config::default_host")]
    pub host: SocketAddr,
    #[cfg(feature = "multi-thread")]
    #[serde(default)]
    pub threads: ConfigThreads,
    #[serde(default = "Config::default_log_level")]
    pub log_level: log::Level,
    #[serde(default)]
    api_key: Option<String>,
    #[serde(default = "Config::default_ip_headers")]
    pub ip_headers: Vec<String>,
    #[serde(default = "Config::default_ip_headers_recursive")]
    pub ip_headers_recursive: bool,
    #[serde(default = "Config::default_shutdown_timeout")]
    pub shutdown_timeout: NonZeroDuration,
    #[serde(default)]
    pub geodb: GeoDbConfig,
}

impl Config {
    fn default_host() -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], 3002))
    }

    fn default_log_level() -> log::Level {
        log::Level::Info
    }

    fn default_ip_headers() -> Vec<String> {
        vec!["X-Forwarded-For".into(), "X-Real-IP".into()]
    }

    fn default_ip_headers_recursive() -> bool {
        true
    }

    fn default_shutdown_timeout() -> NonZeroDuration {
        NonZeroU64::new(30).unwrap().into()
    }

    /// `None` when authentication is disabled
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.is_empty())
    }
}

#[cfg(feature = "multi-thread")]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ConfigThreadsDe")]
pub enum ConfigThreads {
    #[default]
    Cores,
    Custom(NonZeroUsize),
}

#[cfg(feature = "multi-thread")]
#[derive(Deserialize)]
#[serde(untagged)]
enum ConfigThreadsDe {
    Number(NonZeroUsize),
    Keyword(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error(r#"threads must be a positive integer or "cores", not "{0}""#)]
    Threads(String),
}

#[cfg(feature = "multi-thread")]
impl TryFrom<ConfigThreadsDe> for ConfigThreads {
    type Error = ConfigError;

    fn try_from(value: ConfigThreadsDe) -> Result<Self, Self::Error> {
        match value {
            ConfigThreadsDe::Number(threads) => Ok(Self::Custom(threads)),
            ConfigThreadsDe::Keyword(keyword) if keyword == "cores" => Ok(Self::Cores),
            ConfigThreadsDe::Keyword(keyword) => Err(ConfigError::Threads(keyword)),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SlotConfig {
    pub path: PathBuf,
    #[serde(alias = "uri", with = "http_serde::uri")]
    pub url: Uri,
}

impl SlotConfig {
    fn new(path: &str, url: &'static str) -> Self {
        Self {
            path: path.into(),
            url: Uri::from_static(url),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeoDbConfig {
    /// `false` serves from the country database only
    #[serde(default = "GeoDbConfig::default_city")]
    pub city: bool,
    #[serde(default = "GeoDbConfig::default_update_interval")]
    pub update_interval: NonZeroDuration,
    #[serde(default = "GeoDbConfig::default_download_timeout")]
    pub download_timeout: NonZeroDuration,
    #[serde(default = "GeoDbConfig::default_country")]
    pub country: SlotConfig,
    #[serde(default = "GeoDbConfig::default_city_ipv4")]
    pub city_ipv4: SlotConfig,
    #[serde(default = "GeoDbConfig::default_city_ipv6")]
    pub city_ipv6: SlotConfig,
}

impl Default for GeoDbConfig {
    fn default() -> Self {
        Self {
            city: Self::default_city(),
            update_interval: Self::default_update_interval(),
            download_timeout: Self::default_download_timeout(),
            country: Self::default_country(),
            city_ipv4: Self::default_city_ipv4(),
            city_ipv6: Self::default_city_ipv6(),
        }
    }
}

impl GeoDbConfig {
    fn default_city() -> bool {
        true
    }

    fn default_update_interval() -> NonZeroDuration {
        NonZeroU64::new(24 * 60 * 60).unwrap().into()
    }

    fn default_download_timeout() -> NonZeroDuration {
        NonZeroU64::new(300).unwrap().into()
    }

    fn default_country() -> SlotConfig {
        SlotConfig::new("/data/country.mmdb", COUNTRY_DB_URL)
    }

    fn default_city_ipv4() -> SlotConfig {
        SlotConfig::new("/data/city-ipv4.mmdb", CITY_IPV4_DB_URL)
    }

    fn default_city_ipv6() -> SlotConfig {
        SlotConfig::new("/data/city-ipv6.mmdb", CITY_IPV6_DB_URL)
    }

    pub fn deployment(&self) -> Deployment {
        if self.city {
            Deployment::CountryAndCity
        } else {
            Deployment::CountryOnly
        }
    }

    pub fn slot(&self, kind: SlotKind) -> &SlotConfig {
        match kind {
            SlotKind::Country => &self.country,
            SlotKind::CityIpv4 => &self.city_ipv4,
            SlotKind::CityIpv6 => &self.city_ipv6,
        }
    }

    pub fn build<D: Decoder>(&self) -> GeoDb<D> {
        let deployment = self.deployment();
        let slots = deployment.slot_kinds().iter().map(|&kind| {
            let SlotConfig { path, url } = self.slot(kind).clone();
            DatabaseSlot::new(kind, path, url)
        });
        GeoDb::new(
            deployment,
            slots,
            self.update_interval.into(),
            self.download_timeout.into(),
        )
    }
}

pub fn parse_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let toml_string = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&toml_string)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.host, "0.0.0.0:3002".parse().unwrap());
        assert_eq!(config.log_level, log::Level::Info);
        assert_eq!(config.api_key(), None);
        assert_eq!(config.ip_headers, ["X-Forwarded-For", "X-Real-IP"]);
        assert!(config.ip_headers_recursive);
        assert_eq!(config.shutdown_timeout.get(), Duration::from_secs(30));

        let geodb = &config.geodb;
        assert_eq!(geodb.deployment(), Deployment::CountryAndCity);
        assert_eq!(geodb.update_interval.get(), Duration::from_secs(86400));
        assert_eq!(geodb.country.path, Path::new("/data/country.mmdb"));
        assert_eq!(geodb.city_ipv6.path, Path::new("/data/city-ipv6.mmdb"));
        assert_eq!(
            geodb.slot(SlotKind::CityIpv4).url.path(),
            "/npm/@ip-location-db/geolite2-city-mmdb/geolite2-city-ipv4.mmdb"
        );
    }

    #[test]
    fn full_config() {
        let config: Config = toml::from_str(
            r#"
            host = "127.0.0.1:8080"
            log_level = "warn"
            api_key = "secret"
            ip_headers = ["X-Real-IP"]
            ip_headers_recursive = false
            shutdown_timeout = 5

            [geodb]
            city = false
            update_interval = 3600
            download_timeout = 60

            [geodb.country]
            path = "/tmp/country.mmdb"
            url = "https://example.com/country.mmdb"
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.log_level, log::Level::Warn);
        assert_eq!(config.api_key(), Some("secret"));
        assert!(!config.ip_headers_recursive);
        assert_eq!(config.geodb.deployment(), Deployment::CountryOnly);
        assert_eq!(config.geodb.update_interval.get(), Duration::from_secs(3600));
        assert_eq!(
            config.geodb.country,
            SlotConfig {
                path: "/tmp/country.mmdb".into(),
                url: Uri::from_static("https://example.com/country.mmdb"),
            }
        );
    }

    #[test]
    fn empty_api_key_disables_auth() {
        let config: Config = toml::from_str(r#"api_key = """#).unwrap();
        assert_eq!(config.api_key(), None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        for toml_string in [
            "[geodb]\nupdate_interval = 0",
            "[geodb]\ndownload_timeout = 0",
            "[geodb.country]\npath = \"/tmp/country.mmdb\"",
            "[geodb.country]\npath = \"/tmp/country.mmdb\"\nurl = \"not a url\"",
            "unknown = true",
            "host = \"localhost\"",
        ] {
            assert!(
                toml::from_str::<Config>(toml_string).is_err(),
                "{toml_string:?} must be rejected"
            );
        }
    }

    #[cfg(feature = "multi-thread")]
    #[test]
    fn threads() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.threads, ConfigThreads::Cores);
        let config: Config = toml::from_str(r#"threads = "cores""#).unwrap();
        assert_eq!(config.threads, ConfigThreads::Cores);
        let config: Config = toml::from_str("threads = 4").unwrap();
        assert_eq!(
            config.threads,
            ConfigThreads::Custom(NonZeroUsize::new(4).unwrap())
        );
        assert!(toml::from_str::<Config>(r#"threads = "many""#).is_err());
        assert!(toml::from_str::<Config>("threads = 0").is_err());
    }

    #[test]
    fn build_geo_db() {
        let config: Config = toml::from_str("[geodb]\ncity = false").unwrap();
        let geo_db: GeoDb = config.geodb.build();
        assert_eq!(geo_db.deployment(), Deployment::CountryOnly);
        assert!(!geo_db.is_ready());
    }
}
