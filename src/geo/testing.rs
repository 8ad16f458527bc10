//! Test doubles: a plain-text database and a local HTTP source serving it.
//!
//! A text database starts with [HEADER], then one record per line:
//! `IP COUNTRY [POSTAL [LAT LON]]`, where `-` stands for an empty country code.

use crate::geo::{DecodeError, Decoder, OpenError, RawRecord};

use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Request, Response, Server, StatusCode, Uri};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub const HEADER: &str = "#ipgeo-test";

pub struct TextDb {
    records: HashMap<IpAddr, RawRecord>,
}

impl TextDb {
    fn parse_line(line: &str) -> Option<(IpAddr, RawRecord)> {
        let mut fields = line.split_whitespace();
        let ip = fields.next()?.parse().ok()?;
        let country_code = match fields.next()? {
            "-" => Some(String::new()),
            code => Some(code.to_owned()),
        };
        let postal_code = fields.next().map(str::to_owned);
        let latitude = fields.next().and_then(|s| s.parse().ok());
        let longitude = fields.next().and_then(|s| s.parse().ok());
        Some((
            ip,
            RawRecord {
                country_code,
                postal_code,
                latitude,
                longitude,
            },
        ))
    }
}

impl Decoder for TextDb {
    fn open(path: &Path) -> Result<Self, OpenError> {
        let text = std::fs::read_to_string(path).map_err(|error| OpenError::Io {
            path: path.to_owned(),
            error,
        })?;
        let format_error = |reason: &str| OpenError::Format {
            path: path.to_owned(),
            reason: reason.to_owned(),
        };
        let mut lines = text.lines();
        if lines.next() != Some(HEADER) {
            return Err(format_error("missing header"));
        }
        let records = lines
            .filter(|line| !line.trim().is_empty())
            .map(|line| Self::parse_line(line).ok_or_else(|| format_error(line)))
            .collect::<Result<_, _>>()?;
        Ok(Self { records })
    }

    fn decode(&self, address: IpAddr) -> Result<Option<RawRecord>, DecodeError> {
        if address.is_unspecified() {
            return Err(DecodeError("unspecified address poisons the test db".into()));
        }
        Ok(self.records.get(&address).cloned())
    }
}

pub fn render(records: &[&str]) -> String {
    let mut text = format!("{HEADER}\n");
    for record in records {
        text.push_str(record);
        text.push('\n');
    }
    text
}

pub fn write_db(path: &Path, records: &[&str]) {
    std::fs::write(path, render(records)).unwrap();
}

/// Canned response of [serve]
#[derive(Clone)]
pub struct Route {
    pub path: &'static str,
    pub status: StatusCode,
    pub body: Vec<u8>,
    pub location: Option<&'static str>,
    pub delay: Option<Duration>,
}

impl Route {
    pub fn ok(path: &'static str, body: impl Into<Vec<u8>>) -> Self {
        Self {
            path,
            status: StatusCode::OK,
            body: body.into(),
            location: None,
            delay: None,
        }
    }

    pub fn status(path: &'static str, status: StatusCode) -> Self {
        Self {
            status,
            ..Self::ok(path, "")
        }
    }

    pub fn redirect(path: &'static str, location: &'static str) -> Self {
        Self {
            location: Some(location),
            ..Self::status(path, StatusCode::FOUND)
        }
    }

    pub fn delayed(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }
}

/// Plays the remote database source, unknown paths are answered with 404
pub async fn serve(routes: Vec<Route>) -> SocketAddr {
    let routes = Arc::new(routes);
    let make_service = make_service_fn(move |_connection: &AddrStream| {
        let routes = routes.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                let route = routes
                    .iter()
                    .find(|route| route.path == request.uri().path())
                    .cloned();
                async move {
                    let Some(route) = route else {
                        return Response::builder()
                            .status(StatusCode::NOT_FOUND)
                            .body(Body::empty());
                    };
                    if let Some(delay) = route.delay {
                        tokio::time::sleep(delay).await;
                    }
                    let mut builder = Response::builder().status(route.status);
                    if let Some(location) = route.location {
                        builder = builder.header("Location", location);
                    }
                    builder.body(Body::from(route.body))
                }
            }))
        }
    });
    let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_service);
    let addr = server.local_addr();
    tokio::spawn(server);
    addr
}

pub fn uri(addr: SocketAddr, path: &str) -> Uri {
    format!("http://{addr}{path}").parse().unwrap()
}
