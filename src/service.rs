use crate::config::Config;
use crate::geo::{Decoder, GeoDb, GeoRecord, LookupError, MaxMindDb};
use crate::header_tools::client_ip;

use hyper::header::{HeaderMap, HeaderValue, ALLOW, CONTENT_TYPE};
use hyper::server::conn::{AddrIncoming, AddrStream};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use thiserror::Error;
use tokio::sync::oneshot;

const API_KEY_HEADER: &str = "X-API-Key";
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("not found")]
    RouteNotFound,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("invalid or missing API key")]
    Unauthorized,
    #[error("IP address required")]
    AddressRequired,
    #[error(transparent)]
    Lookup(#[from] LookupError),
    #[error(r#"Internal server error: "{0:?}""#)]
    Json(#[from] serde_json::Error),
}

impl ServiceError {
    fn status(&self) -> StatusCode {
        match self {
            Self::RouteNotFound => StatusCode::NOT_FOUND,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::AddressRequired | Self::Lookup(LookupError::InvalidAddress) => {
                StatusCode::BAD_REQUEST
            }
            Self::Lookup(LookupError::NotFound) => StatusCode::NOT_FOUND,
            Self::Lookup(LookupError::NotReady) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    uptime: String,
    ready: bool,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

enum Route<'a> {
    Health,
    LookupSelf,
    Lookup(&'a str),
}

impl<'a> Route<'a> {
    fn from_path(path: &'a str) -> Option<Self> {
        match path {
            "/health" => Some(Self::Health),
            "/lookup" => Some(Self::LookupSelf),
            _ => {
                let address = path.strip_prefix("/lookup/")?;
                (!address.contains('/')).then_some(Self::Lookup(address))
            }
        }
    }
}

/// `city=true` or `city=1` asks for the city tier first
fn prefer_city(query: Option<&str>) -> bool {
    query
        .into_iter()
        .flat_map(|query| query.split('&'))
        .filter_map(|pair| pair.split_once('='))
        .any(|(key, value)| key == "city" && matches!(value, "true" | "1"))
}

/// Rounded to whole seconds, leading zero units are omitted: `3h0m12s`, `4m2s`, `9s`
fn format_uptime(uptime: Duration) -> String {
    let secs = (uptime.as_millis() + 500) / 1000;
    let (hours, minutes, secs) = (secs / 3600, secs / 60 % 60, secs % 60);
    if hours > 0 {
        format!("{hours}h{minutes}m{secs}s")
    } else if minutes > 0 {
        format!("{minutes}m{secs}s")
    } else {
        format!("{secs}s")
    }
}

fn json_response<T: Serialize>(
    status: StatusCode,
    body: &T,
) -> Result<Response<Body>, ServiceError> {
    let mut response = Response::new(Body::from(serde_json::to_vec(body)?));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(response)
}

pub struct IpGeoService<D = MaxMindDb> {
    geo_db: Arc<GeoDb<D>>,
    api_key: Option<String>,
    ip_headers: Vec<String>,
    ip_headers_recursive: bool,
    started: Instant,
}

impl<D: Decoder> IpGeoService<D> {
    pub fn from_config(config: &Config, geo_db: Arc<GeoDb<D>>) -> Self {
        Self {
            geo_db,
            api_key: config.api_key().map(str::to_owned),
            ip_headers: config.ip_headers.clone(),
            ip_headers_recursive: config.ip_headers_recursive,
            started: Instant::now(),
        }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), ServiceError> {
        let Some(api_key) = &self.api_key else {
            return Ok(());
        };
        let provided = headers
            .get(API_KEY_HEADER)
            .map(HeaderValue::as_bytes)
            .unwrap_or_default();
        if bool::from(provided.ct_eq(api_key.as_bytes())) {
            Ok(())
        } else {
            Err(ServiceError::Unauthorized)
        }
    }

    fn remote_ip(&self, headers: &HeaderMap, socket_ip_addr: IpAddr) -> IpAddr {
        client_ip(headers, &self.ip_headers, self.ip_headers_recursive).unwrap_or(socket_ip_addr)
    }

    fn health(&self) -> Result<Response<Body>, ServiceError> {
        let health = Health {
            status: "healthy",
            uptime: format_uptime(self.started.elapsed()),
            ready: self.geo_db.is_ready(),
        };
        json_response(StatusCode::OK, &health)
    }

    fn lookup(
        &self,
        lookup: Result<GeoRecord, LookupError>,
    ) -> Result<Response<Body>, ServiceError> {
        json_response(StatusCode::OK, &lookup?)
    }

    pub fn response(
        &self,
        socket_ip_addr: IpAddr,
        request: &Request<Body>,
    ) -> Result<Response<Body>, ServiceError> {
        let route = Route::from_path(request.uri().path()).ok_or(ServiceError::RouteNotFound)?;
        if request.method() != Method::GET {
            return Err(ServiceError::MethodNotAllowed);
        }
        let city = prefer_city(request.uri().query());
        match route {
            Route::Health => self.health(),
            Route::LookupSelf => {
                self.authorize(request.headers())?;
                let remote_ip = self.remote_ip(request.headers(), socket_ip_addr);
                self.lookup(self.geo_db.lookup_ip(remote_ip, city))
            }
            Route::Lookup(address) => {
                self.authorize(request.headers())?;
                if address.is_empty() {
                    return Err(ServiceError::AddressRequired);
                }
                self.lookup(self.geo_db.lookup(address, city))
            }
        }
    }
}

pub fn make_error_response(error: ServiceError) -> Response<Body> {
    if let ServiceError::Json(error) = &error {
        log::error!("failed to serialize response: {error}");
    }
    let status = error.status();
    let body = ErrorBody {
        error: error.to_string(),
    };
    let mut response =
        json_response(status, &body).unwrap_or_else(|_| Response::new(Body::empty()));
    *response.status_mut() = status;
    if status == StatusCode::METHOD_NOT_ALLOWED {
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static("GET"));
    }
    response
}

pub fn log_response(socket_ip_addr: IpAddr, request: &Request<Body>, response: &Response<Body>) {
    log::info!(
        "{} {} {} {}",
        socket_ip_addr,
        request.method(),
        request.uri(),
        response.status(),
    );
}

/// Serves until `shutdown_signal` resolves, then lets open connections finish for at most
/// `shutdown_timeout` before dropping them.
pub async fn serve<D: Decoder>(
    incoming: AddrIncoming,
    ipgeo_service: Arc<IpGeoService<D>>,
    shutdown_signal: impl Future<Output = ()>,
    shutdown_timeout: Duration,
) -> Result<(), hyper::Error> {
    let make_service = make_service_fn(move |connection: &AddrStream| {
        let socket_remote_ip = connection.remote_addr().ip();
        let ipgeo_service = ipgeo_service.clone();
        let service = service_fn(move |request: Request<Body>| {
            let ipgeo_service = ipgeo_service.clone();
            async move {
                let response = ipgeo_service
                    .response(socket_remote_ip, &request)
                    .unwrap_or_else(make_error_response);
                log_response(socket_remote_ip, &request, &response);
                Ok::<_, Infallible>(response)
            }
        });
        async move { Ok::<_, Infallible>(service) }
    });

    let (signalled_sender, signalled) = oneshot::channel();
    let server = Server::builder(incoming)
        .http1_header_read_timeout(HEADER_READ_TIMEOUT)
        .serve(make_service)
        .with_graceful_shutdown(async move {
            shutdown_signal.await;
            let _ = signalled_sender.send(());
        });
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result,
        Ok(()) = signalled => {}
    }
    match tokio::time::timeout(shutdown_timeout, server).await {
        Ok(result) => result,
        Err(_) => {
            log::warn!(
                "connections still open after {}s, closing them",
                shutdown_timeout.as_secs_f32()
            );
            Ok(())
        }
    }
}
