use crate::geo::{DatabaseSlot, Decoder, FetchError, InitError, RefreshError};
use crate::uri_tools::resolve_location;

use hyper::body::{Body, HttpBody};
use hyper::client::{Client, HttpConnector};
use hyper::http::uri::Uri;
use hyper::{Request, Response};
use hyper_tls::HttpsConnector;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const MAX_REDIRECTS: usize = 8;

/// Downloads databases next to their final location, validates and swaps them in
pub struct Refresher {
    client: Client<HttpsConnector<HttpConnector>>,
    timeout: Duration,
}

impl Refresher {
    pub fn new(timeout: Duration) -> Self {
        let https = HttpsConnector::new();
        Self {
            client: Client::builder().build::<_, Body>(https),
            timeout,
        }
    }

    async fn fetch(&self, mut uri: Uri) -> Result<Response<Body>, FetchError> {
        let mut redirects = 0;
        loop {
            let request = Request::builder().uri(&uri).body(Body::empty())?;
            let response = self.client.request(request).await?;
            let status = response.status();

            if status.is_success() {
                return Ok(response);
            }
            if !status.is_redirection() {
                return Err(status.into());
            }
            redirects += 1;
            if redirects > MAX_REDIRECTS {
                return Err(FetchError::TooManyRedirects(status));
            }
            uri = response
                .headers()
                .get("Location")
                .and_then(|location| resolve_location(&uri, location.as_bytes()))
                .ok_or(status)?;
        }
    }

    async fn fetch_to_file(&self, uri: &Uri, path: &Path) -> Result<(), FetchError> {
        let io_error = |error| FetchError::Io {
            path: path.to_owned(),
            error,
        };
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await.map_err(io_error)?;
        }
        let mut body = self.fetch(uri.clone()).await?.into_body();
        let mut file = tokio::fs::File::create(path).await.map_err(io_error)?;
        while let Some(chunk) = body.data().await {
            file.write_all(&chunk?).await.map_err(io_error)?;
        }
        file.sync_all().await.map_err(io_error)?;
        Ok(())
    }

    async fn download_to<D: Decoder>(
        &self,
        slot: &DatabaseSlot<D>,
        tmp_path: &Path,
    ) -> Result<(), RefreshError> {
        tokio::time::timeout(self.timeout, self.fetch_to_file(slot.uri(), tmp_path))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout))??;

        // Same decoder as for the live file, the handle is dropped right away
        let validate_path = tmp_path.to_owned();
        tokio::task::spawn_blocking(move || D::open(&validate_path).map(drop))
            .await?
            .map_err(RefreshError::Validation)?;

        tokio::fs::rename(tmp_path, slot.path())
            .await
            .map_err(|error| RefreshError::Io {
                path: slot.path().to_owned(),
                error,
            })
    }

    /// Replaces the slot's file with a fresh validated copy. The live file and the live handle
    /// are left untouched on any failure.
    pub async fn download<D: Decoder>(&self, slot: &DatabaseSlot<D>) -> Result<(), RefreshError> {
        let tmp_path = slot.tmp_path();
        let result = self.download_to(slot, &tmp_path).await;
        match &result {
            Ok(()) => log::info!(
                r#"{} database downloaded from "{}" to "{}""#,
                slot.kind(),
                slot.uri(),
                slot.path().display(),
            ),
            Err(_) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
            }
        }
        result
    }

    /// Opens the slot's file off the async workers and swaps it in
    pub async fn load<D: Decoder>(&self, slot: &Arc<DatabaseSlot<D>>) -> Result<(), RefreshError> {
        let slot = Arc::clone(slot);
        tokio::task::spawn_blocking(move || slot.load()).await??;
        Ok(())
    }

    pub async fn refresh<D: Decoder>(&self, slot: &Arc<DatabaseSlot<D>>) -> Result<(), RefreshError> {
        self.download(slot).await?;
        self.load(slot).await
    }

    async fn ensure(&self, slot: &Arc<DatabaseSlot<impl Decoder>>) -> Result<(), RefreshError> {
        if !slot.path().exists() {
            log::info!(
                r#"{} database not found at "{}", downloading from "{}""#,
                slot.kind(),
                slot.path().display(),
                slot.uri(),
            );
            self.download(slot).await?;
        }
        self.load(slot).await
    }

    /// Downloads the database if there is no local copy yet, then loads it
    pub async fn ensure_and_load<D: Decoder>(
        &self,
        slot: &Arc<DatabaseSlot<D>>,
    ) -> Result<(), InitError> {
        self.ensure(slot).await.map_err(|source| InitError {
            slot: slot.kind(),
            source,
        })
    }
}
