//! reqwest client for a `fleetcoord-store` server

use super::CoordinationStore;
use crate::common::{Error, Result};
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

/// Characters escaped when a key is placed in a URL path segment
const KEY_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'#')
    .add(b'&');

fn encode_key(key: &str) -> String {
    utf8_percent_encode(key, KEY_ENCODE_SET).to_string()
}

#[derive(Deserialize)]
struct StoredResponse {
    stored: bool,
}

#[derive(Deserialize)]
struct DeletedResponse {
    deleted: bool,
}

/// Remote store over HTTP; every transport failure is a store error
#[derive(Clone)]
pub struct HttpStore {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/kv/{}", self.base_url, encode_key(key))
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration, nx: bool) -> Result<bool> {
        let resp = self
            .client
            .put(self.key_url(key))
            .query(&[
                ("ttl_ms", ttl.as_millis().to_string()),
                ("nx", nx.to_string()),
            ])
            .body(value)
            .send()
            .await
            .map_err(store_error)?;
        let bytes = expect_success(resp).await?;
        let parsed: StoredResponse = serde_json::from_slice(&bytes)?;
        Ok(parsed.stored)
    }
}

fn store_error(e: reqwest::Error) -> Error {
    Error::Store(e.to_string())
}

async fn expect_success(resp: reqwest::Response) -> Result<bytes::Bytes> {
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(store_error)?;
    if !status.is_success() {
        return Err(Error::Store(format!(
            "store returned {}: {}",
            status,
            String::from_utf8_lossy(&bytes)
        )));
    }
    Ok(bytes)
}

#[async_trait]
impl CoordinationStore for HttpStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .client
            .get(self.key_url(key))
            .send()
            .await
            .map_err(store_error)?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Ok(Some(expect_success(resp).await?.to_vec()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.put(key, value, ttl, false).await.map(|_| ())
    }

    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool> {
        self.put(key, value, ttl, true).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let resp = self
            .client
            .delete(self.key_url(key))
            .send()
            .await
            .map_err(store_error)?;
        let bytes = expect_success(resp).await?;
        let parsed: DeletedResponse = serde_json::from_slice(&bytes)?;
        Ok(parsed.deleted)
    }

    async fn ping(&self) -> Result<()> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(store_error)?;
        expect_success(resp).await.map(|_| ())
    }
}
