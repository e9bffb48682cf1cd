//! Search engine seeding via in-instance curl calls
//!
//! The engine only speaks HTTPS with basic auth on its loopback interface,
//! so every call is issued with curl from inside the instance. Host-side
//! transport and TLS setup stay out of scope.

use crate::error::{RespawnError, RespawnResult};
use crate::seed::Seeder;
use crate::service::{ExecOutput, ServiceHandle};
use async_trait::async_trait;
use std::fmt;
use tracing::{debug, info};

const CURL_BIN: &str = "/usr/bin/curl";
const ENGINE_URL: &str = "https://localhost:9200";

/// Basic-auth credentials for the search engine
#[derive(Debug, Clone)]
pub struct SearchCredentials {
    pub user: String,
    pub password: String,
}

impl SearchCredentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl Default for SearchCredentials {
    fn default() -> Self {
        Self::new("elastic", "changeme")
    }
}

/// One HTTP call against the search engine's REST API
#[derive(Debug, Clone)]
pub struct EngineCall {
    pub method: String,
    pub endpoint: String,
    pub payload: Option<String>,
}

impl EngineCall {
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            payload: None,
        }
    }

    pub fn with_payload(
        method: impl Into<String>,
        endpoint: impl Into<String>,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            method: method.into(),
            endpoint: endpoint.into(),
            payload: Some(payload.into()),
        }
    }

    fn to_curl_args(&self, creds: &SearchCredentials) -> Vec<String> {
        let mut args = vec![
            CURL_BIN.to_string(),
            "-k".to_string(),
            "--silent".to_string(),
            "-u".to_string(),
            format!("{}:{}", creds.user, creds.password),
            "-H".to_string(),
            "Content-Type: application/json".to_string(),
            "-X".to_string(),
            self.method.clone(),
            format!("{}{}", ENGINE_URL, self.endpoint),
        ];
        if let Some(ref payload) = self.payload {
            if !payload.is_empty() {
                args.push("-d".to_string());
                args.push(payload.clone());
            }
        }
        args
    }
}

impl fmt::Display for EngineCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.endpoint)
    }
}

/// Issue one call against the engine from inside the instance
pub async fn call_engine(
    handle: &dyn ServiceHandle,
    creds: &SearchCredentials,
    call: &EngineCall,
) -> RespawnResult<ExecOutput> {
    debug!("Engine call: {}", call);
    let output = handle.execute(&call.to_curl_args(creds)).await?;
    output.require_success(handle.role(), &call.to_string())
}

/// Delete the given indices, leaving system state untouched
pub async fn delete_indices(
    handle: &dyn ServiceHandle,
    creds: &SearchCredentials,
    indices: &[&str],
) -> RespawnResult<()> {
    for index in indices {
        call_engine(
            handle,
            creds,
            &EngineCall::new("DELETE", format!("/{}", index)),
        )
        .await?;
    }
    Ok(())
}

/// Seeds the search engine with an ordered sequence of engine calls
///
/// Typically: create the index with its mapping, bulk-load documents with
/// `?refresh=true`, then any mapping updates and follow-up loads.
pub struct BulkIndexSeeder {
    creds: SearchCredentials,
    calls: Vec<EngineCall>,
}

impl BulkIndexSeeder {
    pub fn new(creds: SearchCredentials, calls: Vec<EngineCall>) -> Self {
        Self { creds, calls }
    }

    /// The common two-step load: index creation with a mapping, then one
    /// bulk body
    pub fn index_load(
        creds: SearchCredentials,
        index: &str,
        mapping_json: impl Into<String>,
        bulk_ndjson: impl Into<String>,
    ) -> Self {
        Self::new(
            creds,
            vec![
                EngineCall::with_payload("PUT", format!("/{}", index), mapping_json),
                EngineCall::with_payload(
                    "POST",
                    format!("/{}/_bulk?refresh=true", index),
                    bulk_ndjson,
                ),
            ],
        )
    }
}

#[async_trait]
impl Seeder for BulkIndexSeeder {
    async fn seed(&self, handle: &dyn ServiceHandle) -> RespawnResult<()> {
        let role = handle.role();
        info!("Running {} engine calls against {}", self.calls.len(), role);

        for call in &self.calls {
            call_engine(handle, &self.creds, call)
                .await
                .map_err(|e| RespawnError::Seed {
                    role,
                    reason: format!("{}: {}", call, e),
                })?;
        }

        info!("Finished seeding {}", role);
        Ok(())
    }
}
