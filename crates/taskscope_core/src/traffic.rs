//! Passive observation of outgoing calls: credential harvesting and contract learning.
//! Nothing here alters a request or a response.

use crate::contract::SharedContractStore;
use crate::credentials::HeaderHarvester;
use crate::error::AppError;
use crate::inference::{ContractInference, ObservedCall};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Method};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

/// Set while the explorer's own write is in flight so it never learns from itself.
#[derive(Debug, Clone, Default)]
pub struct OwnRequestFlag(Rc<Cell<bool>>);

impl OwnRequestFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.get()
    }

    pub fn raise(&self) -> OwnRequestGuard {
        self.0.set(true);
        OwnRequestGuard(self.0.clone())
    }
}

/// Clears the flag when dropped, including on early returns and errors.
#[derive(Debug)]
pub struct OwnRequestGuard(Rc<Cell<bool>>);

impl Drop for OwnRequestGuard {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

#[derive(Clone)]
pub struct TrafficTap {
    inference: ContractInference,
    store: SharedContractStore,
    own_request: OwnRequestFlag,
    harvester: HeaderHarvester,
}

impl TrafficTap {
    pub fn new(
        inference: ContractInference,
        store: SharedContractStore,
        own_request: OwnRequestFlag,
        harvester: HeaderHarvester,
    ) -> Self {
        store.borrow_mut().arm();
        Self {
            inference,
            store,
            own_request,
            harvester,
        }
    }

    /// Picks up credentials from outgoing headers, whether or not the call gets through.
    pub fn harvest(&self, headers: &[(String, String)]) -> bool {
        self.harvester.capture_headers(headers)
    }

    /// Feeds one completed call. Returns `true` when a contract was learned.
    pub fn observe(&self, call: &ObservedCall) -> bool {
        self.harvest(&call.headers);
        self.learn(call)
    }

    fn learn(&self, call: &ObservedCall) -> bool {
        if self.own_request.is_set() {
            debug!("ignoring own {} {}", call.method.as_str(), call.url);
            return false;
        }
        match self.inference.extract(call) {
            Some(contract) => {
                self.store.borrow_mut().record(contract);
                true
            }
            None => false,
        }
    }
}

/// Decorates a transport with a [`TrafficTap`].
pub struct ObservingTransport<T> {
    inner: T,
    tap: TrafficTap,
}

impl<T> ObservingTransport<T> {
    pub fn new(inner: T, tap: TrafficTap) -> Self {
        Self { inner, tap }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

#[async_trait(?Send)]
impl<T: HttpTransport> HttpTransport for ObservingTransport<T> {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, AppError> {
        self.tap.harvest(&request.headers);
        let response = self.inner.send(request).await?;
        self.tap.learn(&ObservedCall {
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            status: response.status,
        });
        Ok(response)
    }
}

/// One entry of a recorded traffic file, as accepted by `learn`.
#[derive(Debug, Clone, Deserialize)]
pub struct CapturedCall {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default = "default_status")]
    pub status: u16,
}

fn default_status() -> u16 {
    200
}

impl CapturedCall {
    pub fn into_observed(self) -> Result<ObservedCall, AppError> {
        let method = Method::parse(&self.method)
            .ok_or_else(|| AppError::invalid_data(format!("unknown method: {}", self.method)))?;
        // Hosts often send JSON as a string body.
        let body = match self.body {
            Some(Value::String(raw)) => serde_json::from_str(&raw).ok(),
            other => other,
        };
        Ok(ObservedCall {
            method,
            url: self.url,
            headers: self.headers.into_iter().collect(),
            body,
            status: self.status,
        })
    }
}

pub fn parse_capture(content: &str) -> Result<Vec<ObservedCall>, AppError> {
    let value: Value =
        serde_json::from_str(content).map_err(|err| AppError::invalid_data(err.to_string()))?;
    let entries = match value {
        Value::Array(_) => value,
        single @ Value::Object(_) => Value::Array(vec![single]),
        _ => return Err(AppError::invalid_data("capture must be an object or an array")),
    };
    let calls: Vec<CapturedCall> =
        serde_json::from_value(entries).map_err(|err| AppError::invalid_data(err.to_string()))?;
    calls.into_iter().map(CapturedCall::into_observed).collect()
}
