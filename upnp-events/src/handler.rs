//! GENA subscription management and NOTIFY dispatch.
//!
//! [`EventHandler`] owns one [`SubscriptionRecord`] per SID. A record holds
//! everything needed to renew or cancel the subscription, so callers can act
//! on a SID alone. Incoming NOTIFY requests are parsed and handed to the
//! subscribed [`Service`], which updates its state variables and fires its
//! event callback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use callback_server::NotifyHandler;
use futures::future::join_all;
use parking_lot::Mutex;
use upnp_description::{Service, ServiceKey};
use upnp_requester::{HttpRequest, HttpResponse, Requester};

use crate::backlog::Backlog;
use crate::config::EventConfig;
use crate::error::{EventError, Result};
use crate::propertyset::{parse_propertyset, trim_body};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_PRECONDITION_FAILED: u16 = 412;

/// Identifies a subscription by its service or by its SID.
#[derive(Debug, Clone)]
pub enum SubscriptionTarget {
    Service(Arc<Service>),
    Sid(String),
}

impl From<Arc<Service>> for SubscriptionTarget {
    fn from(service: Arc<Service>) -> Self {
        SubscriptionTarget::Service(service)
    }
}

impl From<&Arc<Service>> for SubscriptionTarget {
    fn from(service: &Arc<Service>) -> Self {
        SubscriptionTarget::Service(Arc::clone(service))
    }
}

impl From<String> for SubscriptionTarget {
    fn from(sid: String) -> Self {
        SubscriptionTarget::Sid(sid)
    }
}

impl From<&str> for SubscriptionTarget {
    fn from(sid: &str) -> Self {
        SubscriptionTarget::Sid(sid.to_string())
    }
}

/// Bookkeeping for one active subscription.
///
/// The service is released when the record is removed from the handler.
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub service_key: ServiceKey,
    /// Absolute event subscription URL
    pub event_sub_url: String,
    pub service: Arc<Service>,
    /// Timeout granted by the device
    pub timeout: Duration,
}

impl SubscriptionRecord {
    fn new(service: &Arc<Service>, timeout: Duration) -> Self {
        Self {
            service_key: service.key(),
            event_sub_url: service.absolute_event_sub_url(),
            service: Arc::clone(service),
            timeout,
        }
    }
}

/// SID table and NOTIFY backlog, changed together under one lock.
///
/// A NOTIFY either finds its SID or lands in the backlog, and a new SID
/// either claims its backlog or is still unknown; there is no state in between.
struct State {
    subscriptions: HashMap<String, SubscriptionRecord>,
    backlog: Backlog,
}

/// Handles UPnP eventing for any number of services.
///
/// A single handler can be shared by many devices; it only needs the
/// callback URL of the notify server that delivers requests to
/// [`handle_notify`](Self::handle_notify).
pub struct EventHandler {
    callback_url: String,
    requester: Arc<dyn Requester>,
    config: EventConfig,
    state: Mutex<State>,
    /// Held while property changes are dispatched, so replayed and fresh
    /// NOTIFY requests reach the service in receipt order
    dispatch: Mutex<()>,
}

impl EventHandler {
    pub fn new(callback_url: impl Into<String>, requester: Arc<dyn Requester>, config: EventConfig) -> Self {
        let backlog = Backlog::new(config.backlog_capacity);
        Self {
            callback_url: callback_url.into(),
            requester,
            config,
            state: Mutex::new(State {
                subscriptions: HashMap::new(),
                backlog,
            }),
            dispatch: Mutex::new(()),
        }
    }

    /// URL devices are asked to send NOTIFY requests to.
    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    /// SID of the subscription to `service`, if any.
    pub fn sid_for_service(&self, service: &Service) -> Option<String> {
        let key = service.key();
        self.state
            .lock()
            .subscriptions
            .iter()
            .find(|(_, record)| record.service_key == key)
            .map(|(sid, _)| sid.clone())
    }

    pub fn service_for_sid(&self, sid: &str) -> Option<Arc<Service>> {
        self.state
            .lock()
            .subscriptions
            .get(sid)
            .map(|record| Arc::clone(&record.service))
    }

    pub fn record_for_sid(&self, sid: &str) -> Option<SubscriptionRecord> {
        self.state.lock().subscriptions.get(sid).cloned()
    }

    pub fn sids(&self) -> Vec<String> {
        self.state.lock().subscriptions.keys().cloned().collect()
    }

    fn resolve(&self, target: &SubscriptionTarget) -> Result<(String, SubscriptionRecord)> {
        match target {
            SubscriptionTarget::Service(service) => {
                let key = service.key();
                self.state
                    .lock()
                    .subscriptions
                    .iter()
                    .find(|(_, record)| record.service_key == key)
                    .map(|(sid, record)| (sid.clone(), record.clone()))
                    .ok_or_else(|| EventError::UnknownSubscription(key.to_string()))
            }
            SubscriptionTarget::Sid(sid) => self
                .record_for_sid(sid)
                .map(|record| (sid.clone(), record))
                .ok_or_else(|| EventError::UnknownSubscription(sid.clone())),
        }
    }

    /// Subscribe to events of `service`.
    ///
    /// Returns the SID and the timeout granted by the device, which may differ
    /// from the requested one (default 1800 seconds). NOTIFY requests that
    /// arrived for the SID before this call returned are replayed once.
    pub async fn subscribe(&self, service: &Arc<Service>, timeout: Option<Duration>) -> Result<(String, Duration)> {
        let timeout = timeout.unwrap_or(EventConfig::DEFAULT_SUBSCRIBE_TIMEOUT);
        let event_sub_url = service.absolute_event_sub_url();
        tracing::debug!(
            "Subscribing to: {}, callback URL: {}",
            service.key(),
            self.callback_url
        );

        let request = HttpRequest::new("SUBSCRIBE", &event_sub_url)
            .with_header("NT", "upnp:event")
            .with_header("TIMEOUT", &timeout_header(timeout))
            .with_header("HOST", &host_header(&event_sub_url))
            .with_header("CALLBACK", &format!("<{}>", self.callback_url));
        let response = self.send(request).await?;

        let sid = match response.header("sid") {
            Some(sid) if !sid.is_empty() => sid.to_string(),
            _ => {
                tracing::debug!("No SID received, aborting subscribe");
                return Err(EventError::Sid(event_sub_url));
            }
        };
        let timeout = granted_timeout(&response).unwrap_or(timeout);

        tracing::debug!("Subscribed, service: {}, SID: {}, timeout: {:?}", service.key(), sid, timeout);
        self.register(&sid, SubscriptionRecord::new(service, timeout), None);

        Ok((sid, timeout))
    }

    /// Renew a subscription.
    ///
    /// A connectivity error removes the subscription and is returned. Any
    /// other failure removes the subscription and falls back to a fresh
    /// [`subscribe`](Self::subscribe) of the same service.
    pub async fn resubscribe(
        &self,
        target: impl Into<SubscriptionTarget>,
        timeout: Option<Duration>,
    ) -> Result<(String, Duration)> {
        let timeout = timeout.unwrap_or(EventConfig::DEFAULT_SUBSCRIBE_TIMEOUT);
        let (sid, record) = self.resolve(&target.into())?;
        tracing::debug!("Resubscribing to: {}", sid);

        match self.do_resubscribe(&sid, &record, timeout).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_connectivity() => {
                tracing::debug!("Resubscribe for {} failed: {}. Device offline, not retrying.", sid, e);
                self.state.lock().subscriptions.remove(&sid);
                Err(e)
            }
            Err(e) => {
                tracing::debug!("Resubscribe for {} failed: {}. Trying full subscribe.", sid, e);
                self.state.lock().subscriptions.remove(&sid);
                self.subscribe(&record.service, Some(timeout)).await
            }
        }
    }

    async fn do_resubscribe(
        &self,
        sid: &str,
        record: &SubscriptionRecord,
        timeout: Duration,
    ) -> Result<(String, Duration)> {
        let request = HttpRequest::new("SUBSCRIBE", &record.event_sub_url)
            .with_header("HOST", &host_header(&record.event_sub_url))
            .with_header("SID", sid)
            .with_header("TIMEOUT", &timeout_header(timeout));
        let response = self.send(request).await?;

        let timeout = granted_timeout(&response).unwrap_or(timeout);
        let new_sid = match response.header("sid") {
            Some(new_sid) if !new_sid.is_empty() => new_sid.to_string(),
            _ => sid.to_string(),
        };

        let mut renewed = record.clone();
        renewed.timeout = timeout;
        if new_sid != sid {
            tracing::debug!("Device changed SID {} to {}", sid, new_sid);
        }
        self.register(&new_sid, renewed, Some(sid));
        tracing::debug!("Resubscribed, SID: {}, timeout: {:?}", new_sid, timeout);

        Ok((new_sid, timeout))
    }

    /// Cancel a subscription.
    ///
    /// The record is removed before the request is sent, so a failing
    /// UNSUBSCRIBE still leaves no local state behind.
    pub async fn unsubscribe(&self, target: impl Into<SubscriptionTarget>) -> Result<()> {
        let (sid, record) = self.resolve(&target.into())?;
        tracing::debug!("Unsubscribing from SID: {}, service: {}", sid, record.service_key);

        self.state.lock().subscriptions.remove(&sid);

        let request = HttpRequest::new("UNSUBSCRIBE", &record.event_sub_url)
            .with_header("HOST", &host_header(&record.event_sub_url))
            .with_header("SID", &sid);
        self.send(request).await?;
        Ok(())
    }

    /// Renew every subscription concurrently; the first failure is returned.
    pub async fn resubscribe_all(&self) -> Result<()> {
        let sids = self.sids();
        let results = join_all(sids.into_iter().map(|sid| self.resubscribe(sid, None))).await;
        results.into_iter().find_map(|r| r.err()).map_or(Ok(()), Err)
    }

    /// Cancel every subscription concurrently, ignoring failures.
    pub async fn unsubscribe_all(&self) {
        let sids = self.sids();
        let results = join_all(sids.iter().map(|sid| self.unsubscribe(sid.as_str()))).await;
        for (sid, result) in sids.iter().zip(results) {
            if let Err(e) = result {
                tracing::debug!("Failed unsubscribing from: {}, reason: {}", sid, e);
            }
        }
    }

    /// Handle a NOTIFY request and return the HTTP status to answer with.
    ///
    /// - 400 when `NT` or `NTS` is missing, or the body of a known SID is not a property set
    /// - 412 when `NT`/`NTS` have unexpected values or `SID` is missing
    /// - 200 otherwise; requests for unknown SIDs are kept for replay
    pub async fn handle_notify(&self, request: HttpRequest) -> u16 {
        self.process_notify(request)
    }

    fn process_notify(&self, mut request: HttpRequest) -> u16 {
        if let Some(body) = request.body.as_mut() {
            let trimmed_len = trim_body(body).len();
            body.truncate(trimmed_len);
        }

        let (Some(nt), Some(nts)) = (request.header("NT"), request.header("NTS")) else {
            return STATUS_BAD_REQUEST;
        };
        if nt != "upnp:event" || nts != "upnp:propchange" {
            return STATUS_PRECONDITION_FAILED;
        }
        let Some(sid) = request.header("SID").map(str::to_string) else {
            return STATUS_PRECONDITION_FAILED;
        };

        let _dispatch = self.dispatch.lock();
        let service = {
            let mut state = self.state.lock();
            match state.subscriptions.get(&sid) {
                Some(record) => Arc::clone(&record.service),
                None => {
                    tracing::debug!("Storing NOTIFY in backlog for SID: {}", sid);
                    state.backlog.push(&sid, request);
                    return STATUS_OK;
                }
            }
        };

        self.dispatch_notify(&sid, &service, &request)
    }

    /// Store `record` under `sid` and replay the NOTIFY requests kept for it.
    ///
    /// `replaced` is dropped in the same step, for renewals that changed the SID.
    fn register(&self, sid: &str, record: SubscriptionRecord, replaced: Option<&str>) {
        let _dispatch = self.dispatch.lock();
        let service = Arc::clone(&record.service);
        let backlogged = {
            let mut state = self.state.lock();
            if let Some(replaced) = replaced.filter(|replaced| *replaced != sid) {
                state.subscriptions.remove(replaced);
            }
            state.subscriptions.insert(sid.to_string(), record);
            state.backlog.take(sid)
        };

        for request in backlogged {
            tracing::debug!("Re-playing backlogged NOTIFY for SID: {}", sid);
            self.dispatch_notify(sid, &service, &request);
        }
    }

    fn dispatch_notify(&self, sid: &str, service: &Service, request: &HttpRequest) -> u16 {
        match parse_propertyset(request.body.as_deref().unwrap_or_default()) {
            Ok(changes) => {
                service.notify_changed_state_variables(changes);
                STATUS_OK
            }
            Err(e) => {
                tracing::warn!("Invalid NOTIFY body for SID {}: {}", sid, e);
                STATUS_BAD_REQUEST
            }
        }
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let response = self.requester.http_request(request).await?;
        if response.status != 200 {
            tracing::debug!("Did not receive 200, but {}", response.status);
            return Err(EventError::Response {
                status: response.status,
                headers: response.headers,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl NotifyHandler for EventHandler {
    async fn handle_notify(&self, request: HttpRequest) -> u16 {
        self.process_notify(request)
    }

    async fn unsubscribe_all(&self) {
        EventHandler::unsubscribe_all(self).await
    }
}

fn timeout_header(timeout: Duration) -> String {
    format!("Second-{}", timeout.as_secs())
}

/// `host[:port]` of `url`, as sent in the HOST header.
fn host_header(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match (parsed.host_str(), parsed.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => String::new(),
        },
        Err(_) => String::new(),
    }
}

/// Timeout from a `TIMEOUT: Second-N` response header; `Second-infinite` yields `None`.
fn granted_timeout(response: &HttpResponse) -> Option<Duration> {
    let value = response.header("timeout")?.trim();
    let prefix = value.get(..7)?;
    if !prefix.eq_ignore_ascii_case("second-") {
        return None;
    }
    value[7..].parse::<u64>().ok().map(Duration::from_secs)
}
