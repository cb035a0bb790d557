//! Profile device subscriptions and the background resubscribe loop.
//!
//! Time is paused so renewals can be observed without waiting.


use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use upnp_description::{EventCallback, Service, StateVariable};
use upnp_events::{EventConfig, EventHandler, ProfileDevice};
use upnp_requester::{HttpRequest, HttpResponse, Requester};

use test_helpers::*;

fn config() -> EventConfig {
    EventConfig::default()
        .with_subscribe_timeout(Duration::from_secs(120))
        .with_resubscribe_tolerance(Duration::from_secs(60))
}

fn service_types(aliases: &[(&str, &str)]) -> HashMap<String, Vec<String>> {
    aliases
        .iter()
        .map(|(alias, service_type)| (alias.to_string(), vec![service_type.to_string()]))
        .collect()
}

async fn profile(
    requester: &Arc<MockRequester>,
    config: &EventConfig,
    on_event: Option<EventCallback>,
) -> (ProfileDevice, Arc<EventHandler>) {
    let device = media_renderer(requester).await;
    let dyn_requester: Arc<dyn Requester> = requester.clone();
    let handler = Arc::new(EventHandler::new(
        "http://127.0.0.1:3400/notify",
        dyn_requester,
        config.clone(),
    ));
    let profile = ProfileDevice::with_config(
        device,
        Some(Arc::clone(&handler)),
        service_types(&[("RC", RENDERING_CONTROL)]),
        on_event,
        config,
    );
    (profile, handler)
}

#[tokio::test(start_paused = true)]
async fn test_auto_resubscribe_renews_before_expiry() {
    let requester = MockRequester::new();
    let (mut profile, handler) = profile(&requester, &config(), None).await;

    assert_eq!(profile.subscribe_services(true).await.unwrap(), None);
    assert!(profile.is_subscribed());
    assert_eq!(requester.subscribe_count(), 1);
    assert_eq!(requester.resubscribe_count(), 0);

    // First renewal is due 60s before the 120s subscription expires
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(requester.resubscribe_count(), 1);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(requester.resubscribe_count(), 2);
    assert_eq!(handler.subscription_count(), 1);

    profile.unsubscribe_services().await;
    assert!(!profile.is_subscribed());
    assert_eq!(requester.unsubscribe_count(), 1);
    assert_eq!(handler.subscription_count(), 0);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(requester.resubscribe_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_manual_mode_returns_renewal_delay() {
    let requester = MockRequester::new();
    let (mut profile, _handler) = profile(&requester, &config(), None).await;

    let delay = profile.subscribe_services(false).await.unwrap();
    assert_eq!(delay, Some(Duration::from_secs(60)));

    // Nothing renews in the background
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(requester.resubscribe_count(), 0);

    // A second call renews the existing subscription instead of subscribing again
    profile.subscribe_services(false).await.unwrap();
    assert_eq!(requester.subscribe_count(), 1);
    assert_eq!(requester.resubscribe_count(), 1);

    profile.unsubscribe_services().await;
}

#[tokio::test(start_paused = true)]
async fn test_manual_mode_uses_granted_timeout() {
    let requester = MockRequester::new();
    requester.set_gena(Box::new(|request: &HttpRequest| {
        Ok(HttpResponse::new(200)
            .with_header("SID", request.header("SID").unwrap_or("uuid:granted"))
            .with_header("TIMEOUT", "Second-300"))
    }));
    let (mut profile, _handler) = profile(&requester, &config(), None).await;

    let delay = profile.subscribe_services(false).await.unwrap();
    assert_eq!(delay, Some(Duration::from_secs(240)));

    profile.unsubscribe_services().await;
}

#[tokio::test(start_paused = true)]
async fn test_loop_skips_subscription_renewed_in_the_meantime() {
    let requester = MockRequester::new();
    let (mut profile, _handler) = profile(&requester, &config(), None).await;
    profile.subscribe_services(true).await.unwrap();

    // The loop sleeps until 60s; a manual renewal at 30s moves expiry to 150s
    tokio::time::sleep(Duration::from_secs(30)).await;
    profile.subscribe_services(false).await.unwrap();
    assert_eq!(requester.resubscribe_count(), 1);

    // At 60s the subscription is no longer due within the tolerance
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(requester.resubscribe_count(), 1);

    // It is renewed once it is 60s from its new expiry
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(requester.resubscribe_count(), 2);
    assert_eq!(requester.subscribe_count(), 1);

    profile.unsubscribe_services().await;
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_waits_for_renewal_in_flight() {
    let requester = MockRequester::new();
    let (mut profile, handler) = profile(&requester, &config(), None).await;
    profile.subscribe_services(true).await.unwrap();

    let gate = requester.hold_renewals();
    tokio::time::sleep(Duration::from_secs(61)).await;
    requester.renewal_held().await;

    {
        let unsubscribe = profile.unsubscribe_services();
        tokio::pin!(unsubscribe);

        // Still waiting on the loop, nothing has been cancelled yet
        let waited = tokio::time::timeout(Duration::from_secs(5), &mut unsubscribe).await;
        assert!(waited.is_err());
        assert_eq!(requester.unsubscribe_count(), 0);

        gate.notify_one();
        unsubscribe.await;
    }

    // The renewed subscription is the one that gets cancelled
    assert_eq!(requester.resubscribe_count(), 1);
    assert_eq!(requester.unsubscribe_count(), 1);
    let requests = requester.requests();
    let last = requests.last().unwrap();
    assert_eq!(last.method, "UNSUBSCRIBE");
    assert_eq!(last.header("SID"), Some("uuid:sub-1"));
    assert!(!profile.is_subscribed());
    assert_eq!(handler.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_offline_device_reported_through_callback() {
    let requester = MockRequester::new();
    requester.set_gena(device_going_offline());

    let calls: Arc<Mutex<Vec<(String, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&calls);
    let on_event: EventCallback = Arc::new(move |service: &Service, changed: &[Arc<StateVariable>]| {
        sink.lock()
            .unwrap()
            .push((service.service_type().to_string(), changed.len()));
    });

    let (mut profile, handler) = profile(&requester, &config(), Some(on_event)).await;
    profile.subscribe_services(true).await.unwrap();
    assert!(profile.device().is_available());

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert!(!profile.device().is_available());
    assert_eq!(
        calls.lock().unwrap().clone(),
        vec![(RENDERING_CONTROL.to_string(), 0)]
    );
    assert!(!profile.is_subscribed());
    assert_eq!(handler.subscription_count(), 0);

    // The loop has ended, so no further attempts are made
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(requester.resubscribe_count(), 1);

    profile.unsubscribe_services().await;
}

#[tokio::test(start_paused = true)]
async fn test_fail_fast_loop_stops_without_callback() {
    let requester = MockRequester::new();
    requester.set_gena(device_going_offline());

    let calls = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&calls);
    let on_event: EventCallback = Arc::new(move |_: &Service, _: &[Arc<StateVariable>]| {
        *sink.lock().unwrap() += 1;
    });

    let config = config().with_notify_errors(false);
    let (mut profile, _handler) = profile(&requester, &config, Some(on_event)).await;
    profile.subscribe_services(true).await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(!profile.device().is_available());
    assert_eq!(*calls.lock().unwrap(), 0);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(requester.resubscribe_count(), 1);

    profile.unsubscribe_services().await;
}

#[tokio::test]
async fn test_rejected_subscription_cancels_partial_subscriptions() {
    let requester = MockRequester::new();
    let inner = well_behaved_device();
    requester.set_gena(Box::new(move |request: &HttpRequest| {
        if request.method == "SUBSCRIBE" && request.url.ends_with("/AVTransport/Event") {
            return Ok(HttpResponse::new(500));
        }
        inner(request)
    }));

    let device = media_renderer(&requester).await;
    let dyn_requester: Arc<dyn Requester> = requester.clone();
    let handler = Arc::new(EventHandler::new(
        "http://127.0.0.1:3400/notify",
        dyn_requester,
        config(),
    ));
    let mut profile = ProfileDevice::with_config(
        device,
        Some(Arc::clone(&handler)),
        service_types(&[("RC", RENDERING_CONTROL), ("AVT", AV_TRANSPORT)]),
        None,
        &config(),
    );

    let error = profile.subscribe_services(true).await.unwrap_err();
    assert!(error.is_response());
    assert!(!profile.is_subscribed());
    assert_eq!(requester.unsubscribe_count(), 1);
    assert_eq!(handler.subscription_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_profile_accessors() {
    let requester = MockRequester::new();
    let (profile, _handler) = profile(&requester, &config(), None).await;

    assert_eq!(profile.name(), "Living Room");
    assert_eq!(profile.manufacturer(), "Acme");
    assert_eq!(profile.model_name(), "Renderer 1");
    assert_eq!(profile.udn(), "uuid:renderer-1");
    assert_eq!(profile.device_type(), "urn:schemas-upnp-org:device:MediaRenderer:1");
    assert!(profile.state_variable("RC", "Volume").is_some());
    assert!(profile.state_variable("RC", "Bass").is_none());
    assert!(profile.icon().is_none());
}
