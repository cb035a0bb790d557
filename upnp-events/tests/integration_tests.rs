//! Event delivery through a real callback server.


use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex};

use callback_server::{CallbackServer, NotifyServer};
use upnp_description::{EventCallback, Service, StateVariable, Value};
use upnp_events::{EventConfig, EventHandler, STATUS_OK, STATUS_PRECONDITION_FAILED};
use upnp_requester::Requester;

use test_helpers::*;

type Seen = Arc<Mutex<Vec<Vec<(String, Option<Value>)>>>>;

fn recording_callback() -> (EventCallback, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: EventCallback = Arc::new(move |_service: &Service, changed: &[Arc<StateVariable>]| {
        sink.lock()
            .unwrap()
            .push(changed.iter().map(|v| (v.name().to_string(), v.value())).collect());
    });
    (callback, seen)
}

#[tokio::test]
async fn test_volume_notify_end_to_end() {
    let requester = MockRequester::new();
    let device = media_renderer(&requester).await;
    let service = device.find_service(RENDERING_CONTROL).unwrap();
    let (callback, seen) = recording_callback();
    service.set_on_event(Some(callback));

    let mut server = CallbackServer::with_local_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), (0, 0)).unwrap();
    let dyn_requester: Arc<dyn Requester> = requester.clone();
    let handler = Arc::new(EventHandler::new(
        server.callback_url(),
        dyn_requester,
        EventConfig::default(),
    ));
    server.start(handler.clone()).await.unwrap();

    let (sid, _) = handler.subscribe(&service, None).await.unwrap();
    let requests = requester.requests();
    let subscribe = requests.last().unwrap();
    assert_eq!(
        subscribe.header("CALLBACK"),
        Some(format!("<http://127.0.0.1:{}/notify>", server.port()).as_str())
    );

    let body = r#"<?xml version="1.0"?>
<e:propertyset xmlns:e="urn:schemas-upnp-org:event-1-0">
  <e:property><Volume>55</Volume></e:property>
</e:propertyset>"#;
    let response = reqwest::Client::new()
        .request(
            reqwest::Method::from_bytes(b"NOTIFY").unwrap(),
            format!("http://127.0.0.1:{}/notify", server.port()),
        )
        .header("NT", "upnp:event")
        .header("NTS", "upnp:propchange")
        .header("SID", &sid)
        .header("SEQ", "0")
        .body(body)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), STATUS_OK);

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![vec![("Volume".to_string(), Some(Value::UnsignedInteger(55)))]]
    );

    server.stop().await.unwrap();
    assert_eq!(requester.unsubscribe_count(), 1);
    assert_eq!(handler.subscription_count(), 0);
}

#[tokio::test]
async fn test_notify_without_sid_is_rejected_over_http() {
    let requester = MockRequester::new();
    let mut server = CallbackServer::with_local_ip(IpAddr::V4(Ipv4Addr::LOCALHOST), (0, 0)).unwrap();
    let dyn_requester: Arc<dyn Requester> = requester.clone();
    let handler = Arc::new(EventHandler::new(
        server.callback_url(),
        dyn_requester,
        EventConfig::default(),
    ));
    server.start(handler.clone()).await.unwrap();

    let response = reqwest::Client::new()
        .request(
            reqwest::Method::from_bytes(b"NOTIFY").unwrap(),
            format!("http://127.0.0.1:{}/notify", server.port()),
        )
        .header("NT", "upnp:event")
        .header("NTS", "upnp:propchange")
        .body("<e:propertyset xmlns:e=\"urn:schemas-upnp-org:event-1-0\"/>")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), STATUS_PRECONDITION_FAILED);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_early_notify_replayed_after_subscribe() {
    let requester = MockRequester::new();
    let device = media_renderer(&requester).await;
    let service = device.find_service(AV_TRANSPORT).unwrap();
    let (callback, seen) = recording_callback();
    service.set_on_event(Some(callback));

    let dyn_requester: Arc<dyn Requester> = requester.clone();
    let handler = EventHandler::new("http://127.0.0.1:3400/notify", dyn_requester, EventConfig::default());

    // The first SID the mock device hands out
    let status = handler
        .handle_notify(notify("uuid:sub-1", 0, &[("TransportState", "PLAYING")]))
        .await;
    assert_eq!(status, STATUS_OK);
    assert!(seen.lock().unwrap().is_empty());

    let (sid, _) = handler.subscribe(&service, None).await.unwrap();
    assert_eq!(sid, "uuid:sub-1");

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![vec![(
            "TransportState".to_string(),
            Some(Value::String("PLAYING".to_string()))
        )]]
    );
    assert_eq!(
        service.state_variable("TransportState").unwrap().value(),
        Some(Value::String("PLAYING".to_string()))
    );
}

#[tokio::test]
async fn test_resubscribe_keeps_service_binding() {
    let requester = MockRequester::new();
    let device = media_renderer(&requester).await;
    let service = device.find_service(RENDERING_CONTROL).unwrap();

    let dyn_requester: Arc<dyn Requester> = requester.clone();
    let handler = EventHandler::new("http://127.0.0.1:3400/notify", dyn_requester, EventConfig::default());

    let (sid, _) = handler.subscribe(&service, None).await.unwrap();
    let (renewed, timeout) = handler
        .resubscribe(sid.as_str(), Some(std::time::Duration::from_secs(300)))
        .await
        .unwrap();

    assert_eq!(renewed, sid);
    assert_eq!(timeout, std::time::Duration::from_secs(300));
    assert_eq!(handler.sid_for_service(&service), Some(sid));
    assert_eq!(requester.resubscribe_count(), 1);
}
