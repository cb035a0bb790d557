//! The facade exposes the whole stack through one crate.

use std::sync::Arc;

use upnp_sdk::{
    DeviceFactory, EventConfig, EventHandler, HttpRequest, ProfileDevice, Requester, ReqwestRequester,
    SsdpMessage, Value,
};

const DEVICE_XML: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaServer:1</deviceType>
    <friendlyName>NAS</friendlyName>
    <UDN>uuid:nas-1</UDN>
  </device>
</root>"#;

#[tokio::test]
async fn test_build_device_through_facade() {
    let requester: Arc<dyn Requester> = Arc::new(ReqwestRequester::new().unwrap());
    let device = DeviceFactory::new(Arc::clone(&requester))
        .device_from_xml(DEVICE_XML, "http://192.168.1.20:8200/rootDesc.xml")
        .await
        .unwrap();
    assert_eq!(device.friendly_name(), "NAS");

    let handler = Arc::new(EventHandler::new(
        "http://192.168.1.2:40000/notify",
        requester,
        EventConfig::default(),
    ));
    let mut profile = ProfileDevice::new(device, Some(handler), Default::default(), None);
    assert_eq!(profile.subscribe_services(false).await.unwrap(), None);
    assert!(!profile.is_subscribed());
}

#[test]
fn test_module_reexports() {
    let message: Option<SsdpMessage> = upnp_sdk::discovery::ssdp::decode(
        b"HTTP/1.1 200 OK\r\nST: upnp:rootdevice\r\nUSN: uuid:nas-1::upnp:rootdevice\r\nLOCATION: http://192.168.1.20:8200/rootDesc.xml\r\n\r\n",
        None,
        "192.168.1.20:1900".parse().unwrap(),
    );
    assert_eq!(
        message.as_ref().and_then(|m| m.location()),
        Some("http://192.168.1.20:8200/rootDesc.xml")
    );

    let request: HttpRequest = upnp_sdk::requester::HttpRequest::new("GET", "http://example.com/");
    assert_eq!(request.method, "GET");
    assert_eq!(
        upnp_sdk::description::DataType::Ui1.coerce("7").unwrap(),
        Value::UnsignedInteger(7)
    );
}
