//! Builds a [`Device`] graph from description documents.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use upnp_requester::{HttpRequest, HttpResponse, Requester};
use xmltree::Element;

use crate::data_type::DataType;
use crate::device::{Device, DeviceIcon, DeviceInfo};
use crate::error::{DescriptionError, Result};
use crate::hooks::{DefaultSpecHooks, SpecHooks};
use crate::service::{absolute_url, Action, Argument, Direction, Service, ServiceInfo};
use crate::state_variable::{AllowedValueRange, StateVariable, StateVariableSpec};
use crate::xml::{self, NS_DEVICE, NS_SERVICE};

const NAMELESS_ACTION: &str = "nameless";

/// Fetches device and service descriptions and links them into a [`Device`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use upnp_description::DeviceFactory;
/// use upnp_requester::ReqwestRequester;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let factory = DeviceFactory::new(Arc::new(ReqwestRequester::new()?)).non_strict(true);
/// let device = factory
///     .create_device("http://192.168.1.10:1400/xml/device_description.xml")
///     .await?;
/// println!("{} has {} services", device.friendly_name(), device.services().len());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DeviceFactory {
    requester: Arc<dyn Requester>,
    non_strict: bool,
    hooks: Arc<dyn SpecHooks>,
}

impl DeviceFactory {
    pub fn new(requester: Arc<dyn Requester>) -> Self {
        Self {
            requester,
            non_strict: false,
            hooks: Arc::new(DefaultSpecHooks),
        }
    }

    /// Tolerate broken SCPDs, missing state tables and dangling argument
    /// references instead of failing.
    pub fn non_strict(mut self, non_strict: bool) -> Self {
        self.non_strict = non_strict;
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn SpecHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn is_non_strict(&self) -> bool {
        self.non_strict
    }

    pub fn requester(&self) -> &Arc<dyn Requester> {
        &self.requester
    }

    /// Fetch the description at `description_url` and build the device tree.
    pub async fn create_device(&self, description_url: &str) -> Result<Arc<Device>> {
        tracing::debug!("Creating device, description_url: {}", description_url);
        let request = self.hooks.pre_device_spec(HttpRequest::new("GET", description_url));
        let response = self.hooks.post_device_spec(self.requester.http_request(request).await?);
        let root = read_spec(response, description_url)?;
        self.device_from_root(&root, description_url).await
    }

    /// Build the device tree from an already fetched description document.
    pub async fn device_from_xml(&self, document: &str, description_url: &str) -> Result<Arc<Device>> {
        let root = xml::parse(document).map_err(|e| DescriptionError::XmlParse {
            url: description_url.to_string(),
            reason: e.to_string(),
        })?;
        self.device_from_root(&root, description_url).await
    }

    async fn device_from_root(&self, root: &Element, description_url: &str) -> Result<Arc<Device>> {
        let device_el = xml::child(root, "device", NS_DEVICE)
            .ok_or_else(|| DescriptionError::XmlContent("Could not find device element".to_string()))?;
        Ok(Arc::new(self.build_device(device_el, description_url).await?))
    }

    fn build_device<'a>(
        &'a self,
        device_el: &'a Element,
        description_url: &'a str,
    ) -> BoxFuture<'a, Result<Device>> {
        async move {
            let info = parse_device_info(device_el, description_url);

            let mut services = Vec::new();
            if let Some(list) = xml::child(device_el, "serviceList", NS_DEVICE) {
                for service_el in xml::children(list, "service", NS_DEVICE) {
                    let service = self.build_service(service_el, description_url, &info.udn).await?;
                    services.push(Arc::new(service));
                }
            }

            let mut embedded_devices = Vec::new();
            if let Some(list) = xml::child(device_el, "deviceList", NS_DEVICE) {
                for embedded_el in xml::children(list, "device", NS_DEVICE) {
                    let embedded = self.build_device(embedded_el, description_url).await?;
                    embedded_devices.push(Arc::new(embedded));
                }
            }

            Ok(Device::new(info, services, embedded_devices))
        }
        .boxed()
    }

    async fn build_service(
        &self,
        service_el: &Element,
        description_url: &str,
        device_udn: &str,
    ) -> Result<Service> {
        let info = parse_service_info(service_el);
        let scpd_url = url::Url::parse(description_url)
            .and_then(|base| base.join(&info.scpd_url))
            .map_err(|e| DescriptionError::InvalidUrl(format!("{}: {}", info.scpd_url, e)))?
            .to_string();

        let scpd = match self.fetch_service_spec(&scpd_url).await {
            Ok(scpd) => scpd,
            Err(e @ DescriptionError::XmlParse { .. }) if self.non_strict => {
                tracing::debug!("Ignoring bad XML document from URL {}: {}", scpd_url, e);
                let mut empty = Element::new("scpd");
                empty.namespace = Some(NS_SERVICE.to_string());
                empty
            }
            Err(e) => return Err(e),
        };

        if !self.non_strict && !(scpd.name == "scpd" && scpd.namespace.as_deref() == Some(NS_SERVICE)) {
            return Err(DescriptionError::XmlContent(format!(
                "Invalid document root: {}",
                scpd.name
            )));
        }

        let state_variables = self.build_state_variables(&scpd)?;
        let actions = self.build_actions(&scpd, &state_variables)?;

        Ok(Service::new(info, device_udn, description_url, state_variables, actions))
    }

    async fn fetch_service_spec(&self, url: &str) -> Result<Element> {
        let request = self.hooks.pre_service_spec(HttpRequest::new("GET", url));
        let response = self.hooks.post_service_spec(self.requester.http_request(request).await?);
        read_spec(response, url)
    }

    fn build_state_variables(&self, scpd: &Element) -> Result<Vec<Arc<StateVariable>>> {
        let Some(table) = xml::child(scpd, "serviceStateTable", NS_SERVICE) else {
            if self.non_strict {
                tracing::debug!("Could not find service state table element");
                return Ok(Vec::new());
            }
            return Err(DescriptionError::XmlContent(
                "Could not find service state table element".to_string(),
            ));
        };

        xml::children(table, "stateVariable", NS_SERVICE)
            .map(|el| {
                let spec = parse_state_variable(el)?;
                StateVariable::from_spec(spec, !self.non_strict).map(Arc::new)
            })
            .collect()
    }

    fn build_actions(&self, scpd: &Element, state_variables: &[Arc<StateVariable>]) -> Result<Vec<Action>> {
        let Some(list) = xml::child(scpd, "actionList", NS_SERVICE) else {
            return Ok(Vec::new());
        };

        let by_name: HashMap<&str, &Arc<StateVariable>> =
            state_variables.iter().map(|sv| (sv.name(), sv)).collect();

        xml::children(list, "action", NS_SERVICE)
            .map(|action_el| self.build_action(action_el, &by_name))
            .collect()
    }

    fn build_action(
        &self,
        action_el: &Element,
        state_variables: &HashMap<&str, &Arc<StateVariable>>,
    ) -> Result<Action> {
        let name = xml::child_text(action_el, "name", NS_SERVICE).unwrap_or_else(|| {
            tracing::debug!("Caught Action without a name, using default \"{}\"", NAMELESS_ACTION);
            NAMELESS_ACTION.to_string()
        });

        let mut arguments = Vec::new();
        let argument_els = xml::child(action_el, "argumentList", NS_SERVICE)
            .into_iter()
            .flat_map(|list| xml::children(list, "argument", NS_SERVICE));

        for argument_el in argument_els {
            let Some(argument_name) = xml::child_text(argument_el, "name", NS_SERVICE) else {
                tracing::debug!("Caught Action Argument without a name, ignoring");
                continue;
            };
            let direction = xml::child_text(argument_el, "direction", NS_SERVICE)
                .and_then(|d| d.parse::<Direction>().ok());
            let Some(direction) = direction else {
                tracing::debug!("Caught Action Argument {} without a direction, ignoring", argument_name);
                continue;
            };
            let Some(related) = xml::child_text(argument_el, "relatedStateVariable", NS_SERVICE) else {
                tracing::debug!("Caught Action Argument {} without a State Variable name, ignoring", argument_name);
                continue;
            };

            match state_variables.get(related.trim()) {
                Some(state_variable) => arguments.push(Argument {
                    name: argument_name,
                    direction,
                    related_state_variable: Arc::clone(state_variable),
                }),
                None if self.non_strict => {
                    tracing::debug!(
                        "Argument {} of {} refers to unknown state variable {}, ignoring",
                        argument_name,
                        name,
                        related
                    );
                }
                None => {
                    return Err(DescriptionError::XmlContent(format!(
                        "Argument {} of {} refers to unknown state variable {}",
                        argument_name, name, related
                    )))
                }
            }
        }

        Ok(Action { name, arguments })
    }
}

fn read_spec(response: HttpResponse, url: &str) -> Result<Element> {
    if response.status != 200 {
        return Err(DescriptionError::Response {
            status: response.status,
            url: url.to_string(),
        });
    }

    let body = response.body.unwrap_or_default();
    xml::parse(&body).map_err(|e| {
        tracing::debug!("Unable to parse XML from {}: {}", url, e);
        DescriptionError::XmlParse {
            url: url.to_string(),
            reason: e.to_string(),
        }
    })
}

fn parse_device_info(device_el: &Element, description_url: &str) -> DeviceInfo {
    let text = |name: &str| xml::child_text(device_el, name, NS_DEVICE);
    let number = |el: &Element, name: &str| {
        xml::child_text(el, name, NS_DEVICE)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    };

    let icons = xml::child(device_el, "iconList", NS_DEVICE)
        .into_iter()
        .flat_map(|list| xml::children(list, "icon", NS_DEVICE))
        .map(|icon_el| DeviceIcon {
            mimetype: xml::child_text(icon_el, "mimetype", NS_DEVICE).unwrap_or_default(),
            width: number(icon_el, "width"),
            height: number(icon_el, "height"),
            depth: number(icon_el, "depth"),
            url: absolute_url(
                description_url,
                &xml::child_text(icon_el, "url", NS_DEVICE).unwrap_or_default(),
            ),
        })
        .collect();

    DeviceInfo {
        device_type: text("deviceType").unwrap_or_default(),
        friendly_name: text("friendlyName").unwrap_or_default(),
        manufacturer: text("manufacturer").unwrap_or_default(),
        manufacturer_url: text("manufacturerURL").unwrap_or_default(),
        model_description: text("modelDescription"),
        model_name: text("modelName").unwrap_or_default(),
        model_number: text("modelNumber"),
        model_url: text("modelURL"),
        serial_number: text("serialNumber"),
        udn: text("UDN").unwrap_or_default(),
        upc: text("UPC").unwrap_or_default(),
        presentation_url: text("presentationURL").unwrap_or_default(),
        description_url: description_url.to_string(),
        icons,
    }
}

fn parse_service_info(service_el: &Element) -> ServiceInfo {
    let text = |name: &str| xml::child_text(service_el, name, NS_DEVICE).unwrap_or_default();
    ServiceInfo {
        service_id: text("serviceId"),
        service_type: text("serviceType"),
        control_url: text("controlURL"),
        event_sub_url: text("eventSubURL"),
        scpd_url: text("SCPDURL"),
    }
}

fn parse_state_variable(el: &Element) -> Result<StateVariableSpec> {
    let name = xml::child_text(el, "name", NS_SERVICE)
        .unwrap_or_default()
        .trim()
        .to_string();

    let send_events = match el.attributes.get("sendEvents") {
        Some(attr) => attr == "yes",
        None => match xml::child_text(el, "sendEventsAttribute", NS_SERVICE) {
            Some(text) => text == "yes",
            None => {
                tracing::debug!("No send events marker for state variable {}", name);
                false
            }
        },
    };

    let raw_type = xml::child_text(el, "dataType", NS_SERVICE).unwrap_or_default();
    let data_type: DataType = raw_type
        .parse()
        .map_err(|_| DescriptionError::UnsupportedDataType {
            name: name.clone(),
            data_type: raw_type.clone(),
        })?;

    let allowed_value_range = xml::child(el, "allowedValueRange", NS_SERVICE).map(|range| AllowedValueRange {
        min: xml::child_text(range, "minimum", NS_SERVICE),
        max: xml::child_text(range, "maximum", NS_SERVICE),
        step: xml::child_text(range, "step", NS_SERVICE),
    });

    let allowed_values = xml::child(el, "allowedValueList", NS_SERVICE).map(|list| {
        xml::children(list, "allowedValue", NS_SERVICE)
            .filter_map(|v| v.get_text().map(|t| t.into_owned()))
            .collect()
    });

    Ok(StateVariableSpec {
        name,
        send_events,
        data_type,
        default_value: xml::child_text(el, "defaultValue", NS_SERVICE),
        allowed_value_range,
        allowed_values,
    })
}
