//! Services, actions and arguments.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::state_variable::StateVariable;

/// Called after an event changed state variables of a service.
///
/// The slice holds the variables that changed; it is empty when the event
/// source reports the service as unreachable.
pub type EventCallback = Arc<dyn Fn(&Service, &[Arc<StateVariable>]) + Send + Sync>;

/// Stable identity of a service across re-discovery.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub udn: String,
    pub service_id: String,
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.udn, self.service_id)
    }
}

/// Fields of a `service` element in a device description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceInfo {
    pub service_id: String,
    pub service_type: String,
    pub control_url: String,
    pub event_sub_url: String,
    pub scpd_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(format!("Unknown argument direction: {other}")),
        }
    }
}

/// An action argument bound to its related state variable.
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: String,
    pub direction: Direction,
    pub related_state_variable: Arc<StateVariable>,
}

#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub arguments: Vec<Argument>,
}

impl Action {
    pub fn in_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().filter(|a| a.direction == Direction::In)
    }

    pub fn out_arguments(&self) -> impl Iterator<Item = &Argument> {
        self.arguments.iter().filter(|a| a.direction == Direction::Out)
    }

    pub fn argument(&self, name: &str) -> Option<&Argument> {
        self.arguments.iter().find(|a| a.name == name)
    }
}

/// A UPnP service with its state variables and actions.
pub struct Service {
    info: ServiceInfo,
    device_udn: String,
    device_url: String,
    state_variables: Vec<Arc<StateVariable>>,
    actions: Vec<Action>,
    on_event: RwLock<Option<EventCallback>>,
}

impl Service {
    pub fn new(
        info: ServiceInfo,
        device_udn: impl Into<String>,
        device_url: impl Into<String>,
        state_variables: Vec<Arc<StateVariable>>,
        actions: Vec<Action>,
    ) -> Self {
        Self {
            info,
            device_udn: device_udn.into(),
            device_url: device_url.into(),
            state_variables,
            actions,
            on_event: RwLock::new(None),
        }
    }

    pub fn info(&self) -> &ServiceInfo {
        &self.info
    }

    pub fn service_id(&self) -> &str {
        &self.info.service_id
    }

    pub fn service_type(&self) -> &str {
        &self.info.service_type
    }

    pub fn control_url(&self) -> &str {
        &self.info.control_url
    }

    pub fn event_sub_url(&self) -> &str {
        &self.info.event_sub_url
    }

    pub fn scpd_url(&self) -> &str {
        &self.info.scpd_url
    }

    /// UDN of the device this service belongs to.
    pub fn device_udn(&self) -> &str {
        &self.device_udn
    }

    /// Description URL of the owning device, used as base for relative URLs.
    pub fn device_url(&self) -> &str {
        &self.device_url
    }

    pub fn key(&self) -> ServiceKey {
        ServiceKey {
            udn: self.device_udn.clone(),
            service_id: self.info.service_id.clone(),
        }
    }

    pub fn absolute_control_url(&self) -> String {
        absolute_url(&self.device_url, &self.info.control_url)
    }

    pub fn absolute_event_sub_url(&self) -> String {
        absolute_url(&self.device_url, &self.info.event_sub_url)
    }

    pub fn state_variables(&self) -> &[Arc<StateVariable>] {
        &self.state_variables
    }

    pub fn state_variable(&self, name: &str) -> Option<&Arc<StateVariable>> {
        self.state_variables.iter().find(|sv| sv.name() == name)
    }

    pub fn has_state_variable(&self, name: &str) -> bool {
        self.state_variable(name).is_some()
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.actions.iter().find(|a| a.name == name)
    }

    pub fn has_action(&self, name: &str) -> bool {
        self.action(name).is_some()
    }

    /// Install or clear the event callback.
    pub fn set_on_event(&self, callback: Option<EventCallback>) {
        *self.on_event.write() = callback;
    }

    pub fn on_event(&self) -> Option<EventCallback> {
        self.on_event.read().clone()
    }

    /// Apply `name → value` changes from an event and notify the callback once.
    ///
    /// Unknown names are skipped. A value that fails validation is logged and
    /// not reported as changed.
    pub fn notify_changed_state_variables<I, K, V>(&self, changes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut changed = Vec::new();
        for (name, value) in changes {
            let (name, value) = (name.as_ref(), value.as_ref());
            let Some(state_variable) = self.state_variable(name) else {
                tracing::debug!("State variable {} does not exist, ignoring", name);
                continue;
            };

            match state_variable.set_upnp_value(value) {
                Ok(()) => changed.push(Arc::clone(state_variable)),
                Err(e) => tracing::error!("Got invalid value for {}: {}", name, e),
            }
        }

        // Clone the callback out so it can replace itself.
        let callback = self.on_event();
        if let Some(callback) = callback {
            callback(self, &changed);
        }
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("service_id", &self.info.service_id)
            .field("service_type", &self.info.service_type)
            .field("device_udn", &self.device_udn)
            .field("state_variables", &self.state_variables.len())
            .field("actions", &self.actions.len())
            .finish()
    }
}

/// Join `relative` onto `base`; falls back to `relative` when either is unusable.
pub fn absolute_url(base: &str, relative: &str) -> String {
    match url::Url::parse(base).and_then(|base| base.join(relative)) {
        Ok(joined) => joined.to_string(),
        Err(_) => relative.to_string(),
    }
}
