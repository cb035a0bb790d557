//! Device table built from search responses and advertisements.
//!
//! [`SsdpDeviceTracker`] folds every SSDP message it sees into one
//! [`SsdpDevice`] per UDN and forgets devices once their `CACHE-CONTROL`
//! `max-age` has passed without a refresh.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::headers::SsdpHeaders;
use crate::ssdp::{SsdpMessage, NTS_UPDATE};

/// Lifetime assumed when `CACHE-CONTROL` carries no usable `max-age`
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(900);

/// Headers that change without the device changing.
const IGNORED_HEADERS: [&str; 5] = ["date", "cache-control", "server", "host", "location"];

/// How a device was (re)seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SsdpSource {
    /// Search response with nothing new
    SearchAlive,
    /// Search response for a new device, type or location, or with changed headers
    SearchChanged,
    AdvertisementAlive,
    AdvertisementByebye,
    AdvertisementUpdate,
}

/// `max-age` from a `CACHE-CONTROL` value, or [`DEFAULT_MAX_AGE`].
pub fn max_age(cache_control: &str) -> Duration {
    let lower = cache_control.to_ascii_lowercase();
    let Some(start) = lower.find("max-age") else {
        return DEFAULT_MAX_AGE;
    };
    let rest = lower[start + "max-age".len()..].trim_start();
    let Some(rest) = rest.strip_prefix('=') else {
        return DEFAULT_MAX_AGE;
    };
    let digits: String = rest
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits
        .parse()
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_MAX_AGE)
}

/// An HTTP location that is not loopback or link-local IPv4.
pub fn is_valid_location(location: &str) -> bool {
    location.starts_with("http")
        && !(location.contains("://127.0.0.1")
            || location.contains("://[::1]")
            || location.contains("://169.254"))
}

fn ip_version(location: &str) -> Option<u8> {
    let parsed = url::Url::parse(location).ok()?;
    match parsed.host()? {
        url::Host::Ipv4(_) => Some(4),
        url::Host::Ipv6(_) => Some(6),
        url::Host::Domain(domain) => match domain.parse::<IpAddr>().ok()? {
            IpAddr::V4(_) => Some(4),
            IpAddr::V6(_) => Some(6),
        },
    }
}

/// True when a header present in both sets has a different value.
///
/// Bookkeeping headers and the ones in [`IGNORED_HEADERS`] are skipped.
fn headers_differ(current: &SsdpHeaders, new: &SsdpHeaders) -> bool {
    current.iter().any(|(name, value)| {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with('_') || IGNORED_HEADERS.contains(&lower.as_str()) {
            return false;
        }
        match new.get_lower(&lower) {
            Some(new_value) if new_value != value => {
                tracing::debug!("Header {} changed from {} to {}", name, value, new_value);
                true
            }
            _ => false,
        }
    })
}

/// Everything known about one device, keyed by its UDN.
#[derive(Debug, Clone)]
pub struct SsdpDevice {
    udn: String,
    valid_to: DateTime<Utc>,
    locations: HashMap<String, DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    search_headers: HashMap<String, SsdpHeaders>,
    advertisement_headers: HashMap<String, SsdpHeaders>,
}

impl SsdpDevice {
    fn new(udn: &str, valid_to: DateTime<Utc>) -> Self {
        Self {
            udn: udn.to_string(),
            valid_to,
            locations: HashMap::new(),
            last_seen: None,
            search_headers: HashMap::new(),
            advertisement_headers: HashMap::new(),
        }
    }

    pub fn udn(&self) -> &str {
        &self.udn
    }

    /// Moment the last announcement or response stops being valid.
    pub fn valid_to(&self) -> DateTime<Utc> {
        self.valid_to
    }

    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.last_seen
    }

    /// All known locations, sorted.
    pub fn locations(&self) -> Vec<&str> {
        let mut locations: Vec<&str> = self.locations.keys().map(String::as_str).collect();
        locations.sort_unstable();
        locations
    }

    /// The first location in sorted order, so repeated calls agree.
    pub fn location(&self) -> Option<&str> {
        self.locations().into_iter().next()
    }

    /// Headers of the last search response for a device or service type.
    pub fn search_headers(&self, device_or_service_type: &str) -> Option<&SsdpHeaders> {
        self.search_headers.get(device_or_service_type)
    }

    /// Headers of the last advertisement for a device or service type.
    pub fn advertisement_headers(&self, device_or_service_type: &str) -> Option<&SsdpHeaders> {
        self.advertisement_headers.get(device_or_service_type)
    }

    /// Search headers overlaid with advertisement headers for one type.
    pub fn combined_headers(&self, device_or_service_type: &str) -> SsdpHeaders {
        let search = self.search_headers.get(device_or_service_type);
        let advertisement = self.advertisement_headers.get(device_or_service_type);
        match (search, advertisement) {
            (Some(search), Some(advertisement)) => {
                let mut combined = search.clone();
                for (name, value) in advertisement.iter() {
                    combined.set(name, value);
                }
                combined
            }
            (Some(headers), None) | (None, Some(headers)) => headers.clone(),
            (None, None) => SsdpHeaders::new(),
        }
    }

    /// Every device or service type this device was seen with.
    pub fn device_or_service_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self
            .search_headers
            .keys()
            .chain(self.advertisement_headers.keys())
            .map(String::as_str)
            .collect();
        types.sort_unstable();
        types.dedup();
        types
    }

    fn knows_type(&self, device_or_service_type: &str) -> bool {
        self.search_headers.contains_key(device_or_service_type)
            || self.advertisement_headers.contains_key(device_or_service_type)
    }

    /// True when `location` is new and replaces one of the same IP version.
    fn location_changed(&self, location: &str) -> bool {
        if self.locations.is_empty() {
            return true;
        }
        if self.locations.contains_key(location) {
            return false;
        }
        let Some(version) = ip_version(location) else {
            return false;
        };
        self.locations
            .keys()
            .any(|known| ip_version(known) == Some(version))
    }

    fn purge_locations(&mut self, now: DateTime<Utc>) {
        self.locations.retain(|_, valid_to| now <= *valid_to);
    }
}

/// A device seen in a way worth reporting.
#[derive(Debug, Clone)]
pub struct SsdpChange {
    pub device: SsdpDevice,
    /// `ST` of a search response or `NT` of an advertisement
    pub device_or_service_type: String,
    pub source: SsdpSource,
}

/// Tracks devices by UDN across search responses and advertisements.
///
/// Wrap it in a mutex to share it between listeners.
#[derive(Debug, Default)]
pub struct SsdpDeviceTracker {
    devices: HashMap<String, SsdpDevice>,
    next_valid_to: Option<DateTime<Utc>>,
}

impl SsdpDeviceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &HashMap<String, SsdpDevice> {
        &self.devices
    }

    pub fn device(&self, udn: &str) -> Option<&SsdpDevice> {
        self.devices.get(udn)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Record a search response.
    ///
    /// Every valid response is reported; the source tells whether it
    /// brought anything new.
    pub fn see_search(&mut self, message: &SsdpMessage) -> Option<SsdpChange> {
        let (Some(_), Some(search_target), Some(location)) = (message.udn(), message.st(), message.location())
        else {
            tracing::debug!("Received invalid search headers from {}", message.remote_addr());
            return None;
        };
        if !is_valid_location(location) {
            tracing::debug!("Ignoring search response with location {}", location);
            return None;
        }

        let (device, is_new_device, new_location) = self.see_device(message)?;
        let is_new_type = !device.knows_type(search_target);
        if is_new_type {
            tracing::debug!("See new service: {}, type: {}", device.udn, search_target);
        }
        let changed = is_new_device
            || is_new_type
            || new_location
            || device
                .search_headers
                .get(search_target)
                .map_or(false, |current| headers_differ(current, message.headers()));

        device
            .search_headers
            .insert(search_target.to_string(), message.headers().clone());

        Some(SsdpChange {
            device: device.clone(),
            device_or_service_type: search_target.to_string(),
            source: if changed {
                SsdpSource::SearchChanged
            } else {
                SsdpSource::SearchAlive
            },
        })
    }

    /// Record an `ssdp:alive` or `ssdp:update` advertisement.
    ///
    /// Repeated alives with nothing new are not reported; updates always are.
    pub fn see_advertisement(&mut self, message: &SsdpMessage) -> Option<SsdpChange> {
        let (Some(_), Some(notification_type), Some(nts), Some(location)) =
            (message.udn(), message.nt(), message.nts(), message.location())
        else {
            tracing::debug!("Received invalid advertisement headers from {}", message.remote_addr());
            return None;
        };
        if !is_valid_location(location) {
            tracing::debug!("Ignoring advertisement with location {}", location);
            return None;
        }

        let (device, is_new_device, new_location) = self.see_device(message)?;
        let is_new_type = !device.knows_type(notification_type);
        if is_new_type {
            tracing::debug!("See new service: {}, type: {}", device.udn, notification_type);
        }
        let is_update = nts == NTS_UPDATE;
        let propagate = is_update
            || is_new_device
            || is_new_type
            || new_location
            || device
                .advertisement_headers
                .get(notification_type)
                .map_or(false, |current| headers_differ(current, message.headers()));

        device
            .advertisement_headers
            .insert(notification_type.to_string(), message.headers().clone());

        propagate.then(|| SsdpChange {
            device: device.clone(),
            device_or_service_type: notification_type.to_string(),
            source: if is_update {
                SsdpSource::AdvertisementUpdate
            } else {
                SsdpSource::AdvertisementAlive
            },
        })
    }

    /// Forget a device on `ssdp:byebye`.
    ///
    /// Only the first byebye for a known device is reported.
    pub fn unsee_advertisement(&mut self, message: &SsdpMessage) -> Option<SsdpChange> {
        let (Some(udn), Some(notification_type), Some(_)) = (message.udn(), message.nt(), message.nts()) else {
            return None;
        };
        let mut device = self.devices.remove(udn)?;
        tracing::debug!("Device said byebye: {}", udn);

        device
            .advertisement_headers
            .insert(notification_type.to_string(), message.headers().clone());

        Some(SsdpChange {
            device,
            device_or_service_type: notification_type.to_string(),
            source: SsdpSource::AdvertisementByebye,
        })
    }

    /// Drop devices whose `max-age` ran out before `now`, returning them.
    ///
    /// Expired locations of the remaining devices are dropped too.
    pub fn purge_devices(&mut self, now: DateTime<Utc>) -> Vec<SsdpDevice> {
        if self.next_valid_to.map_or(false, |next| next > now) {
            return Vec::new();
        }

        let expired: Vec<String> = self
            .devices
            .iter()
            .filter(|(_, device)| now > device.valid_to)
            .map(|(udn, _)| udn.clone())
            .collect();
        let removed: Vec<SsdpDevice> = expired
            .iter()
            .filter_map(|udn| {
                tracing::debug!("Purging device, UDN: {}", udn);
                self.devices.remove(udn)
            })
            .collect();

        for device in self.devices.values_mut() {
            device.purge_locations(now);
        }
        self.next_valid_to = self.devices.values().map(|device| device.valid_to).min();
        removed
    }

    /// Create or refresh the device a message is about.
    ///
    /// Returns the device, whether it is new and whether its location changed.
    fn see_device(&mut self, message: &SsdpMessage) -> Option<(&mut SsdpDevice, bool, bool)> {
        let now = message.timestamp();
        self.purge_devices(now);

        let udn = message.udn()?;
        let location = message.location()?;
        let lifetime = max_age(message.header("CACHE-CONTROL").unwrap_or_default());
        let valid_to = now + chrono::Duration::from_std(lifetime).unwrap_or_else(|_| chrono::Duration::seconds(900));

        let is_new_device = !self.devices.contains_key(udn);
        if is_new_device {
            tracing::debug!("See new device: {}", udn);
        }
        if self.next_valid_to.map_or(true, |next| next > valid_to) {
            self.next_valid_to = Some(valid_to);
        }

        let device = self
            .devices
            .entry(udn.to_string())
            .or_insert_with(|| SsdpDevice::new(udn, valid_to));
        device.valid_to = valid_to;

        let new_location = device.location_changed(location);
        device.locations.insert(location.to_string(), valid_to);
        device.last_seen = Some(now);

        Some((device, is_new_device, new_location))
    }
}
