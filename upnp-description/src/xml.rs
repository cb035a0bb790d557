//! Namespace-aware helpers over `xmltree`.
//!
//! xml-rs never expands external entities or fetches DTDs, so documents from
//! the network can be parsed directly.

use std::borrow::Cow;

use xmltree::{Element, XMLNode};

pub const NS_DEVICE: &str = "urn:schemas-upnp-org:device-1-0";
pub const NS_SERVICE: &str = "urn:schemas-upnp-org:service-1-0";
pub const NS_EVENT: &str = "urn:schemas-upnp-org:event-1-0";

pub fn parse(document: &str) -> Result<Element, xmltree::ParseError> {
    Element::parse(document.as_bytes())
}

/// True when `element` is named `name` in namespace `ns` or in no namespace.
pub fn is_named(element: &Element, name: &str, ns: &str) -> bool {
    element.name == name && element.namespace.as_deref().map_or(true, |n| n == ns)
}

pub fn children<'a>(element: &'a Element, name: &'a str, ns: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
    element
        .children
        .iter()
        .filter_map(XMLNode::as_element)
        .filter(move |child| is_named(child, name, ns))
}

pub fn child<'a>(element: &'a Element, name: &'a str, ns: &'a str) -> Option<&'a Element> {
    children(element, name, ns).next()
}

/// Text of the first matching child; `Some("")` when the child is empty.
pub fn child_text(element: &Element, name: &str, ns: &str) -> Option<String> {
    child(element, name, ns).map(|c| c.get_text().map(Cow::into_owned).unwrap_or_default())
}
