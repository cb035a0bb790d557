//! Parsing of GENA `e:propertyset` NOTIFY bodies.

use upnp_description::xml::{self, NS_EVENT};

use crate::error::{EventError, Result};

/// Strip trailing whitespace and NUL bytes some devices append to the body.
pub(crate) fn trim_body(body: &str) -> &str {
    body.trim_end_matches(|c: char| matches!(c, ' ' | '\t' | '\r' | '\n' | '\0'))
}

/// Extract `name → text` pairs from every `e:property` child, in document order.
///
/// A variable without text yields an empty string.
pub fn parse_propertyset(body: &str) -> Result<Vec<(String, String)>> {
    let root = xml::parse(trim_body(body)).map_err(|e| EventError::XmlParse(e.to_string()))?;
    if !xml::is_named(&root, "propertyset", NS_EVENT) {
        return Err(EventError::XmlParse(format!(
            "Expected propertyset root element, got {}",
            root.name
        )));
    }

    let mut changes = Vec::new();
    for property in xml::children(&root, "property", NS_EVENT) {
        for variable in property.children.iter().filter_map(|node| node.as_element()) {
            let value = variable.get_text().map(|text| text.into_owned()).unwrap_or_default();
            changes.push((variable.name.clone(), value));
        }
    }
    Ok(changes)
}
