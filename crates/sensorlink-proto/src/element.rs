//! Namespaced element trees.
//!
//! Messages are trees of named elements with string attributes. Attribute
//! absence is meaningful and distinct from an empty value, so attributes are
//! only ever inserted for values that are present.

use crate::codec::CodecError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One element of a message tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Element {
    /// Local element name
    pub name: String,
    /// Namespace, `None` when inherited from the parent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Attributes, sorted by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, String>,
    /// Character data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Child elements in document order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Element>,
}

impl Element {
    /// Create an element with no namespace, attributes or children.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            attrs: BTreeMap::new(),
            text: None,
            children: Vec::new(),
        }
    }

    /// Set the namespace, builder style.
    #[must_use]
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Set an attribute, builder style.
    #[must_use]
    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attrs.insert(name.to_string(), value.into());
        self
    }

    /// Set the text, builder style.
    #[must_use]
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Append a child, builder style.
    #[must_use]
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Set an attribute only if a value is present.
    pub fn set_opt_attr(&mut self, name: &str, value: Option<&str>) {
        if let Some(value) = value {
            self.attrs.insert(name.to_string(), value.to_string());
        }
    }

    /// Append a child.
    pub fn push(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Look an attribute up.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Look a required attribute up.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingAttribute`] if it is absent.
    pub fn require_attr(&self, name: &str) -> Result<&str, CodecError> {
        self.attr(name).ok_or_else(|| CodecError::MissingAttribute {
            element: self.name.clone(),
            attribute: name.to_string(),
        })
    }

    /// Parse an optional boolean attribute.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidAttribute`] if present but not a boolean.
    pub fn bool_attr(&self, name: &str) -> Result<Option<bool>, CodecError> {
        self.attr(name)
            .map(|raw| {
                sensorlink_core::syntax::parse_boolean(raw)
                    .ok_or_else(|| self.invalid_attr(name, raw))
            })
            .transpose()
    }

    /// Build an invalid-attribute error for this element.
    #[must_use]
    pub fn invalid_attr(&self, name: &str, value: &str) -> CodecError {
        CodecError::InvalidAttribute {
            element: self.name.clone(),
            attribute: name.to_string(),
            value: value.to_string(),
        }
    }

    /// The only child, if there is exactly one.
    #[must_use]
    pub fn single_child(&self) -> Option<&Element> {
        match self.children.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Check the element's name and namespace.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnexpectedElement`] or
    /// [`CodecError::UnknownNamespace`] on mismatch.
    pub fn expect(&self, name: &str, namespace: Option<&str>) -> Result<(), CodecError> {
        if self.name != name {
            return Err(CodecError::UnexpectedElement {
                expected: name.to_string(),
                found: self.name.clone(),
            });
        }
        match (namespace, self.namespace.as_deref()) {
            (Some(expected), Some(found)) if expected != found => {
                Err(CodecError::UnknownNamespace(found.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Serialize to CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_cbor(&self) -> Result<Vec<u8>, CodecError> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| CodecError::Serialize(e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize from CBOR bytes.
    ///
    /// # Errors
    ///
    /// Returns error if deserialization fails.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, CodecError> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::Deserialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_attributes_stay_absent() {
        let mut el = Element::new("nd").with_attr("id", "Device02");
        el.set_opt_attr("src", None);
        el.set_opt_attr("pt", Some(""));

        assert_eq!(el.attr("src"), None);
        assert_eq!(el.attr("pt"), Some(""));
        assert!(matches!(
            el.require_attr("src"),
            Err(CodecError::MissingAttribute { .. })
        ));
    }

    #[test]
    fn bool_attributes() {
        let el = Element::new("resp")
            .with_attr("more", "true")
            .with_attr("bad", "yes");

        assert_eq!(el.bool_attr("more").unwrap(), Some(true));
        assert_eq!(el.bool_attr("missing").unwrap(), None);
        assert!(el.bool_attr("bad").is_err());
    }

    #[test]
    fn expect_checks_namespace() {
        let el = Element::new("req").with_namespace("urn:other");
        assert!(el.expect("req", None).is_ok());
        assert!(matches!(
            el.expect("req", Some("urn:ieee:iot:sd:1.0")),
            Err(CodecError::UnknownNamespace(_))
        ));
        assert!(matches!(
            el.expect("resp", None),
            Err(CodecError::UnexpectedElement { .. })
        ));
    }

    #[test]
    fn cbor_roundtrip() {
        let mut el = Element::new("message").with_attr("id", "42");
        el.push(Element::new("err").with_text("boom"));

        let bytes = el.to_cbor().unwrap();
        assert_eq!(Element::from_cbor(&bytes).unwrap(), el);
        assert!(Element::from_cbor(&[0xff, 0x00]).is_err());
    }
}
