//! Sensor-data requests.
//!
//! A request selects nodes and fields (an empty selector means "all"),
//! filters by category and optionally describes a time window. Window
//! attributes and tokens are kept as the strings that travelled on the wire.

use crate::flags::{Category, Flag, FlagSet};
use crate::keyed::KeyedSet;
use crate::syntax::{parse_boolean, DecodeError};
use crate::tree::{NodeContainer, NodeRef};
use std::collections::BTreeMap;

/// Non-category keys handled by [`Request::get_flags`] and [`Request::set_flags`].
pub const REQUEST_FLAG_KEYS: [&str; 7] = ["st", "dt", "ut", "from", "to", "when", "all"];

/// A readout request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Request {
    /// Request id, echoed by every answer
    pub id: String,
    nodes: KeyedSet<NodeRef>,
    fields: KeyedSet<String>,
    /// Category filter
    pub categories: FlagSet<Category>,
    /// Service token (`st`)
    pub service_token: Option<String>,
    /// Device token (`dt`)
    pub device_token: Option<String>,
    /// User token (`ut`)
    pub user_token: Option<String>,
    /// Window start, exclusive
    pub from: Option<String>,
    /// Window end, exclusive
    pub to: Option<String>,
    /// Point-in-time snapshot
    pub when: Option<String>,
    /// Explicit historical readout marker
    pub historical: Option<bool>,
    /// Read out everything the device has
    pub all: Option<bool>,
}

impl Request {
    /// Create an empty request.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Build a historical request for a closed window.
    #[must_use]
    pub fn history(id: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        let mut request = Self::new(id);
        request.categories.set(Category::Historical, true);
        request.from = Some(from.into());
        request.to = Some(to.into());
        request
    }

    /// Add a field to the selector, `None` if already selected.
    pub fn add_field(&mut self, name: impl Into<String>) -> Option<&mut String> {
        self.fields.insert(name.into())
    }

    /// Remove a field from the selector.
    pub fn del_field(&mut self, name: &str) -> bool {
        self.fields.remove(name)
    }

    /// Replace the field selector.
    pub fn set_fields<S: Into<String>>(&mut self, names: impl IntoIterator<Item = S>) {
        self.fields.replace_all(names.into_iter().map(Into::into));
    }

    /// Clear the field selector.
    pub fn del_fields(&mut self) {
        self.fields.clear();
    }

    /// Selected field names; empty means all fields.
    #[must_use]
    pub fn fields(&self) -> &KeyedSet<String> {
        &self.fields
    }

    /// Whether this request asks for stored history.
    #[must_use]
    pub fn is_historical(&self) -> bool {
        self.historical == Some(true) || self.categories.is_set(Category::Historical)
    }

    /// The `(from, to)` window of a historical request.
    ///
    /// Only closed windows are served: both bounds present, no `when`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnsupportedFlags`] for any other combination.
    pub fn history_window(&self) -> Result<(&str, &str), ProtocolError> {
        match (&self.from, &self.to, &self.when) {
            (Some(from), Some(to), None) => Ok((from, to)),
            _ => Err(ProtocolError::UnsupportedFlags),
        }
    }

    /// All present flags and window attributes as `name -> value`.
    #[must_use]
    pub fn get_flags(&self) -> BTreeMap<String, String> {
        let mut flags = BTreeMap::new();
        for (key, value) in REQUEST_FLAG_KEYS.iter().zip(self.flag_slots()) {
            if let Some(value) = value {
                flags.insert((*key).to_string(), value);
            }
        }
        self.categories.write_map(&mut flags);
        flags
    }

    /// Replace every flag and window attribute from a `name -> value` mapping.
    ///
    /// Keys missing from `flags` become absent.
    ///
    /// # Errors
    ///
    /// Returns error if `all` or a category is not a boolean literal; the
    /// request is left unchanged in that case.
    pub fn set_flags(&mut self, flags: &BTreeMap<String, String>) -> Result<(), DecodeError> {
        let mut categories = FlagSet::new();
        categories.read_map(flags)?;
        let all = match flags.get("all") {
            Some(raw) => Some(parse_boolean(raw).ok_or_else(|| DecodeError::MalformedValue {
                kind: "flag 'all'".to_string(),
                value: raw.clone(),
                reason: "expected a boolean".to_string(),
            })?),
            None => None,
        };

        let text = |key: &str| flags.get(key).cloned();
        self.service_token = text("st");
        self.device_token = text("dt");
        self.user_token = text("ut");
        self.from = text("from");
        self.to = text("to");
        self.when = text("when");
        self.all = all;
        self.categories = categories;
        Ok(())
    }

    fn flag_slots(&self) -> [Option<String>; 7] {
        [
            self.service_token.clone(),
            self.device_token.clone(),
            self.user_token.clone(),
            self.from.clone(),
            self.to.clone(),
            self.when.clone(),
            self.all.map(|all| all.to_string()),
        ]
    }
}

impl NodeContainer for Request {
    type Node = NodeRef;

    fn node_set(&self) -> &KeyedSet<NodeRef> {
        &self.nodes
    }

    fn node_set_mut(&mut self) -> &mut KeyedSet<NodeRef> {
        &mut self.nodes
    }

    fn make_node(node: NodeRef) -> NodeRef {
        node
    }
}

/// Returns true if `code` names a request flag or category.
#[must_use]
pub fn is_request_flag(code: &str) -> bool {
    REQUEST_FLAG_KEYS.contains(&code) || Category::from_code(code).is_some()
}

/// Protocol-level rejections of otherwise well-formed messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// The historical window uses a combination this responder cannot serve
    #[error("advanced historical flags not implemented")]
    UnsupportedFlags,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_selector_dedups() {
        let mut req = Request::new("1");
        assert!(req.add_field("Temperature").is_some());
        assert!(req.add_field("Temperature").is_none());
        req.add_field("Pressure");

        assert!(!req.del_field("Humidity"));
        assert!(req.del_field("Pressure"));

        req.set_fields(["a", "b", "a"]);
        let names: Vec<&str> = req.fields().keys().collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn node_selector() {
        let mut req = Request::new("1");
        req.add_node("Device44", Some("Source44"), Some("Partition44"))
            .unwrap();
        assert!(req.add_node("Device44", None, None).is_none());

        let node = req.nodes().next().unwrap();
        assert_eq!(node.source_id.as_deref(), Some("Source44"));
        assert_eq!(node.partition.as_deref(), Some("Partition44"));
    }

    #[test]
    fn flags_roundtrip_through_map() {
        let mut req = Request::new("1");
        req.categories.set(Category::Momentary, true);
        req.categories.set(Category::Peak, false);
        req.from = Some("2012-01-01T00:00:00".to_string());
        req.user_token = Some("ut-1".to_string());
        req.all = Some(true);

        let flags = req.get_flags();
        assert_eq!(flags.len(), 5);
        assert_eq!(flags.get("p").map(String::as_str), Some("false"));
        assert!(!flags.contains_key("to"));

        let mut copy = Request::new("1");
        copy.set_flags(&flags).unwrap();
        assert_eq!(copy, req);
    }

    #[test]
    fn set_flags_clears_missing_and_is_atomic() {
        let mut req = Request::history("1", "a", "b");
        let before = req.clone();

        let bad: BTreeMap<String, String> = [("all".to_string(), "maybe".to_string())].into();
        assert!(req.set_flags(&bad).is_err());
        assert_eq!(req, before);

        let only_when: BTreeMap<String, String> =
            [("when".to_string(), "2020-01-01T00:00:00".to_string())].into();
        req.set_flags(&only_when).unwrap();
        assert!(req.from.is_none());
        assert!(req.categories.is_empty());
        assert_eq!(req.when.as_deref(), Some("2020-01-01T00:00:00"));
    }

    #[test]
    fn history_window_rules() {
        let req = Request::history("1", "2020-01-01", "2020-01-02");
        assert!(req.is_historical());
        assert_eq!(req.history_window(), Ok(("2020-01-01", "2020-01-02")));

        let mut open = req.clone();
        open.to = None;
        assert_eq!(open.history_window(), Err(ProtocolError::UnsupportedFlags));

        let mut snapshot = req;
        snapshot.when = Some("2020-01-01T12:00:00".to_string());
        let err = snapshot.history_window().unwrap_err();
        assert_eq!(err.to_string(), "advanced historical flags not implemented");
    }

    #[test]
    fn request_flag_codes() {
        assert!(is_request_flag("when"));
        assert!(is_request_flag("h"));
        assert!(!is_request_flag("historical"));
        assert!(!is_request_flag("ar"));
    }
}
