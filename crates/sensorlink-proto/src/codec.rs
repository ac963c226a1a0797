//! Conversion between the core model and element trees.

use crate::element::Element;
use sensorlink_core::control::{
    ControlSet, ControlSetResponse, Parameter, ParameterError, RawParameter,
};
use sensorlink_core::field::{Field, FieldType, FieldValue};
use sensorlink_core::request::Request;
use sensorlink_core::syntax::DecodeError;
use sensorlink_core::tree::{NodeContainer, NodeRef, Response, ResponseNode, Timestamp};

/// Sensor-data namespace.
pub const NS_SENSOR_DATA: &str = "urn:ieee:iot:sd:1.0";

/// Control namespace.
pub const NS_CONTROL: &str = "urn:ieee:iot:ctr:1.0";

/// A model type with an element representation.
pub trait WireCodec: Sized {
    /// Encode into an element.
    fn to_element(&self) -> Element;

    /// Decode from an element.
    ///
    /// # Errors
    ///
    /// Returns error if the element does not describe a valid value.
    fn from_element(element: &Element) -> Result<Self, CodecError>;
}

impl WireCodec for Field {
    fn to_element(&self) -> Element {
        let value = self.value();
        let mut el = Element::new(self.kind().code())
            .with_attr("n", self.name())
            .with_attr("v", value.text());
        el.set_opt_attr("u", value.unit());
        el.set_opt_attr("t", value.enum_type());
        el.attrs.extend(self.get_flags());
        el.set_opt_attr("lns", self.localization_namespace());
        el.set_opt_attr("loc", self.localization());
        el
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        let kind = FieldType::from_code(&element.name)?;
        let name = element.require_attr("n")?;
        let value = FieldValue::new(
            kind,
            element.require_attr("v")?,
            element.attr("u").map(ToString::to_string),
            element.attr("t").map(ToString::to_string),
        )?;

        let mut field = Field::new(name, value);
        field.set_flags(&element.attrs)?;
        field.set_localization_namespace(element.attr("lns").map(ToString::to_string));
        if let Some(loc) = element.attr("loc") {
            field.set_localization(loc)?;
        }
        Ok(field)
    }
}

impl WireCodec for NodeRef {
    fn to_element(&self) -> Element {
        let mut el = Element::new("nd").with_attr("id", self.id());
        el.set_opt_attr("src", self.source_id.as_deref());
        el.set_opt_attr("pt", self.partition.as_deref());
        el
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        element.expect("nd", None)?;
        Ok(NodeRef::with_source(
            element.require_attr("id")?,
            element.attr("src"),
            element.attr("pt"),
        ))
    }
}

impl WireCodec for Timestamp {
    fn to_element(&self) -> Element {
        let mut el = Element::new("ts").with_attr("v", self.value());
        el.children
            .extend(self.fields().iter().map(WireCodec::to_element));
        el
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        element.expect("ts", None)?;
        let mut timestamp = Timestamp::new(element.require_attr("v")?);
        for child in &element.children {
            timestamp.add_field(Field::from_element(child)?);
        }
        Ok(timestamp)
    }
}

impl WireCodec for ResponseNode {
    fn to_element(&self) -> Element {
        let mut el = self.node().to_element();
        el.children
            .extend(self.timestamps().iter().map(WireCodec::to_element));
        el
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        let mut node = ResponseNode::new(NodeRef::from_element(element)?);
        for child in &element.children {
            node.insert_timestamp(Timestamp::from_element(child)?);
        }
        Ok(node)
    }
}

impl WireCodec for Response {
    fn to_element(&self) -> Element {
        let mut el = Element::new("resp")
            .with_namespace(NS_SENSOR_DATA)
            .with_attr("id", self.id.as_str());
        if self.more {
            el.attrs.insert("more".to_string(), "true".to_string());
        }
        el.children.extend(self.nodes().map(WireCodec::to_element));
        el
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        element.expect("resp", Some(NS_SENSOR_DATA))?;
        let mut resp = Response::new(element.require_attr("id")?);
        resp.more = element.bool_attr("more")?.unwrap_or(false);
        let nodes = element
            .children
            .iter()
            .map(ResponseNode::from_element)
            .collect::<Result<Vec<_>, _>>()?;
        resp.set_nodes(nodes);
        Ok(resp)
    }
}

impl WireCodec for Request {
    fn to_element(&self) -> Element {
        let mut el = Element::new("req")
            .with_namespace(NS_SENSOR_DATA)
            .with_attr("id", self.id.as_str());
        el.attrs.extend(self.get_flags());
        if let Some(historical) = self.historical {
            el.attrs
                .insert("historical".to_string(), historical.to_string());
        }
        el.children.extend(self.nodes().map(WireCodec::to_element));
        el.children.extend(
            self.fields()
                .keys()
                .map(|name| Element::new("f").with_attr("n", name)),
        );
        el
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        element.expect("req", Some(NS_SENSOR_DATA))?;
        let mut req = Request::new(element.require_attr("id")?);
        req.set_flags(&element.attrs)?;
        req.historical = element.bool_attr("historical")?;

        for child in &element.children {
            match child.name.as_str() {
                "nd" => {
                    let node = NodeRef::from_element(child)?;
                    req.add_node(
                        node.id(),
                        node.source_id.as_deref(),
                        node.partition.as_deref(),
                    );
                }
                "f" => {
                    req.add_field(child.require_attr("n")?);
                }
                other => {
                    return Err(CodecError::UnexpectedElement {
                        expected: "nd or f".to_string(),
                        found: other.to_string(),
                    })
                }
            }
        }
        Ok(req)
    }
}

impl WireCodec for Parameter {
    fn to_element(&self) -> Element {
        let mut el = Element::new(self.kind().code())
            .with_attr("n", self.name())
            .with_attr("v", self.value());
        el.set_opt_attr("t", self.enum_type());
        el
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        RawParameter::from_element(element)?
            .parse()
            .map_err(CodecError::from)
    }
}

impl WireCodec for RawParameter {
    fn to_element(&self) -> Element {
        let mut el = Element::new(self.code.as_str())
            .with_attr("n", self.name.as_str())
            .with_attr("v", self.value.as_str());
        el.set_opt_attr("u", self.unit.as_deref());
        el.set_opt_attr("t", self.enum_type.as_deref());
        el
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        Ok(RawParameter {
            name: element.require_attr("n")?.to_string(),
            code: element.name.clone(),
            value: element.require_attr("v")?.to_string(),
            unit: element.attr("u").map(ToString::to_string),
            enum_type: element.attr("t").map(ToString::to_string),
        })
    }
}

impl WireCodec for ControlSet {
    fn to_element(&self) -> Element {
        let mut el = Element::new("set").with_namespace(NS_CONTROL);
        el.set_opt_attr("st", self.service_token.as_deref());
        el.set_opt_attr("dt", self.device_token.as_deref());
        el.set_opt_attr("ut", self.user_token.as_deref());
        el.children.extend(self.nodes().map(WireCodec::to_element));
        el.children
            .extend(self.parameters().iter().map(WireCodec::to_element));
        el.children
            .extend(self.malformed().iter().map(WireCodec::to_element));
        el
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        element.expect("set", Some(NS_CONTROL))?;
        let mut set = ControlSet::new();
        set.service_token = element.attr("st").map(ToString::to_string);
        set.device_token = element.attr("dt").map(ToString::to_string);
        set.user_token = element.attr("ut").map(ToString::to_string);

        for child in &element.children {
            if child.name == "nd" {
                let node = NodeRef::from_element(child)?;
                set.add_node(
                    node.id(),
                    node.source_id.as_deref(),
                    node.partition.as_deref(),
                );
            } else {
                set.add_raw(RawParameter::from_element(child)?);
            }
        }
        Ok(set)
    }
}

impl WireCodec for ControlSetResponse {
    fn to_element(&self) -> Element {
        let mut el = Element::new("resp").with_namespace(NS_CONTROL);
        el.children.extend(self.nodes().map(WireCodec::to_element));
        el.children.extend(
            self.accepted_names()
                .keys()
                .map(|name| Element::new("p").with_attr("n", name)),
        );
        if let Some(error) = &self.error {
            el.push(
                Element::new("paramError")
                    .with_attr("var", error.variable.as_str())
                    .with_text(error.text.as_str()),
            );
        }
        el
    }

    fn from_element(element: &Element) -> Result<Self, CodecError> {
        element.expect("resp", Some(NS_CONTROL))?;
        let mut resp = ControlSetResponse::new();
        for child in &element.children {
            match child.name.as_str() {
                "nd" => {
                    let node = NodeRef::from_element(child)?;
                    resp.add_node(
                        node.id(),
                        node.source_id.as_deref(),
                        node.partition.as_deref(),
                    );
                }
                "p" => {
                    resp.add_data(child.require_attr("n")?);
                }
                "paramError" => {
                    resp.error = Some(ParameterError::new(
                        child.require_attr("var")?,
                        child.text.clone().unwrap_or_default(),
                    ));
                }
                other => {
                    return Err(CodecError::UnexpectedElement {
                        expected: "nd, p or paramError".to_string(),
                        found: other.to_string(),
                    })
                }
            }
        }
        Ok(resp)
    }
}

/// Errors raised while encoding or decoding messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// A value failed type validation
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// A required attribute is absent
    #[error("<{element}> is missing attribute '{attribute}'")]
    MissingAttribute {
        /// Element name
        element: String,
        /// Attribute name
        attribute: String,
    },
    /// An attribute value cannot be parsed
    #[error("<{element}> has invalid {attribute}='{value}'")]
    InvalidAttribute {
        /// Element name
        element: String,
        /// Attribute name
        attribute: String,
        /// Rejected value
        value: String,
    },
    /// An element appeared where another was expected
    #[error("expected <{expected}>, found <{found}>")]
    UnexpectedElement {
        /// Expected element name(s)
        expected: String,
        /// Actual element name
        found: String,
    },
    /// The payload namespace is not one this protocol understands
    #[error("unknown namespace '{0}'")]
    UnknownNamespace(String),
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorlink_core::control::ParameterType;
    use sensorlink_core::flags::{Category, Quality};

    fn sample_response() -> Response {
        let mut resp = Response::new("1");
        let node = resp.add_node("Device02", Some("Source"), None).unwrap();
        let ts = node.add_timestamp("2013-03-07T16:24:30").unwrap();
        ts.add_field(
            Field::new("Temperature", FieldValue::quantity("-12.42", Some("K")).unwrap())
                .with_category(Category::Momentary, true)
                .with_quality(Quality::AutomaticReadout, true),
        );
        ts.add_field(Field::new(
            "Mode",
            FieldValue::new(FieldType::Enum, "eco", None, Some("ModeType".into())).unwrap(),
        ));
        resp.add_node("EmptyDevice", None, None);
        resp
    }

    #[test]
    fn field_element_layout() {
        let field = Field::new(
            "Temperature",
            FieldValue::quantity("-12.42", Some("K")).unwrap(),
        )
        .with_category(Category::Momentary, true)
        .with_quality(Quality::AutomaticReadout, false);

        let el = field.to_element();
        assert_eq!(el.name, "q");
        assert_eq!(el.attr("u"), Some("K"));
        assert_eq!(el.attr("m"), Some("true"));
        assert_eq!(el.attr("ar"), Some("false"));
        assert_eq!(el.attr("h"), None);
        assert_eq!(el.attr("t"), None);
    }

    #[test]
    fn every_field_type_decodes_its_encoding() {
        let values = [
            (FieldType::Quantity, "1.5"),
            (FieldType::Int32, "-5"),
            (FieldType::Int64, "9000000000"),
            (FieldType::String, "hello"),
            (FieldType::Boolean, "false"),
            (FieldType::Date, "2012-01-01"),
            (FieldType::DateTime, "2012-01-01T12:00:00"),
            (FieldType::Duration, "PT5M"),
            (FieldType::Time, "12:30:00"),
        ];
        for (kind, text) in values {
            let field = Field::new("x", FieldValue::new(kind, text, None, None).unwrap());
            assert_eq!(Field::from_element(&field.to_element()).unwrap(), field);
        }
    }

    #[test]
    fn unknown_field_type() {
        let el = Element::new("zz").with_attr("n", "x").with_attr("v", "1");
        assert_eq!(
            Field::from_element(&el),
            Err(CodecError::Decode(DecodeError::UnknownType("zz".into())))
        );
    }

    #[test]
    fn malformed_field_value() {
        let el = Element::new("i").with_attr("n", "x").with_attr("v", "one");
        assert!(matches!(
            Field::from_element(&el),
            Err(CodecError::Decode(DecodeError::MalformedValue { .. }))
        ));

        let el = Element::new("s")
            .with_attr("n", "x")
            .with_attr("v", "ok")
            .with_attr("loc", "not-a-step");
        assert!(Field::from_element(&el).is_err());
    }

    #[test]
    fn response_tree_roundtrip() {
        let mut resp = sample_response();
        resp.more = true;

        let el = resp.to_element();
        assert_eq!(el.attr("more"), Some("true"));
        assert_eq!(el.children.len(), 2);
        assert_eq!(Response::from_element(&el).unwrap(), resp);

        resp.more = false;
        assert_eq!(resp.to_element().attr("more"), None);
    }

    #[test]
    fn request_roundtrip() {
        let mut req = Request::history("1", "2020-01-01", "2020-01-02");
        req.historical = Some(true);
        req.add_node("pump1", None, Some("north"));
        req.add_field("temperature");

        let el = req.to_element();
        assert_eq!(el.attr("h"), Some("true"));
        assert_eq!(el.attr("when"), None);
        assert_eq!(Request::from_element(&el).unwrap(), req);
    }

    #[test]
    fn request_with_stray_child_is_rejected() {
        let mut el = Request::new("1").to_element();
        el.push(Element::new("ts"));
        assert!(matches!(
            Request::from_element(&el),
            Err(CodecError::UnexpectedElement { .. })
        ));
    }

    #[test]
    fn control_set_roundtrip() {
        let mut set = ControlSet::new();
        set.add_node("Device02", None, None);
        set.add_data("Lamp", ParameterType::Color, "FF00FF").unwrap();
        set.add_parameter(
            Parameter::new("Mode", ParameterType::Enum, "eco", Some("ModeType".into())).unwrap(),
        );
        set.user_token = Some("u".to_string());

        let el = set.to_element();
        assert_eq!(el.namespace.as_deref(), Some(NS_CONTROL));
        assert_eq!(el.children[1].name, "cl");
        assert_eq!(ControlSet::from_element(&el).unwrap(), set);
    }

    #[test]
    fn control_set_keeps_malformed_parameters() {
        let el = Element::new("set")
            .with_namespace(NS_CONTROL)
            .with_child(
                Element::new("q")
                    .with_attr("n", "setpoint")
                    .with_attr("v", "21.5")
                    .with_attr("u", "C"),
            )
            .with_child(Element::new("i").with_attr("n", "fan").with_attr("v", "abc"))
            .with_child(Element::new("b").with_attr("n", "enabled").with_attr("v", "true"));

        let set = ControlSet::from_element(&el).unwrap();
        assert_eq!(set.parameters().len(), 1);
        let names: Vec<&str> = set.malformed().keys().collect();
        assert_eq!(names, vec!["setpoint", "fan"]);
        let setpoint = set.malformed().get("setpoint").unwrap();
        assert_eq!(setpoint.code, "q");
        assert_eq!(setpoint.unit.as_deref(), Some("C"));

        assert_eq!(ControlSet::from_element(&set.to_element()).unwrap(), set);
    }

    #[test]
    fn strict_parameter_decoding() {
        let el = Element::new("q").with_attr("n", "setpoint").with_attr("v", "21.5");
        assert_eq!(
            Parameter::from_element(&el),
            Err(CodecError::Decode(DecodeError::UnknownType("q".into())))
        );
    }

    #[test]
    fn control_response_with_error() {
        let mut set = ControlSet::new();
        set.add_node("Device02", None, None);
        let resp = ControlSetResponse::rejected(
            &set,
            ParameterError::new("setpoint", "expected boolean, got double"),
        );

        let el = resp.to_element();
        let error = el.children.last().unwrap();
        assert_eq!(error.name, "paramError");
        assert_eq!(error.text.as_deref(), Some("expected boolean, got double"));
        assert_eq!(ControlSetResponse::from_element(&el).unwrap(), resp);
    }

    #[test]
    fn control_and_sensor_resp_are_distinct() {
        let el = ControlSetResponse::new().to_element();
        assert!(matches!(
            Response::from_element(&el),
            Err(CodecError::UnknownNamespace(_))
        ));
    }
}
