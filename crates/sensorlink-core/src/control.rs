//! Control-set commands and their responses.
//!
//! A control-set writes named, typed parameters to one or more nodes.
//! Parameters carry values only: no flags, no unit.

use crate::keyed::{Keyed, KeyedSet};
use crate::syntax::{validate, DecodeError, Syntax};
use crate::tree::{NodeContainer, NodeRef};

/// The value kinds of control parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterType {
    /// Boolean
    Boolean,
    /// RGB or RGBA color as hex digits
    Color,
    /// Free text
    String,
    /// Calendar date
    Date,
    /// Date and time
    DateTime,
    /// Decimal floating-point value
    Double,
    /// Time span
    Duration,
    /// 32-bit integer
    Int,
    /// 64-bit integer
    Long,
    /// Time of day
    Time,
    /// Value of a named enumeration
    Enum,
}

impl ParameterType {
    /// Every parameter type.
    pub const ALL: [ParameterType; 11] = [
        ParameterType::Boolean,
        ParameterType::Color,
        ParameterType::String,
        ParameterType::Date,
        ParameterType::DateTime,
        ParameterType::Double,
        ParameterType::Duration,
        ParameterType::Int,
        ParameterType::Long,
        ParameterType::Time,
        ParameterType::Enum,
    ];

    /// Wire code (element name).
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            ParameterType::Boolean => "b",
            ParameterType::Color => "cl",
            ParameterType::String => "s",
            ParameterType::Date => "d",
            ParameterType::DateTime => "dt",
            ParameterType::Double => "db",
            ParameterType::Duration => "dr",
            ParameterType::Int => "i",
            ParameterType::Long => "l",
            ParameterType::Time => "t",
            ParameterType::Enum => "e",
        }
    }

    /// Look a type up by wire code.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownType`] for unrecognized codes.
    pub fn from_code(code: &str) -> Result<Self, DecodeError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.code() == code)
            .ok_or_else(|| DecodeError::UnknownType(code.to_string()))
    }

    /// The value grammar for this type.
    #[must_use]
    pub fn syntax(self) -> Syntax {
        match self {
            ParameterType::Boolean => Syntax::Boolean,
            ParameterType::Color => Syntax::Color,
            ParameterType::String | ParameterType::Enum => Syntax::Text,
            ParameterType::Date => Syntax::Date,
            ParameterType::DateTime => Syntax::DateTime,
            ParameterType::Double => Syntax::Decimal,
            ParameterType::Duration => Syntax::Duration,
            ParameterType::Int => Syntax::Int32,
            ParameterType::Long => Syntax::Int64,
            ParameterType::Time => Syntax::Time,
        }
    }
}

impl std::fmt::Display for ParameterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParameterType::Boolean => "boolean",
            ParameterType::Color => "color",
            ParameterType::String => "string",
            ParameterType::Date => "date",
            ParameterType::DateTime => "dateTime",
            ParameterType::Double => "double",
            ParameterType::Duration => "duration",
            ParameterType::Int => "int",
            ParameterType::Long => "long",
            ParameterType::Time => "time",
            ParameterType::Enum => "enum",
        };
        f.write_str(name)
    }
}

/// A named, typed value written by a control-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    name: String,
    kind: ParameterType,
    value: String,
    enum_type: Option<String>,
}

impl Parameter {
    /// Build and validate a parameter.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedValue`] if the value does not match the
    /// type's syntax or an enum type is given for a non-enum.
    pub fn new(
        name: impl Into<String>,
        kind: ParameterType,
        value: impl Into<String>,
        enum_type: Option<String>,
    ) -> Result<Self, DecodeError> {
        let value = value.into();
        validate(&kind.to_string(), kind.syntax(), &value)?;
        if enum_type.is_some() && kind != ParameterType::Enum {
            return Err(DecodeError::malformed(
                kind.to_string(),
                value,
                "type name is only allowed on enums",
            ));
        }
        Ok(Self {
            name: name.into(),
            kind,
            value,
            enum_type,
        })
    }

    /// Parameter name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parameter type.
    #[must_use]
    pub fn kind(&self) -> ParameterType {
        self.kind
    }

    /// Textual value.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Enumeration domain, enums only.
    #[must_use]
    pub fn enum_type(&self) -> Option<&str> {
        self.enum_type.as_deref()
    }
}

impl Keyed for Parameter {
    fn key(&self) -> &str {
        &self.name
    }
}

/// A parameter as received, before its type code and value are checked.
///
/// Commands keep parameters that fail the check so the responder can reject
/// the command with an error naming them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawParameter {
    /// Parameter name
    pub name: String,
    /// Wire type code
    pub code: String,
    /// Textual value
    pub value: String,
    /// Unit, which parameters never carry
    pub unit: Option<String>,
    /// Enumeration domain
    pub enum_type: Option<String>,
}

impl RawParameter {
    /// Check the type code and value.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::UnknownType`] for an unrecognized code and
    /// [`DecodeError::MalformedValue`] for a bad value or a unit.
    pub fn parse(&self) -> Result<Parameter, DecodeError> {
        let kind = ParameterType::from_code(&self.code)?;
        if self.unit.is_some() {
            return Err(DecodeError::malformed(
                kind.to_string(),
                self.value.as_str(),
                "parameters carry no unit",
            ));
        }
        Parameter::new(
            self.name.as_str(),
            kind,
            self.value.as_str(),
            self.enum_type.clone(),
        )
    }
}

impl From<&Parameter> for RawParameter {
    fn from(parameter: &Parameter) -> Self {
        Self {
            name: parameter.name.clone(),
            code: parameter.kind.code().to_string(),
            value: parameter.value.clone(),
            unit: None,
            enum_type: parameter.enum_type.clone(),
        }
    }
}

impl Keyed for RawParameter {
    fn key(&self) -> &str {
        &self.name
    }
}

/// A command writing parameters to nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlSet {
    nodes: KeyedSet<NodeRef>,
    parameters: KeyedSet<Parameter>,
    malformed: KeyedSet<RawParameter>,
    /// Service token (`st`)
    pub service_token: Option<String>,
    /// Device token (`dt`)
    pub device_token: Option<String>,
    /// User token (`ut`)
    pub user_token: Option<String>,
}

impl ControlSet {
    /// Create an empty command.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, `None` if the name is taken.
    pub fn add_parameter(&mut self, parameter: Parameter) -> Option<&mut Parameter> {
        if self.malformed.contains(parameter.name()) {
            return None;
        }
        self.parameters.insert(parameter)
    }

    /// Add a received parameter, keeping it unchecked if it does not parse.
    ///
    /// Returns `false` if the name is taken.
    pub fn add_raw(&mut self, raw: RawParameter) -> bool {
        if self.parameters.contains(&raw.name) || self.malformed.contains(&raw.name) {
            return false;
        }
        match raw.parse() {
            Ok(parameter) => self.parameters.insert(parameter).is_some(),
            Err(err) => {
                tracing::debug!(parameter = %raw.name, error = %err, "Keeping malformed parameter");
                self.malformed.insert(raw).is_some()
            }
        }
    }

    /// Build and add a parameter.
    ///
    /// # Errors
    ///
    /// Returns error if the value does not match the type.
    pub fn add_data(
        &mut self,
        name: &str,
        kind: ParameterType,
        value: &str,
    ) -> Result<Option<&mut Parameter>, DecodeError> {
        let parameter = Parameter::new(name, kind, value, None)?;
        Ok(self.add_parameter(parameter))
    }

    /// Remove a parameter by name.
    pub fn del_parameter(&mut self, name: &str) -> bool {
        self.parameters.remove(name) || self.malformed.remove(name)
    }

    /// Replace all parameters.
    pub fn set_parameters(&mut self, parameters: impl IntoIterator<Item = Parameter>) {
        self.malformed.clear();
        self.parameters.replace_all(parameters);
    }

    /// Remove all parameters.
    pub fn del_parameters(&mut self) {
        self.parameters.clear();
        self.malformed.clear();
    }

    /// The parameters in insertion order.
    #[must_use]
    pub fn parameters(&self) -> &KeyedSet<Parameter> {
        &self.parameters
    }

    /// Received parameters whose type code or value did not check.
    #[must_use]
    pub fn malformed(&self) -> &KeyedSet<RawParameter> {
        &self.malformed
    }
}

impl NodeContainer for ControlSet {
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

/// The single rejection reported for a failed control-set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parameter '{variable}': {text}")]
pub struct ParameterError {
    /// Name of the offending parameter
    pub variable: String,
    /// Human-readable reason
    pub text: String,
}

impl ParameterError {
    /// Create a parameter error.
    #[must_use]
    pub fn new(variable: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            text: text.into(),
        }
    }
}

/// Answer to a control-set: accepted names or one error.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ControlSetResponse {
    nodes: KeyedSet<NodeRef>,
    accepted: KeyedSet<String>,
    /// Set when the command was rejected as a whole
    pub error: Option<ParameterError>,
}

impl ControlSetResponse {
    /// Create an empty response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge a command, echoing its nodes and listing its parameters.
    #[must_use]
    pub fn accepted(command: &ControlSet) -> Self {
        let mut resp = Self::new();
        resp.nodes = command.node_set().clone();
        resp.accepted = command.parameters().keys().map(ToString::to_string).collect();
        resp
    }

    /// Reject a command with one parameter error.
    #[must_use]
    pub fn rejected(command: &ControlSet, error: ParameterError) -> Self {
        let mut resp = Self::new();
        resp.nodes = command.node_set().clone();
        resp.error = Some(error);
        resp
    }

    /// Add an accepted parameter name, `None` if already listed.
    pub fn add_data(&mut self, name: impl Into<String>) -> Option<&mut String> {
        self.accepted.insert(name.into())
    }

    /// Remove an accepted parameter name.
    pub fn del_data(&mut self, name: &str) -> bool {
        self.accepted.remove(name)
    }

    /// Replace the accepted names.
    pub fn set_datas<S: Into<String>>(&mut self, names: impl IntoIterator<Item = S>) {
        self.accepted.replace_all(names.into_iter().map(Into::into));
    }

    /// Clear the accepted names.
    pub fn del_datas(&mut self) {
        self.accepted.clear();
    }

    /// Accepted parameter names.
    #[must_use]
    pub fn accepted_names(&self) -> &KeyedSet<String> {
        &self.accepted
    }

    /// Whether the command was applied.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl NodeContainer for ControlSetResponse {
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
