//! Local device model.
//!
//! A device answers momentary readouts through [`MomentarySource`] and
//! accepts control-set writes through [`Actuator`]. [`RegisterDevice`] backs
//! both with a table of typed registers.

use crate::config::RegisterConfig;
use async_trait::async_trait;
use dashmap::DashMap;
use sensorlink_core::control::{Parameter, ParameterError, ParameterType};
use sensorlink_core::field::{Field, FieldType, FieldValue};
use sensorlink_core::flags::Category;
use sensorlink_core::request::Request;
use sensorlink_core::syntax::DecodeError;
use sensorlink_core::tree::{NodeContainer, NodeRef, Response};

/// Produces current values for non-historical requests.
#[async_trait]
pub trait MomentarySource: Send + Sync {
    /// Read the values selected by `request`.
    async fn read(&self, request: &Request) -> Result<Response, ReadoutError>;
}

/// Writes control-set parameters to the device.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Current value of a writable parameter, `None` if it does not exist.
    fn current(&self, node: Option<&str>, name: &str) -> Option<Parameter>;

    /// Declared type of a writable parameter.
    fn parameter_type(&self, node: Option<&str>, name: &str) -> Option<ParameterType> {
        self.current(node, name).map(|parameter| parameter.kind())
    }

    /// Write one parameter.
    async fn apply(&self, node: Option<&str>, parameter: &Parameter) -> Result<(), ParameterError>;
}

/// Field type a register of the given parameter type reads out as.
#[must_use]
pub fn readout_type(kind: ParameterType) -> FieldType {
    match kind {
        ParameterType::Boolean => FieldType::Boolean,
        ParameterType::Color | ParameterType::String => FieldType::String,
        ParameterType::Date => FieldType::Date,
        ParameterType::DateTime => FieldType::DateTime,
        ParameterType::Double => FieldType::Quantity,
        ParameterType::Duration => FieldType::Duration,
        ParameterType::Int => FieldType::Int32,
        ParameterType::Long => FieldType::Int64,
        ParameterType::Time => FieldType::Time,
        ParameterType::Enum => FieldType::Enum,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RegisterKey {
    node: Option<String>,
    name: String,
}

/// Device backed by an in-memory register table.
///
/// Registers without a node belong to the device itself and read out under a
/// node named after the device address.
#[derive(Debug)]
pub struct RegisterDevice {
    device_id: String,
    registers: DashMap<RegisterKey, Parameter>,
}

impl RegisterDevice {
    /// Create a device without registers.
    #[must_use]
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            registers: DashMap::new(),
        }
    }

    /// Create a device from configured registers.
    ///
    /// # Errors
    ///
    /// Returns error if a register has an unknown type or an invalid value.
    pub fn from_config(
        device_id: impl Into<String>,
        registers: &[RegisterConfig],
    ) -> Result<Self, DecodeError> {
        let device = Self::new(device_id);
        for register in registers {
            let kind = ParameterType::from_code(&register.type_code)?;
            let enum_type = match kind {
                ParameterType::Enum => register.enum_type.clone(),
                _ => None,
            };
            let parameter =
                Parameter::new(register.name.as_str(), kind, register.value.as_str(), enum_type)?;
            device.define(register.node.as_deref(), parameter);
        }
        Ok(device)
    }

    /// Define or overwrite a register.
    pub fn define(&self, node: Option<&str>, parameter: Parameter) {
        let key = self.key(node, parameter.name());
        self.registers.insert(key, parameter);
    }

    /// Current value of a register.
    #[must_use]
    pub fn value(&self, node: Option<&str>, name: &str) -> Option<String> {
        self.registers
            .get(&self.key(node, name))
            .map(|entry| entry.value().value().to_string())
    }

    /// Address of the device.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn key(&self, node: Option<&str>, name: &str) -> RegisterKey {
        RegisterKey {
            node: node
                .filter(|id| *id != self.device_id)
                .map(ToString::to_string),
            name: name.to_string(),
        }
    }
}

fn register_field(parameter: &Parameter) -> Result<Field, DecodeError> {
    let kind = readout_type(parameter.kind());
    let enum_type = match kind {
        FieldType::Enum => Some(
            parameter
                .enum_type()
                .unwrap_or_else(|| parameter.name())
                .to_string(),
        ),
        _ => None,
    };
    let value = FieldValue::new(kind, parameter.value(), None, enum_type)?;
    Ok(Field::new(parameter.name(), value).with_category(Category::Momentary, true))
}

#[async_trait]
impl MomentarySource for RegisterDevice {
    async fn read(&self, request: &Request) -> Result<Response, ReadoutError> {
        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

        let mut registers: Vec<(RegisterKey, Parameter)> = self
            .registers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        registers.sort_by(|a, b| a.0.cmp(&b.0));

        let mut response = Response::new(request.id.as_str());
        for (key, parameter) in registers {
            let node_id = key.node.as_deref().unwrap_or(&self.device_id);
            if !request.node_set().is_empty() && !request.node_set().contains(node_id) {
                continue;
            }
            if !request.fields().is_empty() && !request.fields().contains(parameter.name()) {
                continue;
            }

            response
                .node_entry(&NodeRef::new(node_id))
                .timestamp_entry(&timestamp)
                .add_field(register_field(&parameter)?);
        }

        tracing::debug!(
            request_id = %request.id,
            count = response.field_count(),
            "Momentary readout"
        );
        Ok(response)
    }
}

#[async_trait]
impl Actuator for RegisterDevice {
    fn current(&self, node: Option<&str>, name: &str) -> Option<Parameter> {
        self.registers
            .get(&self.key(node, name))
            .map(|entry| entry.value().clone())
    }

    async fn apply(&self, node: Option<&str>, parameter: &Parameter) -> Result<(), ParameterError> {
        let mut entry = self
            .registers
            .get_mut(&self.key(node, parameter.name()))
            .ok_or_else(|| ParameterError::new(parameter.name(), "unknown parameter"))?;

        let current = entry.value_mut();
        let enum_type = parameter
            .enum_type()
            .or_else(|| current.enum_type())
            .map(ToString::to_string);
        *current = Parameter::new(parameter.name(), parameter.kind(), parameter.value(), enum_type)
            .map_err(|e| ParameterError::new(parameter.name(), e.to_string()))?;

        tracing::info!(
            node_id = node.unwrap_or(&self.device_id),
            parameter = parameter.name(),
            value = parameter.value(),
            "Register written"
        );
        Ok(())
    }
}

/// Errors raised while reading the device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadoutError {
    /// A register value cannot be expressed as a field
    #[error(transparent)]
    Value(#[from] DecodeError),
    /// The device could not be read
    #[error("readout failed: {0}")]
    Device(String),
}
