//! Control-set handling.

use crate::device::Actuator;
use sensorlink_core::control::{ControlSet, ControlSetResponse, Parameter, ParameterError};
use sensorlink_core::tree::NodeContainer;
use std::sync::Arc;

/// Validates and applies control-set commands.
///
/// A command is checked as a whole before anything is written: the first
/// malformed parameter, unknown parameter or type mismatch rejects it with a
/// single [`ParameterError`] and leaves the device untouched. If a write
/// fails part-way, the registers already written are restored.
#[derive(Clone)]
pub struct ControlHandler {
    actuator: Arc<dyn Actuator>,
}

impl ControlHandler {
    /// Create a handler writing to `actuator`.
    #[must_use]
    pub fn new(actuator: Arc<dyn Actuator>) -> Self {
        Self { actuator }
    }

    /// Execute a command and build its answer.
    pub async fn handle(&self, command: &ControlSet) -> ControlSetResponse {
        let targets = targets(command);

        if let Err(error) = self.validate(command, &targets) {
            tracing::warn!(
                parameter = %error.variable,
                reason = %error.text,
                "Control-set rejected"
            );
            return ControlSetResponse::rejected(command, error);
        }

        let mut written: Vec<(Option<&str>, Parameter)> = Vec::new();
        for target in &targets {
            for parameter in command.parameters() {
                let node = target.as_deref();
                let previous = self.actuator.current(node, parameter.name());
                if let Err(error) = self.actuator.apply(node, parameter).await {
                    tracing::warn!(
                        parameter = %error.variable,
                        reason = %error.text,
                        restored = written.len(),
                        "Control-set apply failed"
                    );
                    self.restore(written).await;
                    return ControlSetResponse::rejected(command, error);
                }
                if let Some(previous) = previous {
                    written.push((node, previous));
                }
            }
        }

        tracing::info!(
            nodes = targets.len(),
            parameters = command.parameters().len(),
            "Control-set applied"
        );
        ControlSetResponse::accepted(command)
    }

    fn validate(&self, command: &ControlSet, targets: &[Option<String>]) -> Result<(), ParameterError> {
        if let Some(raw) = command.malformed().iter().next() {
            let reason = match raw.parse() {
                Err(err) => err.to_string(),
                Ok(_) => "malformed parameter".to_string(),
            };
            return Err(ParameterError::new(raw.name.as_str(), reason));
        }

        for target in targets {
            for parameter in command.parameters() {
                self.check(target.as_deref(), parameter)?;
            }
        }
        Ok(())
    }

    fn check(&self, node: Option<&str>, parameter: &Parameter) -> Result<(), ParameterError> {
        match self.actuator.parameter_type(node, parameter.name()) {
            None => Err(ParameterError::new(
                parameter.name(),
                match node {
                    Some(node) => format!("unknown parameter on node '{node}'"),
                    None => "unknown parameter".to_string(),
                },
            )),
            Some(expected) if expected != parameter.kind() => Err(ParameterError::new(
                parameter.name(),
                format!("expected {expected}, got {}", parameter.kind()),
            )),
            Some(_) => Ok(()),
        }
    }

    /// Write back the values a failed command overwrote, newest first.
    async fn restore(&self, written: Vec<(Option<&str>, Parameter)>) {
        for (node, previous) in written.into_iter().rev() {
            if let Err(error) = self.actuator.apply(node, &previous).await {
                tracing::error!(
                    parameter = %error.variable,
                    reason = %error.text,
                    "Failed to restore register"
                );
            }
        }
    }
}

/// Nodes addressed by a command; no nodes means the device itself.
fn targets(command: &ControlSet) -> Vec<Option<String>> {
    if command.node_set().is_empty() {
        vec![None]
    } else {
        command.nodes().map(|node| Some(node.id().to_string())).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::RegisterDevice;
    use async_trait::async_trait;
    use sensorlink_core::control::{ParameterType, RawParameter};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn thermostat() -> Arc<RegisterDevice> {
        let device = RegisterDevice::new("thermostat");
        device.define(
            None,
            Parameter::new("setpoint", ParameterType::Boolean, "false", None).unwrap(),
        );
        device.define(
            None,
            Parameter::new("mode", ParameterType::String, "auto", None).unwrap(),
        );
        Arc::new(device)
    }

    /// Register device whose n-th write fails; restores always succeed.
    struct FailingWrite {
        device: RegisterDevice,
        fail_on: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl Actuator for FailingWrite {
        fn current(&self, node: Option<&str>, name: &str) -> Option<Parameter> {
            self.device.current(node, name)
        }

        async fn apply(&self, node: Option<&str>, parameter: &Parameter) -> Result<(), ParameterError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) + 1 == self.fail_on {
                return Err(ParameterError::new(parameter.name(), "bus timeout"));
            }
            self.device.apply(node, parameter).await
        }
    }

    #[tokio::test]
    async fn type_mismatch_rejects_whole_command() {
        let device = thermostat();
        let handler = ControlHandler::new(device.clone());

        let mut command = ControlSet::new();
        command
            .add_data("mode", ParameterType::String, "manual")
            .unwrap();
        command
            .add_data("setpoint", ParameterType::Double, "21.5")
            .unwrap();

        let response = handler.handle(&command).await;
        assert!(!response.is_success());
        let error = response.error.as_ref().unwrap();
        assert_eq!(error.variable, "setpoint");
        assert_eq!(error.text, "expected boolean, got double");
        assert!(response.accepted_names().is_empty());

        assert_eq!(device.value(None, "mode").as_deref(), Some("auto"));
    }

    #[tokio::test]
    async fn malformed_parameter_rejects_whole_command() {
        let device = thermostat();
        let handler = ControlHandler::new(device.clone());

        let mut command = ControlSet::new();
        command
            .add_data("mode", ParameterType::String, "manual")
            .unwrap();
        command.add_raw(RawParameter {
            name: "setpoint".into(),
            code: "q".into(),
            value: "21.5".into(),
            unit: Some("C".into()),
            enum_type: None,
        });

        let response = handler.handle(&command).await;
        let error = response.error.as_ref().unwrap();
        assert_eq!(error.variable, "setpoint");
        assert_eq!(error.text, "unknown type 'q'");
        assert_eq!(device.value(None, "mode").as_deref(), Some("auto"));

        let mut command = ControlSet::new();
        command.add_raw(RawParameter {
            name: "setpoint".into(),
            code: "b".into(),
            value: "maybe".into(),
            unit: None,
            enum_type: None,
        });
        let response = handler.handle(&command).await;
        assert_eq!(response.error.unwrap().variable, "setpoint");
        assert_eq!(device.value(None, "setpoint").as_deref(), Some("false"));
    }

    #[tokio::test]
    async fn valid_command_applies_everything() {
        let device = thermostat();
        let handler = ControlHandler::new(device.clone());

        let mut command = ControlSet::new();
        command
            .add_data("setpoint", ParameterType::Boolean, "true")
            .unwrap();
        command
            .add_data("mode", ParameterType::String, "manual")
            .unwrap();

        let response = handler.handle(&command).await;
        assert!(response.is_success());
        let names: Vec<&str> = response.accepted_names().keys().collect();
        assert_eq!(names, vec!["setpoint", "mode"]);
        assert_eq!(device.value(None, "setpoint").as_deref(), Some("true"));
        assert_eq!(device.value(None, "mode").as_deref(), Some("manual"));
    }

    #[tokio::test]
    async fn failed_write_restores_earlier_writes() {
        let device = RegisterDevice::new("thermostat");
        device.define(
            None,
            Parameter::new("setpoint", ParameterType::Boolean, "false", None).unwrap(),
        );
        device.define(
            None,
            Parameter::new("mode", ParameterType::String, "auto", None).unwrap(),
        );
        let actuator = Arc::new(FailingWrite {
            device,
            fail_on: 2,
            writes: AtomicUsize::new(0),
        });
        let handler = ControlHandler::new(actuator.clone());

        let mut command = ControlSet::new();
        command
            .add_data("setpoint", ParameterType::Boolean, "true")
            .unwrap();
        command
            .add_data("mode", ParameterType::String, "manual")
            .unwrap();

        let response = handler.handle(&command).await;
        let error = response.error.as_ref().unwrap();
        assert_eq!(error.variable, "mode");
        assert_eq!(error.text, "bus timeout");
        assert!(response.accepted_names().is_empty());

        assert_eq!(actuator.device.value(None, "setpoint").as_deref(), Some("false"));
        assert_eq!(actuator.device.value(None, "mode").as_deref(), Some("auto"));
    }

    #[tokio::test]
    async fn unknown_node_rejected() {
        let handler = ControlHandler::new(thermostat());

        let mut command = ControlSet::new();
        command.add_node("zone9", None, None);
        command
            .add_data("mode", ParameterType::String, "off")
            .unwrap();

        let response = handler.handle(&command).await;
        let error = response.error.as_ref().unwrap();
        assert_eq!(error.variable, "mode");
        assert!(error.text.contains("zone9"));
        assert_eq!(response.nodes().count(), 1);
    }
}
