use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The connection screen currently shown to the user. Exactly one is active.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStep {
    #[default]
    Loading,
    AuthorizeConnection,
    ApproveTransaction,
    SessionDashboard,
    DisconnectionNotice,
}

impl ConnectionStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "LOADING",
            Self::AuthorizeConnection => "AUTHORIZE_CONNECTION",
            Self::ApproveTransaction => "APPROVE_TRANSACTION",
            Self::SessionDashboard => "SESSION_DASHBOARD",
            Self::DisconnectionNotice => "DISCONNECTION_NOTICE",
        }
    }
}

impl std::fmt::Display for ConnectionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step-change notification: `{ name, data?, error? }`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepChange {
    pub name: ConnectionStep,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StepChange {
    pub fn new(name: ConnectionStep) -> Self {
        Self {
            name,
            data: None,
            error: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: Option<String>) -> Self {
        self.error = error;
        self
    }
}

impl From<ConnectionStep> for StepChange {
    fn from(name: ConnectionStep) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_names_match_wire_format() {
        let json = serde_json::to_string(&ConnectionStep::AuthorizeConnection).unwrap();
        assert_eq!(json, "\"AUTHORIZE_CONNECTION\"");
        for step in [
            ConnectionStep::Loading,
            ConnectionStep::AuthorizeConnection,
            ConnectionStep::ApproveTransaction,
            ConnectionStep::SessionDashboard,
            ConnectionStep::DisconnectionNotice,
        ] {
            let wire = serde_json::to_value(step).unwrap();
            assert_eq!(wire, Value::String(step.as_str().into()));
        }
    }

    #[test]
    fn step_change_omits_empty_fields() {
        let change = StepChange::new(ConnectionStep::SessionDashboard);
        let json = serde_json::to_string(&change).unwrap();
        assert_eq!(json, r#"{"name":"SESSION_DASHBOARD"}"#);
    }

    #[test]
    fn step_change_carries_data_and_error() {
        let change = StepChange::new(ConnectionStep::DisconnectionNotice)
            .with_data(serde_json::json!({"message": "Session Rejected"}))
            .with_error(Some("boom".into()));
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["data"]["message"], "Session Rejected");
        assert_eq!(json["error"], "boom");
    }
}
