//! Wire types shared by several session operations.

pub mod params;
pub mod responses;

pub use params::*;
pub use responses::*;

use serde::{Deserialize, Serialize};

/// The session operations exposed by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Navigate,
    Observe,
    Act,
    Extract,
    Execute,
    End,
}

impl Operation {
    pub const ALL: [Operation; 7] = [
        Self::Start,
        Self::Navigate,
        Self::Observe,
        Self::Act,
        Self::Extract,
        Self::Execute,
        Self::End,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Navigate => "navigate",
            Self::Observe => "observe",
            Self::Act => "act",
            Self::Extract => "extract",
            Self::Execute => "execute",
            Self::End => "end",
        }
    }

    /// Request path relative to the API base URL.
    pub fn path(self, session_id: Option<&str>) -> String {
        let id = session_id.unwrap_or_default();
        match self {
            Self::Start => "v1/sessions/start".to_string(),
            Self::Navigate => format!("v1/sessions/{id}/navigate"),
            Self::Observe => format!("v1/sessions/{id}/observe"),
            Self::Act => format!("v1/sessions/{id}/act"),
            Self::Extract => format!("v1/sessions/{id}/extract"),
            Self::Execute => format!("v1/sessions/{id}/agentExecute"),
            Self::End => format!("v1/sessions/{id}/end"),
        }
    }

    /// Whether a streamed run of this operation must end with a result payload.
    /// Navigation may legitimately finish with `null`; act, execute and end are
    /// judged by their status rather than their payload.
    pub fn requires_result(self) -> bool {
        matches!(self, Self::Start | Self::Observe | Self::Extract)
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Action object returned by observe and accepted by act.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Human-readable description of the action
    pub description: String,
    /// CSS selector or XPath for the element
    pub selector: String,
    /// The method to execute (click, fill, etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_node_id: Option<f64>,
}

impl Action {
    pub fn new(description: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            selector: selector.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    Openai,
    Anthropic,
    Google,
    Microsoft,
}

/// Model settings for an operation. Model names always use the
/// `provider/model-name` form, e.g. `openai/gpt-4o`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelConfig {
    Name(String),
    Config(ModelConfigObject),
}

impl From<&str> for ModelConfig {
    fn from(s: &str) -> Self {
        Self::Name(s.to_string())
    }
}

impl From<String> for ModelConfig {
    fn from(s: String) -> Self {
        Self::Name(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfigObject {
    pub model_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(rename = "baseURL", default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ModelProvider>,
}

impl ModelConfigObject {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            api_key: None,
            base_url: None,
            provider: None,
        }
    }
}
