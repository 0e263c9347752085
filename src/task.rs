use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub const DEFAULT_FORMAT: &str = "jpg";

/// Task envelope as posted by the object-as-a-service router.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationTask {
    pub id: String,
    #[serde(default)]
    pub func_key: Option<String>,
    #[serde(default, rename = "main", alias = "mainObj")]
    pub main_obj: ObjectData,
    /// Presigned urls of the main object's files, keyed by file name.
    #[serde(default)]
    pub main_get_keys: HashMap<String, String>,
    #[serde(default)]
    pub args: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ObjectData {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl InvocationTask {
    /// Format hint of the main object, `jpg` when absent or not a string.
    pub fn format(&self) -> &str {
        self.main_obj
            .data
            .get("format")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_FORMAT)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl TaskCompletion {
    pub fn success(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            error_msg: None,
            body: Some(body),
        }
    }

    pub fn failure(id: impl Into<String>, error_msg: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            error_msg: Some(error_msg.into()),
            body: None,
        }
    }
}
