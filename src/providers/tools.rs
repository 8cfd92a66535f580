//! Built-in tools and the registry that dispatches model calls to them

use chrono::{Local, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::dialogue::{ToolBroker, ToolDefinition};
use crate::error::{VoiceError, VoiceResult};

/// A group of related functions the model may call
pub trait Tool: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run `function` with parsed arguments
    fn call(&self, function: &str, arguments: &Value) -> VoiceResult<String>;
}

/// Dispatches function calls to registered tools
///
/// Failures come back as result text so the model can react to them.
#[derive(Default)]
pub struct ToolRegistry {
    definitions: Vec<ToolDefinition>,
    functions: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the named built-in tools
    pub fn with_enabled(names: &[String]) -> VoiceResult<Self> {
        let mut registry = Self::new();
        for name in names {
            let tool = builtin(name)
                .ok_or_else(|| VoiceError::Config(format!("unknown tool \"{}\"", name)))?;
            registry.register(tool);
        }
        info!("Tool registry ready: {} functions", registry.functions.len());
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        for definition in tool.definitions() {
            if self.functions.contains_key(&definition.name) {
                warn!("Function {} registered twice, keeping the first", definition.name);
                continue;
            }
            self.functions.insert(definition.name.clone(), tool.clone());
            self.definitions.push(definition);
        }
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl ToolBroker for ToolRegistry {
    fn execute(&self, name: &str, arguments: &str) -> VoiceResult<String> {
        debug!("Function call {} with {}", name, arguments);
        let Some(tool) = self.functions.get(name) else {
            warn!("Unknown function: {}", name);
            return Ok(format!("Unknown function: {}", name));
        };

        let arguments: Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(arguments) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Bad arguments for {}: {}", name, e);
                    return Ok(format!("Invalid arguments for {}: {}", name, e));
                }
            }
        };

        match tool.call(name, &arguments) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("Function {} failed: {}", name, e);
                Ok(format!("Function {} failed: {}", name, e))
            }
        }
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        self.definitions.clone()
    }
}

fn builtin(name: &str) -> Option<Arc<dyn Tool>> {
    match name {
        "time" => Some(Arc::new(TimeTool)),
        _ => None,
    }
}

/// Current local time and Unix timestamp
pub struct TimeTool;

const DEFAULT_FORMAT: &str = "YYYY-MM-DD HH:mm:ss";

impl TimeTool {
    fn strftime(format: &str) -> &'static str {
        match format {
            "YYYY-MM-DD" => "%Y-%m-%d",
            "HH:mm:ss" => "%H:%M:%S",
            _ => "%Y-%m-%d %H:%M:%S",
        }
    }
}

impl Tool for TimeTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "get_current_time".to_string(),
                description: "Get the current local date and time".to_string(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "format": {
                            "type": "string",
                            "description": "One of: YYYY-MM-DD HH:mm:ss, YYYY-MM-DD, HH:mm:ss",
                            "default": DEFAULT_FORMAT,
                        }
                    },
                    "required": [],
                }),
            },
            ToolDefinition {
                name: "get_timestamp".to_string(),
                description: "Get the current Unix timestamp in seconds".to_string(),
                parameters: json!({"type": "object", "properties": {}, "required": []}),
            },
        ]
    }

    fn call(&self, function: &str, arguments: &Value) -> VoiceResult<String> {
        match function {
            "get_current_time" => {
                let format = arguments
                    .get("format")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_FORMAT);
                Ok(Local::now().format(Self::strftime(format)).to_string())
            }
            "get_timestamp" => Ok(Utc::now().timestamp().to_string()),
            other => Err(VoiceError::Tool(format!("time tool has no function {}", other))),
        }
    }
}
