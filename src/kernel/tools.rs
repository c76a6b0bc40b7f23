//! Named, id-correlated function calls from the remote service.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub result: Value,
}

/// Handlers run inline on the controller loop and must not block.
pub type ToolHandler = Arc<dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync>;

#[derive(Default, Clone)]
pub struct ToolCallDispatcher {
    handlers: HashMap<String, ToolHandler>,
}

impl ToolCallDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any handler already registered under `name`.
    pub fn register_handler<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
    }

    pub fn has_handler(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// One response per request, in request order. Never fails.
    pub fn dispatch(&self, requests: &[ToolCallRequest]) -> Vec<ToolCallResponse> {
        requests.iter().map(|request| self.call(request)).collect()
    }

    fn call(&self, request: &ToolCallRequest) -> ToolCallResponse {
        let result = match self.handlers.get(&request.name) {
            Some(handler) => match handler(&request.args) {
                Ok(value) => {
                    debug!("Tool {} ({}) ok", request.name, request.id);
                    value
                }
                Err(e) => {
                    warn!("Tool {} ({}) failed: {:#}", request.name, request.id, e);
                    json!({ "error": e.to_string() })
                }
            },
            None => {
                warn!("Unknown function requested: {}", request.name);
                json!({ "error": format!("Unknown function: {}", request.name) })
            }
        };
        ToolCallResponse { id: request.id.clone(), name: request.name.clone(), result }
    }
}

impl std::fmt::Debug for ToolCallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("ToolCallDispatcher").field("handlers", &names).finish()
    }
}
