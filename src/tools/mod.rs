//! Tool registry: named functions the model may call mid-conversation.

pub mod bridge;

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use schemars::r#gen::SchemaSettings;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::provider::FunctionDescriptor;

pub use bridge::ToolBridge;

/// Arguments of one call, keyed by parameter name.
pub type ToolArgs = Map<String, Value>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error("tool call was cancelled")]
    Cancelled,
}

impl ToolError {
    pub fn failed(message: impl std::fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

pub type ToolResult<T> = std::result::Result<T, ToolError>;

pub type ToolHandler =
    Arc<dyn Fn(ToolArgs, ToolContext) -> BoxFuture<'static, ToolResult<Value>> + Send + Sync>;

/// Request-scoped values handed to every invocation.
#[derive(Clone)]
pub struct ToolContext {
    call_id: String,
    cancel: CancellationToken,
    services: Option<Arc<dyn Any + Send + Sync>>,
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("call_id", &self.call_id)
            .field("has_services", &self.services.is_some())
            .finish_non_exhaustive()
    }
}

impl ToolContext {
    #[must_use]
    pub fn new(call_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            call_id: call_id.into(),
            cancel,
            services: None,
        }
    }

    #[must_use]
    pub fn with_services(mut self, services: Option<Arc<dyn Any + Send + Sync>>) -> Self {
        self.services = services;
        self
    }

    #[must_use]
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Resolve the service container registered for the session, if it has type `T`.
    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.services.clone().and_then(|services| services.downcast::<T>().ok())
    }
}

/// Parameter schema reduced to `{type, properties, required}`. Anything else
/// in the source schema is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSchema {
    pub kind: String,
    pub properties: Map<String, Value>,
    pub required: Vec<String>,
}

impl ParameterSchema {
    #[must_use]
    pub fn from_json(schema: &Value) -> Self {
        let kind = schema
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("object")
            .to_string();
        let properties = schema
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let required = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            kind,
            properties,
            required,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "type": self.kind,
            "properties": self.properties,
            "required": self.required,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    pub parameters: ParameterSchema,
}

impl ToolDefinition {
    #[must_use]
    pub fn descriptor(&self) -> FunctionDescriptor {
        FunctionDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.to_json(),
        }
    }
}

/// A tool found by an external discovery mechanism.
#[derive(Clone)]
pub struct ToolRecord {
    pub name: String,
    pub description: Option<String>,
    pub schema: Value,
    pub invoke: ToolHandler,
}

impl std::fmt::Debug for ToolRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRecord")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    defs: Vec<ToolDefinition>,
    handlers: HashMap<String, ToolHandler>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.defs.iter().map(|d| d.name.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.defs
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<FunctionDescriptor> {
        self.defs.iter().map(ToolDefinition::descriptor).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.defs.len()
    }

    /// Exact-name lookup.
    #[must_use]
    pub fn handler(&self, name: &str) -> Option<ToolHandler> {
        self.handlers.get(name).cloned()
    }

    /// Register a typed tool; its parameter schema is generated from `TArgs`.
    pub fn tool<TArgs, TResp, F, Fut>(&mut self, name: &str, description: &str, handler: F)
    where
        TArgs: DeserializeOwned + JsonSchema + Send + 'static,
        TResp: Serialize + Send + 'static,
        F: Fn(TArgs, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<TResp>> + Send + 'static,
    {
        let schema = SchemaSettings::draft07()
            .with(|settings| settings.inline_subschemas = true)
            .into_generator()
            .into_root_schema_for::<TArgs>();
        let schema = serde_json::to_value(schema).unwrap_or_else(|_| json!({}));

        let user_handler = Arc::new(handler);
        let handler: ToolHandler = Arc::new(
            move |args: ToolArgs, ctx: ToolContext| -> BoxFuture<'static, ToolResult<Value>> {
                let user_handler = Arc::clone(&user_handler);
                Box::pin(async move {
                    let args: TArgs = serde_json::from_value(Value::Object(args))
                        .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
                    let resp = user_handler(args, ctx).await?;
                    serde_json::to_value(resp).map_err(ToolError::failed)
                })
            },
        );
        self.insert(name, Some(description), &schema, handler);
    }

    /// Register a tool that takes the raw argument map.
    pub fn function<F, Fut>(&mut self, name: &str, description: &str, schema: &Value, handler: F)
    where
        F: Fn(ToolArgs, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Value>> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(
            move |args: ToolArgs, ctx: ToolContext| -> BoxFuture<'static, ToolResult<Value>> {
                Box::pin(handler(args, ctx))
            },
        );
        self.insert(name, Some(description), schema, handler);
    }

    /// Add externally discovered tools.
    pub fn extend(&mut self, records: impl IntoIterator<Item = ToolRecord>) {
        for record in records {
            self.insert(
                &record.name,
                record.description.as_deref(),
                &record.schema,
                record.invoke,
            );
        }
    }

    fn insert(&mut self, name: &str, description: Option<&str>, schema: &Value, handler: ToolHandler) {
        let definition = ToolDefinition {
            name: name.to_string(),
            description: description.filter(|d| !d.is_empty()).map(str::to_string),
            parameters: ParameterSchema::from_json(schema),
        };
        if self.handlers.insert(name.to_string(), handler).is_some() {
            tracing::warn!(tool = name, "Replacing previously registered tool");
            self.defs.retain(|existing| existing.name != name);
        }
        self.defs.push(definition);
    }
}
