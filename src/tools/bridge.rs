//! Function-call protocol between registered tools and a provider session.
//!
//! A finished function-call item runs the matching tool and feeds its output
//! back as a function-output item. A finished response that produced any
//! function call starts exactly one new response so the model can use the
//! results.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::{ToolArgs, ToolContext, ToolError, ToolRegistry};
use crate::error::{Error, Result};
use crate::provider::{ConversationItem, FunctionDescriptor, ProviderUpdate, SessionCommands};

pub const INVALID_JSON_OUTPUT: &str = "Invalid JSON";
pub const TOOL_ERROR_OUTPUT: &str = "Error calling tool";

pub struct ToolBridge {
    registry: Arc<ToolRegistry>,
    detailed_errors: bool,
    services: Option<Arc<dyn Any + Send + Sync>>,
    // Streamed argument text per item id, used when the finished item omits it.
    arguments: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for ToolBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBridge")
            .field("registry", &self.registry)
            .field("detailed_errors", &self.detailed_errors)
            .finish_non_exhaustive()
    }
}

impl ToolBridge {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            detailed_errors: false,
            services: None,
            arguments: Mutex::new(HashMap::new()),
        }
    }

    /// Append the failure message to tool error outputs.
    #[must_use]
    pub const fn with_detailed_errors(mut self, detailed_errors: bool) -> Self {
        self.detailed_errors = detailed_errors;
        self
    }

    #[must_use]
    pub fn with_services(mut self, services: Arc<dyn Any + Send + Sync>) -> Self {
        self.services = Some(services);
        self
    }

    /// Fresh bridge over the same tools and services with its own argument
    /// buffer. Each call gets one so streamed arguments never cross calls.
    #[must_use]
    pub fn for_call(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            detailed_errors: self.detailed_errors,
            services: self.services.clone(),
            arguments: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn descriptors(&self) -> Vec<FunctionDescriptor> {
        self.registry.descriptors()
    }

    /// React to one provider update. Every update passes through here.
    ///
    /// # Errors
    /// Returns `Error::Cancelled` when a tool run is cancelled, or the
    /// session's error when an output or continuation cannot be sent.
    pub async fn handle_update(
        &self,
        update: &ProviderUpdate,
        commands: &dyn SessionCommands,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match update {
            ProviderUpdate::PartDelta {
                item_id: Some(item_id),
                function_arguments: Some(delta),
                ..
            } => {
                self.arguments
                    .lock()
                    .entry(item_id.clone())
                    .or_default()
                    .push_str(delta);
            }
            ProviderUpdate::ItemFinished { item, .. } => {
                let streamed = item
                    .item_id
                    .as_ref()
                    .and_then(|id| self.arguments.lock().remove(id));
                let Some(name) = item.function_name() else {
                    return Ok(());
                };
                let arguments = item
                    .arguments
                    .clone()
                    .filter(|args| !args.is_empty())
                    .or(streamed)
                    .unwrap_or_default();
                let call_id = item.call_id.clone().unwrap_or_default();
                if let Some(output) = self.call(name, &call_id, &arguments, cancel).await? {
                    commands
                        .add_item(ConversationItem::FunctionOutput { call_id, output })
                        .await?;
                }
            }
            ProviderUpdate::ResponseFinished { items, .. } => {
                // Items of a finished response never stream again.
                self.arguments.lock().clear();
                let calls = items.iter().filter(|item| item.function_name().is_some()).count();
                if calls > 0 {
                    tracing::debug!(calls, "Response produced function calls, continuing");
                    commands.start_response().await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Run tool `name` with JSON `arguments` and return the function output.
    ///
    /// `None` when no tool has that exact name.
    ///
    /// # Errors
    /// Only cancellation is reported as an error; every other failure becomes
    /// a textual output.
    pub async fn call(
        &self,
        name: &str,
        call_id: &str,
        arguments: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>> {
        let Some(handler) = self.registry.handler(name) else {
            tracing::debug!(tool = name, call_id, "No tool registered under this name");
            return Ok(None);
        };
        let args = match serde_json::from_str::<ToolArgs>(arguments) {
            Ok(args) => args,
            Err(err) => {
                tracing::warn!(tool = name, call_id, "Tool arguments are not a JSON object: {err}");
                return Ok(Some(INVALID_JSON_OUTPUT.to_string()));
            }
        };

        let ctx = ToolContext::new(call_id, cancel.child_token()).with_services(self.services.clone());
        let invocation = AssertUnwindSafe(handler(args, ctx)).catch_unwind();
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = invocation => outcome,
        };

        let output = match outcome {
            Ok(Ok(value)) => match serde_json::to_string(&value) {
                Ok(json) => json,
                Err(err) => self.error_output(name, &err.to_string()),
            },
            Ok(Err(ToolError::InvalidArguments(message))) => {
                tracing::warn!(tool = name, call_id, "Tool rejected its arguments: {message}");
                INVALID_JSON_OUTPUT.to_string()
            }
            Ok(Err(ToolError::Cancelled)) => return Err(Error::Cancelled),
            Ok(Err(ToolError::Failed(message))) => self.error_output(name, &message),
            Err(panic) => self.error_output(name, &panic_message(panic.as_ref())),
        };
        tracing::debug!(tool = name, call_id, "Tool call finished");
        Ok(Some(output))
    }

    fn error_output(&self, tool: &str, message: &str) -> String {
        tracing::error!(tool, "Tool call failed: {message}");
        if self.detailed_errors {
            format!("{TOOL_ERROR_OUTPUT}: {message}")
        } else {
            TOOL_ERROR_OUTPUT.to_string()
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo;
    use crate::tools::ToolResult;
    use crate::provider::FinishedItem;
    use crate::provider::testing::{Recorded, recording_commands};
    use serde_json::{Value, json};

    async fn boom(_args: ToolArgs, _ctx: ToolContext) -> ToolResult<Value> {
        panic!("boom")
    }

    fn bridge(detailed: bool) -> ToolBridge {
        let mut registry = ToolRegistry::new();
        demo::register(&mut registry);
        registry.function(
            "Explode",
            "Always fails",
            &json!({"type": "object"}),
            |_args, _ctx| async { Err::<Value, _>(ToolError::failed("database password leaked")) },
        );
        registry.function("Panics", "Panics", &json!({"type": "object"}), boom);
        registry.function(
            "Hangs",
            "Never returns",
            &json!({"type": "object"}),
            |_args, _ctx| async {
                futures::future::pending::<()>().await;
                Ok::<_, ToolError>(Value::Null)
            },
        );
        ToolBridge::new(Arc::new(registry)).with_detailed_errors(detailed)
    }

    fn function_item(name: &str, arguments: &str) -> FinishedItem {
        FinishedItem {
            item_id: Some("item_1".to_string()),
            function_name: Some(name.to_string()),
            call_id: Some("call_1".to_string()),
            arguments: Some(arguments.to_string()),
        }
    }

    #[tokio::test]
    async fn room_capacity_output_and_single_continuation() {
        let bridge = bridge(false);
        let (commands, mut recorded) = recording_commands();
        let cancel = CancellationToken::new();
        let item = function_item("GetRoomCapacity", r#"{"roomType":"NorthAtlantisLawn"}"#);

        let finished = ProviderUpdate::ItemFinished {
            output_index: 0,
            item: item.clone(),
        };
        bridge.handle_update(&finished, commands.as_ref(), &cancel).await.unwrap();
        let response = ProviderUpdate::ResponseFinished {
            response_id: Some("resp_1".to_string()),
            items: vec![item],
            usage: None,
        };
        bridge.handle_update(&response, commands.as_ref(), &cancel).await.unwrap();

        assert_eq!(
            recorded.try_recv().unwrap(),
            Recorded::Item(ConversationItem::FunctionOutput {
                call_id: "call_1".to_string(),
                output: "450".to_string(),
            })
        );
        assert_eq!(recorded.try_recv().unwrap(), Recorded::StartResponse);
        assert!(recorded.try_recv().is_err());
    }

    #[tokio::test]
    async fn response_without_function_calls_does_not_continue() {
        let bridge = bridge(false);
        let (commands, mut recorded) = recording_commands();
        let response = ProviderUpdate::ResponseFinished {
            response_id: None,
            items: vec![FinishedItem::default(), FinishedItem {
                function_name: Some(String::new()),
                ..FinishedItem::default()
            }],
            usage: None,
        };
        bridge
            .handle_update(&response, commands.as_ref(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(recorded.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistered_tool_produces_no_output() {
        let bridge = bridge(false);
        let (commands, mut recorded) = recording_commands();
        let finished = ProviderUpdate::ItemFinished {
            output_index: 0,
            item: function_item("DoesNotExist", "{}"),
        };
        bridge
            .handle_update(&finished, commands.as_ref(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(recorded.try_recv().is_err());
    }

    #[tokio::test]
    async fn malformed_arguments_yield_invalid_json() {
        let bridge = bridge(false);
        let cancel = CancellationToken::new();
        let output = bridge.call("GetRoomCapacity", "c", "{not json", &cancel).await.unwrap();
        assert_eq!(output.as_deref(), Some(INVALID_JSON_OUTPUT));

        let output = bridge.call("GetRoomCapacity", "c", r#"{"roomType":"Moon"}"#, &cancel).await.unwrap();
        assert_eq!(output.as_deref(), Some(INVALID_JSON_OUTPUT));
    }

    #[tokio::test]
    async fn failures_hide_details_unless_enabled() {
        let cancel = CancellationToken::new();

        let quiet = bridge(false).call("Explode", "c", "{}", &cancel).await.unwrap().unwrap();
        assert_eq!(quiet, TOOL_ERROR_OUTPUT);
        assert!(!quiet.contains("password"));

        let detailed = bridge(true).call("Explode", "c", "{}", &cancel).await.unwrap().unwrap();
        assert_eq!(detailed, "Error calling tool: database password leaked");

        let shuttle = bridge(true)
            .call("GetRoomCapacity", "c", r#"{"roomType":"ShuttleSimulator"}"#, &cancel)
            .await
            .unwrap();
        assert_eq!(shuttle.as_deref(), Some("Error calling tool: No longer available"));
    }

    #[tokio::test]
    async fn panics_are_converted_to_error_output() {
        let output = bridge(false)
            .call("Panics", "c", "{}", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.as_deref(), Some(TOOL_ERROR_OUTPUT));
    }

    #[tokio::test]
    async fn cancellation_propagates() {
        let bridge = bridge(true);
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            bridge.call("Hangs", "c", "{}", &cancel),
        )
        .await
        .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn streamed_arguments_fill_in_missing_ones() {
        let bridge = bridge(false);
        let (commands, mut recorded) = recording_commands();
        let cancel = CancellationToken::new();
        for piece in [r#"{"roomType":"#, r#""VehicleAssemblyBuilding"}"#] {
            let delta = ProviderUpdate::PartDelta {
                item_id: Some("item_1".to_string()),
                output_index: 0,
                content_index: 0,
                audio: None,
                transcript: None,
                text: None,
                function_arguments: Some(piece.to_string()),
            };
            bridge.handle_update(&delta, commands.as_ref(), &cancel).await.unwrap();
        }
        let mut item = function_item("GetRoomCapacity", "");
        item.arguments = None;
        let finished = ProviderUpdate::ItemFinished { output_index: 0, item };
        bridge.handle_update(&finished, commands.as_ref(), &cancel).await.unwrap();

        assert_eq!(
            recorded.try_recv().unwrap(),
            Recorded::Item(ConversationItem::FunctionOutput {
                call_id: "call_1".to_string(),
                output: "12000".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn finished_response_drops_unfinished_argument_streams() {
        let bridge = bridge(false);
        let (commands, mut recorded) = recording_commands();
        let cancel = CancellationToken::new();
        let delta = ProviderUpdate::PartDelta {
            item_id: Some("item_1".to_string()),
            output_index: 0,
            content_index: 0,
            audio: None,
            transcript: None,
            text: None,
            function_arguments: Some(r#"{"roomType":"NorthAtlantisLawn"}"#.to_string()),
        };
        bridge.handle_update(&delta, commands.as_ref(), &cancel).await.unwrap();
        let response = ProviderUpdate::ResponseFinished {
            response_id: Some("resp_1".to_string()),
            items: Vec::new(),
            usage: None,
        };
        bridge.handle_update(&response, commands.as_ref(), &cancel).await.unwrap();
        assert!(bridge.arguments.lock().is_empty());

        let mut item = function_item("GetRoomCapacity", "");
        item.arguments = None;
        let finished = ProviderUpdate::ItemFinished { output_index: 0, item };
        bridge.handle_update(&finished, commands.as_ref(), &cancel).await.unwrap();
        assert_eq!(
            recorded.try_recv().unwrap(),
            Recorded::Item(ConversationItem::FunctionOutput {
                call_id: "call_1".to_string(),
                output: INVALID_JSON_OUTPUT.to_string(),
            })
        );
    }

    #[tokio::test]
    async fn per_call_bridges_keep_settings_but_not_buffers() {
        let shared = bridge(true);
        let (commands, _recorded) = recording_commands();
        let delta = ProviderUpdate::PartDelta {
            item_id: Some("item_1".to_string()),
            output_index: 0,
            content_index: 0,
            audio: None,
            transcript: None,
            text: None,
            function_arguments: Some("{".to_string()),
        };
        shared
            .handle_update(&delta, commands.as_ref(), &CancellationToken::new())
            .await
            .unwrap();

        let call = shared.for_call();
        assert!(call.arguments.lock().is_empty());
        assert_eq!(call.descriptors().len(), shared.descriptors().len());
        let output = call
            .call("Explode", "c", "{}", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.as_deref(), Some("Error calling tool: database password leaked"));
    }
}
