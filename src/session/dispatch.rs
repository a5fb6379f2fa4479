//! Registry-backed method dispatch shared by the stateful [`super::Session`]
//! and the stateless server (spec.md §4.5's dispatch table, minus the
//! handshake/state-machine concerns that only apply to a persistent
//! session).

use crate::error::{Error, Result};
use crate::protocol::{ContentBlock, ToolCallResult};
use crate::registry::{CompleteReference, FeatureRegistry};
use crate::transport::TransportContext;
use crate::validation::SchemaValidator;
use serde_json::{json, Value};

/// Dispatch one already-gated request to the feature registry. `ping` and
/// the four feature families are handled here; `initialize` and
/// `logging/setLevel` are session-local and handled by the caller before
/// reaching this function.
pub async fn dispatch(
    registry: &FeatureRegistry,
    validator: &SchemaValidator,
    ctx: &TransportContext,
    method: &str,
    params: Option<Value>,
) -> Result<Value> {
    match method {
        "ping" => Ok(json!({})),
        "tools/list" => {
            let tools = registry.list_tool_definitions().await;
            Ok(json!({ "tools": tools }))
        }
        "tools/call" => call_tool(registry, validator, ctx, params).await,
        "resources/list" => {
            let resources = registry.list_resource_definitions().await;
            Ok(json!({ "resources": resources }))
        }
        "resources/templates/list" => {
            let templates = registry.list_resource_templates().await;
            Ok(json!({ "resourceTemplates": templates }))
        }
        "resources/read" => read_resource(registry, ctx, params).await,
        "prompts/list" => {
            let prompts = registry.list_prompt_definitions().await;
            Ok(json!({ "prompts": prompts }))
        }
        "prompts/get" => get_prompt(registry, ctx, params).await,
        "completion/complete" => complete(registry, ctx, params).await,
        _ => Err(Error::MethodNotFound(method.to_string())),
    }
}

async fn call_tool(
    registry: &FeatureRegistry,
    validator: &SchemaValidator,
    ctx: &TransportContext,
    params: Option<Value>,
) -> Result<Value> {
    let params = params.ok_or_else(|| Error::invalid_params("tools/call requires params"))?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_params("tools/call requires a string `name`"))?;
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    let (definition, handler) = registry
        .find_tool(name)
        .await
        .ok_or_else(|| Error::not_found(format!("unknown tool: {}", name)))?;

    // A handler failure (spec.md §7 "Handler failure (tool)") never
    // becomes a JSON-RPC error — it is reported via the tool-result
    // channel with `isError: true`.
    let raw = match handler(ctx.clone(), arguments).await {
        Ok(raw) => raw,
        Err(e) => {
            return Ok(serde_json::to_value(ToolCallResult {
                content: vec![ContentBlock::text(e.to_string())],
                structured_content: None,
                is_error: true,
            })?)
        }
    };

    let mut result: ToolCallResult = serde_json::from_value(raw).unwrap_or_default();

    if let (Some(schema), Some(structured)) =
        (&definition.output_schema, result.structured_content.clone())
    {
        let validation = validator.validate(schema, &structured);
        if !validation.is_valid() {
            return Ok(serde_json::to_value(ToolCallResult {
                content: vec![ContentBlock::text(validation.to_string())],
                structured_content: None,
                is_error: true,
            })?);
        }
    }

    result.is_error = false;
    Ok(serde_json::to_value(result)?)
}

async fn read_resource(
    registry: &FeatureRegistry,
    ctx: &TransportContext,
    params: Option<Value>,
) -> Result<Value> {
    let uri = params
        .as_ref()
        .and_then(|p| p.get("uri"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_params("resources/read requires a string `uri`"))?;

    let (_, handler) = registry
        .find_resource(uri)
        .await
        .ok_or_else(|| Error::not_found(format!("unknown resource: {}", uri)))?;

    // Handler failure on a non-tool path surfaces as a protocol error
    // (spec.md §7's "Handler failure (non-tool)" row), unlike tools/call.
    handler(ctx.clone(), json!({ "uri": uri })).await
}

async fn get_prompt(
    registry: &FeatureRegistry,
    ctx: &TransportContext,
    params: Option<Value>,
) -> Result<Value> {
    let params = params.ok_or_else(|| Error::invalid_params("prompts/get requires params"))?;
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_params("prompts/get requires a string `name`"))?;
    let arguments = params.get("arguments").cloned().unwrap_or(json!({}));

    let (_, handler) = registry
        .find_prompt(name)
        .await
        .ok_or_else(|| Error::not_found(format!("unknown prompt: {}", name)))?;

    handler(ctx.clone(), arguments).await
}

async fn complete(
    registry: &FeatureRegistry,
    ctx: &TransportContext,
    params: Option<Value>,
) -> Result<Value> {
    let params = params.ok_or_else(|| Error::invalid_params("completion/complete requires params"))?;
    let reference = parse_complete_reference(&params)?;

    let handler = registry
        .find_completion(&reference)
        .await
        .ok_or_else(|| Error::not_found(format!("no completion registered for {:?}", reference)))?;

    handler(ctx.clone(), params).await
}

fn parse_complete_reference(params: &Value) -> Result<CompleteReference> {
    let reference = params
        .get("ref")
        .ok_or_else(|| Error::invalid_params("completion/complete requires a `ref`"))?;
    let kind = reference
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::invalid_params("completion `ref` requires a `type`"))?;

    match kind {
        "ref/prompt" => {
            let name = reference
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::invalid_params("ref/prompt requires `name`"))?;
            Ok(CompleteReference::PromptRef(name.to_string()))
        }
        "ref/resource" => {
            let uri = reference
                .get("uri")
                .and_then(Value::as_str)
                .ok_or_else(|| Error::invalid_params("ref/resource requires `uri`"))?;
            Ok(CompleteReference::ResourceRef(uri.to_string()))
        }
        other => Err(Error::invalid_params(format!("unknown ref type: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::from_sync;
    use crate::registry::{ResourceDefinition, ResourceSpec, ToolDefinition, ToolSpec};
    use std::sync::Arc;

    fn ctx() -> TransportContext {
        TransportContext::new("test")
    }

    #[tokio::test]
    async fn tool_call_success_passes_content_through() {
        let registry = FeatureRegistry::new();
        registry
            .register_tool(ToolSpec {
                definition: ToolDefinition::new(
                    "echo",
                    "echoes msg",
                    json!({"type":"object","properties":{"msg":{"type":"string"}},"required":["msg"]}),
                ),
                handler: from_sync(
                    Some(Arc::new(|_ctx, args| {
                        let msg = args["msg"].as_str().unwrap_or_default().to_string();
                        Ok(json!({ "content": [{"type": "text", "text": msg}] }))
                    })),
                    true,
                    1,
                )
                .unwrap(),
            })
            .await
            .unwrap();

        let validator = SchemaValidator::new();
        let result = dispatch(
            &registry,
            &validator,
            &ctx(),
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"msg": "hi"}})),
        )
        .await
        .unwrap();

        let call_result: ToolCallResult = serde_json::from_value(result).unwrap();
        assert!(!call_result.is_error);
        assert_eq!(call_result.content[0].text.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn tool_call_output_schema_violation_is_tool_error() {
        let registry = FeatureRegistry::new();
        registry
            .register_tool(ToolSpec {
                definition: ToolDefinition::new(
                    "count",
                    "counts",
                    json!({"type": "object"}),
                )
                .with_output_schema(json!({
                    "type": "object",
                    "properties": {"n": {"type": "integer"}},
                    "required": ["n"]
                })),
                handler: from_sync(
                    Some(Arc::new(|_ctx, _args| {
                        Ok(json!({ "structuredContent": {"n": "five"} }))
                    })),
                    true,
                    1,
                )
                .unwrap(),
            })
            .await
            .unwrap();

        let validator = SchemaValidator::new();
        let result = dispatch(
            &registry,
            &validator,
            &ctx(),
            "tools/call",
            Some(json!({"name": "count", "arguments": {}})),
        )
        .await
        .unwrap();

        let call_result: ToolCallResult = serde_json::from_value(result).unwrap();
        assert!(call_result.is_error);
        assert!(call_result.content[0]
            .text
            .as_deref()
            .unwrap()
            .starts_with("Validation failed: structuredContent does not match tool outputSchema"));
    }

    #[tokio::test]
    async fn tool_not_found_is_protocol_error() {
        let registry = FeatureRegistry::new();
        let validator = SchemaValidator::new();
        let result = dispatch(
            &registry,
            &validator,
            &ctx(),
            "tools/call",
            Some(json!({"name": "missing"})),
        )
        .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn resource_read_dispatches_to_handler() {
        let registry = FeatureRegistry::new();
        registry
            .register_resource(ResourceSpec {
                definition: ResourceDefinition {
                    uri: "mem://a".to_string(),
                    name: "a".to_string(),
                    description: None,
                    mime_type: None,
                },
                handler: from_sync(
                    Some(Arc::new(|_ctx, _args| Ok(json!({"contents": [{"uri": "mem://a", "text": "hi"}]})))),
                    true,
                    1,
                )
                .unwrap(),
            })
            .await
            .unwrap();

        let validator = SchemaValidator::new();
        let result = dispatch(
            &registry,
            &validator,
            &ctx(),
            "resources/read",
            Some(json!({"uri": "mem://a"})),
        )
        .await
        .unwrap();
        assert_eq!(result["contents"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let registry = FeatureRegistry::new();
        let validator = SchemaValidator::new();
        let result = dispatch(&registry, &validator, &ctx(), "foo/bar", None).await;
        assert!(matches!(result, Err(Error::MethodNotFound(_))));
    }
}
