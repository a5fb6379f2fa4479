//! Feature registry (spec.md §4.3, C3): typed collections of tool,
//! resource, prompt, and completion specs, dispatched to by method name.
//!
//! Grounded on the teacher's builder-style `ToolDefinition` (formerly
//! `tools/mod.rs`) for the definition shape, generalized to the four
//! feature kinds spec.md names and keyed the way spec.md §4.3 specifies:
//! tools stay in registration order, resources/prompts are unique maps,
//! resource templates stay ordered, completions key on a tagged
//! `CompleteReference`.

use crate::bridge::AsyncHandlerFn;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A declarative tool definition (spec.md §3 FeatureSpec `definition`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
        }
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// A tool's definition paired with the handler that executes it.
pub struct ToolSpec {
    pub definition: ToolDefinition,
    pub handler: AsyncHandlerFn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

pub struct ResourceSpec {
    pub definition: ResourceDefinition,
    pub handler: AsyncHandlerFn,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateDefinition {
    pub uri_template: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

pub struct PromptSpec {
    pub definition: PromptDefinition,
    pub handler: AsyncHandlerFn,
}

/// A completion target: either a prompt name or a resource URI
/// (spec.md §3's `CompleteReference`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompleteReference {
    PromptRef(String),
    ResourceRef(String),
}

pub struct CompletionSpec {
    pub handler: AsyncHandlerFn,
}

/// Typed, per-kind registries of tool/resource/prompt/completion specs
/// (spec.md §4.3, C3). Built once at server construction and shared by
/// every session of the same server (read-only in the stateless case;
/// `tokio::sync::RwLock`-guarded for mutation in the stateful case).
#[derive(Default)]
pub struct FeatureRegistry {
    tools: RwLock<Vec<ToolSpec>>,
    resources: RwLock<HashMap<String, ResourceSpec>>,
    resource_templates: RwLock<Vec<ResourceTemplateDefinition>>,
    prompts: RwLock<HashMap<String, PromptSpec>>,
    completions: RwLock<HashMap<CompleteReference, CompletionSpec>>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn list_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .await
            .iter()
            .map(|spec| spec.definition.clone())
            .collect()
    }

    pub async fn find_tool(&self, name: &str) -> Option<(ToolDefinition, AsyncHandlerFn)> {
        self.tools
            .read()
            .await
            .iter()
            .find(|spec| spec.definition.name == name)
            .map(|spec| (spec.definition.clone(), spec.handler.clone()))
    }

    /// Appends a tool, preserving registration order (spec.md §4.3:
    /// iteration order is registration order, observed via `tools/list`).
    /// Rejects a duplicate name before the session opens (Testable
    /// Property 6).
    pub async fn register_tool(&self, spec: ToolSpec) -> Result<()> {
        let mut tools = self.tools.write().await;
        if tools.iter().any(|t| t.definition.name == spec.definition.name) {
            return Err(Error::registration(format!(
                "duplicate tool name: {}",
                spec.definition.name
            )));
        }
        tools.push(spec);
        Ok(())
    }

    /// Atomically replaces the tool list (the stateful server's
    /// mutate-and-notify path, spec.md §4.3). Returns the new
    /// definitions so the caller can decide whether to broadcast
    /// `notifications/tools/list_changed`.
    pub async fn replace_tools(&self, specs: Vec<ToolSpec>) -> Result<Vec<ToolDefinition>> {
        let mut seen = std::collections::HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.definition.name.clone()) {
                return Err(Error::registration(format!(
                    "duplicate tool name in replacement set: {}",
                    spec.definition.name
                )));
            }
        }
        let definitions = specs.iter().map(|s| s.definition.clone()).collect();
        let mut tools = self.tools.write().await;
        *tools = specs;
        Ok(definitions)
    }

    pub async fn list_resource_definitions(&self) -> Vec<ResourceDefinition> {
        self.resources
            .read()
            .await
            .values()
            .map(|spec| spec.definition.clone())
            .collect()
    }

    pub async fn find_resource(&self, uri: &str) -> Option<(ResourceDefinition, AsyncHandlerFn)> {
        self.resources
            .read()
            .await
            .get(uri)
            .map(|spec| (spec.definition.clone(), spec.handler.clone()))
    }

    pub async fn register_resource(&self, spec: ResourceSpec) -> Result<()> {
        let mut resources = self.resources.write().await;
        if resources.contains_key(&spec.definition.uri) {
            return Err(Error::registration(format!(
                "duplicate resource uri: {}",
                spec.definition.uri
            )));
        }
        resources.insert(spec.definition.uri.clone(), spec);
        Ok(())
    }

    pub async fn list_resource_templates(&self) -> Vec<ResourceTemplateDefinition> {
        self.resource_templates.read().await.clone()
    }

    pub async fn register_resource_template(&self, template: ResourceTemplateDefinition) {
        self.resource_templates.write().await.push(template);
    }

    pub async fn list_prompt_definitions(&self) -> Vec<PromptDefinition> {
        self.prompts
            .read()
            .await
            .values()
            .map(|spec| spec.definition.clone())
            .collect()
    }

    pub async fn find_prompt(&self, name: &str) -> Option<(PromptDefinition, AsyncHandlerFn)> {
        self.prompts
            .read()
            .await
            .get(name)
            .map(|spec| (spec.definition.clone(), spec.handler.clone()))
    }

    pub async fn register_prompt(&self, spec: PromptSpec) -> Result<()> {
        let mut prompts = self.prompts.write().await;
        if prompts.contains_key(&spec.definition.name) {
            return Err(Error::registration(format!(
                "duplicate prompt name: {}",
                spec.definition.name
            )));
        }
        prompts.insert(spec.definition.name.clone(), spec);
        Ok(())
    }

    pub async fn find_completion(&self, reference: &CompleteReference) -> Option<AsyncHandlerFn> {
        self.completions
            .read()
            .await
            .get(reference)
            .map(|spec| spec.handler.clone())
    }

    pub async fn register_completion(&self, reference: CompleteReference, spec: CompletionSpec) -> Result<()> {
        let mut completions = self.completions.write().await;
        if completions.contains_key(&reference) {
            return Err(Error::registration(format!(
                "duplicate completion reference: {:?}",
                reference
            )));
        }
        completions.insert(reference, spec);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::from_sync;
    use serde_json::json;
    use std::sync::Arc;

    fn noop_handler() -> AsyncHandlerFn {
        from_sync(Some(Arc::new(|_ctx, args| Ok(args))), true, 1).unwrap()
    }

    #[tokio::test]
    async fn tools_preserve_registration_order() {
        let registry = FeatureRegistry::new();
        for name in ["b", "a", "c"] {
            registry
                .register_tool(ToolSpec {
                    definition: ToolDefinition::new(name, "d", json!({"type": "object"})),
                    handler: noop_handler(),
                })
                .await
                .unwrap();
        }
        let names: Vec<String> = registry
            .list_tool_definitions()
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn duplicate_tool_name_rejected() {
        let registry = FeatureRegistry::new();
        registry
            .register_tool(ToolSpec {
                definition: ToolDefinition::new("echo", "d", json!({"type": "object"})),
                handler: noop_handler(),
            })
            .await
            .unwrap();
        let result = registry
            .register_tool(ToolSpec {
                definition: ToolDefinition::new("echo", "d2", json!({"type": "object"})),
                handler: noop_handler(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn duplicate_resource_uri_rejected() {
        let registry = FeatureRegistry::new();
        registry
            .register_resource(ResourceSpec {
                definition: ResourceDefinition {
                    uri: "file:///a".to_string(),
                    name: "a".to_string(),
                    description: None,
                    mime_type: None,
                },
                handler: noop_handler(),
            })
            .await
            .unwrap();
        let result = registry
            .register_resource(ResourceSpec {
                definition: ResourceDefinition {
                    uri: "file:///a".to_string(),
                    name: "a2".to_string(),
                    description: None,
                    mime_type: None,
                },
                handler: noop_handler(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn replace_tools_swaps_atomically() {
        let registry = FeatureRegistry::new();
        registry
            .register_tool(ToolSpec {
                definition: ToolDefinition::new("old", "d", json!({"type": "object"})),
                handler: noop_handler(),
            })
            .await
            .unwrap();

        let new_defs = registry
            .replace_tools(vec![ToolSpec {
                definition: ToolDefinition::new("new", "d", json!({"type": "object"})),
                handler: noop_handler(),
            }])
            .await
            .unwrap();

        assert_eq!(new_defs.len(), 1);
        assert_eq!(new_defs[0].name, "new");
        assert!(registry.find_tool("old").await.is_none());
        assert!(registry.find_tool("new").await.is_some());
    }

    #[tokio::test]
    async fn completions_key_on_tagged_reference() {
        let registry = FeatureRegistry::new();
        registry
            .register_completion(
                CompleteReference::PromptRef("greeting".to_string()),
                CompletionSpec {
                    handler: noop_handler(),
                },
            )
            .await
            .unwrap();
        assert!(registry
            .find_completion(&CompleteReference::PromptRef("greeting".to_string()))
            .await
            .is_some());
        assert!(registry
            .find_completion(&CompleteReference::ResourceRef("greeting".to_string()))
            .await
            .is_none());
    }
}
