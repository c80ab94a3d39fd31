use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::{CapabilitySubset, SharedHandler, ToolError, ToolHandler, ToolSpec};
use crate::core::realtime::ToolDef;

/// A tool and its handler.
#[derive(Clone)]
pub struct RegisteredTool {
    spec: ToolSpec,
    handler: SharedHandler,
}

impl RegisteredTool {
    pub fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn subset(&self) -> CapabilitySubset {
        self.spec.subset
    }

    pub fn handler(&self) -> SharedHandler {
        self.handler.clone()
    }

    fn to_def(&self) -> ToolDef {
        ToolDef {
            tool_type: "function".to_string(),
            name: self.spec.name.clone(),
            description: Some(self.spec.description.clone()),
            parameters: Some(self.spec.parameters.clone()),
        }
    }
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// Exported description of one tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub subset: CapabilitySubset,
}

/// Immutable table of tools, shared by all sessions.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Look a tool up by name, regardless of subset.
    pub fn resolve(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|i| &self.tools[*i])
    }

    /// Look a tool up by name, only if it belongs to `subset`.
    pub fn resolve_in(&self, name: &str, subset: CapabilitySubset) -> Option<&RegisteredTool> {
        self.resolve(name).filter(|t| t.subset() == subset)
    }

    /// Tool definitions for a session setup message, in registration order.
    pub fn definitions(&self, subset: CapabilitySubset) -> Vec<ToolDef> {
        self.tools
            .iter()
            .filter(|t| t.subset() == subset)
            .map(RegisteredTool::to_def)
            .collect()
    }

    /// Names in a subset, in registration order.
    pub fn names(&self, subset: CapabilitySubset) -> Vec<&str> {
        self.tools
            .iter()
            .filter(|t| t.subset() == subset)
            .map(RegisteredTool::name)
            .collect()
    }

    /// Read-only schema listing for introspection.
    pub fn schema(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|t| ToolSchema {
                name: t.spec.name.clone(),
                description: t.spec.description.clone(),
                parameters: t.spec.parameters.clone(),
                subset: t.spec.subset,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistryBuilder {
    /// Add a tool. Names are unique across both subsets.
    pub fn register(
        mut self,
        spec: ToolSpec,
        handler: impl ToolHandler + 'static,
    ) -> Result<Self, ToolError> {
        self.push(spec, Arc::new(handler))?;
        Ok(self)
    }

    /// Add a tool with an already shared handler.
    pub fn register_shared(mut self, spec: ToolSpec, handler: SharedHandler) -> Result<Self, ToolError> {
        self.push(spec, handler)?;
        Ok(self)
    }

    fn push(&mut self, spec: ToolSpec, handler: SharedHandler) -> Result<(), ToolError> {
        if self.index.contains_key(&spec.name) {
            return Err(ToolError::DuplicateName(spec.name));
        }
        self.index.insert(spec.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool { spec, handler });
        Ok(())
    }

    pub fn build(self) -> ToolRegistry {
        tracing::debug!(tools = self.tools.len(), "Tool registry built");
        ToolRegistry {
            tools: self.tools,
            index: self.index,
        }
    }
}
