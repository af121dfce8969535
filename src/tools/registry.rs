use jsonschema::JSONSchema;
use std::collections::HashMap;
use std::sync::Arc;

use super::ToolExecutor;
use crate::error::ErrorContext;
use crate::types::tool::ToolDefinition;
use crate::{Error, Result};

pub(crate) struct RegisteredTool {
    pub(crate) definition: ToolDefinition,
    pub(crate) executor: Arc<dyn ToolExecutor>,
    /// Compiled argument schema; `None` when the tool declares no parameters.
    pub(crate) schema: Option<JSONSchema>,
}

/// Registered tools, keyed by name, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Names are unique and the parameter schema must compile.
    pub fn register(
        &mut self,
        definition: ToolDefinition,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<()> {
        if definition.name.trim().is_empty() {
            return Err(Error::validation_with_context(
                "tool name must not be empty",
                ErrorContext::new().with_field_path("tools.name"),
            ));
        }
        if self.tools.contains_key(&definition.name) {
            return Err(Error::validation_with_context(
                format!("tool '{}' is already registered", definition.name),
                ErrorContext::new().with_field_path("tools.name"),
            ));
        }

        let schema = match &definition.parameters {
            Some(params) => Some(JSONSchema::compile(params).map_err(|e| {
                Error::validation_with_context(
                    format!("invalid parameter schema for tool '{}': {}", definition.name, e),
                    ErrorContext::new().with_field_path("tools.parameters"),
                )
            })?),
            None => None,
        };

        self.order.push(definition.name.clone());
        self.tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                executor,
                schema,
            },
        );
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_tool(
        mut self,
        definition: ToolDefinition,
        executor: Arc<dyn ToolExecutor>,
    ) -> Result<Self> {
        self.register(definition, executor)?;
        Ok(self)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Catalog advertised to models, in registration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| t.definition.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.order)
            .finish()
    }
}
