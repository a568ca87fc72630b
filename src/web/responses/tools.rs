//! Function tool declarations and the shaping of backend tool calls
//!
//! Tools are never executed here. The registry validates what the caller
//! declared and turns the backend's decision to call one into a
//! `function_call` output item; running the function and feeding the result
//! back as `function_call_output` input is the caller's job.

use crate::backend::BackendToolCall;
use crate::models::ids::{new_call_id, new_function_call_item_id};
use crate::models::responses::{ItemStatus, OutputItem, ResponsesError, ToolChoice, ToolDefinition};
use crate::web::responses::constants::{
    TOOL_CHOICE_AUTO, TOOL_CHOICE_NONE, TOOL_CHOICE_REQUIRED, TOOL_TYPE_FUNCTION,
};
use crate::web::responses::structured_output::{check_parameters_schema, validate_value};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

lazy_static! {
    static ref TOOL_NAME_PATTERN: Regex =
        Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("static tool name pattern");
}

/// The tools declared on one request.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
    tool_choice: ToolChoice,
}

impl ToolRegistry {
    /// Validate declarations and `tool_choice` at admission.
    pub fn from_declarations(
        tools: &[ToolDefinition],
        tool_choice: &ToolChoice,
        max_tools: usize,
    ) -> Result<Self, ResponsesError> {
        if tools.len() > max_tools {
            return Err(ResponsesError::validation(
                "tools",
                format!("too many tools: {} (maximum {})", tools.len(), max_tools),
            ));
        }

        let mut registry = HashMap::with_capacity(tools.len());
        for (i, tool) in tools.iter().enumerate() {
            let param = format!("tools[{}]", i);
            if tool.tool_type != TOOL_TYPE_FUNCTION {
                return Err(ResponsesError::validation(
                    param,
                    format!("unsupported tool type '{}'", tool.tool_type),
                ));
            }
            if !TOOL_NAME_PATTERN.is_match(&tool.name) {
                return Err(ResponsesError::validation(
                    format!("{}.name", param),
                    "tool name must be 1-64 characters of letters, digits, '_' or '-'",
                ));
            }
            if let Some(parameters) = &tool.parameters {
                check_parameters_schema(parameters).map_err(|e| {
                    ResponsesError::validation(
                        format!("{}.parameters", param),
                        format!("invalid parameters schema: {}", e),
                    )
                })?;
            }
            if registry.insert(tool.name.clone(), tool.clone()).is_some() {
                return Err(ResponsesError::validation(
                    format!("{}.name", param),
                    format!("duplicate tool name '{}'", tool.name),
                ));
            }
        }

        match tool_choice {
            ToolChoice::Mode(mode) => match mode.as_str() {
                TOOL_CHOICE_AUTO | TOOL_CHOICE_NONE => {}
                TOOL_CHOICE_REQUIRED if registry.is_empty() => {
                    return Err(ResponsesError::validation(
                        "tool_choice",
                        "tool_choice 'required' needs at least one declared tool",
                    ));
                }
                TOOL_CHOICE_REQUIRED => {}
                other => {
                    return Err(ResponsesError::validation(
                        "tool_choice",
                        format!(
                            "invalid tool_choice '{}': must be auto, none or required",
                            other
                        ),
                    ))
                }
            },
            ToolChoice::Function { choice_type, name } => {
                if choice_type != TOOL_TYPE_FUNCTION {
                    return Err(ResponsesError::validation(
                        "tool_choice.type",
                        format!("unsupported tool_choice type '{}'", choice_type),
                    ));
                }
                if !registry.contains_key(name) {
                    return Err(ResponsesError::validation(
                        "tool_choice.name",
                        format!("tool_choice names undeclared tool '{}'", name),
                    ));
                }
            }
        }

        Ok(Self {
            tools: registry,
            tool_choice: tool_choice.clone(),
        })
    }

    pub fn is_tool_available(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }

    pub fn get_tool_schema(&self, tool_name: &str) -> Option<&Value> {
        self.tools.get(tool_name)?.parameters.as_ref()
    }

    /// Turn a backend tool call into a `function_call` output item.
    ///
    /// Calls to undeclared tools, calls made while `tool_choice` is `none`,
    /// and arguments that do not fit the declared parameters are contract
    /// violations.
    pub fn shape_call(&self, call: BackendToolCall) -> Result<OutputItem, ResponsesError> {
        if self.tool_choice.is_none() {
            warn!("Backend called tool {} although tool_choice is none", call.name);
            return Err(ResponsesError::ToolContract(format!(
                "backend called tool '{}' although tool_choice is 'none'",
                call.name
            )));
        }
        if let Some(forced) = self.tool_choice.forced_function() {
            if forced != call.name {
                return Err(ResponsesError::ToolContract(format!(
                    "backend called '{}' but tool_choice requires '{}'",
                    call.name, forced
                )));
            }
        }
        if !self.is_tool_available(&call.name) {
            warn!("Backend called undeclared tool {}", call.name);
            return Err(ResponsesError::ToolContract(format!(
                "backend called undeclared tool '{}'",
                call.name
            )));
        }

        let raw_arguments = if call.arguments.trim().is_empty() {
            "{}".to_string()
        } else {
            call.arguments
        };
        let arguments: Value = serde_json::from_str(&raw_arguments).map_err(|e| {
            ResponsesError::ToolContract(format!(
                "arguments for '{}' are not valid JSON: {}",
                call.name, e
            ))
        })?;
        if !arguments.is_object() {
            return Err(ResponsesError::ToolContract(format!(
                "arguments for '{}' must be a JSON object",
                call.name
            )));
        }
        if let Some(schema) = self.get_tool_schema(&call.name) {
            validate_value(&arguments, schema, "$").map_err(|e| {
                ResponsesError::ToolContract(format!(
                    "arguments for '{}' do not match its parameters: {}",
                    call.name, e
                ))
            })?;
        }

        debug!("Shaped function call for tool {}", call.name);
        Ok(OutputItem::FunctionCall {
            id: new_function_call_item_id(),
            status: ItemStatus::Completed,
            call_id: if call.id.is_empty() {
                new_call_id()
            } else {
                call.id
            },
            name: call.name,
            arguments: raw_arguments,
        })
    }
}
