use super::EnvelopeResponse;
use crate::config::AppState;
use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use coinlens_core::error::ToolError;
use coinlens_mcp::tools::{OutputShape, ParamSpec};
use coinlens_mcp::Envelope;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct ToolDescription {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub output: OutputShape,
    pub input_schema: Value,
}

#[derive(Debug, Serialize)]
pub struct ListToolsResponse {
    pub tools: Vec<ToolDescription>,
}

/// List registered tools in registration order
pub async fn list_tools(State(state): State<Arc<AppState>>) -> Json<ListToolsResponse> {
    let tools = state
        .dispatcher
        .list_tools()
        .into_iter()
        .map(|spec| ToolDescription {
            input_schema: spec.input_schema(),
            name: spec.name,
            description: spec.description,
            params: spec.params,
            output: spec.output,
        })
        .collect();

    Json(ListToolsResponse { tools })
}

/// Invoke a tool named in the path; the body is the argument object
pub async fn invoke_tool(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> EnvelopeResponse {
    let arguments = match parse_body::<Value>(&body) {
        Ok(arguments) => arguments.unwrap_or_else(|| Value::Object(Default::default())),
        Err(e) => return EnvelopeResponse(Envelope::failure(&e)),
    };

    EnvelopeResponse(state.dispatcher.invoke(&name, &arguments).await)
}

#[derive(Debug, Deserialize)]
pub struct InvokeRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Invoke a tool named in the body
pub async fn invoke(State(state): State<Arc<AppState>>, body: Bytes) -> EnvelopeResponse {
    let request = match parse_body::<InvokeRequest>(&body) {
        Ok(Some(request)) => request,
        Ok(None) => {
            let error = ToolError::invalid_argument("request body must name a tool");
            return EnvelopeResponse(Envelope::failure(&error));
        }
        Err(e) => return EnvelopeResponse(Envelope::failure(&e)),
    };

    EnvelopeResponse(state.dispatcher.invoke(&request.name, &request.arguments).await)
}

/// Decode a JSON body; an empty body is `None`
fn parse_body<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<Option<T>, ToolError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ToolError::invalid_argument(format!("invalid request body: {}", e)))
}
