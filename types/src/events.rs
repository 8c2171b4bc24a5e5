use crate::request::ConverseRequest;
use crate::response::ConverseResponse;
use crate::status::RpcStatus;

/// Frames written by the client on the call's socket.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "converse.request")]
    Request(ConverseRequest),
    /// No more requests follow on this call. Responses keep flowing.
    #[serde(rename = "converse.half_close")]
    HalfClose,
}

/// Frames written by the server on the call's socket.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "converse.response")]
    Response(ConverseResponse),
    /// Terminal status of the call. `OK` ends the response stream cleanly.
    #[serde(rename = "converse.status")]
    Status(RpcStatus),
}
