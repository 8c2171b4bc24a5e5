pub mod audio;
pub mod events;
pub mod request;
pub mod response;
pub mod status;

pub use events::{ClientFrame, ServerFrame};
pub use request::{AudioInConfig, AudioOutConfig, ConverseConfig, ConverseRequest, ConverseState};
pub use response::{AudioOut, ConverseResponse, ConverseResult, RpcError};
pub use status::{Code, RpcStatus};
