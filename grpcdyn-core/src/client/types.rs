use serde::Serialize;
use std::collections::BTreeMap;

/// The outcome of one RPC as handed back to the script.
///
/// RPC-level failures are data, not errors: they show up in `status` and `error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvokeResponse {
    /// gRPC status code, `0` on success.
    pub status: i32,
    /// The decoded response message, absent on failure.
    pub message: Option<serde_json::Value>,
    /// The failing status, absent on success.
    pub error: Option<ErrorObject>,
    pub headers: BTreeMap<String, Vec<String>>,
    pub trailers: BTreeMap<String, Vec<String>>,
}

impl InvokeResponse {
    pub fn code(&self) -> tonic::Code {
        tonic::Code::from_i32(self.status)
    }

    pub fn is_ok(&self) -> bool {
        self.status == tonic::Code::Ok as i32
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorObject {
    pub code: i32,
    pub message: String,
}

impl From<&tonic::Status> for ErrorObject {
    fn from(status: &tonic::Status) -> Self {
        Self {
            code: status.code() as i32,
            message: status.message().to_string(),
        }
    }
}
