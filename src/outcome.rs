use serde::Serialize;

/// Acknowledgement returned by operations without a richer result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationMessage {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl OperationMessage {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}
