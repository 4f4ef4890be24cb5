use dispatch_core::types::NewDriver;
use dispatchd::{ChangeEvent, ChangeKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JobListQuery {
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClaimRequest {
    #[serde(default)]
    pub driver_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusRequest {
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhotoRequest {
    #[serde(default)]
    pub photo_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DriverRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
}

impl From<DriverRequest> for NewDriver {
    fn from(request: DriverRequest) -> Self {
        NewDriver::new(request.name, request.phone)
    }
}

/// SSE event name for a change event.
pub fn sse_event_name(event: &ChangeEvent) -> &'static str {
    event.kind.as_str()
}
