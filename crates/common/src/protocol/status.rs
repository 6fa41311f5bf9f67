//! Status snapshot returned for `GetStatus`

use serde::{Deserialize, Serialize};

use super::ProtocolError;

result_codes! {
    /// Lifecycle of a mount process
    #[derive(Serialize, Deserialize)]
    pub enum MountState {
        Mounting => "Mounting",
        Ready => "Ready",
        Unmounting => "Unmounting",
        MountFailed => "MountFailed",
    }
}

/// Shown in place of a cache server url when none is configured.
pub const NO_CACHE_SERVER: &str = "None";

/// The `GetStatus` response. Sent as a bare JSON line with no header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub enlistment_root: String,
    pub local_cache_root: String,
    pub repo_url: String,
    pub cache_server: String,
    pub lock_status: String,
    pub mount_status: MountState,
    pub disk_layout_version: String,
    pub background_operation_count: usize,
}

impl StatusResponse {
    pub fn to_line(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::MalformedBody(e.to_string()))
    }

    pub fn from_line(line: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(line).map_err(|e| ProtocolError::MalformedBody(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_json_shape() {
        let status = StatusResponse {
            enlistment_root: "/src/repo".to_string(),
            local_cache_root: "/cache".to_string(),
            repo_url: "https://example.com/repo".to_string(),
            cache_server: NO_CACHE_SERVER.to_string(),
            lock_status: "Free".to_string(),
            mount_status: MountState::Ready,
            disk_layout_version: "1".to_string(),
            background_operation_count: 3,
        };

        let line = status.to_line().unwrap();
        assert!(line.contains("\"mount_status\":\"Ready\""));
        assert!(line.contains("\"background_operation_count\":3"));
        assert_eq!(StatusResponse::from_line(&line).unwrap(), status);
    }
}
