//! Lock acquisition and release messages

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Message, ProtocolError};

/// Identity of an external process asking for the working-tree lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockData {
    pub pid: u32,
    pub is_elevated: bool,
    /// Probe for availability without taking the lock.
    pub check_availability_only: bool,
    pub parsed_command: String,
    pub git_command_session_id: String,
}

impl LockData {
    pub fn new(pid: u32, parsed_command: impl Into<String>) -> Self {
        Self {
            pid,
            is_elevated: false,
            check_availability_only: false,
            parsed_command: parsed_command.into(),
            git_command_session_id: String::new(),
        }
    }

    /// Decode a request body. `None` for a missing or unparseable body.
    pub fn from_body(body: Option<&str>) -> Option<Self> {
        serde_json::from_str(body?).ok()
    }

    pub fn to_body(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::MalformedBody(e.to_string()))
    }
}

impl fmt::Display for LockData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (PID:{})", self.parsed_command, self.pid)
    }
}

result_codes! {
    /// Outcome of an `AcquireLock` request
    pub enum AcquireLockResult {
        Acquired => "LockAcquired",
        /// Returned to availability checks when the lock could be taken.
        Available => "LockAvailable",
        /// The mount itself is not in a state to hand out the lock.
        DenyMount => "DenyMount",
        /// Another external process holds the lock.
        DenyGit => "DenyGit",
        UnmountInProgress => "UnmountInProgress",
        MountNotReady => "MountNotReady",
    }
}

result_codes! {
    /// Outcome of a `ReleaseLock` request
    pub enum ReleaseLockResult {
        Released => "LockReleased",
        MountNotReady => "MountNotReady",
    }
}

/// Decoded `AcquireLock` response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquireLockResponse {
    pub result: AcquireLockResult,
    /// Present with [`AcquireLockResult::DenyGit`].
    pub holder: Option<LockData>,
    /// Human-readable reason, present with [`AcquireLockResult::DenyMount`].
    pub deny_message: Option<String>,
}

impl AcquireLockResponse {
    pub fn new(result: AcquireLockResult) -> Self {
        Self {
            result,
            holder: None,
            deny_message: None,
        }
    }

    pub fn deny_git(holder: LockData) -> Self {
        Self {
            result: AcquireLockResult::DenyGit,
            holder: Some(holder),
            deny_message: None,
        }
    }

    pub fn deny_mount(message: impl Into<String>) -> Self {
        Self {
            result: AcquireLockResult::DenyMount,
            holder: None,
            deny_message: Some(message.into()),
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(
            self.result,
            AcquireLockResult::Acquired | AcquireLockResult::Available
        )
    }

    pub fn to_message(&self) -> Result<Message, ProtocolError> {
        let body = match (&self.holder, &self.deny_message) {
            (Some(holder), _) => Some(holder.to_body()?),
            (None, Some(message)) => Some(message.clone()),
            (None, None) => None,
        };
        Ok(Message::new(self.result.as_str(), body))
    }

    pub fn from_message(message: &Message) -> Result<Self, ProtocolError> {
        let result: AcquireLockResult = message.header.parse()?;
        let mut response = Self::new(result);
        match result {
            AcquireLockResult::DenyGit => {
                response.holder = Some(LockData::from_body(message.body_str()).ok_or_else(
                    || ProtocolError::MalformedBody("DenyGit without a lock holder".to_string()),
                )?);
            }
            AcquireLockResult::DenyMount => {
                response.deny_message = message.body.clone();
            }
            _ => {}
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_data_body() {
        let mut data = LockData::new(4242, "git status");
        data.git_command_session_id = "session-1".to_string();
        let body = data.to_body().unwrap();
        assert_eq!(LockData::from_body(Some(&body)), Some(data));
    }

    #[test]
    fn test_lock_data_rejects_garbage() {
        assert_eq!(LockData::from_body(None), None);
        assert_eq!(LockData::from_body(Some("not json")), None);
        assert_eq!(LockData::from_body(Some("{\"pid\":1}")), None);
    }

    #[test]
    fn test_holder_display() {
        assert_eq!(
            LockData::new(17, "git checkout main").to_string(),
            "git checkout main (PID:17)"
        );
    }

    #[test]
    fn test_deny_git_carries_holder() {
        let holder = LockData::new(9, "git reset --hard");
        let message = AcquireLockResponse::deny_git(holder.clone())
            .to_message()
            .unwrap();
        assert_eq!(message.header, "DenyGit");

        let decoded = AcquireLockResponse::from_message(&message).unwrap();
        assert_eq!(decoded.holder, Some(holder));
        assert!(!decoded.is_granted());
    }

    #[test]
    fn test_unknown_result_code() {
        let err = AcquireLockResponse::from_message(&Message::header_only("Maybe")).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownResult(code) if code == "Maybe"));
    }
}
