/// Process exit codes observable by whoever launched the mount process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ReturnCode {
    Success = 0,
    GenericError = 3,
    /// A release-lock request arrived with an unparseable body.
    NullRequestData = 5,
}

impl ReturnCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl From<ReturnCode> for std::process::ExitCode {
    fn from(code: ReturnCode) -> Self {
        std::process::ExitCode::from(code.code() as u8)
    }
}
