//! Result codes for unmount, object download, modified-paths and post-fetch requests

/// The only modified-paths list version this protocol speaks.
pub const MODIFIED_PATHS_VERSION: &str = "1";

result_codes! {
    /// Responses to `Unmount`. `Acknowledged` is followed by `Completed` on the same connection.
    pub enum UnmountResult {
        NotMounted => "NotMounted",
        Acknowledged => "Ack",
        Completed => "Complete",
        AlreadyUnmounting => "AlreadyUnmounting",
        UnknownState => "UnknownState",
    }
}

result_codes! {
    pub enum DownloadObjectResult {
        Success => "S",
        DownloadFailed => "DF",
        InvalidSha => "InvalidSHA",
        MountNotReady => "MountNotReady",
    }
}

result_codes! {
    pub enum ModifiedPathsResult {
        /// Body is the `\0`-delimited entry list.
        Success => "S",
        InvalidVersion => "IV",
        MountNotReady => "MountNotReady",
        UnknownRequest => "UnknownRequest",
    }
}

result_codes! {
    pub enum PostFetchResult {
        Queued => "Queued",
        MountNotReady => "MountNotReady",
    }
}
