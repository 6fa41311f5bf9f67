pub mod modified_paths;
pub mod mount;
pub mod status;
pub mod unmount;

pub use modified_paths::ModifiedPaths;
pub use mount::Mount;
pub use status::Status;
pub use unmount::Unmount;
