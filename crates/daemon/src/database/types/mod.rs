mod operation_type;
mod path_type;

pub use operation_type::OperationType;
pub use path_type::PathType;
