use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Sqlite, Type};

/// `operation` column of the durable background task log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    FileCreated,
    FileDeleted,
    FileOverwritten,
    FileConvertedToFull,
    FileRenamed,
    FileHardLinkCreated,
    FileSuperseded,
    FolderCreated,
    FolderDeleted,
    FolderRenamed,
    PlaceholderCreated,
}

impl OperationType {
    pub fn as_i64(&self) -> i64 {
        match self {
            OperationType::FileCreated => 1,
            OperationType::FileDeleted => 2,
            OperationType::FileOverwritten => 3,
            OperationType::FileConvertedToFull => 4,
            OperationType::FileRenamed => 5,
            OperationType::FileHardLinkCreated => 6,
            OperationType::FileSuperseded => 7,
            OperationType::FolderCreated => 8,
            OperationType::FolderDeleted => 9,
            OperationType::FolderRenamed => 10,
            OperationType::PlaceholderCreated => 11,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        Some(match value {
            1 => OperationType::FileCreated,
            2 => OperationType::FileDeleted,
            3 => OperationType::FileOverwritten,
            4 => OperationType::FileConvertedToFull,
            5 => OperationType::FileRenamed,
            6 => OperationType::FileHardLinkCreated,
            7 => OperationType::FileSuperseded,
            8 => OperationType::FolderCreated,
            9 => OperationType::FolderDeleted,
            10 => OperationType::FolderRenamed,
            11 => OperationType::PlaceholderCreated,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::FileCreated => "file_created",
            OperationType::FileDeleted => "file_deleted",
            OperationType::FileOverwritten => "file_overwritten",
            OperationType::FileConvertedToFull => "file_converted_to_full",
            OperationType::FileRenamed => "file_renamed",
            OperationType::FileHardLinkCreated => "file_hard_link_created",
            OperationType::FileSuperseded => "file_superseded",
            OperationType::FolderCreated => "folder_created",
            OperationType::FolderDeleted => "folder_deleted",
            OperationType::FolderRenamed => "folder_renamed",
            OperationType::PlaceholderCreated => "placeholder_created",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Decode<'_, Sqlite> for OperationType {
    fn decode(value: SqliteValueRef<'_>) -> Result<Self, BoxDynError> {
        let raw = <i64 as Decode<Sqlite>>::decode(value)?;
        OperationType::from_i64(raw)
            .ok_or_else(|| format!("unknown background operation {}", raw).into())
    }
}

impl Encode<'_, Sqlite> for OperationType {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'_>>,
    ) -> Result<IsNull, BoxDynError> {
        args.push(SqliteArgumentValue::Int64(self.as_i64()));
        Ok(IsNull::No)
    }
}

impl Type<Sqlite> for OperationType {
    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <i64 as Type<Sqlite>>::compatible(ty)
    }

    fn type_info() -> SqliteTypeInfo {
        <i64 as Type<Sqlite>>::type_info()
    }
}
