use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Sqlite, Type};

/// `pathType` column of the placeholder table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathType {
    File,
    PartialFolder,
    ExpandedFolder,
    PossibleTombstoneFolder,
}

impl PathType {
    pub fn as_i64(&self) -> i64 {
        match self {
            PathType::File => 0,
            PathType::PartialFolder => 1,
            PathType::ExpandedFolder => 2,
            PathType::PossibleTombstoneFolder => 3,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        Some(match value {
            0 => PathType::File,
            1 => PathType::PartialFolder,
            2 => PathType::ExpandedFolder,
            3 => PathType::PossibleTombstoneFolder,
            _ => return None,
        })
    }

    pub fn is_folder(&self) -> bool {
        !matches!(self, PathType::File)
    }
}

impl Decode<'_, Sqlite> for PathType {
    fn decode(value: SqliteValueRef<'_>) -> Result<Self, BoxDynError> {
        let raw = <i64 as Decode<Sqlite>>::decode(value)?;
        PathType::from_i64(raw).ok_or_else(|| format!("unknown placeholder path type {}", raw).into())
    }
}

impl Encode<'_, Sqlite> for PathType {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'_>>,
    ) -> Result<IsNull, BoxDynError> {
        args.push(SqliteArgumentValue::Int64(self.as_i64()));
        Ok(IsNull::No)
    }
}

impl Type<Sqlite> for PathType {
    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <i64 as Type<Sqlite>>::compatible(ty)
    }

    fn type_info() -> SqliteTypeInfo {
        <i64 as Type<Sqlite>>::type_info()
    }
}
