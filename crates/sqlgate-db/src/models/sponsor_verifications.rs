//! The `sponsor_verifications` audit table.

use serde::Serialize;
use sqlgate_types::{Record, Value, params};

use crate::error::DbError;
use crate::facade::Database;
use crate::mapper::{Mapper, Order, SelectOptions, TableDef};

/// Declaration of the `sponsor_verifications` table.
pub static SPONSOR_VERIFICATIONS: TableDef = TableDef::new(
    "sponsor_verifications",
    "id",
    &["id", "user_id", "channels_missing", "policy", "success"],
);

/// One recorded verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SponsorVerification {
    /// Row id, assigned by the engine.
    pub id: i64,
    /// Verified user.
    pub user_id: i64,
    /// Comma-separated channels the user had not joined.
    pub channels_missing: Option<String>,
    /// Name of the policy that was applied.
    pub policy: String,
    /// Whether the user passed.
    pub success: bool,
}

impl SponsorVerification {
    fn from_record(record: &Record) -> Result<Self, DbError> {
        let int = |column: &str| {
            record.get(column).and_then(Value::as_i64).ok_or_else(|| {
                DbError::Mapping(format!("sponsor_verifications row has no integer {column}"))
            })
        };
        Ok(Self {
            id: int("id")?,
            user_id: int("user_id")?,
            channels_missing: record
                .get("channels_missing")
                .and_then(Value::as_str)
                .map(str::to_owned),
            policy: record
                .get("policy")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            success: record
                .get("success")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

/// Operations on `sponsor_verifications`.
#[derive(Clone, Copy)]
pub struct SponsorVerifications<'db> {
    mapper: Mapper<'db>,
}

impl<'db> SponsorVerifications<'db> {
    /// Bind the repository to `db`.
    pub fn new(db: &'db Database) -> Self {
        Self {
            mapper: SPONSOR_VERIFICATIONS.mapper(db),
        }
    }

    /// Append one verification outcome.
    pub async fn record(
        &self,
        user_id: i64,
        channels_missing: Option<&str>,
        policy: &str,
        success: bool,
    ) -> Result<(), DbError> {
        self.mapper
            .insert(&params! {
                "user_id" => user_id,
                "channels_missing" => channels_missing,
                "policy" => policy,
                "success" => success,
            })
            .await?;
        Ok(())
    }

    /// The latest `limit` verifications of `user_id`, newest first.
    pub async fn recent_for_user(
        &self,
        user_id: i64,
        limit: u32,
    ) -> Result<Vec<SponsorVerification>, DbError> {
        let options = SelectOptions::filtered(params! { "user_id" => user_id })
            .order_by("id", Order::Desc)
            .limit(limit);
        self.mapper
            .select(&options)
            .await?
            .iter()
            .map(SponsorVerification::from_record)
            .collect()
    }
}
