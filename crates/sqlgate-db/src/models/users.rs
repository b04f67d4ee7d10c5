//! The `users` table.

use serde::Serialize;
use sqlgate_types::{Record, Value, params};

use crate::error::DbError;
use crate::facade::Database;
use crate::mapper::{Mapper, TableDef};

/// Declaration of the `users` table.
pub static USERS: TableDef = TableDef::new(
    "users",
    "id",
    &["id", "username", "is_admin", "is_banned", "referred_by"],
);

/// A decoded `users` row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserRow {
    /// Chat platform user id.
    pub id: i64,
    /// Username, if known.
    pub username: Option<String>,
    /// Whether the user may run admin commands.
    pub is_admin: bool,
    /// Whether the user is banned.
    pub is_banned: bool,
    /// Id of the user who referred this one.
    pub referred_by: Option<i64>,
}

impl UserRow {
    /// Decode a row selected with `*` from `users`.
    pub fn from_record(record: &Record) -> Result<Self, DbError> {
        let id = record
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| DbError::Mapping("users row has no integer id".to_owned()))?;
        Ok(Self {
            id,
            username: record.get("username").and_then(Value::as_str).map(str::to_owned),
            is_admin: flag(record, "is_admin"),
            is_banned: flag(record, "is_banned"),
            referred_by: record.get("referred_by").and_then(Value::as_i64),
        })
    }
}

fn flag(record: &Record, column: &str) -> bool {
    record
        .get(column)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Operations on `users`.
#[derive(Clone, Copy)]
pub struct Users<'db> {
    mapper: Mapper<'db>,
}

impl<'db> Users<'db> {
    /// Bind the repository to `db`.
    pub fn new(db: &'db Database) -> Self {
        Self {
            mapper: USERS.mapper(db),
        }
    }

    /// The user with `user_id`, if stored.
    pub async fn get(&self, user_id: i64) -> Result<Option<UserRow>, DbError> {
        self.mapper
            .get_by_pk(user_id)
            .await?
            .as_ref()
            .map(UserRow::from_record)
            .transpose()
    }

    async fn exists(&self, user_id: i64) -> Result<bool, DbError> {
        self.mapper.exists(&params! { "id" => user_id }).await
    }

    /// Mark the user banned, creating the row if needed.
    pub async fn ban(&self, user_id: i64) -> Result<(), DbError> {
        if self.exists(user_id).await? {
            self.mapper
                .update(&params! { "id" => user_id }, &params! { "is_banned" => true })
                .await?;
        } else {
            self.mapper
                .insert(&params! { "id" => user_id, "is_banned" => true })
                .await?;
        }
        tracing::info!(user_id, "User banned");
        Ok(())
    }

    /// Clear the ban flag. Unknown users are left alone.
    pub async fn unban(&self, user_id: i64) -> Result<(), DbError> {
        let updated = self
            .mapper
            .update(&params! { "id" => user_id }, &params! { "is_banned" => false })
            .await?;
        if updated > 0 {
            tracing::info!(user_id, "User unbanned");
        }
        Ok(())
    }

    /// Whether the user is banned. Unknown users are not.
    pub async fn is_banned(&self, user_id: i64) -> Result<bool, DbError> {
        Ok(self.get(user_id).await?.is_some_and(|u| u.is_banned))
    }

    /// Whether the user is an admin. Unknown users are not.
    pub async fn is_admin(&self, user_id: i64) -> Result<bool, DbError> {
        Ok(self.get(user_id).await?.is_some_and(|u| u.is_admin))
    }

    /// Record who referred `user_id`.
    ///
    /// Returns `true` if the link was stored. An existing referral is never
    /// replaced, and users cannot refer themselves.
    pub async fn set_referral(&self, user_id: i64, referrer_id: i64) -> Result<bool, DbError> {
        if user_id == referrer_id {
            return Ok(false);
        }
        let stored = if self.exists(user_id).await? {
            // Conditional, so a concurrent referral is never overwritten.
            let table = self.mapper.table();
            let sql = format!(
                "UPDATE {} SET referred_by = :referrer WHERE {} = :id AND referred_by IS NULL",
                table.name, table.primary_key
            );
            self.mapper
                .database()
                .execute(&sql, &params! { "referrer" => referrer_id, "id" => user_id })
                .await?
        } else {
            self.mapper
                .insert(&params! { "id" => user_id, "referred_by" => referrer_id })
                .await?
        };
        Ok(stored > 0)
    }
}
