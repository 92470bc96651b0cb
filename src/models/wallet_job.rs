//! WalletJob entity model
//!
//! This module contains the SeaORM entity model for the wallet_jobs table,
//! the durable store behind the wallet synchronization queue.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::jobs::{JobOutcome, JobStatus};

/// WalletJob entity representing one pending or finished wallet reconciliation
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "wallet_jobs")]
pub struct Model {
    /// Unique identifier for the job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Job type tag (google_patch, apple_pkpass_regenerate, apple_push_notify)
    pub job_type: String,

    /// Type-specific payload
    #[sea_orm(column_type = "JsonBinary")]
    pub payload: JsonValue,

    /// Queue status (pending, retrying, in_flight, done)
    pub status: String,

    /// Terminal outcome, only set once the job is done
    pub outcome: Option<String>,

    /// Number of failed attempts so far
    pub attempts: i32,

    /// Retry ceiling fixed at creation
    pub max_attempts: i32,

    /// Earliest time the job may be attempted again
    pub next_attempt_at: DateTimeWithTimeZone,

    /// Expiry of the current worker claim, if any
    pub lease_expires_at: Option<DateTimeWithTimeZone>,

    /// Structured details of the most recent failure
    #[sea_orm(column_type = "JsonBinary")]
    pub last_error: Option<JsonValue>,

    /// Timestamp when the job was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp of the last state change
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Parsed queue status; `None` for values written by something else.
    pub fn job_status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }

    /// Parsed terminal outcome, if the job is done.
    pub fn job_outcome(&self) -> Option<JobOutcome> {
        self.outcome.as_deref().and_then(JobOutcome::parse)
    }

    pub fn is_done(&self) -> bool {
        self.job_status() == Some(JobStatus::Done)
    }
}
