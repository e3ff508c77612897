//! Wallet pool entity: the finite supply of deposit addresses.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "wallet_pool")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Public deposit address; unique across the pool
    #[sea_orm(column_type = "String(StringLen::N(128))")]
    pub address: String,
    /// Recovery material; exposed only on the admin surface
    #[sea_orm(column_type = "String(StringLen::N(512))")]
    pub seed: String,
    /// Set true exactly once, never reverts
    pub assigned: bool,
    /// User that claimed this entry; set together with `assigned`
    #[sea_orm(column_type = "String(StringLen::N(64))", nullable)]
    pub assigned_user_id: Option<String>,
    pub assigned_at: Option<DateTimeWithTimeZone>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
