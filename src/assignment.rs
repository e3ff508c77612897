//! The atomic allocate-or-return procedure over the wallet pool.
//!
//! Every mutation of the pool funnels through [`assign`]. Handlers are
//! stateless and may run concurrently, so all mutual exclusion is delegated
//! to the store: the candidate row is claimed under `FOR UPDATE SKIP LOCKED`
//! (concurrent claimants take disjoint rows instead of serializing on the
//! head of the pool), and the primary key on `users.user_id` arbitrates
//! same-user races. Either the whole claim-and-register step commits or
//! none of it does.

use chrono::Utc;
use sea_orm::sea_query::{Expr, LockBehavior, LockType};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    SqlErr, TransactionTrait,
};
use tracing::info;

use crate::entities::{user_registry, wallet_pool_entry};

/// Outcome of a successful assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedWallet {
    pub address: String,
    /// False when the registry already held a binding for the user
    pub newly_assigned: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AssignError {
    /// No free pool entry remains and the user holds no prior binding
    #[error("no wallet available in the pool")]
    Exhausted,
    /// A requested specific address does not exist in the pool
    #[error("wallet {0} not found")]
    WalletNotFound(String),
    /// A requested specific address is already bound to a user
    #[error("wallet {0} is already assigned")]
    AlreadyAssigned(String),
    #[error("store error: {0}")]
    Db(#[from] DbErr),
}

/// Binds one pool entry to `user_id`, exactly once, inside a single store
/// transaction.
///
/// Returns the existing binding when the user already holds one (idempotent
/// short-circuit, no pool mutation). Otherwise claims the lowest free id, or
/// exactly the `preferred` address when one is supplied.
///
/// Safe to retry: repeating the call with the same `user_id` after a
/// transient failure converges on the same address.
pub async fn assign(
    db: &DatabaseConnection,
    user_id: &str,
    preferred: Option<&str>,
) -> Result<AssignedWallet, AssignError> {
    assert!(!user_id.is_empty(), "User id cannot be empty");
    assert!(user_id.len() <= 64, "User id exceeds column bounds");

    let txn = db.begin().await?;

    // Idempotent short-circuit: a registry entry is immutable, so an existing
    // binding is the final answer.
    if let Some(existing) = user_registry::Entity::find_by_id(user_id.to_string())
        .one(&txn)
        .await?
    {
        txn.commit().await?;
        return Ok(AssignedWallet {
            address: existing.address,
            newly_assigned: false,
        });
    }

    let candidate = match preferred {
        Some(address) => {
            // Plain FOR UPDATE: if another transaction holds this exact row we
            // must wait for its verdict, not skip to a different wallet.
            let row = wallet_pool_entry::Entity::find()
                .filter(wallet_pool_entry::Column::Address.eq(address))
                .lock_exclusive()
                .one(&txn)
                .await?
                .ok_or_else(|| AssignError::WalletNotFound(address.to_string()))?;
            if row.assigned {
                return Err(AssignError::AlreadyAssigned(address.to_string()));
            }
            row
        }
        None => wallet_pool_entry::Entity::find()
            .filter(wallet_pool_entry::Column::Assigned.eq(false))
            .order_by_asc(wallet_pool_entry::Column::Id)
            .limit(1)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(&txn)
            .await?
            .ok_or(AssignError::Exhausted)?,
    };

    let now = Utc::now().fixed_offset();
    wallet_pool_entry::Entity::update_many()
        .col_expr(wallet_pool_entry::Column::Assigned, Expr::value(true))
        .col_expr(
            wallet_pool_entry::Column::AssignedUserId,
            Expr::value(user_id),
        )
        .col_expr(wallet_pool_entry::Column::AssignedAt, Expr::value(now))
        .filter(wallet_pool_entry::Column::Id.eq(candidate.id))
        .exec(&txn)
        .await?;

    let registry_row = user_registry::ActiveModel {
        user_id: Set(user_id.to_string()),
        address: Set(candidate.address.clone()),
        created_at: Set(now),
    };

    match user_registry::Entity::insert(registry_row)
        .exec_without_returning(&txn)
        .await
    {
        Ok(_) => {}
        Err(err) if is_unique_violation(&err) => {
            // A concurrent call with the same user_id committed first. Roll
            // back (which releases the claimed pool row untouched) and return
            // the winner's binding.
            txn.rollback().await?;
            return lookup_winner(db, user_id).await;
        }
        Err(err) => return Err(err.into()),
    }

    txn.commit().await?;

    info!(
        "Assigned wallet {} (pool id {}) to user {}",
        candidate.address, candidate.id, user_id
    );

    Ok(AssignedWallet {
        address: candidate.address,
        newly_assigned: true,
    })
}

/// Resolves a lost same-user race to the committed binding. Two simultaneous
/// calls for one user converge here: the loser's transaction is already
/// rolled back, so the registry read observes exactly the winner's row.
async fn lookup_winner(
    db: &DatabaseConnection,
    user_id: &str,
) -> Result<AssignedWallet, AssignError> {
    let winner = user_registry::Entity::find_by_id(user_id.to_string())
        .one(db)
        .await?
        .ok_or_else(|| {
            AssignError::Db(DbErr::RecordNotFound(format!(
                "registry entry for {user_id} vanished after conflict"
            )))
        })?;
    Ok(AssignedWallet {
        address: winner.address,
        newly_assigned: false,
    })
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    fn free_entry(id: i64, address: &str) -> wallet_pool_entry::Model {
        wallet_pool_entry::Model {
            id,
            address: address.to_string(),
            seed: format!("seed for {address}"),
            assigned: false,
            assigned_user_id: None,
            assigned_at: None,
        }
    }

    fn registry_entry(user_id: &str, address: &str) -> user_registry::Model {
        user_registry::Model {
            user_id: user_id.to_string(),
            address: address.to_string(),
            created_at: Utc::now().fixed_offset(),
        }
    }

    #[tokio::test]
    async fn existing_binding_short_circuits() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![registry_entry("u1", "A")]])
            .into_connection();

        let outcome = assign(&db, "u1", None).await.expect("assignment succeeds");
        assert_eq!(outcome.address, "A");
        assert!(!outcome.newly_assigned);
    }

    #[tokio::test]
    async fn fresh_claim_takes_lowest_free_id() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user_registry::Model>::new()])
            .append_query_results([vec![free_entry(1, "A")]])
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();

        let outcome = assign(&db, "u1", None).await.expect("assignment succeeds");
        assert_eq!(outcome.address, "A");
        assert!(outcome.newly_assigned);
    }

    #[tokio::test]
    async fn distinct_users_receive_distinct_addresses() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user_registry::Model>::new()])
            .append_query_results([vec![free_entry(1, "A")]])
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .append_query_results([Vec::<user_registry::Model>::new()])
            .append_query_results([vec![free_entry(2, "B")]])
            .append_exec_results([
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
                MockExecResult {
                    last_insert_id: 0,
                    rows_affected: 1,
                },
            ])
            .into_connection();

        let first = assign(&db, "u1", None).await.expect("first assignment");
        let second = assign(&db, "u2", None).await.expect("second assignment");
        assert_eq!(first.address, "A");
        assert_eq!(second.address, "B");
        assert_ne!(first.address, second.address);
    }

    #[tokio::test]
    async fn lost_same_user_race_converges_on_winner_binding() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([vec![registry_entry("u1", "A")]])
            .into_connection();

        let outcome = lookup_winner(&db, "u1").await.expect("winner resolved");
        assert_eq!(outcome.address, "A");
        assert!(!outcome.newly_assigned);
    }

    #[tokio::test]
    async fn vanished_winner_surfaces_a_store_error() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user_registry::Model>::new()])
            .into_connection();

        let err = lookup_winner(&db, "u1").await.expect_err("no winner row");
        assert!(matches!(err, AssignError::Db(_)));
    }

    #[tokio::test]
    async fn empty_pool_is_exhausted_not_generic() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user_registry::Model>::new()])
            .append_query_results([Vec::<wallet_pool_entry::Model>::new()])
            .into_connection();

        let err = assign(&db, "u2", None).await.expect_err("pool is empty");
        assert!(matches!(err, AssignError::Exhausted));
    }

    #[tokio::test]
    async fn preferred_address_must_exist() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user_registry::Model>::new()])
            .append_query_results([Vec::<wallet_pool_entry::Model>::new()])
            .into_connection();

        let err = assign(&db, "u1", Some("missing"))
            .await
            .expect_err("wallet absent");
        assert!(matches!(err, AssignError::WalletNotFound(addr) if addr == "missing"));
    }

    #[tokio::test]
    async fn preferred_address_must_be_free() {
        let taken = wallet_pool_entry::Model {
            assigned: true,
            assigned_user_id: Some("other".to_string()),
            assigned_at: Some(Utc::now().fixed_offset()),
            ..free_entry(7, "B")
        };
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_query_results([Vec::<user_registry::Model>::new()])
            .append_query_results([vec![taken]])
            .into_connection();

        let err = assign(&db, "u1", Some("B"))
            .await
            .expect_err("wallet taken");
        assert!(matches!(err, AssignError::AlreadyAssigned(addr) if addr == "B"));
    }
}
