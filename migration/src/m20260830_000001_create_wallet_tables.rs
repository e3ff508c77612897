use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_query::Expr;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Wallet pool: pre-seeded supply of deposit addresses
        manager
            .create_table(
                Table::create()
                    .table(WalletPool::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WalletPool::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WalletPool::Address)
                            .string_len(128)
                            .not_null(),
                    )
                    .col(ColumnDef::new(WalletPool::Seed).string_len(512).not_null())
                    .col(
                        ColumnDef::new(WalletPool::Assigned)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(WalletPool::AssignedUserId)
                            .string_len(64)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WalletPool::AssignedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // No two pool entries may share an address
                    .index(
                        Index::create()
                            .name("idx_wallet_pool_address")
                            .col(WalletPool::Address)
                            .unique(),
                    )
                    // Free-entry scans walk (assigned, id) in id order
                    .index(
                        Index::create()
                            .name("idx_wallet_pool_free")
                            .col(WalletPool::Assigned)
                            .col(WalletPool::Id),
                    )
                    .to_owned(),
            )
            .await?;

        // User registry: derived user -> address mapping. The primary key on
        // user_id and the unique index on address are what make the mapping a
        // bijection onto assigned pool rows under concurrent assignment.
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::UserId)
                            .string_len(64)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Address).string_len(128).not_null())
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .index(
                        Index::create()
                            .name("idx_users_address")
                            .col(Users::Address)
                            .unique(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WalletPool::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WalletPool {
    Table,
    Id,
    Address,
    Seed,
    Assigned,
    AssignedUserId,
    AssignedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    UserId,
    Address,
    CreatedAt,
}
