pub mod prelude;
pub mod user_registry;
pub mod wallet_pool_entry;
