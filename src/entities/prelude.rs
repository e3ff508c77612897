#![allow(unused_imports)]

pub use super::user_registry::Entity as UserRegistry;
pub use super::wallet_pool_entry::Entity as WalletPoolEntry;
