mod bank_sync_world;
mod setups;
mod steps;

pub use bank_sync_world::BankSyncWorld;
