mod vault;

pub use vault::VaultConfig;
