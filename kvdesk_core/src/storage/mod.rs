pub mod credentials;
pub mod profile;
pub mod store;

pub use credentials::{CredentialVault, KeyringVault, MemoryVault};
pub use profile::ConnectionProfile;
pub use store::{ConnectionProfileStore, ImportSummary};
