pub mod address;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use address::Account;
pub use crypto::{recover_account, sign_digest, KeyPair, PublicKey, SecretKey, SIGNATURE_LENGTH};
pub use error::ChainError;
pub use hash::Hash256;
pub use types::{now_unix, Amount, Timestamp};

pub type Result<T> = std::result::Result<T, ChainError>;
