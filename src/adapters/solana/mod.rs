pub mod network;
pub mod rpc;
pub mod wallet;

pub use network::SolanaNetwork;
pub use rpc::{SolanaClient, SolanaClientError};
pub use wallet::{KeypairSigner, KeypairVault};
