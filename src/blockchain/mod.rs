pub mod network;

pub use network::{ChainIdProvider, FixedChainId, RpcNetwork};
