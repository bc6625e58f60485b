//! P2P Networking
//!
//! Uses libp2p gossipsub to carry sync blobs between devices on the same
//! local network.

mod behaviour;
mod session_code;

pub use behaviour::{NetworkConfig, NetworkError, NetworkEvent, NetworkHandle, NetworkManager};
pub use session_code::SessionCode;
