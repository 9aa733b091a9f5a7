pub mod chat;
pub mod chat_client;
pub mod http;
pub mod psa;
pub mod psa_client;
pub mod signature;

pub use chat::*;
pub use chat_client::*;
pub use psa::*;
pub use psa_client::*;
pub use signature::*;
