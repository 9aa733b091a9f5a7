pub mod app_config;
pub mod board;
pub mod company;
pub mod full_ticket;
pub mod member;
pub mod notifier;
pub mod recipient;
pub mod ticket;

pub use app_config::*;
pub use board::*;
pub use company::*;
pub use full_ticket::*;
pub use member::*;
pub use notifier::*;
pub use recipient::*;
pub use ticket::*;
