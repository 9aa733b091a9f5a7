pub mod admin;
pub mod hooks;
pub mod locks;
pub mod message;
pub mod notifier;
pub mod pipeline;
pub mod reconcile;
pub mod router;
pub mod sync;

pub use locks::TicketLocks;
pub use message::TicketLinks;
pub use notifier::Notifier;
pub use pipeline::TicketPipeline;
pub use reconcile::Reconciler;
pub use router::{AppState, build_router};
pub use sync::{SyncEngine, SyncRequest};
