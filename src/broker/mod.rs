pub mod directory;
pub mod engine;
pub mod message;
pub mod queue;
pub mod retention;
pub mod session;
pub mod store;

pub use engine::{Backend, DeliveryEngine};
pub use message::{MessageRecord, User};
pub use queue::VolatileQueue;
pub use retention::RetentionPolicy;
pub use session::{SessionState, SubscriptionSession};
