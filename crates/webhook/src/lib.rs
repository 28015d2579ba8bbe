pub mod emitter;
pub mod error;
pub mod event;
pub mod router;
pub mod rules;
pub mod ssrf;

pub use emitter::{DeadLetterEntry, Emitter, EmitterStats, QueuedDelivery};
pub use error::WebhookError;
pub use event::WebhookEvent;
pub use router::WebhookRouter;
pub use rules::FilterRule;
