//! Turning delivered chain logs into typed, validated run requests.
//!
//! Classification picks the request variant from the initiator and topic 0,
//! validation checks the job id and requester, and decoding produces the
//! run's initial data.

mod cbor;
mod request;
mod subscription;
mod topics;

pub use request::LogRequest;
pub use subscription::InitiatorSubscription;
pub use topics::TopicRegistry;
#[cfg(test)]
pub use topics::{event_topic, job_id_topics};
