pub mod projection;
pub mod projector;
pub mod provisioner;

pub use projection::{ProjectionConfig, SynchronousMode};
pub use projector::ProjectorConfig;
pub use provisioner::{BreakerConfig, ProvisionerConfig};
