pub mod certificate;
pub mod event;
pub mod payload;

pub use certificate::{ActiveCertificates, CertificateRecord, KeyUsage};
pub use event::{Editor, EntityType, Event, NewEvent, Position, TenantId};
pub use payload::{DomainValidationType, EventKind, Payload, QuotaNotificationSpec};
