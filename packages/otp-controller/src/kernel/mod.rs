//! Infrastructure seams: traits the controller depends on, the production
//! bindings to the HTTP gateway, and scripted doubles for tests.

pub mod deps;
pub mod http_gateway;
pub mod test_dependencies;
pub mod traits;

pub use deps::{ControllerDeps, StaffGateway};
pub use traits::{BaseOriginationGateway, BaseOtpChannel, BaseSessionStore, BaseVerificationGateway};
