pub mod request;
pub mod response;
pub mod routes;
pub mod service;

pub use request::RuleIdRequest;
pub use response::{Ack, HealthResponse, RulesInfo};
pub use routes::{create_router, AppState};
pub use service::RuleManagementService;
