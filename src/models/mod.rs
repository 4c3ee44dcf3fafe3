pub mod email;
pub mod response;

pub use email::{MailBody, SendError, SendOutcome, SendRequest};
pub use response::{HealthResponse, MessageResponse, StatsResponse};
