pub mod json_response;
pub mod query;

pub use json_response::{deliver_error_json, deliver_serialized_json, deliver_success_json};
pub use query::parse_query;
