pub mod request;
pub mod response;
pub mod routes;

pub use request::DecideRequest;
pub use routes::{create_router, AppState};
