//! HTTP API handlers for slicemetrics-svc

pub mod health;
pub mod profiles;
pub mod slice;

pub use health::health_routes;
pub use profiles::profile_routes;
pub use slice::slice_routes;
