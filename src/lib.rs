pub mod api;
pub mod config;
pub mod dataset;
pub mod error;
pub mod flow_tracker;
pub mod frame;
pub mod image;
pub mod model;
pub mod my_types;
pub mod optical_flow;
pub mod pyramid;
pub mod query;
pub mod registry;
pub mod session;
pub mod window;

#[cfg(test)]
mod testing;

pub use error::TrackError;
pub use frame::Frame;
pub use model::{ModelError, ModelOutput, TrackedPoint, TrackingModel};
pub use query::{QueryPoint, QuerySeed};
pub use session::TrackingSession;
