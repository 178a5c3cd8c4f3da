mod controller;
pub mod state;

pub use controller::RideLifecycleController;
pub use state::{Confirmation, Effect, Event, RestCall, RideState, RideStore, Transition};
