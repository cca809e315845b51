//! Background position tracker.
//!
//! A [`ServiceController`](controller::ServiceController) owns a single
//! tracking session at a time. While it runs, a
//! [`TrackingLoop`](tracking::TrackingLoop) samples the device position on a
//! fixed cadence and posts each fix through a
//! [`ReportDispatcher`](dispatcher::ReportDispatcher). Platform pieces
//! (position fixes, HTTP, the persistent presence indicator) are injected as
//! [`collaborators`].

pub mod collaborators;
pub mod controller;
pub mod dispatcher;
pub mod http_transport;
pub mod presence;
pub mod replay;
pub mod signal;
pub mod state;
pub mod testing;
pub mod tracking;

pub use collaborators::Collaborators;
pub use controller::{ControllerError, ServiceController};
pub use signal::StopSignal;
