pub mod controller;
pub mod delivery;
pub mod draft;
pub mod geolocation;
pub mod schema;

pub use controller::{
    ControllerError, ControllerSettings, FieldPatch, ReportController, ReportView, Upload,
};
pub use delivery::{ReportSink, SimulatedDelivery};
pub use draft::IntakeSource;
pub use geolocation::ReportedPosition;
