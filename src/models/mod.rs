pub mod appointment;
pub mod call;
pub mod dialogue;
pub mod hours;
pub mod intent;
pub mod message;
pub mod tenant;

pub use appointment::{Appointment, AppointmentStatus};
pub use call::CallLog;
pub use dialogue::{DialogueContext, Language, Step, Terminal};
pub use hours::BusinessHours;
pub use intent::Intent;
pub use message::{AudioClip, InboundMessage};
pub use tenant::{CalendarSource, IvrDepartment, Tenant, APPOINTMENT_DURATIONS};
