pub mod ai;
pub mod availability;
pub mod booking;
pub mod calendar;
pub mod context;
pub mod dates;
pub mod dialogue;
pub mod messaging;
pub mod phone;
pub mod speech;
pub mod tenant;
pub mod transfer;
pub mod voice;
