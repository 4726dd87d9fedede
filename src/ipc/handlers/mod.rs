pub mod bookings;
pub mod core;
pub mod grades;
pub mod roster;
pub mod setup;
