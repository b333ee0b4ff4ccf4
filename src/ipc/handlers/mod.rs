pub mod bundle;
pub mod core;
pub mod reminders;
pub mod roster;
