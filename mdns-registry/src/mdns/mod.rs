pub mod announce;
pub mod conflict;
pub mod probe;
pub mod teardown;
