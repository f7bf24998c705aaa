pub mod diff;
pub mod notify;
pub mod qis;
pub mod scheduler;
pub mod store;
pub mod telegram;
