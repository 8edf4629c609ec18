pub mod auth;
pub mod init;
pub mod push;
pub mod reminders;
