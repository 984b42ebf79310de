pub mod init;
pub mod providers;
