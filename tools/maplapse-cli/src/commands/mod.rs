pub mod init;
pub mod probe;
pub mod render;
