pub mod init;
pub mod node;
pub mod runbook;
pub mod serve;
pub mod validate;
