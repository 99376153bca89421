pub mod command;
pub mod config;
pub mod interface;
pub mod logging;
pub mod shell_command_ext;
pub mod socket;
