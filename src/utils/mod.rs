pub mod command;
pub mod file;
pub mod junction;
pub mod logs;
pub mod runner;
pub mod system;
