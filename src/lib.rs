// Library for tests to access modules

pub mod config;
pub mod connection;
pub mod console;
pub mod gateway;
pub mod merge;
pub mod models;
pub mod operator;
pub mod pending;
pub mod projection;
pub mod version;
pub mod worker;
