pub mod api;
pub mod arbiter;
pub mod config;
pub mod discovery;
pub mod identifier;
pub mod modbus;
pub mod poller;
pub mod publish;
pub mod readings;
pub mod settings;
pub mod supervisor;
pub mod telemetry;
