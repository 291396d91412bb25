//! Payment request records and sent-SMS matching

pub mod config;
pub mod data;
pub mod phone;
pub mod sms;
pub mod storage;
pub mod telemetry;
