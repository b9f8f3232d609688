//! Ingestion of SenseCAP T1000 tracker telemetry
//!
//! Transport envelopes carry a base64 uplink JSON whose `data` field holds the
//! tracker's binary frame. [`decoder`] turns that frame into sensor readings and
//! [`pipeline`] derives the device status, beacon snapshot and beacon log
//! writes for the [`store`].

pub mod config;
pub mod decoder;
pub mod envelope;
pub mod errors;
pub mod keys;
pub mod models;
pub mod mqtt;
pub mod pipeline;
pub mod store;
