pub mod config;
pub mod contract;
pub mod convert;
pub mod credentials;
pub mod error;
pub mod inference;
pub mod model;
pub mod path;
pub mod query;
pub mod remote;
pub mod session;
pub mod storage;
pub mod temporal;
pub mod traffic;
pub mod transport;
pub mod view;
pub mod watchdog;
pub mod writer;
