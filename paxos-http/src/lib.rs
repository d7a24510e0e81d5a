pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod network;
pub mod paxos;
pub mod run;
