pub mod http_client;
pub mod http_server;
pub mod simulation;
