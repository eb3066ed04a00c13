pub mod beaker_server;
