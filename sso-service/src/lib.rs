pub mod config;
pub mod db;
pub mod gateway;
pub mod grpc;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod startup;
pub mod storage;
pub mod utils;

pub use startup::Application;
