pub mod storage_gateway;

pub use storage_gateway::StorageGateway;
