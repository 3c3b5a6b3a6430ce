mod aggregator;
pub mod events;
pub mod model;
mod service;

pub use aggregator::Aggregator;
pub use service::RepositoryService;
