pub mod chapa;

pub use chapa::{ChapaConfig, ChapaGateway};
