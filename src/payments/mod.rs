pub mod error;
pub mod provider;
pub mod providers;
pub mod reference;
pub mod types;
pub mod utils;

pub use error::{GatewayError, GatewayResult, PaymentError, PaymentResult};
pub use provider::PaymentGateway;
pub use reference::{PrefixedReferenceGenerator, ReferenceGenerator};
pub use types::*;
