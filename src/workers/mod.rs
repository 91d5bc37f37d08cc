pub mod notification_worker;
pub mod payment_sweeper;

pub use notification_worker::NotificationWorker;
pub use payment_sweeper::{PaymentSweeper, SweepConfig, SweepReport};
