pub mod error;
pub mod scheduled_executor;
pub mod text;

pub use error::{AppError, AppResult};
pub use scheduled_executor::{ScheduledExecutor, ScheduledTask};
