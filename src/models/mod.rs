mod payment;
mod plan;
mod subscription;
mod user;

pub use payment::*;
pub use plan::*;
pub use subscription::*;
pub use user::*;
