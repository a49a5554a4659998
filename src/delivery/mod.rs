//! 单次投递：调用 WebApp 并把结果分类为 Delivered / QuotaExceeded / OtherFailure。

mod client;
mod types;

pub use client::{Deliverer, WebAppClient};
pub use types::{DeliveryOutcome, MailUnit};
