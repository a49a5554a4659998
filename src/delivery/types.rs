/// 一封待投递的邮件（批量请求里的一个单元）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailUnit {
    pub to: String,
    pub subject: String,
    pub from: String,
}

/// 单次投递的结果分类。
///
/// 三种结果对账本的影响完全不同：
/// - Delivered：计数 +1，达到上限后标记耗尽
/// - QuotaExceeded：端点自报额度耗尽，立即标记，不计数
/// - OtherFailure：网络/非额度错误，账本不变
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    QuotaExceeded(String),
    OtherFailure(String),
}
