use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// 解码形如 `=?us-ascii?B?<base64>?=` 的发件人名称（前后缀可省略）。
///
/// 任何一步失败都原样返回输入。
pub fn decode_from_name(encoded: &str) -> String {
    let cleaned = encoded.strip_prefix("=?us-ascii?B?").unwrap_or(encoded);
    let cleaned = cleaned.strip_suffix("?=").unwrap_or(cleaned);

    STANDARD
        .decode(cleaned.trim())
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| encoded.to_string())
}
