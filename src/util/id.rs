use uuid::Uuid;

/// 随机字符集（主题模板占位符使用）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    Alphanumeric,
    Uppercase,
    Lowercase,
    Numeric,
}

impl Charset {
    fn chars(self) -> &'static [u8] {
        match self {
            Self::Alphanumeric => b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789",
            Self::Uppercase => b"ABCDEFGHIJKLMNOPQRSTUVWXYZ",
            Self::Lowercase => b"abcdefghijklmnopqrstuvwxyz",
            Self::Numeric => b"0123456789",
        }
    }
}

pub fn random_string(len: usize, charset: Charset) -> String {
    let chars = charset.chars();
    let mut out = String::with_capacity(len);
    for _ in 0..len {
        let idx = (random_u64() as usize) % chars.len();
        out.push(chars[idx] as char);
    }
    out
}

fn random_u64() -> u64 {
    // 复用 UUID v4 的随机源，避免额外引入 rand/getrandom 依赖。
    let b = *Uuid::new_v4().as_bytes();
    u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
