//! 主题模板渲染。
//!
//! 支持的占位符：
//! - `{email}`：收件人地址
//! - `{randomID:N}`：N 位字母数字
//! - `{randomUppercase:N}` / `{randomLowercase:N}` / `{randomNumber:N}`
//!
//! 每个占位符出现一次就生成一次新的随机串；N 缺省或非法时使用各自的默认长度。

use crate::util::id::{Charset, random_string};

const MAX_RANDOM_LEN: usize = 64;

pub fn render_subject(template: &str, email: &str) -> String {
    let mut out = String::with_capacity(template.len() + email.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[open..]);
            return out;
        };

        let token = &after[..close];
        match expand(token, email) {
            Some(v) => out.push_str(&v),
            None => {
                out.push('{');
                out.push_str(token);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }

    out.push_str(rest);
    out
}

fn expand(token: &str, email: &str) -> Option<String> {
    if token == "email" {
        return Some(email.to_string());
    }

    let (name, len) = match token.split_once(':') {
        Some((name, len)) => (name, len.trim().parse::<usize>().ok()),
        None => (token, None),
    };
    let (charset, default_len) = match name {
        "randomID" => (Charset::Alphanumeric, 7),
        "randomUppercase" => (Charset::Uppercase, 5),
        "randomLowercase" => (Charset::Lowercase, 4),
        "randomNumber" => (Charset::Numeric, 10),
        _ => return None,
    };
    let len = len.unwrap_or(default_len).min(MAX_RANDOM_LEN);
    Some(random_string(len, charset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_email_and_random_tokens() {
        let out = render_subject("Hello {email} - ID: {randomID:7}", "a@b.co");
        assert!(out.starts_with("Hello a@b.co - ID: "));
        let id = out.trim_start_matches("Hello a@b.co - ID: ");
        assert_eq!(id.len(), 7);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn honours_requested_lengths() {
        let out = render_subject("{randomNumber:3}|{randomUppercase:2}|{randomLowercase:6}", "x");
        let parts: Vec<&str> = out.split('|').collect();
        assert_eq!(parts[0].len(), 3);
        assert!(parts[0].chars().all(|c| c.is_ascii_digit()));
        assert_eq!(parts[1].len(), 2);
        assert_eq!(parts[2].len(), 6);
    }

    #[test]
    fn unknown_tokens_and_unclosed_braces_are_kept() {
        assert_eq!(render_subject("{unknown} {email", "x"), "{unknown} {email");
        assert_eq!(render_subject("no tokens", "x"), "no tokens");
    }

    #[test]
    fn random_length_is_capped() {
        let out = render_subject("{randomID:5000}", "x");
        assert_eq!(out.len(), MAX_RANDOM_LEN);
    }
}
