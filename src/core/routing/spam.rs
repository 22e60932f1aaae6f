//! 垃圾信息识别模块
//!
//! 基于关键词与正则模式的分类器，外加启发式特征：
//! 多个 URL、多个 8 位以上数字串、过量的感叹号/问号。

use regex::Regex;
use tracing::debug;

/// 垃圾信息关键词
const SPAM_KEYWORDS: &[&str] = &[
    "spam",
    "publicidad",
    "promo",
    "gana dinero",
    "investment",
    "casino",
    "lottery",
    "premio",
    "ganaste",
    "bitcoin",
    "crypto",
    "prestamo",
    "loan",
];

/// 垃圾信息分类器
pub struct SpamClassifier {
    /// 邮箱地址模式
    email_re: Regex,
    /// URL 模式
    url_re: Regex,
    /// http(s) 链接模式（用于多链接计数）
    http_re: Regex,
    /// 8 位以上数字串模式
    digits_re: Regex,
}

impl SpamClassifier {
    /// 创建分类器
    ///
    /// 模式均为固定字面量，编译失败属于程序缺陷。
    pub fn new() -> Self {
        Self {
            email_re: Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b")
                .expect("邮箱正则编译失败"),
            url_re: Regex::new(r"(?:https?://)?(?:[\w-]+\.)+[a-zA-Z]{2,}(?:/\S*)?")
                .expect("URL 正则编译失败"),
            http_re: Regex::new(r"https?://").expect("链接正则编译失败"),
            digits_re: Regex::new(r"\b\d{8,}\b").expect("数字串正则编译失败"),
        }
    }

    /// 判断一条消息是否为垃圾信息
    pub fn is_spam(&self, text: &str) -> bool {
        let lower = text.to_lowercase();

        let has_keyword = SPAM_KEYWORDS.iter().any(|kw| lower.contains(kw));
        let matches_pattern = self.email_re.is_match(&lower) || self.url_re.is_match(&lower);

        let multiple_urls = self.http_re.find_iter(&lower).count() > 1;
        let multiple_number_runs = self.digits_re.find_iter(&lower).count() > 1;
        let excessive_punctuation = lower.chars().filter(|c| *c == '!' || *c == '?').count() > 5;

        let spam = has_keyword
            || matches_pattern
            || multiple_urls
            || multiple_number_runs
            || excessive_punctuation;

        if spam {
            debug!(
                keyword = has_keyword,
                pattern = matches_pattern,
                urls = multiple_urls,
                numbers = multiple_number_runs,
                punctuation = excessive_punctuation,
                "消息被识别为垃圾信息"
            );
        }

        spam
    }
}

impl Default for SpamClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_detection() {
        let classifier = SpamClassifier::new();

        assert!(classifier.is_spam("¡Ganaste un premio!"));
        assert!(classifier.is_spam("invierte en BITCOIN ya"));
        assert!(!classifier.is_spam("¿Cuánto cuesta la laptop HP?"));
    }

    #[test]
    fn test_email_and_url_patterns() {
        let classifier = SpamClassifier::new();

        assert!(classifier.is_spam("escríbeme a ofertas@dudoso.com"));
        assert!(classifier.is_spam("visita mi-sitio-raro.xyz/ofertas"));
    }

    #[test]
    fn test_heuristics() {
        let classifier = SpamClassifier::new();

        assert!(classifier.is_spam("llama al 61234567890 o al 69876543210"));
        assert!(classifier.is_spam("hola!!! me escuchas??? responde!!!"));
        assert!(!classifier.is_spam("hola, ¿tienen laptops en stock?"));
    }
}
