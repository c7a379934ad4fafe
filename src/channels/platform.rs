//! Catalogue of supported platforms and what each one can do.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ChannelError;

/// A live-streaming or social platform the proxy can ingest from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    Douyin,
    Kuaishou,
    Wechat,
    Xiaohongshu,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Douyin,
        Platform::Kuaishou,
        Platform::Wechat,
        Platform::Xiaohongshu,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Douyin => "douyin",
            Platform::Kuaishou => "kuaishou",
            Platform::Wechat => "wechat",
            Platform::Xiaohongshu => "xiaohongshu",
        }
    }

    /// Whether the platform has an open REST API for pulling items and
    /// posting replies.
    pub fn has_open_api(self) -> bool {
        matches!(self, Platform::Douyin)
    }

    /// Whether the platform has a real-time push endpoint.
    pub fn has_push(self) -> bool {
        matches!(self, Platform::Douyin)
    }

    /// Tick interval of the synthetic generator.
    pub fn synthetic_interval(self) -> Duration {
        match self {
            Platform::Douyin => Duration::from_secs(5),
            Platform::Kuaishou => Duration::from_secs(8),
            Platform::Wechat => Duration::from_secs(10),
            Platform::Xiaohongshu => Duration::from_secs(12),
        }
    }

    /// Example viewer names used by the synthetic generator.
    pub fn sample_users(self) -> &'static [&'static str] {
        match self {
            Platform::Douyin => &["张先生", "李女士", "王总", "刘小姐", "陈老板"],
            Platform::Kuaishou => &["快手用户1", "快手用户2", "快手用户3", "快手用户4"],
            Platform::Wechat => &["微信用户1", "微信用户2", "微信用户3"],
            Platform::Xiaohongshu => &[
                "小红书用户1",
                "小红书用户2",
                "小红书用户3",
                "小红书用户4",
                "小红书用户5",
            ],
        }
    }

    /// Example comment texts used by the synthetic generator.
    pub fn sample_comments(self) -> &'static [&'static str] {
        match self {
            Platform::Douyin => &[
                "这个产品价格是多少？",
                "质量怎么样？我想了解一下",
                "怎么购买？有优惠吗？",
                "发货快吗？大概几天到？",
                "支持退货吗？有质保吗？",
                "性价比高吗？推荐购买吗？",
                "有现货吗？需要等多久？",
                "微信多少？想详细咨询",
                "客服在吗？有问题想问",
                "这个好用吗？值得买吗？",
            ],
            Platform::Kuaishou => &["这个看起来不错", "多少钱？", "怎么买？", "有现货吗？", "包邮吗？"],
            Platform::Wechat => &["这个产品好用吗？", "价格多少？", "怎么联系？", "有优惠吗？", "质量如何？"],
            Platform::Xiaohongshu => &[
                "这个看起来很棒！",
                "在哪里买？",
                "价格怎么样？",
                "有推荐吗？",
                "效果如何？",
                "值得购买吗？",
            ],
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str() == s.trim().to_ascii_lowercase())
            .ok_or_else(|| ChannelError::UnsupportedPlatform(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_tags() {
        assert_eq!("douyin".parse::<Platform>().unwrap(), Platform::Douyin);
        assert_eq!(" WeChat ".parse::<Platform>().unwrap(), Platform::Wechat);
        for p in Platform::ALL {
            assert_eq!(p.as_str().parse::<Platform>().unwrap(), p);
        }
    }

    #[test]
    fn test_unknown_tag_is_unsupported() {
        let err = "tiktok".parse::<Platform>().unwrap_err();
        assert!(matches!(err, ChannelError::UnsupportedPlatform(tag) if tag == "tiktok"));
    }

    #[test]
    fn test_only_douyin_has_api() {
        assert!(Platform::Douyin.has_open_api());
        assert!(Platform::Douyin.has_push());
        for p in [Platform::Kuaishou, Platform::Wechat, Platform::Xiaohongshu] {
            assert!(!p.has_open_api());
            assert!(!p.has_push());
        }
    }

    #[test]
    fn test_synthetic_intervals() {
        assert_eq!(Platform::Douyin.synthetic_interval(), Duration::from_secs(5));
        assert_eq!(Platform::Kuaishou.synthetic_interval(), Duration::from_secs(8));
        assert_eq!(Platform::Wechat.synthetic_interval(), Duration::from_secs(10));
        assert_eq!(Platform::Xiaohongshu.synthetic_interval(), Duration::from_secs(12));
    }

    #[test]
    fn test_pools_are_non_empty() {
        for p in Platform::ALL {
            assert!(!p.sample_users().is_empty());
            assert!(!p.sample_comments().is_empty());
        }
    }
}
