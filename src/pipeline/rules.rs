//! Deterministic reply rules and lead scoring.
//!
//! Rule matching is an ordered, case-sensitive substring scan: the first
//! keyword in table order that occurs anywhere in the content wins, with
//! no preference for longer keywords.

use crate::event::{Event, EventType};

/// Reply used when no keyword matches.
pub const GENERIC_REPLY: &str = "感谢您的关注，欢迎咨询！";

/// Reply for keywords that have no dedicated text.
const KEYWORD_DEFAULT_REPLY: &str = "感谢您的咨询，请私信了解详情！";

/// Keywords that mark purchase intent when scoring comments.
pub const INTENT_KEYWORDS: [&str; 6] = ["价格", "购买", "咨询", "多少钱", "price", "buy"];

/// `(keyword, reply)` in match order.
const RULES: &[(&str, &str)] = &[
    ("价格", "您好！价格信息请关注私信，我们会尽快发送详细报价单。"),
    ("多少钱", "感谢咨询！价格请私信沟通，为您提供最优报价。"),
    ("优惠", "您好！当前有优惠活动，详情请私信了解。"),
    ("折扣", KEYWORD_DEFAULT_REPLY),
    ("便宜", KEYWORD_DEFAULT_REPLY),
    ("购买", "感谢关注！购买请添加微信：[微信号]，我们有专业客服为您服务。"),
    ("买", "欢迎购买！添加微信了解更多详情：[微信号]"),
    ("下单", KEYWORD_DEFAULT_REPLY),
    ("订购", KEYWORD_DEFAULT_REPLY),
    ("好用", KEYWORD_DEFAULT_REPLY),
    ("质量", "您好！我们的产品质量保证，有完善的售后服务。详情请私信咨询。"),
    ("好", KEYWORD_DEFAULT_REPLY),
    ("坏", KEYWORD_DEFAULT_REPLY),
    ("发货", "您好！我们承诺24小时内发货，一般3-5天到货。"),
    ("快递", KEYWORD_DEFAULT_REPLY),
    ("几天", KEYWORD_DEFAULT_REPLY),
    ("到货", KEYWORD_DEFAULT_REPLY),
    ("退货", "您好！我们支持7天无理由退货，有完善的售后服务保障。"),
    ("售后", KEYWORD_DEFAULT_REPLY),
    ("保修", KEYWORD_DEFAULT_REPLY),
    ("质保", KEYWORD_DEFAULT_REPLY),
    ("微信", "感谢关注！我们的微信是：[微信号]，添加后为您提供更详细服务。"),
    ("联系", "您好！可以通过私信或添加微信联系我们的客服团队。"),
    ("咨询", KEYWORD_DEFAULT_REPLY),
    ("客服", "您好！客服在线为您服务，有问题随时咨询。"),
    ("price", "Hi! We'll send you the full price list by private message."),
    ("discount", "There's a promotion running right now, message us for details."),
    ("buy", "Thanks for your interest! Add us on WeChat to place an order: [wechat id]"),
    ("quality", "Quality is guaranteed and backed by full after-sales support."),
    ("shipping", "Orders ship within 24 hours and usually arrive in 3-5 days."),
    ("return", "We accept returns within 7 days, no questions asked."),
    ("wechat", "Our WeChat is [wechat id], add us for one-on-one service."),
    ("contact", "You can reach our support team by private message or WeChat."),
    ("support", "Support is online now, feel free to ask anything."),
];

/// Canned reply for `content`: the first matching keyword's text, else
/// `GENERIC_REPLY`.
pub fn rule_reply(content: &str) -> &'static str {
    RULES
        .iter()
        .find(|(keyword, _)| content.contains(keyword))
        .map(|(_, reply)| *reply)
        .unwrap_or(GENERIC_REPLY)
}

pub fn has_purchase_intent(content: &str) -> bool {
    INTENT_KEYWORDS.iter().any(|k| content.contains(k))
}

/// Lead score of an event. Pure.
pub fn lead_score(event: &Event) -> u32 {
    match event.event_type {
        EventType::Enter => 1,
        EventType::Comment => {
            if event.text().is_some_and(has_purchase_intent) {
                6
            } else {
                3
            }
        }
        EventType::Follow => 5,
        EventType::Gift => 7,
        EventType::Like | EventType::VideoComment | EventType::PrivateMessage => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType, content: Option<&str>) -> Event {
        let evt = Event::new(event_type, "douyin", "u1", "Alice").with_room("123");
        match content {
            Some(c) => evt.with_content(c),
            None => evt,
        }
    }

    #[test]
    fn test_scores() {
        assert_eq!(lead_score(&event(EventType::Enter, None)), 1);
        assert_eq!(lead_score(&event(EventType::Follow, None)), 5);
        assert_eq!(lead_score(&event(EventType::Gift, None)), 7);
        assert_eq!(lead_score(&event(EventType::Like, None)), 0);
        assert_eq!(lead_score(&event(EventType::Comment, Some("what is the price"))), 6);
        assert_eq!(lead_score(&event(EventType::Comment, Some("这个多少钱？"))), 6);
        assert_eq!(lead_score(&event(EventType::Comment, Some("nice stream"))), 3);
        assert_eq!(lead_score(&event(EventType::VideoComment, Some("price?"))), 0);
        assert_eq!(lead_score(&event(EventType::PrivateMessage, Some("buy"))), 0);
    }

    #[test]
    fn test_rule_reply_matches_keyword() {
        assert_eq!(
            rule_reply("发货快吗？"),
            "您好！我们承诺24小时内发货，一般3-5天到货。"
        );
        assert_eq!(
            rule_reply("do you offer a discount"),
            "There's a promotion running right now, message us for details."
        );
    }

    #[test]
    fn test_rule_reply_first_match_in_table_order() {
        // "价格" precedes "购买" in the table even though "购买" comes
        // first in the text.
        assert_eq!(
            rule_reply("购买的价格"),
            "您好！价格信息请关注私信，我们会尽快发送详细报价单。"
        );
        // "买" is not preferred over the longer "购买".
        assert_eq!(
            rule_reply("怎么购买"),
            "感谢关注！购买请添加微信：[微信号]，我们有专业客服为您服务。"
        );
    }

    #[test]
    fn test_rule_reply_keyword_without_dedicated_text() {
        assert_eq!(rule_reply("有折扣吗"), KEYWORD_DEFAULT_REPLY);
    }

    #[test]
    fn test_rule_reply_is_case_sensitive() {
        assert_eq!(rule_reply("PRICE?"), GENERIC_REPLY);
    }

    #[test]
    fn test_rule_reply_generic_fallback() {
        assert_eq!(rule_reply("hello there"), GENERIC_REPLY);
        assert_eq!(rule_reply(""), GENERIC_REPLY);
    }
}
