//! Tender round ("第二次", "(第3批)", "二期") extraction from raw titles.

use std::sync::OnceLock;

use regex::Regex;

fn round_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"[（(]第?([一二三四五六七八九十\d]+)[次批期][）)]",
            r"第([一二三四五六七八九十\d]+)[次批期]",
            r"([一二三四五六七八九十]+)[次批期]",
        ]
        .map(|p| Regex::new(p).expect("round pattern compiles"))
    })
}

fn cn_digit(c: char) -> Option<u32> {
    Some(match c {
        '一' => 1,
        '二' => 2,
        '三' => 3,
        '四' => 4,
        '五' => 5,
        '六' => 6,
        '七' => 7,
        '八' => 8,
        '九' => 9,
        _ => return None,
    })
}

/// Chinese numerals up to 九十九 or ASCII digits; anything else is 1.
fn numeral_to_round(raw: &str) -> u32 {
    if raw.chars().all(|c| c.is_ascii_digit()) {
        return raw.parse::<u32>().map(|n| n.max(1)).unwrap_or(1);
    }
    let chars: Vec<char> = raw.chars().collect();
    let parsed = match chars.as_slice() {
        [d] => cn_digit(*d).or((*d == '十').then_some(10)),
        ['十', d] => cn_digit(*d).map(|n| 10 + n),
        [d, '十'] => cn_digit(*d).map(|n| n * 10),
        [t, '十', d] => cn_digit(*t).zip(cn_digit(*d)).map(|(t, d)| t * 10 + d),
        _ => None,
    };
    parsed.unwrap_or(1).max(1)
}

/// Round number parsed from a title, 1 when none is present.
pub fn parse_tender_round(title: &str) -> u32 {
    let title = title.trim();
    round_patterns()
        .iter()
        .find_map(|pattern| pattern.captures(title))
        .and_then(|caps| caps.get(1))
        .map(|m| numeral_to_round(m.as_str()))
        .unwrap_or(1)
}
