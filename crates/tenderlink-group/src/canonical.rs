//! Title canonicalisation: strips structural noise so variants of one title compare equal.

use std::sync::OnceLock;

use regex::Regex;

const PREFIX_SEPARATORS: &[char] = &['-', '_', '|', ':', '/', ' '];

fn project_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}[-_/.－—]+[A-Za-z]+[-_/.－—]+\d+[-_/.－—:：\s]+")
            .expect("project number pattern compiles")
    })
}

/// Folds full-width ASCII forms to half-width, turns control characters into spaces,
/// collapses whitespace runs and trims.
pub fn normalize_text(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            '\u{3000}' => ' ',
            c if c.is_control() => ' ',
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0).unwrap_or(c),
            _ => c,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Comparison key for a pre-normalised project name.
///
/// Rules run in a fixed order: leading project number, then customer prefix, then
/// width/whitespace normalisation. A strip that would empty the string is skipped.
pub fn canonicalize(project_name_core: &str, customer: &str) -> String {
    let without_number = strip_project_number(project_name_core);
    let without_customer = strip_customer_prefix(without_number, customer);
    normalize_text(&without_customer)
}

fn strip_project_number(input: &str) -> &str {
    match project_number_pattern().find(input) {
        Some(m) if !normalize_text(&input[m.end()..]).is_empty() => &input[m.end()..],
        _ => input,
    }
}

fn strip_customer_prefix(input: &str, customer: &str) -> String {
    let customer = normalize_text(customer);
    if customer.is_empty() {
        return input.to_string();
    }
    let normalized = normalize_text(input);
    match normalized.strip_prefix(customer.as_str()) {
        Some(rest) => {
            let rest = rest.trim_start_matches(PREFIX_SEPARATORS);
            if rest.is_empty() {
                input.to_string()
            } else {
                rest.to_string()
            }
        }
        None => input.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_width_and_whitespace_are_normalized() {
        assert_eq!(normalize_text("  ＡＩ平台　　建设（二期） "), "AI平台 建设(二期)");
        assert_eq!(normalize_text("门诊楼\0装修\n工程"), "门诊楼 装修 工程");
    }

    #[test]
    fn leading_project_number_is_removed() {
        assert_eq!(canonicalize("2024-ZB-0012 智慧园区建设", ""), "智慧园区建设");
        assert_eq!(canonicalize("2023_GK_17-数据中心运维", ""), "数据中心运维");
    }

    #[test]
    fn project_number_only_in_the_middle_is_kept() {
        assert_eq!(
            canonicalize("智慧园区 2024-ZB-0012 建设", ""),
            "智慧园区 2024-ZB-0012 建设"
        );
    }

    #[test]
    fn strip_that_would_empty_the_core_is_skipped() {
        assert_eq!(canonicalize("2024-ZB-0012 ", ""), "2024-ZB-0012");
        assert_eq!(canonicalize("某市人民医院", "某市人民医院"), "某市人民医院");
    }

    #[test]
    fn customer_prefix_is_removed_after_width_folding() {
        assert_eq!(
            canonicalize("某市人民医院（东院）信息化改造", "某市人民医院(东院)"),
            "信息化改造"
        );
        assert_eq!(canonicalize("某市医院-门诊楼装修", "某市医院"), "门诊楼装修");
    }

    #[test]
    fn project_number_is_stripped_before_customer_prefix() {
        assert_eq!(canonicalize("2024-ZB-0012-某市医院信息化", "某市医院"), "信息化");
        // A number behind the customer name is not leading, so it survives.
        assert_ne!(canonicalize("某市医院2024-ZB-0012-信息化", "某市医院"), "信息化");
    }

    #[test]
    fn degenerate_input_is_total() {
        assert_eq!(canonicalize("", "某市医院"), "");
        assert_eq!(canonicalize("   ", ""), "");
    }
}
