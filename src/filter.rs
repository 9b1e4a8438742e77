use crate::types::NewsItem;
use tracing::debug;

/// Keywords that front-load a story: exclusive reports, contract wins,
/// M&A, regulatory approvals and similar market-moving signals.
pub const DEFAULT_PRIORITY_KEYWORDS: &[&str] = &[
    "단독",
    "체결",
    "수주",
    "인수",
    "합병",
    "공시",
    "특징주",
    "급등",
    "어닝 서프라이즈",
    "흑자 전환",
    "세계 최초",
    "FDA 승인",
    "개발 성공",
    "정부 발표",
];

/// Keywords that veto a story outright: market-close recaps, obituaries,
/// event/PR announcements and other noise.
pub const DEFAULT_EXCLUDE_KEYWORDS: &[&str] = &[
    "마감",
    "시황",
    "코스피",
    "코스닥",
    "환율",
    "유가",
    "인사",
    "부고",
    "동정",
    "게시판",
    "캠페인",
    "모집",
    "개최",
    "이벤트",
    "할인",
    "포토",
    "영상",
    "오늘의 운세",
    "날씨",
    "기자수첩",
];

/// Classifies and reorders raw candidate items using two static keyword
/// sets. Exclusion is a hard veto and always wins over prioritization.
#[derive(Debug, Clone)]
pub struct KeywordFilter {
    exclude: Vec<String>,
    prioritize: Vec<String>,
}

impl KeywordFilter {
    pub fn new(exclude: Vec<String>, prioritize: Vec<String>) -> Self {
        Self {
            exclude: exclude.into_iter().map(|k| k.to_lowercase()).collect(),
            prioritize: prioritize.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Reduce, reorder and truncate raw items:
    /// 1. drop any item whose title+description contains an exclude keyword
    /// 2. split survivors into priority/normal by the prioritize set
    /// 3. emit priority items first, each group in original order
    /// 4. truncate to `limit`
    pub fn select(&self, raw: Vec<NewsItem>, limit: usize) -> Vec<NewsItem> {
        let mut priority = Vec::new();
        let mut normal = Vec::new();
        let total = raw.len();

        for item in raw {
            let haystack = haystack(&item);
            if matches_any(&haystack, &self.exclude) {
                debug!(title = %item.title, "Excluded item by keyword");
                continue;
            }
            if matches_any(&haystack, &self.prioritize) {
                priority.push(item);
            } else {
                normal.push(item);
            }
        }

        debug!(
            total,
            priority = priority.len(),
            normal = normal.len(),
            limit,
            "Keyword filter pass complete"
        );

        let mut selected = priority;
        selected.extend(normal);
        selected.truncate(limit);
        selected
    }
}

impl Default for KeywordFilter {
    fn default() -> Self {
        Self::new(
            DEFAULT_EXCLUDE_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            DEFAULT_PRIORITY_KEYWORDS.iter().map(|k| k.to_string()).collect(),
        )
    }
}

fn haystack(item: &NewsItem) -> String {
    format!("{} {}", item.title, item.description).to_lowercase()
}

fn matches_any(haystack: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| haystack.contains(k.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(title: &str, description: &str) -> NewsItem {
        NewsItem::new(
            title.to_string(),
            format!("https://example.com/{}", title),
            "Mon, 06 May 2024 09:00:00 +0900".to_string(),
            description.to_string(),
        )
    }

    fn filter() -> KeywordFilter {
        KeywordFilter::new(
            vec!["weather".to_string(), "obituary".to_string(), "recap".to_string()],
            vec!["exclusive".to_string(), "merger".to_string()],
        )
    }

    #[test]
    fn exclusion_beats_prioritization() {
        let raw = vec![item("Exclusive: market recap", "both keywords present")];
        let out = filter().select(raw, 10);
        assert!(out.is_empty());
    }

    #[test]
    fn exclusion_is_case_insensitive_and_checks_description() {
        let raw = vec![
            item("Morning update", "Today's WEATHER will be sunny"),
            item("Chipmaker earnings", "strong quarter"),
        ];
        let out = filter().select(raw, 10);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Chipmaker earnings");
    }

    #[test]
    fn priority_items_come_first_in_original_relative_order() {
        let raw = vec![
            item("normal one", "plain"),
            item("Exclusive deal signed", "scoop"),
            item("normal two", "plain"),
            item("Merger announced", "big merger"),
        ];
        let out = filter().select(raw, 10);
        let titles: Vec<_> = out.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Exclusive deal signed",
                "Merger announced",
                "normal one",
                "normal two"
            ]
        );
    }

    #[test]
    fn truncates_to_limit_after_exclusion() {
        let raw: Vec<_> = (0..8).map(|i| item(&format!("story {}", i), "plain")).collect();
        let out = filter().select(raw, 3);
        assert_eq!(out.len(), 3);

        let raw: Vec<_> = (0..2).map(|i| item(&format!("story {}", i), "plain")).collect();
        let out = filter().select(raw, 5);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn ten_items_three_excluded_two_priority_limit_five() {
        let raw = vec![
            item("a recap of the day", "x"),   // excluded
            item("normal 1", "x"),
            item("weather watch", "x"),        // excluded
            item("Exclusive scoop", "x"),      // priority
            item("normal 2", "x"),
            item("normal 3", "x"),
            item("obituary notice", "x"),      // excluded
            item("Merger talks", "x"),         // priority
            item("normal 4", "x"),
            item("normal 5", "x"),
        ];
        let out = filter().select(raw, 5);
        let titles: Vec<_> = out.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Exclusive scoop", "Merger talks", "normal 1", "normal 2", "normal 3"]
        );
    }

    #[test]
    fn default_sets_are_nonempty_and_disjoint() {
        let f = KeywordFilter::default();
        assert!(!f.exclude.is_empty());
        assert!(!f.prioritize.is_empty());
        for k in &f.prioritize {
            assert!(!f.exclude.contains(k));
        }
    }
}
