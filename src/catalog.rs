use std::cmp::Ordering;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

pub const CATALOG_FILE: &str = "comic_db.json";
pub const ABOUT_FILE: &str = "about_the_editor.txt";
pub const EDITOR_PHOTO_FILE: &str = "editor_photo.png";
pub const DOCUMENT_FILE: &str = "index.html";
const IMAGE_DIR: &str = "img/";
const THUMB_DIR: &str = "thumbnail/";

static ENGLISH_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-{6}\s*[\r\n]+English Version\s*[\r\n]+-{6}").expect("english marker regex")
});
static CHINESE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"-{6}\s*[\r\n]+Chinese Version\s*[\r\n]+-{6}").expect("chinese marker regex")
});

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog is not a list of issue records: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("catalog contains duplicate issue id {0}")]
    DuplicateIssue(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Lang {
    #[default]
    #[serde(rename = "en")]
    English,
    #[serde(rename = "ch")]
    Chinese,
}

impl Lang {
    pub fn code(self) -> &'static str {
        match self {
            Lang::English => "en",
            Lang::Chinese => "ch",
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Lang::English => Lang::Chinese,
            Lang::Chinese => Lang::English,
        }
    }

    /// Picks the English or Chinese variant of a pair.
    pub fn pick<T>(self, en: T, ch: T) -> T {
        match self {
            Lang::English => en,
            Lang::Chinese => ch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn toggled(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// One published chapter with its bilingual assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub issue_id: i64,
    pub date: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub title_en: String,
    #[serde(default)]
    pub title_ch: String,
    #[serde(default)]
    pub text_en: String,
    #[serde(default)]
    pub text_ch: String,
    #[serde(default)]
    pub comics_en: Vec<String>,
    #[serde(default)]
    pub comics_ch: Vec<String>,
    #[serde(default)]
    pub thumbnail_en: String,
    #[serde(default)]
    pub thumbnail_ch: String,
    #[serde(default)]
    pub url: String,
}

impl Issue {
    pub fn title(&self, lang: Lang) -> &str {
        lang.pick(&self.title_en, &self.title_ch)
    }

    pub fn description(&self, lang: Lang) -> &str {
        lang.pick(&self.text_en, &self.text_ch)
    }

    pub fn pages(&self, lang: Lang) -> &[String] {
        lang.pick(&self.comics_en, &self.comics_ch)
    }

    pub fn page_count(&self, lang: Lang) -> usize {
        self.pages(lang).len()
    }

    /// Comic pages plus the intro page.
    pub fn total_pages(&self, lang: Lang) -> usize {
        self.page_count(lang) + 1
    }

    pub fn thumbnail(&self, lang: Lang) -> &str {
        lang.pick(&self.thumbnail_en, &self.thumbnail_ch)
    }

    /// Library card summary: the first 120 characters, trimmed, with an
    /// ellipsis appended.
    pub fn summary(&self, lang: Lang) -> String {
        let head: String = self.description(lang).chars().take(120).collect();
        format!("{}...", head.trim())
    }
}

/// Issues in catalog order. Read-only once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    issues: Vec<Issue>,
}

impl Catalog {
    pub fn new(issues: Vec<Issue>) -> Result<Self, CatalogError> {
        for (idx, issue) in issues.iter().enumerate() {
            if issues[..idx].iter().any(|seen| seen.issue_id == issue.issue_id) {
                return Err(CatalogError::DuplicateIssue(issue.issue_id));
            }
        }
        Ok(Self { issues })
    }

    pub fn from_json(raw: &[u8]) -> Result<Self, CatalogError> {
        let issues: Vec<Issue> = serde_json::from_slice(raw)?;
        Self::new(issues)
    }

    pub fn issues(&self) -> &[Issue] {
        &self.issues
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn issue(&self, id: i64) -> Option<&Issue> {
        self.issues.iter().find(|issue| issue.issue_id == id)
    }

    /// All issues ordered by date. The sort is stable, so equal dates keep
    /// catalog order in both directions.
    pub fn sorted(&self, order: SortOrder) -> Vec<&Issue> {
        let mut sorted: Vec<&Issue> = self.issues.iter().collect();
        sorted.sort_by(|a, b| {
            let result: Ordering = a.date.cmp(&b.date);
            match order {
                SortOrder::Asc => result,
                SortOrder::Desc => result.reverse(),
            }
        });
        sorted
    }

    /// The issue after `id` in catalog order, wrapping to the first. An
    /// unknown id yields the first issue.
    pub fn next_issue(&self, id: i64) -> Option<&Issue> {
        if self.issues.is_empty() {
            return None;
        }
        match self.issues.iter().position(|issue| issue.issue_id == id) {
            Some(idx) => self.issues.get((idx + 1) % self.issues.len()),
            None => self.issues.first(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AboutText {
    pub ch: String,
    pub en: String,
}

impl AboutText {
    pub fn get(&self, lang: Lang) -> &str {
        lang.pick(&self.en, &self.ch)
    }
}

/// Splits the editor note into its Chinese and English halves. Without the
/// English marker the whole text is treated as Chinese.
pub fn parse_about_text(raw: &str) -> AboutText {
    let mut parts = ENGLISH_MARKER.splitn(raw, 3);
    let ch_raw = parts.next().unwrap_or_default();
    let en_raw = parts.next().unwrap_or_default();
    let ch = CHINESE_MARKER.replace(ch_raw, "");
    AboutText {
        ch: ch.trim().to_string(),
        en: en_raw.trim().to_string(),
    }
}

/// Resolves site-relative asset locations against the deployment base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPaths {
    base: Url,
}

impl AssetPaths {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let trimmed = match base.path().rfind('/') {
                Some(idx) => base.path()[..=idx].to_string(),
                None => "/".to_string(),
            };
            base.set_path(&trimmed);
        }
        base.set_query(None);
        base.set_fragment(None);
        Ok(Self { base })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn resolve(&self, relative: &str) -> String {
        self.base
            .join(relative)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| format!("{}{}", self.base, relative))
    }

    pub fn catalog(&self) -> String {
        self.resolve(CATALOG_FILE)
    }

    pub fn about(&self) -> String {
        self.resolve(ABOUT_FILE)
    }

    pub fn editor_photo(&self) -> String {
        self.resolve(EDITOR_PHOTO_FILE)
    }

    pub fn document(&self) -> String {
        self.resolve(DOCUMENT_FILE)
    }

    pub fn page_image(&self, issue_id: i64, file: &str) -> String {
        self.resolve(&format!("{IMAGE_DIR}issue{issue_id}/{file}"))
    }

    pub fn thumbnail(&self, file: &str) -> String {
        self.resolve(&format!("{THUMB_DIR}{file}"))
    }

    /// Page image URLs for `issue` in `lang`, in reading order.
    pub fn pages(&self, issue: &Issue, lang: Lang) -> Vec<String> {
        issue
            .pages(lang)
            .iter()
            .map(|file| self.page_image(issue.issue_id, file))
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{catalog, issue};
    use super::*;

    #[test]
    fn total_pages_counts_intro_per_language() {
        let issue = issue(7, "2025-01-01", 4, 6);
        assert_eq!(issue.total_pages(Lang::English), 5);
        assert_eq!(issue.total_pages(Lang::Chinese), 7);
    }

    #[test]
    fn next_issue_wraps_around() {
        let catalog = catalog();
        assert_eq!(catalog.next_issue(1).unwrap().issue_id, 2);
        assert_eq!(catalog.next_issue(3).unwrap().issue_id, 1);
        assert_eq!(catalog.next_issue(99).unwrap().issue_id, 1);
        assert!(Catalog::default().next_issue(1).is_none());
    }

    #[test]
    fn sort_directions_are_reversed() {
        let catalog = catalog();
        let asc: Vec<i64> = catalog
            .sorted(SortOrder::Asc)
            .iter()
            .map(|i| i.issue_id)
            .collect();
        let mut desc: Vec<i64> = catalog
            .sorted(SortOrder::Desc)
            .iter()
            .map(|i| i.issue_id)
            .collect();
        assert_eq!(asc, vec![1, 2, 3]);
        desc.reverse();
        assert_eq!(asc, desc);
    }

    #[test]
    fn from_json_requires_a_sequence() {
        let err = Catalog::from_json(br#"{"issue_id": 1}"#).unwrap_err();
        assert!(matches!(err, CatalogError::Malformed(_)));

        let raw = r#"[{"issue_id": 4, "date": "2025-04-01", "author": "S",
            "title_en": "Four", "title_ch": "四", "text_en": "", "text_ch": "",
            "comics_en": ["a.png"], "comics_ch": ["b.png", "c.png"],
            "thumbnail_en": "t.png", "thumbnail_ch": "t.png", "url": "https://x"}]"#;
        let catalog = Catalog::from_json(raw.as_bytes()).unwrap();
        assert_eq!(catalog.issue(4).unwrap().title(Lang::Chinese), "四");
        assert_eq!(catalog.issue(4).unwrap().page_count(Lang::Chinese), 2);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let err = Catalog::new(vec![issue(1, "a", 1, 1), issue(1, "b", 1, 1)]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateIssue(1)));
    }

    #[test]
    fn about_text_splits_on_markers() {
        let raw = "------\nChinese Version\n------\n你好\n\n------\nEnglish Version\n------\nHello there\n";
        let about = parse_about_text(raw);
        assert_eq!(about.ch, "你好");
        assert_eq!(about.en, "Hello there");
    }

    #[test]
    fn about_text_without_english_marker() {
        let about = parse_about_text("  只有中文\n");
        assert_eq!(about.ch, "只有中文");
        assert_eq!(about.en, "");
    }

    #[test]
    fn summary_truncates_to_120_chars() {
        let mut long = issue(1, "2025", 1, 1);
        long.text_en = "x".repeat(200);
        assert_eq!(long.summary(Lang::English), format!("{}...", "x".repeat(120)));
    }

    #[test]
    fn asset_paths_support_sub_path_hosting() {
        let paths = AssetPaths::new("https://example.org/comics/index.html").unwrap();
        assert_eq!(paths.catalog(), "https://example.org/comics/comic_db.json");
        assert_eq!(
            paths.page_image(2, "p01.png"),
            "https://example.org/comics/img/issue2/p01.png"
        );
        assert_eq!(
            paths.thumbnail("t.png"),
            "https://example.org/comics/thumbnail/t.png"
        );
    }
}
