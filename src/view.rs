//! Stateless view builders.
//!
//! Everything here is a pure function of catalog data, reader state and
//! language; `ui` only lays the results out on screen.

use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};

use crate::catalog::{AboutText, Catalog, Issue, Lang, SortOrder};
use crate::reader::{PageContent, PageState, ReaderSession};

pub const FAILURE_MESSAGE: &str = "Failed to load required data.";
pub const CONTACT_LINE: &str = "Contact: satoshi@kankakuya.com";

pub const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
pub const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
pub const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
pub const COLOR_SELECTED_BG: Color = Color::Rgb(69, 71, 90);

pub struct Labels {
    pub brand: &'static str,
    pub library: &'static str,
    pub read: &'static str,
    pub source: &'static str,
    pub previous: &'static str,
    pub next: &'static str,
    pub start: &'static str,
    pub about: &'static str,
    pub back_to_library: &'static str,
    pub ascending: &'static str,
    pub descending: &'static str,
    pub date_prefix: &'static str,
    pub start_hint: &'static str,
    pub loading: &'static str,
    pub image_failed: &'static str,
    pub online: &'static str,
    pub offline: &'static str,
    pub unreachable: &'static str,
    pub no_cache: &'static str,
    pub fallback: &'static str,
    pub library_keys: &'static str,
    pub about_keys: &'static str,
    pub reader_keys: &'static str,
}

static ENGLISH: Labels = Labels {
    brand: "Clawmic",
    library: "Library",
    read: "Read",
    source: "Source",
    previous: "Previous",
    next: "Next",
    start: "Start",
    about: "About the Editor",
    back_to_library: "← Library",
    ascending: "Ascending",
    descending: "Descending",
    date_prefix: "Date: ",
    start_hint: "Press Start to begin reading.",
    loading: "Loading…",
    image_failed: "Image unavailable.",
    online: "online",
    offline: "offline",
    unreachable: "unreachable",
    no_cache: "no cache",
    fallback: "fallback",
    library_keys: "j/k select · Enter read · s sort · o source · a about · l language · b/f history · q quit",
    about_keys: "Esc library · l language · b/f history · q quit",
    reader_keys: "←/→ page · +/-/0 zoom · drag or H/J/K/L pan · Esc library · l language · q quit",
};

static CHINESE: Labels = Labels {
    brand: "Clawmic 漫畫",
    library: "圖書館",
    read: "閱讀",
    source: "來源",
    previous: "上一頁",
    next: "下一頁",
    start: "開始",
    about: "關於編輯",
    back_to_library: "← 圖書館",
    ascending: "升冪",
    descending: "降冪",
    date_prefix: "日期：",
    start_hint: "按下 Start 開始閱讀。",
    loading: "載入中…",
    image_failed: "無法載入圖片。",
    online: "在線",
    offline: "離線",
    unreachable: "無法連線",
    no_cache: "無快取",
    fallback: "備用",
    library_keys: "j/k 選擇 · Enter 閱讀 · s 排序 · o 來源 · a 關於 · l 語言 · b/f 歷史 · q 離開",
    about_keys: "Esc 圖書館 · l 語言 · b/f 歷史 · q 離開",
    reader_keys: "←/→ 翻頁 · +/-/0 縮放 · 拖曳或 H/J/K/L 平移 · Esc 圖書館 · l 語言 · q 離開",
};

pub fn labels(lang: Lang) -> &'static Labels {
    lang.pick(&ENGLISH, &CHINESE)
}

pub fn sort_label(lang: Lang, order: SortOrder) -> String {
    let labels = labels(lang);
    let direction = match order {
        SortOrder::Asc => labels.ascending,
        SortOrder::Desc => labels.descending,
    };
    format!("{}{}", labels.date_prefix, direction)
}

/// Library card contents for one issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub issue_id: i64,
    pub title: String,
    pub meta: String,
    pub summary: String,
    pub url: String,
}

pub fn library_cards(catalog: &Catalog, lang: Lang, order: SortOrder) -> Vec<Card> {
    catalog
        .sorted(order)
        .into_iter()
        .map(|issue| Card {
            issue_id: issue.issue_id,
            title: issue.title(lang).to_string(),
            meta: meta_line(issue),
            summary: issue.summary(lang),
            url: issue.url.clone(),
        })
        .collect()
}

fn meta_line(issue: &Issue) -> String {
    format!("{} · {}", issue.author, issue.date)
}

pub fn card_text(card: &Card, lang: Lang, selected: bool, width: usize) -> Text<'static> {
    let labels = labels(lang);
    let title_style = if selected {
        Style::default()
            .fg(COLOR_TEXT_PRIMARY)
            .bg(COLOR_SELECTED_BG)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
            .fg(COLOR_TEXT_PRIMARY)
            .add_modifier(Modifier::BOLD)
    };
    let marker = if selected { "▌ " } else { "  " };
    let mut lines = vec![
        Line::from(vec![
            Span::styled(marker, Style::default().fg(COLOR_ACCENT)),
            Span::styled(card.title.clone(), title_style),
        ]),
        Line::from(Span::styled(
            format!("  {}", card.meta),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )),
    ];
    for row in textwrap::wrap(&card.summary, width.saturating_sub(2).max(10)) {
        lines.push(Line::from(format!("  {row}")));
    }
    lines.push(Line::from(vec![
        Span::styled(
            format!("  [{}]", labels.read),
            Style::default().fg(COLOR_ACCENT),
        ),
        Span::raw("  "),
        Span::styled(
            format!("[{}]", labels.source),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ),
    ]));
    lines.push(Line::default());
    Text::from(lines)
}

pub fn about_text(about: &AboutText, lang: Lang, width: usize) -> Text<'static> {
    let mut lines = vec![
        Line::from(Span::styled(
            labels(lang).about,
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        )),
        Line::default(),
    ];
    push_wrapped(&mut lines, about.get(lang), width);
    lines.push(Line::default());
    lines.push(Line::default());
    lines.push(Line::from(Span::styled(
        CONTACT_LINE,
        Style::default().fg(COLOR_TEXT_SECONDARY),
    )));
    Text::from(lines)
}

pub fn intro_text(content: &PageContent, lang: Lang, width: usize) -> Text<'static> {
    let PageContent::Intro {
        title,
        meta,
        url,
        description,
    } = content
    else {
        return Text::default();
    };
    let mut lines = vec![
        Line::from(Span::styled(
            title.clone(),
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            meta.clone(),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        )),
        Line::from(Span::styled(
            url.clone(),
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::UNDERLINED),
        )),
        Line::default(),
        Line::from(Span::styled(
            labels(lang).start_hint,
            Style::default().add_modifier(Modifier::ITALIC),
        )),
        Line::default(),
    ];
    push_wrapped(&mut lines, description, width);
    Text::from(lines)
}

/// Reader controls shown under the stage: previous (only when its target
/// exists), next or start, and zoom controls on comic pages.
pub fn reader_controls(session: &ReaderSession, lang: Lang) -> Line<'static> {
    let labels = labels(lang);
    let mut spans = Vec::new();
    if session.has_previous() {
        spans.push(Span::styled(
            format!("◀ {}", labels.previous),
            Style::default().fg(COLOR_ACCENT),
        ));
        spans.push(Span::raw("   "));
    }
    let next = match session.state() {
        PageState::Intro => labels.start,
        PageState::Comic(_) => labels.next,
    };
    spans.push(Span::styled(
        format!("{next} ▶"),
        Style::default()
            .fg(COLOR_ACCENT)
            .add_modifier(Modifier::BOLD),
    ));
    if let PageState::Comic(_) = session.state() {
        spans.push(Span::raw("   "));
        spans.push(Span::styled(
            format!("[-] {} [+]", session.zoom_label()),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ));
    }
    Line::from(spans)
}

pub fn reader_header(session: &ReaderSession, issue: &Issue, lang: Lang) -> Line<'static> {
    Line::from(vec![
        Span::styled(
            labels(lang).back_to_library,
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ),
        Span::raw("   "),
        Span::styled(
            issue.title(lang).to_string(),
            Style::default()
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw("   "),
        Span::styled(
            session.progress_label(),
            Style::default().fg(COLOR_ACCENT),
        ),
    ])
}

fn push_wrapped(lines: &mut Vec<Line<'static>>, text: &str, width: usize) {
    let width = width.max(10);
    for paragraph in text.lines() {
        if paragraph.trim().is_empty() {
            lines.push(Line::default());
            continue;
        }
        for row in textwrap::wrap(paragraph, width) {
            lines.push(Line::from(row.into_owned()));
        }
    }
}

/// Plain text of a built view, for assertions and logs.
pub fn plain(text: &Text<'_>) -> String {
    text.lines
        .iter()
        .map(|line| {
            line.spans
                .iter()
                .map(|span| span.content.as_ref())
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("\n")
}
