//! RSS 2.0 and Atom parsing with quick-xml.
//!
//! Whole-document failures (no recognizable root, XML broken before the
//! root) are errors. Problems with single entries never are: such entries
//! are skipped and counted.

use chrono::{DateTime, NaiveDate};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::warn;

use crawl_sync::AssetType;

use crate::error::{FeedError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Rss,
    Atom,
}

/// Media attached to an entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime_type: Option<String>,
    pub length: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedEntry {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub date: Option<NaiveDate>,
    pub enclosures: Vec<Enclosure>,
    /// `media:content` elements, kept apart from enclosures
    pub media: Vec<Enclosure>,
}

impl FeedEntry {
    /// Stable identity: guid, else title
    pub fn identity(&self) -> Option<&str> {
        self.guid
            .as_deref()
            .or(self.title.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// First enclosure (then media element) matching the asset type
    pub fn locator_for(&self, asset_type: AssetType) -> Option<&str> {
        self.enclosures
            .iter()
            .chain(self.media.iter())
            .find(|e| matches_asset(e, asset_type))
            .map(|e| e.url.as_str())
    }
}

fn matches_asset(enclosure: &Enclosure, asset_type: AssetType) -> bool {
    if enclosure.url.trim().is_empty() {
        return false;
    }
    let wanted = match asset_type {
        AssetType::Audio => "audio",
        AssetType::Video => "video",
        AssetType::Pdf => "pdf",
        AssetType::Article => "html",
        AssetType::Transcript => "text",
    };
    match enclosure.mime_type.as_deref() {
        Some(mime) if !mime.is_empty() => mime.to_ascii_lowercase().contains(wanted),
        _ => {
            let url = enclosure.url.to_ascii_lowercase();
            let path = url.split(['?', '#']).next().unwrap_or(&url);
            match asset_type {
                AssetType::Audio => [".mp3", ".m4a", ".wav", ".aac", ".ogg"].iter().any(|ext| path.ends_with(ext)),
                AssetType::Video => [".mp4", ".webm", ".mkv"].iter().any(|ext| path.ends_with(ext)),
                AssetType::Pdf => path.ends_with(".pdf"),
                AssetType::Article | AssetType::Transcript => false,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFeed {
    pub kind: FeedKind,
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
    /// Entries dropped for lacking both guid and title
    pub skipped: usize,
    /// The document broke after the root; entries before the break are kept
    pub truncated: bool,
}

/// Parse an RSS or Atom document
pub fn parse_feed(xml: &str) -> Result<ParsedFeed> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut kind: Option<FeedKind> = None;
    let mut feed_title: Option<String> = None;
    let mut entries = Vec::new();
    let mut skipped = 0;
    let mut truncated = false;

    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<FeedEntry> = None;
    let mut text = String::new();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                if kind.is_none() {
                    return Err(FeedError::Xml(e.to_string()));
                }
                warn!(position = reader.buffer_position(), error = %e, "Feed XML broke mid-document");
                truncated = true;
                break;
            }
        };

        match event {
            Event::Start(e) => {
                let name = element_name(&e);
                if kind.is_none() {
                    kind = Some(root_kind(&name)?);
                }
                if is_entry(kind, &name) {
                    current = Some(FeedEntry::default());
                }
                if let Some(entry) = current.as_mut() {
                    apply_attributes(kind, entry, &name, &e);
                }
                stack.push(name);
                text.clear();
            }
            Event::Empty(e) => {
                let name = element_name(&e);
                if kind.is_none() {
                    kind = Some(root_kind(&name)?);
                }
                if let Some(entry) = current.as_mut() {
                    apply_attributes(kind, entry, &name, &e);
                }
            }
            Event::Text(t) => {
                let value = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                text.push_str(&value);
            }
            Event::CData(c) => {
                text.push_str(&String::from_utf8_lossy(&c.into_inner()));
            }
            Event::End(_) => {
                let Some(name) = stack.pop() else {
                    continue;
                };
                let value = std::mem::take(&mut text);

                if is_entry(kind, &name) {
                    if let Some(entry) = current.take() {
                        if entry.identity().is_some() {
                            entries.push(entry);
                        } else {
                            skipped += 1;
                            warn!("Skipping feed entry with neither guid nor title");
                        }
                    }
                } else if let Some(entry) = current.as_mut() {
                    apply_text(kind, entry, &name, value);
                } else if name == "title" && feed_title.is_none() && is_feed_title(&stack) {
                    feed_title = non_empty(value);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let kind = kind.ok_or_else(|| FeedError::NotAFeed("empty document".to_string()))?;

    Ok(ParsedFeed {
        kind,
        title: feed_title,
        entries,
        skipped,
        truncated,
    })
}

fn element_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn root_kind(name: &str) -> Result<FeedKind> {
    match name {
        "rss" | "rdf:RDF" => Ok(FeedKind::Rss),
        "feed" => Ok(FeedKind::Atom),
        other => Err(FeedError::NotAFeed(format!("root element <{}>", other))),
    }
}

fn is_entry(kind: Option<FeedKind>, name: &str) -> bool {
    matches!(
        (kind, name),
        (Some(FeedKind::Rss), "item") | (Some(FeedKind::Atom), "entry")
    )
}

fn is_feed_title(stack: &[String]) -> bool {
    matches!(stack.last().map(String::as_str), Some("channel") | Some("feed"))
}

fn attribute(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn apply_attributes(kind: Option<FeedKind>, entry: &mut FeedEntry, name: &str, e: &BytesStart<'_>) {
    match (kind, name) {
        (Some(FeedKind::Rss), "enclosure") => {
            if let Some(url) = attribute(e, b"url") {
                entry.enclosures.push(Enclosure {
                    url,
                    mime_type: attribute(e, b"type"),
                    length: attribute(e, b"length").and_then(|l| l.trim().parse().ok()),
                });
            }
        }
        (_, "media:content") => {
            if let Some(url) = attribute(e, b"url") {
                entry.media.push(Enclosure {
                    url,
                    mime_type: attribute(e, b"type"),
                    length: attribute(e, b"fileSize").and_then(|l| l.trim().parse().ok()),
                });
            }
        }
        (Some(FeedKind::Atom), "link") => {
            let Some(href) = attribute(e, b"href") else {
                return;
            };
            match attribute(e, b"rel").as_deref() {
                Some("enclosure") => entry.enclosures.push(Enclosure {
                    url: href,
                    mime_type: attribute(e, b"type"),
                    length: attribute(e, b"length").and_then(|l| l.trim().parse().ok()),
                }),
                None | Some("alternate") => {
                    if entry.link.is_none() {
                        entry.link = Some(href);
                    }
                }
                Some(_) => {}
            }
        }
        _ => {}
    }
}

fn apply_text(kind: Option<FeedKind>, entry: &mut FeedEntry, name: &str, value: String) {
    match (kind, name) {
        (_, "title") => entry.title = non_empty(value),
        (Some(FeedKind::Rss), "guid") | (Some(FeedKind::Atom), "id") => entry.guid = non_empty(value),
        (Some(FeedKind::Rss), "link") => entry.link = non_empty(value),
        (Some(FeedKind::Rss), "description") | (Some(FeedKind::Atom), "summary") => {
            if entry.description.is_none() {
                entry.description = non_empty(value);
            }
        }
        (Some(FeedKind::Atom), "content") | (_, "content:encoded") | (_, "itunes:summary") => {
            if entry.description.is_none() {
                entry.description = non_empty(value);
            }
        }
        (Some(FeedKind::Rss), "pubDate") | (_, "dc:date") | (Some(FeedKind::Atom), "published") => {
            if let Some(date) = parse_date(&value) {
                entry.date = Some(date);
            }
        }
        (Some(FeedKind::Atom), "updated") => {
            if entry.date.is_none() {
                entry.date = parse_date(&value);
            }
        }
        _ => {}
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// RFC 2822 (RSS), RFC 3339 (Atom) or a bare `YYYY-MM-DD`
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| {
            value
                .get(..10)
                .and_then(|prefix| NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
  <channel>
    <title>Deep Dives</title>
    <link>https://example.com</link>
    <item>
      <title>Episode 2: Rates &amp; Risk</title>
      <link>https://example.com/ep2</link>
      <guid isPermaLink="false">ep-0002</guid>
      <pubDate>Tue, 05 Mar 2024 08:00:00 GMT</pubDate>
      <description><![CDATA[<p>Second episode</p>]]></description>
      <enclosure url="https://cdn.example.com/ep2.mp3" type="audio/mpeg" length="1234"/>
    </item>
    <item>
      <title>Episode 1</title>
      <guid>ep-0001</guid>
      <media:content url="https://cdn.example.com/ep1.m4a" type="audio/x-m4a"/>
    </item>
    <item>
      <description>no title and no guid</description>
    </item>
    <item>
      <title>Bonus video</title>
      <enclosure url="https://cdn.example.com/bonus.mp4" type="video/mp4"/>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Cast</title>
  <entry>
    <id>urn:uuid:1225c695</id>
    <title>First</title>
    <link href="https://example.org/first"/>
    <link rel="enclosure" type="audio/mpeg" href="https://example.org/first.mp3"/>
    <updated>2023-12-13T18:30:02Z</updated>
    <summary>Hello</summary>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items() {
        let feed = parse_feed(RSS).unwrap();
        assert_eq!(feed.kind, FeedKind::Rss);
        assert_eq!(feed.title.as_deref(), Some("Deep Dives"));
        assert_eq!(feed.entries.len(), 3);
        assert_eq!(feed.skipped, 1);

        let ep2 = &feed.entries[0];
        assert_eq!(ep2.title.as_deref(), Some("Episode 2: Rates & Risk"));
        assert_eq!(ep2.guid.as_deref(), Some("ep-0002"));
        assert_eq!(ep2.date, NaiveDate::from_ymd_opt(2024, 3, 5));
        assert_eq!(ep2.description.as_deref(), Some("<p>Second episode</p>"));
        assert_eq!(ep2.enclosures[0].length, Some(1234));
        assert_eq!(ep2.locator_for(AssetType::Audio), Some("https://cdn.example.com/ep2.mp3"));

        let ep1 = &feed.entries[1];
        assert_eq!(ep1.locator_for(AssetType::Audio), Some("https://cdn.example.com/ep1.m4a"));

        let bonus = &feed.entries[2];
        assert_eq!(bonus.identity(), Some("Bonus video"));
        assert_eq!(bonus.locator_for(AssetType::Audio), None);
        assert_eq!(bonus.locator_for(AssetType::Video), Some("https://cdn.example.com/bonus.mp4"));
    }

    #[test]
    fn test_parse_atom_entries() {
        let feed = parse_feed(ATOM).unwrap();
        assert_eq!(feed.kind, FeedKind::Atom);
        assert_eq!(feed.title.as_deref(), Some("Atom Cast"));

        let entry = &feed.entries[0];
        assert_eq!(entry.guid.as_deref(), Some("urn:uuid:1225c695"));
        assert_eq!(entry.link.as_deref(), Some("https://example.org/first"));
        assert_eq!(entry.date, NaiveDate::from_ymd_opt(2023, 12, 13));
        assert_eq!(entry.locator_for(AssetType::Audio), Some("https://example.org/first.mp3"));
    }

    #[test]
    fn test_html_page_is_not_a_feed() {
        let err = parse_feed("<html><body>Login required</body></html>").unwrap_err();
        assert!(matches!(err, FeedError::NotAFeed(_)));
        assert!(parse_feed("").is_err());
    }

    #[test]
    fn test_broken_tail_keeps_earlier_entries() {
        let xml = "<rss><channel><item><title>One</title></item><item><title>Two</ti";
        let feed = parse_feed(xml).unwrap();
        assert_eq!(feed.entries.len(), 1);
        assert_eq!(feed.entries[0].title.as_deref(), Some("One"));
    }

    #[test]
    fn test_parse_date_formats() {
        assert_eq!(parse_date("Mon, 01 Jan 2024 10:00:00 +0000"), NaiveDate::from_ymd_opt(2024, 1, 1));
        assert_eq!(parse_date("2024-02-03T04:05:06-05:00"), NaiveDate::from_ymd_opt(2024, 2, 3));
        assert_eq!(parse_date("2024-02-03"), NaiveDate::from_ymd_opt(2024, 2, 3));
        assert_eq!(parse_date("sometime"), None);
    }
}
