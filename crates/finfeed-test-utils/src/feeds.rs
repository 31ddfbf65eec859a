//! RSS 2.0 and Atom document builders.

use crate::xml_escape;

#[derive(Debug, Clone, Default)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    pub published: Option<String>,
    pub updated: Option<String>,
    pub description: Option<String>,
    pub categories: Vec<String>,
}

impl FeedEntry {
    pub fn new(title: &str, link: &str) -> Self {
        Self { title: title.into(), link: link.into(), ..Default::default() }
    }

    pub fn published(mut self, date: &str) -> Self {
        self.published = Some(date.into());
        self
    }

    pub fn updated(mut self, date: &str) -> Self {
        self.updated = Some(date.into());
        self
    }

    /// HTML body; escaped when rendered.
    pub fn description(mut self, html: &str) -> Self {
        self.description = Some(html.into());
        self
    }

    pub fn category(mut self, term: &str) -> Self {
        self.categories.push(term.into());
        self
    }
}

pub fn rss_feed(title: &str, entries: &[FeedEntry]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\"><channel>\n");
    out.push_str(&format!("<title>{}</title>\n<link>https://example.com/</link>\n", xml_escape(title)));
    for e in entries {
        out.push_str("<item>");
        out.push_str(&format!("<title>{}</title><link>{}</link>", xml_escape(&e.title), xml_escape(&e.link)));
        if let Some(p) = &e.published {
            out.push_str(&format!("<pubDate>{}</pubDate>", xml_escape(p)));
        }
        if let Some(d) = &e.description {
            out.push_str(&format!("<description>{}</description>", xml_escape(d)));
        }
        for c in &e.categories {
            out.push_str(&format!("<category>{}</category>", xml_escape(c)));
        }
        out.push_str("</item>\n");
    }
    out.push_str("</channel></rss>\n");
    out
}

pub fn atom_feed(title: &str, entries: &[FeedEntry]) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<feed xmlns=\"http://www.w3.org/2005/Atom\">\n");
    out.push_str(&format!("<title>{}</title>\n<link rel=\"self\" href=\"https://example.com/atom\"/>\n", xml_escape(title)));
    for e in entries {
        out.push_str("<entry>");
        out.push_str(&format!(
            "<title>{}</title><link rel=\"alternate\" href=\"{}\"/>",
            xml_escape(&e.title),
            xml_escape(&e.link)
        ));
        if let Some(p) = &e.published {
            out.push_str(&format!("<published>{}</published>", xml_escape(p)));
        }
        if let Some(u) = &e.updated {
            out.push_str(&format!("<updated>{}</updated>", xml_escape(u)));
        }
        if let Some(d) = &e.description {
            out.push_str(&format!("<summary type=\"html\">{}</summary>", xml_escape(d)));
        }
        for c in &e.categories {
            out.push_str(&format!("<category term=\"{}\"/>", xml_escape(c)));
        }
        out.push_str("</entry>\n");
    }
    out.push_str("</feed>\n");
    out
}
