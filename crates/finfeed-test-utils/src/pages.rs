//! Investor-relations HTML page builders.

use crate::xml_escape;

/// A page with one anchor per `(href, text)` pair.
pub fn ir_page(title: &str, links: &[(&str, &str)]) -> String {
    let anchors: String = links
        .iter()
        .map(|(href, text)| format!("<li><a href=\"{}\">{}</a></li>\n", xml_escape(href), xml_escape(text)))
        .collect();
    format!(
        "<!DOCTYPE html><html><head><title>{}</title></head><body><ul>\n{}</ul></body></html>",
        xml_escape(title),
        anchors
    )
}

/// An EDGAR-style filing listing: `(form, description, documents_href)` rows.
pub fn sec_listing(rows: &[(&str, &str, &str)]) -> String {
    let body: String = rows
        .iter()
        .map(|(form, desc, href)| {
            format!(
                "<tr><td>{}</td><td><a href=\"{}\" id=\"documentsbutton\">Documents</a></td><td>{}</td></tr>\n",
                xml_escape(form),
                xml_escape(href),
                xml_escape(desc)
            )
        })
        .collect();
    format!(
        "<html><body><table class=\"tableFile2\"><tr><th>Filings</th><th>Format</th><th>Description</th></tr>\n{}</table></body></html>",
        body
    )
}
