//! HTML reading: title, block-level text with embedded links, and the
//! page's outbound `<a href>` targets.
//!
//! Only `<a href>` counts as a link. URLs in `src`, `<link>`, data
//! attributes, scripts and plain text are ignored.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};

use linkscout_common::{normalize, try_normalize, ContentBlock, InlineLink};

/// Page chrome skipped while reading content blocks.
const CHROME_TAGS: &[&str] = &[
    "head", "script", "style", "noscript", "template", "svg", "nav", "header", "footer", "aside",
];

/// Tags that can never contain visible links.
const INVISIBLE_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Elements that start and end a text run.
const BOUNDARY_TAGS: &[&str] = &[
    "p", "li", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "td", "th", "figcaption", "dd",
    "dt", "div", "section", "article", "main", "ul", "ol", "dl", "table", "tr", "figure", "pre",
    "body",
];

static ANCHOR_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("valid selector"));
static TITLE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("title").expect("valid selector"));
static H1_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1").expect("valid selector"));

/// Everything the pipeline reads from one HTML document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedHtml {
    pub title: String,
    pub blocks: Vec<ContentBlock>,
    pub outbound_links: BTreeSet<String>,
}

pub fn parse_html(html: &str, page_url: &str) -> ParsedHtml {
    let document = Html::parse_document(html);
    ParsedHtml {
        title: title_of(&document),
        blocks: blocks_of(&document),
        outbound_links: outbound_links_of(&document, page_url),
    }
}

/// `<title>`, falling back to the first `<h1>`.
pub fn extract_title(html: &str) -> String {
    title_of(&Html::parse_document(html))
}

/// Block-level text runs outside page chrome, each with its inline links.
pub fn extract_blocks(html: &str) -> Vec<ContentBlock> {
    blocks_of(&Html::parse_document(html))
}

/// Canonical targets of every visible `<a href>` on the page, chrome included.
/// Self-links and unparseable hrefs are left out.
pub fn extract_outbound_links(html: &str, page_url: &str) -> BTreeSet<String> {
    outbound_links_of(&Html::parse_document(html), page_url)
}

fn title_of(document: &Html) -> String {
    [&*TITLE_SELECTOR, &*H1_SELECTOR]
        .into_iter()
        .filter_map(|selector| document.select(selector).next())
        .map(|el| collapsed_text(&el))
        .find(|title| !title.is_empty())
        .unwrap_or_default()
}

fn blocks_of(document: &Html) -> Vec<ContentBlock> {
    let mut collector = BlockCollector::default();
    collector.walk(document.root_element());
    collector.flush();
    collector.blocks
}

fn outbound_links_of(document: &Html, page_url: &str) -> BTreeSet<String> {
    let own = normalize(page_url, None);

    document
        .select(&ANCHOR_SELECTOR)
        .filter(|anchor| !is_invisible(anchor))
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter_map(|href| try_normalize(href.trim(), Some(page_url)))
        .filter(|url| *url != own)
        .collect()
}

fn is_invisible(element: &ElementRef) -> bool {
    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|el| INVISIBLE_TAGS.contains(&el.value().name()))
}

/// Visible text of an element, whitespace collapsed.
fn collapsed_text(element: &ElementRef) -> String {
    collapse(&element.text().collect::<String>())
}

fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Default)]
struct Run {
    text: String,
    links: Vec<InlineLink>,
}

/// Depth-first walk that cuts the document into runs of inline content.
/// A boundary element closes the run before it and the run inside it, so
/// text on either side of a nested block survives as its own block.
#[derive(Default)]
struct BlockCollector {
    blocks: Vec<ContentBlock>,
    run: Run,
}

impl BlockCollector {
    fn walk(&mut self, element: ElementRef<'_>) {
        let name = element.value().name();
        if CHROME_TAGS.contains(&name) {
            return;
        }

        let boundary = BOUNDARY_TAGS.contains(&name);
        if boundary {
            self.flush();
        }
        if name == "br" {
            self.run.text.push(' ');
        }
        if name == "a" {
            if let Some(href) = element.value().attr("href") {
                self.run.links.push(InlineLink {
                    href: href.trim().to_string(),
                    anchor_text: collapsed_text(&element),
                });
            }
        }

        for child in element.children() {
            match child.value() {
                Node::Text(text) => self.run.text.push_str(text),
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        self.walk(el);
                    }
                }
                _ => {}
            }
        }

        if boundary {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let run = std::mem::take(&mut self.run);
        let text = collapse(&run.text);
        if !text.is_empty() {
            self.blocks.push(ContentBlock {
                text,
                links: run.links,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://example.com/blog/lipedema-diet";

    #[test]
    fn title_prefers_title_tag() {
        let html = "<html><head><title> Lipedema Diet &amp; Nutrition </title></head><body><h1>Other</h1></body></html>";
        assert_eq!(extract_title(html), "Lipedema Diet & Nutrition");
    }

    #[test]
    fn title_falls_back_to_h1() {
        let html = "<body><h1>Lipedema <em>Diet</em></h1></body>";
        assert_eq!(extract_title(html), "Lipedema Diet");
    }

    #[test]
    fn blocks_carry_inline_links() {
        let html = r#"<article>
            <h2>What to eat</h2>
            <p>Many patients ask about <a href="/blog/weight-loss">weight loss with lipedema</a> management options.</p>
            <ul><li>Leafy greens</li></ul>
        </article>"#;
        let blocks = extract_blocks(html);
        assert_eq!(blocks.len(), 3);
        assert_eq!(
            blocks[1].text,
            "Many patients ask about weight loss with lipedema management options."
        );
        assert_eq!(blocks[1].links.len(), 1);
        assert_eq!(blocks[1].links[0].href, "/blog/weight-loss");
        assert_eq!(blocks[1].links[0].anchor_text, "weight loss with lipedema");
        assert!(blocks[0].links.is_empty());
    }

    #[test]
    fn text_around_a_nested_block_is_kept() {
        let html = r#"<ul><li>Compression helps many people. <p>Short aside here.</p> Many patients ask about weight loss with lipedema and <a href="/blog/guide">this guide</a> explains it.</li></ul>"#;
        let blocks = extract_blocks(html);
        let texts: Vec<&str> = blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(
            texts,
            vec![
                "Compression helps many people.",
                "Short aside here.",
                "Many patients ask about weight loss with lipedema and this guide explains it.",
            ]
        );
        assert!(blocks[0].links.is_empty());
        assert_eq!(blocks[2].links.len(), 1);
        assert_eq!(blocks[2].links[0].href, "/blog/guide");
        assert_eq!(blocks[2].links[0].anchor_text, "this guide");
    }

    #[test]
    fn chrome_is_excluded_from_blocks() {
        let html = r#"
            <nav><ul><li><a href="/">Home</a></li></ul></nav>
            <script>var p = "<p>not text</p>";</script>
            <p>Body text that matters.</p>
            <footer><p>Copyright</p></footer>"#;
        let texts: Vec<String> = extract_blocks(html).into_iter().map(|b| b.text).collect();
        assert_eq!(texts, vec!["Body text that matters."]);
    }

    #[test]
    fn outbound_links_include_chrome_but_not_scripts() {
        let html = r##"
            <nav><a href="/treatments/">Treatments</a></nav>
            <script>document.write('<a href="/hidden">x</a>')</script>
            <!-- <a href="/commented">y</a> -->
            <p><a href="https://www.example.com/blog/weight-loss?ref=nav#top">Weight loss</a></p>
            <a href="mailto:hi@example.com">Mail</a>
            <a href="#comments">Comments</a>
            <a href="/blog/lipedema-diet/">Self</a>"##;
        let links = extract_outbound_links(html, PAGE);
        assert_eq!(
            links.into_iter().collect::<Vec<_>>(),
            vec![
                "https://example.com/blog/weight-loss".to_string(),
                "https://example.com/treatments".to_string(),
            ]
        );
    }

    #[test]
    fn image_and_link_tags_are_not_links() {
        let html = r#"<link rel="stylesheet" href="/style.css"><img src="https://cdn.example.com/a.png">"#;
        assert!(extract_outbound_links(html, PAGE).is_empty());
    }

    #[test]
    fn entities_are_decoded() {
        let html = "<p>Don&#8217;t skip &quot;rest&quot;&nbsp;days &amp;&lt;more&gt; at the caf&#xE9;</p>";
        let blocks = extract_blocks(html);
        assert_eq!(
            blocks[0].text,
            "Don\u{2019}t skip \"rest\" days &<more> at the caf\u{e9}"
        );
    }

    #[test]
    fn encoded_ampersand_in_href_is_decoded() {
        let html = r#"<a href="/search?q=a&amp;b=c">s</a><a href="/guide/">g</a>"#;
        let links = extract_outbound_links(html, PAGE);
        assert!(links.contains("https://example.com/search"));
        assert!(links.contains("https://example.com/guide"));
    }
}
