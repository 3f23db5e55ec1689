//! Display pass for sanitized chat markup.
//!
//! egui has no HTML widget, so messages render as native widgets instead.
//! The walk accepts only [`SafeHtml`]; nothing here re-interprets content
//! as executable markup, it only maps the allow-listed subset to text
//! runs, headings, lists and hyperlinks.

use crate::sanitize::{decode_entities, SafeHtml};
use crate::theme::Theme;
use eframe::egui::{self, RichText};

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Heading { level: u8, inlines: Vec<Inline> },
    Paragraph(Vec<Inline>),
    List { ordered: bool, items: Vec<Vec<Inline>> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inline {
    Run {
        text: String,
        strong: bool,
        emphasis: bool,
    },
    Link {
        text: String,
        href: String,
    },
    Break,
}

pub fn show(ui: &mut egui::Ui, theme: &Theme, html: &SafeHtml) {
    for (index, block) in parse_blocks(html).iter().enumerate() {
        if index > 0 {
            ui.add_space(theme.spacing_4);
        }
        show_block(ui, theme, block);
    }
}

pub fn parse_blocks(html: &SafeHtml) -> Vec<Block> {
    let raw = html.as_str();
    let bytes = raw.as_bytes();
    let mut parser = BlockParser::default();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'<' {
            let end = match raw[i..].find('>') {
                Some(pos) => i + pos + 1,
                None => raw.len(),
            };
            parser.tag(&raw[i..end]);
            i = end;
        } else {
            let start = i;
            while i < bytes.len() && bytes[i] != b'<' {
                i += 1;
            }
            parser.text(&raw[start..i]);
        }
    }

    parser.finish()
}

enum OpenBlock {
    Heading(u8),
    Paragraph,
}

struct ListFrame {
    ordered: bool,
    items: Vec<Vec<Inline>>,
    item: Option<Vec<Inline>>,
}

struct LinkBuilder {
    href: String,
    text: String,
}

#[derive(Default)]
struct BlockParser {
    blocks: Vec<Block>,
    inlines: Vec<Inline>,
    block: Option<OpenBlock>,
    lists: Vec<ListFrame>,
    strong: u32,
    emphasis: u32,
    link: Option<LinkBuilder>,
}

impl BlockParser {
    fn tag(&mut self, tag: &str) {
        let body = tag.trim_start_matches('<').trim_end_matches('>');
        let closing = body.starts_with('/');
        let body = body.trim_start_matches('/');
        let name_end = body
            .find(|ch: char| !ch.is_ascii_alphanumeric())
            .unwrap_or(body.len());
        let name = &body[..name_end];

        match (name, closing) {
            ("h1", false) => self.open_block(OpenBlock::Heading(1)),
            ("h2", false) => self.open_block(OpenBlock::Heading(2)),
            ("h3", false) => self.open_block(OpenBlock::Heading(3)),
            ("p", false) => self.open_block(OpenBlock::Paragraph),
            ("h1" | "h2" | "h3" | "p", true) => self.close_block(),
            ("br", false) => {
                if let Some(link) = self.link.as_mut() {
                    link.text.push(' ');
                } else {
                    self.sink().push(Inline::Break);
                }
            }
            ("b" | "strong", false) => self.strong += 1,
            ("b" | "strong", true) => self.strong = self.strong.saturating_sub(1),
            ("i" | "em", false) => self.emphasis += 1,
            ("i" | "em", true) => self.emphasis = self.emphasis.saturating_sub(1),
            ("ul", false) => self.open_list(false),
            ("ol", false) => self.open_list(true),
            ("ul" | "ol", true) => self.close_list(),
            ("li", false) => self.open_item(),
            ("li", true) => self.close_item(),
            ("a", false) => {
                self.link = Some(LinkBuilder {
                    href: extract_href(body),
                    text: String::new(),
                });
            }
            ("a", true) => self.close_link(),
            _ => {}
        }
    }

    fn text(&mut self, raw: &str) {
        let decoded = decode_entities(raw);
        if let Some(link) = self.link.as_mut() {
            link.text.push_str(&decoded);
            return;
        }
        let strong = self.strong > 0;
        let emphasis = self.emphasis > 0;
        let sink = self.sink();
        if decoded.trim().is_empty() && sink.is_empty() {
            // Whitespace glue between blocks, not content.
            return;
        }
        sink.push(Inline::Run {
            text: decoded,
            strong,
            emphasis,
        });
    }

    fn sink(&mut self) -> &mut Vec<Inline> {
        match self.lists.last_mut() {
            Some(ListFrame {
                item: Some(item), ..
            }) => item,
            _ => &mut self.inlines,
        }
    }

    fn open_block(&mut self, block: OpenBlock) {
        self.close_block();
        self.block = Some(block);
    }

    fn close_block(&mut self) {
        let inlines = std::mem::take(&mut self.inlines);
        match self.block.take() {
            Some(OpenBlock::Heading(level)) => self.blocks.push(Block::Heading { level, inlines }),
            Some(OpenBlock::Paragraph) => {
                if !inlines.is_empty() {
                    self.blocks.push(Block::Paragraph(inlines));
                }
            }
            None => {
                // Top-level inline content becomes an implicit paragraph.
                if !inlines.is_empty() {
                    self.blocks.push(Block::Paragraph(inlines));
                }
            }
        }
    }

    fn open_list(&mut self, ordered: bool) {
        self.close_block();
        self.lists.push(ListFrame {
            ordered,
            items: Vec::new(),
            item: None,
        });
    }

    fn close_list(&mut self) {
        let Some(mut frame) = self.lists.pop() else {
            return;
        };
        if let Some(item) = frame.item.take() {
            frame.items.push(item);
        }
        match self.lists.last_mut() {
            // A nested list flattens into its parent's items.
            Some(parent) => parent.items.append(&mut frame.items),
            None => self.blocks.push(Block::List {
                ordered: frame.ordered,
                items: frame.items,
            }),
        }
    }

    fn open_item(&mut self) {
        if let Some(frame) = self.lists.last_mut() {
            if let Some(item) = frame.item.take() {
                frame.items.push(item);
            }
            frame.item = Some(Vec::new());
        }
    }

    fn close_item(&mut self) {
        if let Some(frame) = self.lists.last_mut() {
            if let Some(item) = frame.item.take() {
                frame.items.push(item);
            }
        }
    }

    fn close_link(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let strong = self.strong > 0;
        let emphasis = self.emphasis > 0;
        let sink = self.sink();
        if link.href.is_empty() {
            // The sanitizer dropped the destination; show plain text.
            if !link.text.is_empty() {
                sink.push(Inline::Run {
                    text: link.text,
                    strong,
                    emphasis,
                });
            }
        } else {
            sink.push(Inline::Link {
                text: link.text,
                href: link.href,
            });
        }
    }

    fn finish(mut self) -> Vec<Block> {
        self.close_link();
        while !self.lists.is_empty() {
            self.close_list();
        }
        self.close_block();
        self.blocks
    }
}

fn extract_href(tag_body: &str) -> String {
    let Some(start) = tag_body.find("href=\"") else {
        return String::new();
    };
    let rest = &tag_body[start + "href=\"".len()..];
    match rest.find('"') {
        Some(end) => decode_entities(&rest[..end]),
        None => String::new(),
    }
}

fn show_block(ui: &mut egui::Ui, theme: &Theme, block: &Block) {
    match block {
        Block::Heading { level, inlines } => {
            let size = match level {
                1 => 17.0,
                2 => 15.5,
                _ => 14.5,
            };
            show_inline_rows(ui, theme, inlines, size, true);
        }
        Block::Paragraph(inlines) => show_inline_rows(ui, theme, inlines, 14.0, false),
        Block::List { ordered, items } => {
            for (number, item) in items.iter().enumerate() {
                ui.horizontal_wrapped(|ui| {
                    ui.spacing_mut().item_spacing.x = 0.0;
                    let marker = if *ordered {
                        format!("{}. ", number + 1)
                    } else {
                        "\u{2022} ".to_string()
                    };
                    ui.label(RichText::new(marker).color(theme.text_muted).size(14.0));
                    show_inlines(ui, theme, item, 14.0, false);
                });
            }
        }
    }
}

fn show_inline_rows(ui: &mut egui::Ui, theme: &Theme, inlines: &[Inline], size: f32, heading: bool) {
    for row in inlines.split(|inline| matches!(inline, Inline::Break)) {
        if row.is_empty() {
            ui.add_space(theme.spacing_4);
            continue;
        }
        ui.horizontal_wrapped(|ui| {
            ui.spacing_mut().item_spacing.x = 0.0;
            show_inlines(ui, theme, row, size, heading);
        });
    }
}

fn show_inlines(ui: &mut egui::Ui, theme: &Theme, row: &[Inline], size: f32, heading: bool) {
    for inline in row {
        match inline {
            Inline::Run {
                text,
                strong,
                emphasis,
            } => {
                let mut rich = RichText::new(text).color(theme.text_primary).size(size);
                if heading || *strong {
                    rich = rich.strong();
                }
                if *emphasis {
                    rich = rich.italics();
                }
                ui.label(rich);
            }
            Inline::Link { text, href } => {
                let label = if text.is_empty() { href } else { text };
                ui.hyperlink_to(
                    RichText::new(label)
                        .color(theme.accent_primary)
                        .size(size)
                        .underline(),
                    href,
                );
            }
            Inline::Break => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::sanitize;

    fn run(text: &str) -> Inline {
        Inline::Run {
            text: text.to_string(),
            strong: false,
            emphasis: false,
        }
    }

    #[test]
    fn heading_then_paragraph() {
        let blocks = parse_blocks(&sanitize("<h2>Title</h2><p>Body text.</p>"));
        assert_eq!(
            blocks,
            vec![
                Block::Heading {
                    level: 2,
                    inlines: vec![run("Title")],
                },
                Block::Paragraph(vec![run("Body text.")]),
            ]
        );
    }

    #[test]
    fn styled_runs_carry_flags() {
        let blocks = parse_blocks(&sanitize("<p>a <b>bold</b> and <i>soft</i> word</p>"));
        assert_eq!(
            blocks,
            vec![Block::Paragraph(vec![
                run("a "),
                Inline::Run {
                    text: "bold".to_string(),
                    strong: true,
                    emphasis: false,
                },
                run(" and "),
                Inline::Run {
                    text: "soft".to_string(),
                    strong: false,
                    emphasis: true,
                },
                run(" word"),
            ])]
        );
    }

    #[test]
    fn lists_collect_items() {
        let blocks = parse_blocks(&sanitize("<ol><li>one</li><li>two</li></ol>"));
        assert_eq!(
            blocks,
            vec![Block::List {
                ordered: true,
                items: vec![vec![run("one")], vec![run("two")]],
            }]
        );
    }

    #[test]
    fn links_keep_their_decoded_destination() {
        let blocks = parse_blocks(&sanitize(
            "<p>go <a href=\"https://e.com/?a=1&amp;b=2\">here</a></p>",
        ));
        assert_eq!(
            blocks,
            vec![Block::Paragraph(vec![
                run("go "),
                Inline::Link {
                    text: "here".to_string(),
                    href: "https://e.com/?a=1&b=2".to_string(),
                },
            ])]
        );
    }

    #[test]
    fn link_without_destination_renders_as_text() {
        let blocks = parse_blocks(&sanitize("<p><a href=\"javascript:x\">label</a></p>"));
        assert_eq!(blocks, vec![Block::Paragraph(vec![run("label")])]);
    }

    #[test]
    fn breaks_split_rows_within_a_paragraph() {
        let blocks = parse_blocks(&sanitize("<p>one<br>two</p>"));
        assert_eq!(
            blocks,
            vec![Block::Paragraph(vec![
                run("one"),
                Inline::Break,
                run("two"),
            ])]
        );
    }

    #[test]
    fn top_level_inline_content_becomes_a_paragraph() {
        let blocks = parse_blocks(&sanitize("<p>scene</p><i>Say anything.</i>"));
        assert_eq!(
            blocks,
            vec![
                Block::Paragraph(vec![run("scene")]),
                Block::Paragraph(vec![Inline::Run {
                    text: "Say anything.".to_string(),
                    strong: false,
                    emphasis: true,
                }]),
            ]
        );
    }

    #[test]
    fn entities_decode_for_display() {
        let blocks = parse_blocks(&sanitize("<p>R&amp;D &lt;lab&gt;</p>"));
        assert_eq!(blocks, vec![Block::Paragraph(vec![run("R&D <lab>")])]);
    }

    #[test]
    fn empty_input_yields_no_blocks() {
        assert!(parse_blocks(&sanitize("")).is_empty());
    }
}
