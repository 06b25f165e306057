use crate::{
    document::{
        Block, Cell, EmbeddedImage, ImageGrid, PageBlock, RenderedDocument, Style,
        AVAILABLE_WIDTH, IMAGE_ERROR,
    },
    error::{Result, ScrapeError},
};
use printpdf::{
    Color, FontId, Mm, Op, ParsedFont, PdfDocument, PdfPage, PdfSaveOptions, Point, Pt, RawImage,
    Rgb, TextItem, XObjectId, XObjectTransform,
};
use std::{collections::HashMap, mem};
use tracing::{debug, warn};

/// A4 in points.
pub const PAGE_WIDTH: f32 = 595.28;
pub const PAGE_HEIGHT: f32 = 841.89;
pub const MARGIN: f32 = (PAGE_WIDTH - AVAILABLE_WIDTH) / 2.0;

const TOP: f32 = PAGE_HEIGHT - MARGIN;
const LINE_SPACING: f32 = 1.4;
const CELL_MARGIN: f32 = 5.0;
const CELL_GAP: f32 = 6.0;
const MAX_IMAGE_HEIGHT: f32 = TOP - MARGIN - 2.0 * CELL_MARGIN;
const BULLET: &str = "• ";

#[derive(Debug, Clone, Copy, PartialEq)]
struct TextStyle {
    size: f32,
    indent: f32,
    before: f32,
    after: f32,
    red: bool,
}

impl TextStyle {
    const fn new(size: f32, indent: f32, before: f32, after: f32) -> Self {
        Self {
            size,
            indent,
            before,
            after,
            red: false,
        }
    }
}

const CHOICE: TextStyle = TextStyle::new(10.5, 15.0, 2.0, 2.0);
const ERROR: TextStyle = TextStyle {
    red: true,
    ..TextStyle::new(10.5, 0.0, 5.0, 5.0)
};

impl From<Style> for TextStyle {
    fn from(style: Style) -> Self {
        match style {
            Style::Header => TextStyle::new(12.0, 0.0, 0.0, 10.0),
            Style::Question => TextStyle::new(10.5, 0.0, 5.0, 5.0),
            Style::ExplanationHeader => TextStyle::new(12.0, 0.0, 15.0, 5.0),
            Style::Analysis => TextStyle::new(12.0, 15.0, 0.0, 5.0),
            Style::CorrectAnswer => TextStyle::new(10.5, 0.0, 5.0, 5.0),
            Style::Points => TextStyle::new(10.5, 15.0, 0.0, 15.0),
        }
    }
}

/// An image registered with the PDF, with its pixel size.
#[derive(Debug, Clone)]
struct PlacedImage {
    id: XObjectId,
    width: usize,
    height: usize,
}

/// Lay the document out as PDF bytes with `font` embedded as the only font.
///
/// Every page block starts a new PDF page; a block taller than one page continues on the
/// next. Images that fail to decode are drawn as the error placeholder.
pub fn to_pdf(doc: &RenderedDocument, font: &[u8]) -> Result<Vec<u8>> {
    let mut warnings = Vec::new();
    let font = ParsedFont::from_bytes(font, 0, &mut warnings)
        .ok_or_else(|| ScrapeError::Pdf("failed to parse font".into()))?;
    if matches!(font.lookup_glyph_index('あ' as u32), None | Some(0)) {
        warn!("font has no Japanese glyphs, most text will not show");
    }

    let mut pdf = PdfDocument::new("montore-scrape");
    let font_id = pdf.add_font(&font);
    let images = register_images(&mut pdf, &doc.images);

    let mut layout = Layout::new(&font, font_id, &images);
    for page in &doc.pages {
        layout.page(page);
    }
    let pages = layout.finish();
    let page_count = pages.len();

    let bytes = pdf
        .with_pages(pages)
        .save(&PdfSaveOptions::default(), &mut warnings);
    debug!(
        pages = page_count,
        images = images.len(),
        warnings = warnings.len(),
        size = bytes.len(),
        "pdf generated"
    );
    Ok(bytes)
}

fn register_images(
    pdf: &mut PdfDocument,
    images: &[EmbeddedImage],
) -> HashMap<String, PlacedImage> {
    let mut placed = HashMap::with_capacity(images.len());
    for image in images {
        let mut warnings = Vec::new();
        match RawImage::decode_from_bytes(&image.bytes, &mut warnings) {
            Ok(raw) if raw.width > 0 && raw.height > 0 => {
                let (width, height) = (raw.width, raw.height);
                let id = pdf.add_image(&raw);
                placed.insert(image.key.clone(), PlacedImage { id, width, height });
            }
            Ok(_) => warn!(key = %image.key, mime = %image.mime, "image has no pixels"),
            Err(e) => {
                warn!(key = %image.key, mime = %image.mime, error = %e, "failed to decode image")
            }
        }
    }
    placed
}

enum Drawn<'b> {
    Image(&'b PlacedImage, f32, f32),
    Error,
    Empty,
}

/// Top-down flow of blocks onto fixed A4 pages. `y` is the next free line, from the bottom.
struct Layout<'a> {
    font: &'a ParsedFont,
    font_id: FontId,
    units_per_em: f32,
    images: &'a HashMap<String, PlacedImage>,
    pages: Vec<PdfPage>,
    ops: Vec<Op>,
    y: f32,
}

impl<'a> Layout<'a> {
    fn new(
        font: &'a ParsedFont,
        font_id: FontId,
        images: &'a HashMap<String, PlacedImage>,
    ) -> Self {
        Self {
            font,
            font_id,
            units_per_em: font.font_metrics.units_per_em.max(1) as f32,
            images,
            pages: vec![],
            ops: vec![],
            y: TOP,
        }
    }

    fn page(&mut self, page: &PageBlock) {
        debug!(kind = %page.kind, blocks = page.blocks.len(), "laying out page");
        for block in &page.blocks {
            match block {
                Block::Text(style, text) => self.text(text, (*style).into()),
                Block::List(items) => {
                    for item in items {
                        self.text(&format!("{BULLET}{item}"), CHOICE);
                    }
                }
                Block::Images(grid) => self.grid(grid),
            }
        }
        self.break_page();
    }

    fn finish(mut self) -> Vec<PdfPage> {
        if self.pages.is_empty() {
            self.break_page();
        }
        self.pages
    }

    fn break_page(&mut self) {
        let ops = mem::take(&mut self.ops);
        self.pages.push(PdfPage::new(Mm(210.0), Mm(297.0), ops));
        self.y = TOP;
    }

    /// Move to a fresh page unless `height` still fits below the cursor.
    fn reserve(&mut self, height: f32) {
        if self.y - height < MARGIN && self.y < TOP {
            self.break_page();
        }
    }

    fn text(&mut self, text: &str, style: TextStyle) {
        let line_height = style.size * LINE_SPACING;
        let x = MARGIN + style.indent;

        self.y -= style.before;
        for line in self.wrap(text, style.size, AVAILABLE_WIDTH - style.indent) {
            self.reserve(line_height);
            if !line.is_empty() {
                self.write(&line, x, self.y - style.size, style);
            }
            self.y -= line_height;
        }
        self.y -= style.after;
    }

    fn grid(&mut self, grid: &ImageGrid) {
        let columns = grid.columns().max(1);
        let cell_width = AVAILABLE_WIDTH / columns as f32;
        let gap = if columns > 1 { CELL_GAP } else { 0.0 };
        let error_height = ERROR.size * LINE_SPACING;
        let images = self.images;

        for row in &grid.rows {
            let cells = row
                .iter()
                .map(|cell| match cell {
                    Cell::Image(img) => match images.get(&img.key) {
                        Some(placed) => {
                            let (w, h) = fit(placed, img.width.min(cell_width) - gap);
                            Drawn::Image(placed, w, h)
                        }
                        None => Drawn::Error,
                    },
                    Cell::Error => Drawn::Error,
                    Cell::Empty => Drawn::Empty,
                })
                .collect::<Vec<_>>();

            let content = cells
                .iter()
                .map(|cell| match cell {
                    Drawn::Image(_, _, h) => *h,
                    Drawn::Error => error_height,
                    Drawn::Empty => 0.0,
                })
                .fold(0.0, f32::max);
            let row_height = content + 2.0 * CELL_MARGIN;
            self.reserve(row_height);

            let top = self.y - CELL_MARGIN;
            for (col, cell) in cells.iter().enumerate() {
                let left = MARGIN + col as f32 * cell_width;
                match cell {
                    Drawn::Image(placed, w, h) => {
                        let x = if grid.centered {
                            MARGIN + (AVAILABLE_WIDTH - w) / 2.0
                        } else {
                            left
                        };
                        self.ops.push(Op::UseXobject {
                            id: placed.id.clone(),
                            transform: XObjectTransform {
                                translate_x: Some(Pt(x)),
                                translate_y: Some(Pt(top - h)),
                                scale_x: Some(w / placed.width as f32),
                                scale_y: Some(w / placed.width as f32),
                                dpi: Some(72.0),
                                ..Default::default()
                            },
                        });
                    }
                    Drawn::Error => {
                        let x = if grid.centered {
                            MARGIN + (AVAILABLE_WIDTH - self.measure(IMAGE_ERROR, ERROR.size)) / 2.0
                        } else {
                            left
                        };
                        self.write(IMAGE_ERROR, x, top - ERROR.size, ERROR);
                    }
                    Drawn::Empty => {}
                }
            }
            self.y -= row_height;
        }
    }

    fn write(&mut self, text: &str, x: f32, baseline: f32, style: TextStyle) {
        if style.red {
            self.ops.push(fill(0.8, 0.0, 0.0));
        }
        self.ops.extend([
            Op::StartTextSection,
            Op::SetFontSize {
                size: Pt(style.size),
                font: self.font_id.clone(),
            },
            Op::SetTextCursor {
                pos: Point {
                    x: Pt(x),
                    y: Pt(baseline),
                },
            },
            Op::WriteText {
                items: vec![TextItem::Text(text.to_string())],
                font: self.font_id.clone(),
            },
            Op::EndTextSection,
        ]);
        if style.red {
            self.ops.push(fill(0.0, 0.0, 0.0));
        }
    }

    /// Break `text` into lines no wider than `width`, keeping its own line breaks.
    ///
    /// Lines break between any two characters, which suits Japanese text.
    fn wrap(&self, text: &str, size: f32, width: f32) -> Vec<String> {
        let mut lines = Vec::new();
        for paragraph in text.split('\n') {
            let mut line = String::new();
            let mut used = 0.0;
            for c in paragraph.chars() {
                let advance = self.advance(c, size);
                if used + advance > width && !line.is_empty() {
                    lines.push(mem::take(&mut line));
                    used = 0.0;
                }
                line.push(c);
                used += advance;
            }
            lines.push(line);
        }
        lines
    }

    fn measure(&self, text: &str, size: f32) -> f32 {
        text.chars().map(|c| self.advance(c, size)).sum()
    }

    /// Advance width of `c` in points. Fonts without glyph metrics fall back to a full em
    /// for wide characters and half an em for ASCII.
    fn advance(&self, c: char, size: f32) -> f32 {
        let units = self
            .font
            .lookup_glyph_index(c as u32)
            .map(|gid| self.font.get_horizontal_advance(gid))
            .unwrap_or_default();
        match units {
            0 if c.is_ascii() => size / 2.0,
            0 => size,
            units => units as f32 * size / self.units_per_em,
        }
    }
}

/// Scale an image to `width`, shrinking it further when it would not fit on one page.
fn fit(image: &PlacedImage, width: f32) -> (f32, f32) {
    let ratio = image.height as f32 / image.width as f32;
    let height = width * ratio;
    if height > MAX_IMAGE_HEIGHT {
        (MAX_IMAGE_HEIGHT / ratio, MAX_IMAGE_HEIGHT)
    } else {
        (width, height)
    }
}

fn fill(r: f32, g: f32, b: f32) -> Op {
    Op::SetFillColor {
        col: Color::Rgb(Rgb::new(r, g, b, None)),
    }
}
