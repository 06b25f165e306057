use crate::{
    extract::{BasicFacts, Explanation, QuestionRecord},
    session::Session,
};
use base64::{engine::general_purpose, Engine as _};
use percent_encoding::percent_decode_str;
use reqwest::header::CONTENT_TYPE;
use strum::Display;
use tracing::warn;

/// Printable width of an A4 page inside the default margins.
pub const AVAILABLE_WIDTH: f32 = 515.28;
pub const MAX_COLUMNS: usize = 3;
pub const PROBLEM_IMAGE_WIDTH: f32 = 200.0;
pub const EXPLANATION_IMAGE_WIDTH: f32 = 150.0;
pub const IMAGE_ERROR: &str = "画像読み込みエラー";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Header,
    Question,
    ExplanationHeader,
    Analysis,
    CorrectAnswer,
    Points,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
    pub key: String,
    pub width: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Image(ImageRef),
    /// The image could not be fetched.
    Error,
    /// Padding so every row has the same number of columns.
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageGrid {
    pub rows: Vec<Vec<Cell>>,
    pub centered: bool,
}

impl ImageGrid {
    /// Lay out fetched images, `None` marking a failed fetch.
    ///
    /// A lone image keeps `lone_width`; otherwise rows of `MAX_COLUMNS` cells share the
    /// printable width evenly, the last row padded with empty cells.
    pub fn layout(images: Vec<Option<String>>, lone_width: f32) -> Self {
        let cell = |key: Option<String>, width: f32| match key {
            Some(key) => Cell::Image(ImageRef { key, width }),
            None => Cell::Error,
        };

        let rows: Vec<Vec<Cell>> = if images.len() == 1 {
            images.into_iter().map(|key| vec![cell(key, lone_width)]).collect()
        } else {
            let width = AVAILABLE_WIDTH / MAX_COLUMNS as f32;
            let mut rows = Vec::new();
            let mut images = images.into_iter().peekable();
            while images.peek().is_some() {
                let mut row = images
                    .by_ref()
                    .take(MAX_COLUMNS)
                    .map(|key| cell(key, width))
                    .collect::<Vec<_>>();
                row.resize(MAX_COLUMNS, Cell::Empty);
                rows.push(row);
            }
            rows
        };

        Self {
            rows,
            centered: false,
        }
    }

    pub fn columns(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Text(Style, String),
    List(Vec<String>),
    Images(ImageGrid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum PageKind {
    Question,
    Explanation,
}

/// Blocks up to a forced page break.
#[derive(Debug, Clone, PartialEq)]
pub struct PageBlock {
    pub kind: PageKind,
    pub blocks: Vec<Block>,
}

impl PageBlock {
    fn new(kind: PageKind) -> Self {
        Self {
            kind,
            blocks: vec![],
        }
    }

    fn text(&mut self, style: Style, text: impl Into<String>) {
        self.blocks.push(Block::Text(style, text.into()));
    }

    /// Every text this page shows, in order.
    pub fn texts(&self) -> Vec<&str> {
        let mut out = Vec::new();
        for block in &self.blocks {
            match block {
                Block::Text(_, text) => out.push(text.as_str()),
                Block::List(items) => out.extend(items.iter().map(String::as_str)),
                Block::Images(grid) => out.extend(
                    grid.rows
                        .iter()
                        .flatten()
                        .filter(|cell| **cell == Cell::Error)
                        .map(|_| IMAGE_ERROR),
                ),
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedImage {
    pub key: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// The whole output, built once before anything is written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedDocument {
    pub pages: Vec<PageBlock>,
    pub images: Vec<EmbeddedImage>,
}

/// Build the document for `records`, fetching every image one at a time.
pub async fn build_document(session: &Session, records: &[QuestionRecord]) -> RenderedDocument {
    let mut builder = DocumentBuilder::new(session);
    for record in records {
        builder.push(record).await;
    }
    builder.finish()
}

pub struct DocumentBuilder<'a> {
    session: &'a Session,
    doc: RenderedDocument,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self {
            session,
            doc: RenderedDocument::default(),
        }
    }

    pub async fn push(&mut self, record: &QuestionRecord) {
        let page = self.question_page(record).await;
        self.doc.pages.push(page);

        if let Some(explanation) = &record.explanation {
            let page = self.explanation_page(explanation, record.basic.as_ref()).await;
            self.doc.pages.push(page);
        }
    }

    pub fn finish(self) -> RenderedDocument {
        self.doc
    }

    async fn question_page(&mut self, record: &QuestionRecord) -> PageBlock {
        let mut page = PageBlock::new(PageKind::Question);
        page.text(Style::Header, format!("問題番号: {}", record.problem_number));
        page.text(Style::Question, record.question_text.as_str());

        if !record.problem_images.is_empty() {
            let grid = self.grid(&record.problem_images, PROBLEM_IMAGE_WIDTH).await;
            page.blocks.push(Block::Images(grid));
        }
        if !record.choices.is_empty() {
            page.blocks.push(Block::List(record.choices.clone()));
        }
        page
    }

    async fn explanation_page(
        &mut self,
        explanation: &Explanation,
        basic: Option<&BasicFacts>,
    ) -> PageBlock {
        let mut page = PageBlock::new(PageKind::Explanation);
        page.text(Style::ExplanationHeader, "解説");
        if !explanation.images.is_empty() {
            let grid = self.grid(&explanation.images, EXPLANATION_IMAGE_WIDTH).await;
            page.blocks.push(Block::Images(grid));
        }

        page.text(Style::ExplanationHeader, "選択肢考察");
        page.text(Style::Analysis, explanation.analysis.as_str());
        if !explanation.correct_answer.trim().is_empty() {
            page.text(Style::ExplanationHeader, "正解");
            page.text(Style::CorrectAnswer, explanation.correct_answer.as_str());
        }
        if !explanation.points.trim().is_empty() {
            page.text(Style::ExplanationHeader, "ポイント");
            page.text(Style::Points, explanation.points.as_str());
        }

        if let Some(basic) = basic {
            page.text(Style::ExplanationHeader, "基本情報");
            page.text(Style::Analysis, basic.text.as_str());
            if !basic.images.is_empty() {
                let mut grid = self.grid(&basic.images, EXPLANATION_IMAGE_WIDTH).await;
                grid.centered = basic.images.len() == 1;
                page.blocks.push(Block::Images(grid));
            }
        }
        page
    }

    async fn grid(&mut self, srcs: &[String], lone_width: f32) -> ImageGrid {
        let mut keys = Vec::with_capacity(srcs.len());
        for src in srcs {
            keys.push(self.embed(src).await);
        }
        ImageGrid::layout(keys, lone_width)
    }

    /// Fetch `src` and register it under a fresh key.
    ///
    /// Anything not served as an image (a login page after an expired session, say) counts
    /// as a failed fetch.
    async fn embed(&mut self, src: &str) -> Option<String> {
        let (mime, bytes) = match src.strip_prefix("data:") {
            Some(inline) => decode_data_url(inline),
            None => fetch_image(self.session, src).await,
        }?;
        if !mime.starts_with("image/") {
            warn!(%src, %mime, "not an image");
            return None;
        }

        let key = format!("img{}", self.doc.images.len());
        self.doc.images.push(EmbeddedImage {
            key: key.clone(),
            mime,
            bytes,
        });
        Some(key)
    }
}

async fn fetch_image(session: &Session, src: &str) -> Option<(String, Vec<u8>)> {
    let res = match session.client().get(src).send().await {
        Ok(res) => res,
        Err(e) => {
            warn!(%src, error = %e, "failed to fetch image");
            return None;
        }
    };
    if !res.status().is_success() {
        warn!(%src, status = %res.status(), "failed to fetch image");
        return None;
    }

    let mime = res
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("image/jpeg")
        .to_string();
    match res.bytes().await {
        Ok(bytes) => Some((mime, bytes.to_vec())),
        Err(e) => {
            warn!(%src, error = %e, "failed to read image body");
            None
        }
    }
}

/// `<mime>[;base64],<payload>`, the part of a data URL after `data:`.
///
/// Payloads without `;base64` are percent-encoded. A missing mime type means `text/plain`.
fn decode_data_url(inline: &str) -> Option<(String, Vec<u8>)> {
    let Some((meta, payload)) = inline.split_once(',') else {
        warn!("malformed data url");
        return None;
    };
    let (mime, bytes) = match meta.strip_suffix(";base64") {
        Some(mime) => match general_purpose::STANDARD.decode(payload.trim()) {
            Ok(bytes) => (mime, bytes),
            Err(e) => {
                warn!(error = %e, "failed to decode data url");
                return None;
            }
        },
        None => (meta, percent_decode_str(payload).collect()),
    };

    // parameters such as `;charset=utf-8` do not change the media type
    let mime = mime.split(';').next().unwrap_or_default().trim();
    let mime = if mime.is_empty() { "text/plain" } else { mime };
    Some((mime.to_string(), bytes))
}
