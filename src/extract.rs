use crate::{
    error::{Result, ScrapeError},
    explanation::Sections,
    session::Session,
};
use html5ever::tree_builder::TreeSink;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::LazyLock;
use url::Url;

/// Stored in place of a field the page did not provide.
pub const FAILED: &str = "取得失敗";

const NUMBER_PREFIX: &str = "問題番号 :";

macro_rules! selector {
    ($name:ident, $css:expr) => {
        static $name: LazyLock<Selector> = LazyLock::new(|| Selector::parse($css).unwrap());
    };
}

selector!(NUMBER, ".d-issue__content__num p");
selector!(QUESTION_BODY, "#question-body");
selector!(QUESTION_TEXT, "#question-body p");
selector!(IMG, "img");
selector!(CHOICES, "#practice_question_choice li button");
selector!(
    EXPLANATION_CONTAINER,
    ".d-issue__expound .d-issue__expound__accordion_content"
);
selector!(EXPLANATION_BODY, "#question-explanation");
selector!(BASIC_AREA, "#accordion_expound_base, .marker_basic");
selector!(BASIC_ROOT, "#accordion_expound_base");
selector!(BASIC_BOX, ".marker_basic .d-issue__expound__box");
selector!(BASIC_TITLE, "h3");
selector!(BASIC_TEXT, "p");
selector!(BASIC_IMAGES, ".js-lightgallery img");
selector!(NEXT_LINK, "a.o-btn.is-grey.is-triangle_g");

/// One question page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionRecord {
    pub problem_number: String,
    pub question_text: String,
    pub problem_images: Vec<String>,
    pub choices: Vec<String>,
    pub explanation: Option<Explanation>,
    pub basic: Option<BasicFacts>,
    /// `None` ends the walk after this record.
    pub next_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Explanation {
    pub images: Vec<String>,
    pub analysis: String,
    pub correct_answer: String,
    pub points: String,
}

/// The "basic facts" box shown under some explanations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicFacts {
    pub title: String,
    pub text: String,
    pub images: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PageExtractor {
    origin: String,
}

impl PageExtractor {
    /// `origin` prefixes relative "next" links.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }

    pub async fn extract(&self, session: &Session, page_url: &str) -> Result<QuestionRecord> {
        let html = session.get_text(page_url).await?;
        self.parse(page_url, &html)
    }

    pub fn parse(&self, page_url: &str, html: &str) -> Result<QuestionRecord> {
        let base = Url::parse(page_url).map_err(|e| ScrapeError::invalid_url(page_url, e))?;
        let document = Html::parse_document(html);

        let number = joined_text(&document, &NUMBER).replacen(NUMBER_PREFIX, "", 1);
        let question_text = joined_text(&document, &QUESTION_TEXT);

        let problem_images = match document
            .select(&QUESTION_BODY)
            .next()
            .and_then(|body| body.parent())
            .and_then(ElementRef::wrap)
        {
            Some(container) => collect_images(container.select(&IMG), &base)?,
            None => vec![],
        };

        let choices = document
            .select(&CHOICES)
            .map(|el| el.text().collect::<String>().trim().to_string())
            .collect();

        Ok(QuestionRecord {
            problem_number: or_failed(number),
            question_text: or_failed(question_text),
            problem_images,
            choices,
            explanation: parse_explanation(&document, &base)?,
            basic: parse_basic(&document, &base)?,
            next_url: self.next_url(&document),
        })
    }

    fn next_url(&self, document: &Html) -> Option<String> {
        let href = document
            .select(&NEXT_LINK)
            .next()
            .and_then(|a| a.value().attr("href"))
            .filter(|href| !href.is_empty())?;

        if href.starts_with("http") {
            Some(href.to_string())
        } else if href.starts_with('/') {
            Some(format!("{}{}", self.origin.trim_end_matches('/'), href))
        } else {
            Some(format!("{}/{}", self.origin.trim_end_matches('/'), href))
        }
    }
}

fn parse_explanation(document: &Html, base: &Url) -> Result<Option<Explanation>> {
    if document.select(&EXPLANATION_CONTAINER).next().is_none() {
        return Ok(None);
    }

    // basic-facts images are rendered with the basic facts, not here
    let mut pruned = document.clone();
    let basic_ids = pruned
        .select(&BASIC_AREA)
        .map(|node| node.id())
        .collect::<Vec<_>>();
    for id in basic_ids {
        pruned.remove_from_parent(&id);
    }
    let images = collect_images(
        pruned
            .select(&EXPLANATION_CONTAINER)
            .flat_map(|container| container.select(&IMG)),
        base,
    )?;

    let sections = document
        .select(&EXPLANATION_BODY)
        .next()
        .map(Sections::parse)
        .unwrap_or_else(|| Sections {
            analysis: FAILED.to_string(),
            ..Default::default()
        });

    Ok(Some(Explanation {
        images,
        analysis: sections.analysis,
        correct_answer: sections.correct_answer,
        points: sections.points,
    }))
}

fn parse_basic(document: &Html, base: &Url) -> Result<Option<BasicFacts>> {
    let Some(root) = document.select(&BASIC_ROOT).next() else {
        return Ok(None);
    };
    let boxes = root.select(&BASIC_BOX).collect::<Vec<_>>();
    if boxes.is_empty() {
        return Ok(None);
    }

    let title = boxes
        .iter()
        .flat_map(|b| b.select(&BASIC_TITLE))
        .flat_map(|h| h.text())
        .collect::<String>();
    let text = boxes
        .iter()
        .flat_map(|b| b.select(&BASIC_TEXT))
        .next()
        .map(text_with_breaks)
        .unwrap_or_default();
    let images = collect_images(boxes.iter().flat_map(|b| b.select(&BASIC_IMAGES)), base)?;

    Ok(Some(BasicFacts {
        title: title.trim().to_string(),
        text: text.trim().to_string(),
        images,
    }))
}

fn joined_text(document: &Html, selector: &Selector) -> String {
    document
        .select(selector)
        .flat_map(|el| el.text())
        .collect::<String>()
        .trim()
        .to_string()
}

fn or_failed(value: String) -> String {
    let value = value.trim();
    if value.is_empty() {
        FAILED.to_string()
    } else {
        value.to_string()
    }
}

/// Text content with `<br>` turned into line breaks.
fn text_with_breaks(el: ElementRef) -> String {
    let mut out = String::new();
    for child in el.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(e) if e.name() == "br" => out.push('\n'),
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    out.push_str(&text_with_breaks(child));
                }
            }
            _ => {}
        }
    }
    out
}

/// Absolute, de-duplicated `src` values in document order.
fn collect_images<'a>(
    images: impl Iterator<Item = ElementRef<'a>>,
    base: &Url,
) -> Result<Vec<String>> {
    let mut srcs = Vec::new();
    for img in images {
        let Some(src) = img.value().attr("src").filter(|s| !s.is_empty()) else {
            continue;
        };
        let src = normalize_src(src, base)?;
        if !srcs.contains(&src) {
            srcs.push(src);
        }
    }
    Ok(srcs)
}

/// `//host/x` gets `https:`, other non-`http` sources resolve against the page URL.
pub fn normalize_src(src: &str, base: &Url) -> Result<String> {
    if src.starts_with("//") {
        Ok(format!("https:{src}"))
    } else if src.starts_with("http") {
        Ok(src.to_string())
    } else {
        base.join(src)
            .map(String::from)
            .map_err(|e| ScrapeError::invalid_url(src, e))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const PAGE_1: &str = "https://m3e-medical.com/issues/1";

    fn extractor() -> PageExtractor {
        PageExtractor::new("https://m3e-medical.com")
    }

    #[test]
    fn parse_question_page_should_work() {
        let content = fs::read_to_string("fixtures/question_1.html").unwrap();
        let record = extractor().parse(PAGE_1, &content).unwrap();

        assert_eq!(record.problem_number, "101A1");
        assert_eq!(record.question_text, "細胞膜の主な構成成分はどれか。");
        assert_eq!(record.choices.len(), 5);
        assert_eq!(record.choices[0], "a  リン脂質");
        assert_eq!(record.choices[4], "e  DNA");
        assert_eq!(
            record.next_url.as_deref(),
            Some("https://m3e-medical.com/issues/2")
        );

        insta::assert_debug_snapshot!(record.problem_images, @r###"
        [
            "https://m3e-medical.com/images/q1-fig1.png",
            "https://m3e-medical.com/issues/figures/q1-fig2.png",
        ]
        "###);
    }

    #[test]
    fn parse_explanation_should_skip_basic_images() {
        let content = fs::read_to_string("fixtures/question_1.html").unwrap();
        let record = extractor().parse(PAGE_1, &content).unwrap();
        let explanation = record.explanation.unwrap();

        assert_eq!(
            explanation.images,
            vec![
                "https://m3e-medical.com/images/q1-exp1.png".to_string(),
                "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAIAAACQd1PeAAAADElEQVR4nGPQ0DgBAAGUARn8OyyYAAAAAElFTkSuQmCC".to_string(),
            ]
        );
        assert_eq!(explanation.correct_answer, "A");
        assert_eq!(
            explanation.points,
            "膜タンパク質は流動モザイクモデルで説明される。"
        );
        insta::assert_snapshot!(explanation.analysis, @r###"
        a 正しい。細胞膜はリン脂質二重層からなる。
        b 誤り。グリコーゲンは細胞質に貯蔵される。
        "###);
    }

    #[test]
    fn parse_basic_facts_should_work() {
        let content = fs::read_to_string("fixtures/question_1.html").unwrap();
        let basic = extractor().parse(PAGE_1, &content).unwrap().basic.unwrap();

        assert_eq!(basic.title, "細胞膜の構造");
        assert_eq!(basic.text, "リン脂質二重層\nコレステロール\n膜タンパク質");
        assert_eq!(
            basic.images,
            vec!["https://m3e-medical.com/images/basic-membrane.png".to_string()]
        );
    }

    #[test]
    fn parse_last_page_should_have_no_next_url() {
        let content = fs::read_to_string("fixtures/question_2.html").unwrap();
        let record = extractor()
            .parse("https://m3e-medical.com/issues/2", &content)
            .unwrap();

        assert_eq!(record.next_url, None);
        assert!(record.problem_images.is_empty());
        assert!(record.basic.is_none());

        let explanation = record.explanation.unwrap();
        assert!(explanation.images.is_empty());
        assert_eq!(explanation.analysis, "a 解糖系は細胞質基質で行われる。");
        assert_eq!(explanation.correct_answer, "BC");
        assert_eq!(explanation.points, "ATP産生の大部分は酸化的リン酸化による。");
    }

    #[test]
    fn parse_empty_page_should_use_fallbacks() {
        let record = extractor()
            .parse(PAGE_1, "<html><body><p>maintenance</p></body></html>")
            .unwrap();

        assert_eq!(record.problem_number, FAILED);
        assert_eq!(record.question_text, FAILED);
        assert!(record.choices.is_empty());
        assert!(record.explanation.is_none());
        assert!(record.basic.is_none());
        assert!(record.next_url.is_none());
    }

    #[test]
    fn normalize_src_should_resolve_against_page() {
        let base = Url::parse("https://m3e-medical.com/issues/12/show").unwrap();

        assert_eq!(
            normalize_src("//cdn.example.com/a.jpg", &base).unwrap(),
            "https://cdn.example.com/a.jpg"
        );
        assert_eq!(
            normalize_src("http://img.example.com/b.jpg", &base).unwrap(),
            "http://img.example.com/b.jpg"
        );
        assert_eq!(
            normalize_src("/uploads/c.png", &base).unwrap(),
            "https://m3e-medical.com/uploads/c.png"
        );
        assert_eq!(
            normalize_src("d.png", &base).unwrap(),
            "https://m3e-medical.com/issues/12/d.png"
        );
        assert_eq!(
            normalize_src("../e.png?v=2", &base).unwrap(),
            "https://m3e-medical.com/issues/e.png?v=2"
        );
    }

    #[test]
    fn collected_images_should_be_unique_in_first_seen_order() {
        let html = r#"<div><div id="question-body"><p>q</p></div>
            <img src="//cdn.example.com/x.jpg"><img src="/y.jpg">
            <img src="https://cdn.example.com/x.jpg"><img src="/y.jpg"><img src="z.jpg"></div>"#;
        let record = extractor().parse(PAGE_1, html).unwrap();

        assert_eq!(
            record.problem_images,
            vec![
                "https://cdn.example.com/x.jpg".to_string(),
                "https://m3e-medical.com/y.jpg".to_string(),
                "https://m3e-medical.com/issues/z.jpg".to_string(),
            ]
        );
    }

    #[test]
    fn next_url_should_keep_absolute_links() {
        let html = r#"<a class="o-btn is-grey is-triangle_g" href="https://other.example.com/q/3">next</a>"#;
        let record = extractor().parse(PAGE_1, html).unwrap();
        assert_eq!(
            record.next_url.as_deref(),
            Some("https://other.example.com/q/3")
        );
    }
}
