//! Splits the explanation body into its labelled sections.
//!
//! The body is a run of text interleaved with bold-underlined labels
//! (`<b><u>選択肢考察</u></b>`, `<b><u>正解</u></b>`, `<b><u>ポイント</u></b>`).
//! The parser flattens the DOM into labels and text, `<br>` becoming a newline and any
//! other tag contributing only its text.

use crate::extract::FAILED;
use scraper::{ElementRef, Node};
use std::str::FromStr;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
pub enum Marker {
    #[strum(serialize = "選択肢考察")]
    Analysis,
    #[strum(serialize = "正解")]
    CorrectAnswer,
    #[strum(serialize = "ポイント")]
    Points,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Marker(Marker),
    Text(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
    pub analysis: String,
    pub correct_answer: String,
    pub points: String,
}

impl Sections {
    pub fn parse(explanation: ElementRef) -> Self {
        let mut tokens = Vec::new();
        tokenize(explanation, &mut tokens);

        Self {
            analysis: analysis(&tokens).unwrap_or_else(|| FAILED.to_string()),
            correct_answer: correct_answer(&tokens).unwrap_or_default(),
            points: points(&tokens).unwrap_or_default(),
        }
    }
}

fn tokenize(el: ElementRef, tokens: &mut Vec<Token>) {
    for child in el.children() {
        match child.value() {
            // line feeds in the source markup carry no meaning
            Node::Text(text) => push_text(tokens, &text.replace('\n', "")),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                if child.value().name() == "br" {
                    push_text(tokens, "\n");
                } else if let Some(marker) = as_marker(child) {
                    tokens.push(Token::Marker(marker));
                } else {
                    tokenize(child, tokens);
                }
            }
            _ => {}
        }
    }
}

fn push_text(tokens: &mut Vec<Token>, text: &str) {
    if text.is_empty() {
        return;
    }
    match tokens.last_mut() {
        Some(Token::Text(last)) => last.push_str(text),
        _ => tokens.push(Token::Text(text.to_string())),
    }
}

/// A `<b>` holding a `<u>` whose whole text is one of the labels.
fn as_marker(el: ElementRef) -> Option<Marker> {
    if el.value().name() != "b" {
        return None;
    }
    let underlined = el
        .children()
        .filter_map(ElementRef::wrap)
        .any(|child| child.value().name() == "u");
    if !underlined {
        return None;
    }
    let text = el.text().collect::<String>();
    Marker::from_str(text.trim()).ok()
}

fn position(tokens: &[Token], marker: Marker, from: usize) -> Option<usize> {
    tokens[from..]
        .iter()
        .position(|t| *t == Token::Marker(marker))
        .map(|idx| idx + from)
}

/// Text of `tokens` with any labels rendered back as their literal names.
fn join(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| match t {
            Token::Marker(m) => m.to_string(),
            Token::Text(s) => s.clone(),
        })
        .collect()
}

fn strip_colon(text: &str) -> &str {
    text.strip_prefix([':', '：']).unwrap_or(text)
}

/// Everything from the first analysis label up to the next correct-answer label.
fn analysis(tokens: &[Token]) -> Option<String> {
    let start = position(tokens, Marker::Analysis, 0)?;
    let end = position(tokens, Marker::CorrectAnswer, start + 1)?;
    let text = join(&tokens[start + 1..end]);
    Some(strip_colon(&text).trim().to_string())
}

/// The leading run of `A`-`E`, `○`, `×` after the first correct-answer label that has one.
fn correct_answer(tokens: &[Token]) -> Option<String> {
    let mut from = 0;
    while let Some(idx) = position(tokens, Marker::CorrectAnswer, from) {
        if let Some(Token::Text(text)) = tokens.get(idx + 1) {
            let answer: String = strip_colon(text)
                .trim_start()
                .chars()
                .take_while(|&c| matches!(c, 'A'..='E' | '○' | '×'))
                .collect();
            if !answer.is_empty() {
                return Some(answer);
            }
        }
        from = idx + 1;
    }
    None
}

/// Everything after the first points label.
fn points(tokens: &[Token]) -> Option<String> {
    let start = position(tokens, Marker::Points, 0)?;
    let text = join(&tokens[start + 1..]);
    Some(strip_colon(&text).trim().to_string())
}

#[cfg(test)]
mod tests {
    use scraper::{Html, Selector};

    use super::*;

    fn parse(body: &str) -> Sections {
        let html = Html::parse_fragment(&format!(r#"<div id="question-explanation">{body}</div>"#));
        let selector = Selector::parse("#question-explanation").unwrap();
        Sections::parse(html.select(&selector).next().unwrap())
    }

    #[test]
    fn parse_should_split_labelled_sections() {
        let sections = parse(
            "<b><u>選択肢考察</u></b>:TEXT1<b><u>正解</u></b>:A<b><u>ポイント</u></b>TEXT2",
        );

        assert_eq!(sections.analysis, "TEXT1");
        assert_eq!(sections.correct_answer, "A");
        assert_eq!(sections.points, "TEXT2");
    }

    #[test]
    fn parse_should_keep_line_breaks_and_drop_other_tags() {
        let sections = parse(
            "<b><u>選択肢考察</u></b>：\n<span>A 誤り</span><br>B <i>正しい</i><br/>\n\
             <b><u>正解</u></b>： B\n<b><u>ポイント</u></b><p>細胞膜<br>リン脂質</p>",
        );

        assert_eq!(sections.analysis, "A 誤り\nB 正しい");
        assert_eq!(sections.correct_answer, "B");
        assert_eq!(sections.points, "細胞膜\nリン脂質");
    }

    #[test]
    fn parse_should_fall_back_when_labels_are_missing() {
        let sections = parse("<p>no labels at all</p>");
        assert_eq!(sections.analysis, FAILED);
        assert_eq!(sections.correct_answer, "");
        assert_eq!(sections.points, "");

        // analysis without a following correct-answer label does not match
        let sections = parse("<b><u>選択肢考察</u></b>text<b><u>ポイント</u></b>p");
        assert_eq!(sections.analysis, FAILED);
        assert_eq!(sections.points, "p");
    }

    #[test]
    fn correct_answer_should_only_accept_answer_notation() {
        assert_eq!(parse("<b><u>正解</u></b>:AC").correct_answer, "AC");
        assert_eq!(parse("<b><u>正解</u></b>：○").correct_answer, "○");
        assert_eq!(parse("<b><u>正解</u></b>: 3番").correct_answer, "");
        assert_eq!(
            parse("<b><u>正解</u></b>3<b><u>正解</u></b>×").correct_answer,
            "×"
        );
    }

    #[test]
    fn plain_bold_is_not_a_label() {
        let sections = parse("<b>選択肢考察</b>x<b><u>選択肢考察</u></b>y<b><u>正解</u></b>D");
        assert_eq!(sections.analysis, "y");
        assert_eq!(sections.correct_answer, "D");
    }
}
