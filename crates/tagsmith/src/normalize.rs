// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Syntax normalization.
//!
//! Turns a raw template into canonical form: literal text interleaved with
//! `<% ... %>` fences. Each delimiter-bounded tag is isolated first and then
//! handed to the grammar on its own, so a rule can never match across two
//! independent tags.

use crate::error::{Result, TemplateError};
use crate::settings::Settings;
use crate::syntax::{Grammar, TagRewrite, FENCE_CLOSE, FENCE_OPEN};

/// Stands in for a literal `<%` written by the template author.
pub const ESCAPED_FENCE_OPEN: char = '\u{E000}';
/// Stands in for a literal `%>` written by the template author.
pub const ESCAPED_FENCE_CLOSE: char = '\u{E001}';

/// A canonical template plus the problems lenient mode skipped over.
#[derive(Debug, Clone)]
pub struct Normalized {
    /// Canonical template text.
    pub code: String,
    /// Errors that were tolerated (always empty in strict mode).
    pub diagnostics: Vec<TemplateError>,
}

/// Escapes author-written fence markers so they survive as literal text.
pub fn escape_fences(template: &str) -> String {
    template
        .replace(FENCE_OPEN, &ESCAPED_FENCE_OPEN.to_string())
        .replace(FENCE_CLOSE, &ESCAPED_FENCE_CLOSE.to_string())
}

/// Restores author-written fence markers.
pub fn unescape_fences(text: &str) -> String {
    if !text.contains([ESCAPED_FENCE_OPEN, ESCAPED_FENCE_CLOSE]) {
        return text.to_string();
    }
    text.replace(ESCAPED_FENCE_OPEN, FENCE_OPEN)
        .replace(ESCAPED_FENCE_CLOSE, FENCE_CLOSE)
}

/// 1-indexed line of a byte offset.
pub fn line_at(text: &str, offset: usize) -> usize {
    text[..offset.min(text.len())].matches('\n').count() + 1
}

/// Normalizes `template` with `grammar`.
///
/// In strict mode the first unmatched tag or stray delimiter fails the whole
/// template. Otherwise offending tags are stripped and reported through
/// [`Normalized::diagnostics`].
pub fn normalize(template: &str, grammar: &Grammar, settings: &Settings) -> Result<Normalized> {
    let source = escape_fences(template);
    let open = settings.open_tag.as_str();
    let close = settings.close_tag.as_str();

    let mut code = String::with_capacity(source.len());
    let mut diagnostics = Vec::new();
    let mut fail = |error: TemplateError, diagnostics: &mut Vec<TemplateError>| -> Result<()> {
        if settings.strict {
            Err(error)
        } else {
            tracing::debug!("lenient normalization skipped: {}", error);
            diagnostics.push(error);
            Ok(())
        }
    };

    let mut pos = 0;
    while pos < source.len() {
        let rest = &source[pos..];
        let Some(rel_open) = rest.find(open) else {
            push_literal(template, &source, pos..source.len(), close, &mut code, &mut diagnostics, &mut fail)?;
            break;
        };

        let tag_start = pos + rel_open;
        push_literal(template, &source, pos..tag_start, close, &mut code, &mut diagnostics, &mut fail)?;

        let inner_start = tag_start + open.len();
        let Some(rel_close) = source[inner_start..].find(close) else {
            fail(
                TemplateError::syntax(
                    format!("unterminated tag: '{}' without '{}'", open, close),
                    template,
                    line_at(&source, tag_start),
                ),
                &mut diagnostics,
            )?;
            // Drop the unterminated tag up to the end of its line
            pos = source[inner_start..]
                .find('\n')
                .map_or(source.len(), |nl| inner_start + nl);
            continue;
        };

        let inner_end = inner_start + rel_close;
        let tag = &source[inner_start..inner_end];

        match grammar.rewrite_tag(tag) {
            TagRewrite::Code(canonical) => {
                if !canonical.is_empty() {
                    code.push_str(FENCE_OPEN);
                    code.push_str(&canonical);
                    code.push_str(FENCE_CLOSE);
                }
            }
            TagRewrite::Unmatched => fail(
                TemplateError::syntax(
                    format!("no syntax rule matches '{}{}{}'", open, tag.trim(), close),
                    template,
                    line_at(&source, tag_start),
                ),
                &mut diagnostics,
            )?,
            TagRewrite::Diverged(last) => fail(
                TemplateError::syntax(
                    format!(
                        "rewriting '{}{}{}' did not settle (last form: '{}')",
                        open,
                        tag.trim(),
                        close,
                        last
                    ),
                    template,
                    line_at(&source, tag_start),
                ),
                &mut diagnostics,
            )?,
        }

        pos = inner_end + close.len();
    }

    Ok(Normalized { code, diagnostics })
}

/// Copies literal text, checking it for stray closing delimiters.
fn push_literal<F>(
    template: &str,
    source: &str,
    range: std::ops::Range<usize>,
    close: &str,
    code: &mut String,
    diagnostics: &mut Vec<TemplateError>,
    fail: &mut F,
) -> Result<()>
where
    F: FnMut(TemplateError, &mut Vec<TemplateError>) -> Result<()>,
{
    let from = range.start;
    let text = &source[range];
    let mut cursor = 0;
    while let Some(rel) = text[cursor..].find(close) {
        let at = cursor + rel;
        fail(
            TemplateError::syntax(
                format!("unexpected '{}' outside of a tag", close),
                template,
                line_at(source, from + at),
            ),
            diagnostics,
        )?;
        code.push_str(&text[cursor..at]);
        cursor = at + close.len();
    }
    code.push_str(&text[cursor..]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strict() -> Settings {
        Settings::default()
    }

    fn lenient() -> Settings {
        Settings {
            strict: false,
            ..Settings::default()
        }
    }

    #[test]
    fn test_plain_text_is_untouched() {
        let out = normalize("<p>no tags here</p>\n", &Grammar::standard(), &strict()).unwrap();
        assert_eq!(out.code, "<p>no tags here</p>\n");
    }

    #[test]
    fn test_tags_become_fences() {
        let out = normalize(
            "{{if 1}}<div>Hello</div>{{/if}}",
            &Grammar::standard(),
            &strict(),
        )
        .unwrap();
        assert_eq!(out.code, "<%if 1%><div>Hello</div><%/if%>");
    }

    #[test]
    fn test_author_fences_are_escaped() {
        let out = normalize("a <% b %> {{= c}}", &Grammar::standard(), &strict()).unwrap();
        assert!(!out.code.starts_with("a <%"));
        assert_eq!(unescape_fences(&out.code), "a <% b %> <%=c%>");
    }

    #[test]
    fn test_unknown_tag_fails_strict_mode_with_line() {
        let err = normalize("{{unknownTag x}}", &Grammar::standard(), &strict()).unwrap_err();
        match err {
            TemplateError::Syntax { line, message, .. } => {
                assert_eq!(line, 1);
                assert!(message.contains("unknownTag"));
            }
            other => panic!("expected syntax error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_stripped_in_lenient_mode() {
        let out = normalize("a\n{{unknownTag x}}b", &Grammar::standard(), &lenient()).unwrap();
        assert_eq!(out.code, "a\nb");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].line(), Some(2));
    }

    #[test]
    fn test_unterminated_tag() {
        let err = normalize("x\ny {{= a", &Grammar::standard(), &strict()).unwrap_err();
        assert_eq!(err.line(), Some(2));

        let out = normalize("x\ny {{= a", &Grammar::standard(), &lenient()).unwrap();
        assert_eq!(out.code, "x\ny ");
        assert_eq!(out.diagnostics.len(), 1);

        let out = normalize("a {{= b\nc\n", &Grammar::standard(), &lenient()).unwrap();
        assert_eq!(out.code, "a \nc\n");
        assert_eq!(out.diagnostics.len(), 1);
        assert_eq!(out.diagnostics[0].line(), Some(1));
    }

    #[test]
    fn test_stray_close_delimiter() {
        let err = normalize("a }} b", &Grammar::standard(), &strict()).unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));

        let out = normalize("a }} b", &Grammar::standard(), &lenient()).unwrap();
        assert_eq!(out.code, "a  b");
    }

    #[test]
    fn test_custom_delimiters() {
        let settings = Settings {
            open_tag: "${".to_string(),
            close_tag: "}".to_string(),
            ..Settings::default()
        };
        let out = normalize("Hi ${= name}!", &Grammar::standard(), &settings).unwrap();
        assert_eq!(out.code, "Hi <%=name%>!");
    }

    #[test]
    fn test_comments_disappear() {
        let out = normalize("a{{-- note --}}b", &Grammar::standard(), &strict()).unwrap();
        assert_eq!(out.code, "ab");
    }
}
