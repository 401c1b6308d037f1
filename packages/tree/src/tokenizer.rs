use crate::error::{ParseError, ParseResult};
use logos::Logos;
use std::fmt;
use std::ops::Range;

/// Tokens between tags
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
enum ContentToken<'src> {
    #[token("<")]
    TagOpen,

    #[token("</")]
    CloseTagOpen,

    #[regex(r"<!--([^-]|-[^-])*-->", logos::skip)]
    Comment,

    #[regex(r"<\?[^?]*\?>", logos::skip)]
    Instruction,

    #[regex(r"[^<]+", |lex| lex.slice())]
    Text(&'src str),
}

/// Tokens inside a tag header, between `<` and `>`
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\n\r]+")]
enum TagToken<'src> {
    #[token(">")]
    TagEnd,

    #[token("/>")]
    SelfClose,

    #[token("=")]
    Equals,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.:\-]*", |lex| lex.slice())]
    Name(&'src str),

    #[regex(r#""[^"]*""#, |lex| { let s = lex.slice(); &s[1..s.len() - 1] })]
    #[regex(r#"'[^']*'"#, |lex| { let s = lex.slice(); &s[1..s.len() - 1] })]
    Quoted(&'src str),
}

/// Token types for the markup reader
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token<'src> {
    /// `<`
    TagOpen,
    /// `</`
    CloseTagOpen,
    /// `>`
    TagEnd,
    /// `/>`
    SelfClose,
    /// `=`
    Equals,
    /// Tag or attribute name
    Name(&'src str),
    /// Attribute value without quotes, entities still escaped
    Quoted(&'src str),
    /// Raw character data between tags, entities still escaped
    Text(&'src str),
}

impl fmt::Display for Token<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::TagOpen => write!(f, "'<'"),
            Token::CloseTagOpen => write!(f, "'</'"),
            Token::TagEnd => write!(f, "'>'"),
            Token::SelfClose => write!(f, "'/>'"),
            Token::Equals => write!(f, "'='"),
            Token::Name(name) => write!(f, "name '{}'", name),
            Token::Quoted(value) => write!(f, "value \"{}\"", value),
            Token::Text(_) => write!(f, "text"),
        }
    }
}

/// Tokenize markup source. The lexer switches between content and tag-header
/// modes, so text content is never split on whitespace.
pub fn tokenize(source: &str) -> ParseResult<Vec<(Token<'_>, Range<usize>)>> {
    let mut tokens = Vec::new();
    let mut content = ContentToken::lexer(source);

    while let Some(next) = content.next() {
        let span = content.span();
        match next {
            Ok(ContentToken::Text(text)) => tokens.push((Token::Text(text), span)),
            Ok(open @ (ContentToken::TagOpen | ContentToken::CloseTagOpen)) => {
                let token = if open == ContentToken::TagOpen {
                    Token::TagOpen
                } else {
                    Token::CloseTagOpen
                };
                tokens.push((token, span));

                let mut header = content.morph::<TagToken>();
                loop {
                    let Some(next) = header.next() else {
                        return Err(ParseError::unexpected_eof(source.len()));
                    };
                    let span = header.span();
                    match next {
                        Ok(TagToken::TagEnd) => {
                            tokens.push((Token::TagEnd, span));
                            break;
                        }
                        Ok(TagToken::SelfClose) => {
                            tokens.push((Token::SelfClose, span));
                            break;
                        }
                        Ok(TagToken::Equals) => tokens.push((Token::Equals, span)),
                        Ok(TagToken::Name(name)) => tokens.push((Token::Name(name), span)),
                        Ok(TagToken::Quoted(value)) => tokens.push((Token::Quoted(value), span)),
                        Err(()) => return Err(ParseError::lexer_error(span.start)),
                    }
                }
                content = header.morph();
            }
            Ok(ContentToken::Comment) | Ok(ContentToken::Instruction) => {}
            Err(()) => return Err(ParseError::lexer_error(span.start)),
        }
    }

    Ok(tokens)
}

/// Decode the predefined entities in character data or attribute values
pub fn unescape(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_string();
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = [
            ("&lt;", '<'),
            ("&gt;", '>'),
            ("&amp;", '&'),
            ("&quot;", '"'),
            ("&apos;", '\''),
        ]
        .iter()
        .find(|(entity, _)| tail.starts_with(entity));

        match decoded {
            Some((entity, ch)) => {
                out.push(*ch);
                rest = &tail[entity.len()..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Encode characters that cannot appear verbatim in markup
pub fn escape(text: &str, in_attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' if in_attribute => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token<'_>> {
        tokenize(source).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn test_tokenize_tag_with_attributes() {
        let tokens = kinds(r#"<item id="a" kind='b'/>"#);
        assert_eq!(
            tokens,
            vec![
                Token::TagOpen,
                Token::Name("item"),
                Token::Name("id"),
                Token::Equals,
                Token::Quoted("a"),
                Token::Name("kind"),
                Token::Equals,
                Token::Quoted("b"),
                Token::SelfClose,
            ]
        );
    }

    #[test]
    fn test_text_keeps_spaces_and_quotes() {
        let tokens = kinds("<a>don't stop</a>");
        assert_eq!(tokens[3], Token::Text("don't stop"));
        assert_eq!(tokens[4], Token::CloseTagOpen);
    }

    #[test]
    fn test_comments_and_prolog_are_skipped() {
        let tokens = kinds("<?xml version=\"1.0\"?><!-- hi --><root/>");
        assert_eq!(tokens, vec![Token::TagOpen, Token::Name("root"), Token::SelfClose]);
    }

    #[test]
    fn test_unterminated_tag_is_eof() {
        assert!(matches!(
            tokenize("<root id=\"a\""),
            Err(ParseError::UnexpectedEof { .. })
        ));
    }

    #[test]
    fn test_unescape_and_escape() {
        assert_eq!(unescape("a &lt; b &amp;&amp; c"), "a < b && c");
        assert_eq!(unescape("fish & chips"), "fish & chips");
        assert_eq!(escape("a<b & \"c\"", true), "a&lt;b &amp; &quot;c&quot;");
        assert_eq!(escape("\"c\"", false), "\"c\"");
    }
}
