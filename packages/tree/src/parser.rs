use crate::error::{ParseError, ParseResult};
use crate::tokenizer::{tokenize, unescape, Token};
use crate::tree::{MarkupFile, NodeId, NodeKind};
use std::ops::Range;

/// Reader for the markup subset understood by the tree: tags, attributes,
/// text, comments and processing instructions
pub struct Parser<'src> {
    tokens: Vec<(Token<'src>, Range<usize>)>,
    pos: usize,
    len: usize,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> ParseResult<Self> {
        let tokens = tokenize(source)?;
        Ok(Self {
            tokens,
            pos: 0,
            len: source.len(),
        })
    }

    /// Read the whole document into `file`, returning the root tag
    pub fn parse_into(&mut self, file: &mut MarkupFile) -> ParseResult<Option<NodeId>> {
        let mut root = None;

        while let Some((token, span)) = self.peek() {
            match token {
                Token::Text(text) => {
                    if !text.trim().is_empty() {
                        return Err(ParseError::invalid_syntax(span.start, "Text outside of the root tag"));
                    }
                    self.advance();
                }
                Token::TagOpen => {
                    if root.is_some() {
                        return Err(ParseError::invalid_syntax(span.start, "Only one root tag is allowed"));
                    }
                    root = Some(self.parse_tag(file, None)?);
                }
                other => {
                    return Err(ParseError::unexpected_token(span.start, "'<'", other.to_string()));
                }
            }
        }

        Ok(root)
    }

    fn parse_tag(&mut self, file: &mut MarkupFile, parent: Option<NodeId>) -> ParseResult<NodeId> {
        let start = self.expect_tag_open()?;
        let name = self.expect_name()?;

        let tag = file.alloc(
            NodeKind::Tag {
                name: name.to_string(),
                attributes: Vec::new(),
                children: Vec::new(),
            },
            parent,
            Some(start..start),
        );

        loop {
            match self.next_token()? {
                (Token::Name(attribute_name), span) => {
                    self.expect(Token::Equals, "'='")?;
                    let (value, value_span) = self.expect_quoted()?;
                    if file.attribute(tag, attribute_name).is_some() {
                        return Err(ParseError::invalid_syntax(
                            span.start,
                            format!("Duplicate attribute '{}'", attribute_name),
                        ));
                    }
                    let attribute = file.alloc(
                        NodeKind::Attribute {
                            name: attribute_name.to_string(),
                            value: unescape(value),
                        },
                        Some(tag),
                        Some(span.start..value_span.end),
                    );
                    file.push_attribute_raw(tag, attribute);
                }
                (Token::SelfClose, span) => {
                    file.set_span_end(tag, span.end);
                    return Ok(tag);
                }
                (Token::TagEnd, _) => break,
                (other, span) => {
                    return Err(ParseError::unexpected_token(span.start, "attribute or '>'", other.to_string()));
                }
            }
        }

        loop {
            match self.peek() {
                Some((Token::Text(text), span)) => {
                    if !text.trim().is_empty() {
                        let node = file.alloc(NodeKind::Text { value: unescape(text) }, Some(tag), Some(span.clone()));
                        file.push_child_raw(tag, node);
                    }
                    self.advance();
                }
                Some((Token::TagOpen, _)) => {
                    let child = self.parse_tag(file, Some(tag))?;
                    file.push_child_raw(tag, child);
                }
                Some((Token::CloseTagOpen, span)) => {
                    let close_start = span.start;
                    self.advance();
                    let close_name = self.expect_name()?;
                    if close_name != name {
                        return Err(ParseError::unexpected_token(
                            close_start,
                            format!("'</{}>'", name),
                            format!("'</{}>'", close_name),
                        ));
                    }
                    let end = self.expect(Token::TagEnd, "'>'")?;
                    file.set_span_end(tag, end.end);
                    return Ok(tag);
                }
                Some((other, span)) => {
                    return Err(ParseError::unexpected_token(span.start, "content", other.to_string()));
                }
                None => return Err(ParseError::unexpected_eof(self.len)),
            }
        }
    }

    fn peek(&self) -> Option<(Token<'src>, &Range<usize>)> {
        self.tokens.get(self.pos).map(|(t, s)| (*t, s))
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn next_token(&mut self) -> ParseResult<(Token<'src>, Range<usize>)> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| ParseError::unexpected_eof(self.len))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token<'src>, label: &str) -> ParseResult<Range<usize>> {
        let (token, span) = self.next_token()?;
        if token == expected {
            Ok(span)
        } else {
            Err(ParseError::unexpected_token(span.start, label, token.to_string()))
        }
    }

    fn expect_tag_open(&mut self) -> ParseResult<usize> {
        Ok(self.expect(Token::TagOpen, "'<'")?.start)
    }

    fn expect_name(&mut self) -> ParseResult<&'src str> {
        match self.next_token()? {
            (Token::Name(name), _) => Ok(name),
            (other, span) => Err(ParseError::unexpected_token(span.start, "name", other.to_string())),
        }
    }

    fn expect_quoted(&mut self) -> ParseResult<(&'src str, Range<usize>)> {
        match self.next_token()? {
            (Token::Quoted(value), span) => Ok((value, span)),
            (other, span) => Err(ParseError::unexpected_token(span.start, "quoted value", other.to_string())),
        }
    }
}

/// Parse markup source into a loaded file
pub fn parse(path: &str, source: &str) -> ParseResult<MarkupFile> {
    MarkupFile::parse(path, source)
}
