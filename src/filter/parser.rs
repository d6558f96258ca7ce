//! Filter text tokenizer and parser.
//!
//! Parsing never fails: whatever cannot be understood is either kept as
//! plain text or dropped.

// ---------------------------------------------------------------------------
// Expression types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    Contains,
    Equals,
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterElement {
    /// Field name as typed, `None` for bare text.
    pub field: Option<String>,
    pub text: String,
    pub match_mode: MatchMode,
    pub negate: bool,
}

/// Groups are AND'ed; the elements inside one group are OR'ed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterExpression {
    pub groups: Vec<Vec<FilterElement>>,
}

impl FilterExpression {
    pub fn parse(input: &str) -> Self {
        parse_filter(input)
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum FilterToken {
    Element(FilterElement),
    Or,
}

struct Tokenizer<'a> {
    input: &'a str,
    cursor: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, cursor: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.cursor..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.cursor += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    /// Reads up to the closing quote; an unterminated phrase runs to the end.
    fn consume_quoted_phrase(&mut self) -> String {
        let mut phrase = String::new();
        while let Some(ch) = self.bump() {
            if ch == '"' {
                break;
            }
            phrase.push(ch);
        }
        phrase
    }

    /// Reads a value that is either quoted or runs to the next whitespace.
    fn consume_value(&mut self) -> (String, bool) {
        if self.peek() == Some('"') {
            self.bump();
            return (self.consume_quoted_phrase(), true);
        }
        let mut value = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                break;
            }
            self.bump();
            if ch == '"' {
                value.push_str(&self.consume_quoted_phrase());
            } else {
                value.push(ch);
            }
        }
        (value, false)
    }

    fn next_token(&mut self) -> Option<Option<FilterToken>> {
        self.skip_whitespace();
        self.peek()?;

        let mut negate = false;
        if self.peek() == Some('-') {
            self.bump();
            negate = true;
        }

        if self.peek() == Some('"') {
            self.bump();
            let text = self.consume_quoted_phrase();
            return Some(element(None, text, MatchMode::Contains, negate));
        }

        let mut head = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() || ch == '"' || (ch == ':' && !head.is_empty()) {
                break;
            }
            self.bump();
            head.push(ch);
        }

        match self.peek() {
            Some(':') => {
                self.bump();
                let match_mode = match self.peek() {
                    Some('>') => MatchMode::GreaterThan,
                    Some('<') => MatchMode::LessThan,
                    Some('=') => MatchMode::Equals,
                    _ => MatchMode::Contains,
                };
                if match_mode != MatchMode::Contains {
                    self.bump();
                }
                let (text, _) = self.consume_value();
                Some(element(Some(head), text, match_mode, negate))
            }
            Some('"') => {
                let (rest, _) = self.consume_value();
                head.push_str(&rest);
                Some(element(None, head, MatchMode::Contains, negate))
            }
            _ if head == "OR" && !negate => Some(Some(FilterToken::Or)),
            _ => Some(element(None, head, MatchMode::Contains, negate)),
        }
    }
}

fn element(
    field: Option<String>,
    text: String,
    match_mode: MatchMode,
    negate: bool,
) -> Option<FilterToken> {
    if text.is_empty() {
        return None;
    }
    Some(FilterToken::Element(FilterElement {
        field,
        text,
        match_mode,
        negate,
    }))
}

fn tokenize_filter_input(input: &str) -> Vec<FilterToken> {
    let mut tokenizer = Tokenizer::new(input);
    let mut tokens = Vec::new();
    while let Some(token) = tokenizer.next_token() {
        if let Some(token) = token {
            tokens.push(token);
        }
    }
    tokens
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

pub fn parse_filter(input: &str) -> FilterExpression {
    let mut groups: Vec<Vec<FilterElement>> = Vec::new();
    let mut join_with_previous = false;

    for token in tokenize_filter_input(input) {
        match token {
            FilterToken::Or => join_with_previous = !groups.is_empty(),
            FilterToken::Element(element) => {
                match groups.last_mut() {
                    Some(group) if join_with_previous => group.push(element),
                    _ => groups.push(vec![element]),
                }
                join_with_previous = false;
            }
        }
    }

    FilterExpression { groups }
}
