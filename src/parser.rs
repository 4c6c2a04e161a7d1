use std::io::BufRead;

use log::warn;
use logos::Logos;

use crate::{
    config::Config,
    error::{EvaluationResult, LispError},
    heap::{Heap, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Logos)]
#[logos(skip r"([ \t\r\n\f]+|;[^\n]*)")]
enum Token<'a> {
    #[token("(")]
    LeftParen,

    #[token(")")]
    RightParen,

    #[token(".")]
    Dot,

    #[token("'")]
    Quote,

    #[regex(r#""[^"]*""#, |lex| { let text = lex.slice(); &text[1..text.len() - 1] })]
    Str(&'a str),

    #[regex(r"[0-9]+", |lex| lex.slice())]
    Integer(&'a str),

    #[regex(r"[A-Za-z+*/\-][A-Za-z0-9+*/\-]*", |lex| lex.slice())]
    Symbol(&'a str),
}

/// Outcome of scanning buffered text for the next datum.
#[derive(Debug, PartialEq)]
enum Scan {
    /// Only whitespace and comments.
    Empty,
    /// A datum has started but its end is not buffered yet.
    Incomplete,
    /// The first datum ends at this byte offset.
    Complete(usize),
    /// Unreadable input; the reader skips to this byte offset.
    Invalid(String, usize),
}

fn end_of_line(text: &str, from: usize) -> usize {
    text[from..].find('\n').map_or(text.len(), |offset| from + offset + 1)
}

fn scan(text: &str) -> Scan {
    let mut lexer = Token::lexer(text);
    let mut depth = 0usize;
    let mut started = false;

    while let Some(token) = lexer.next() {
        let span = lexer.span();
        let token = match token {
            Ok(token) => token,
            Err(()) => {
                let rest = &text[span.start..];
                if rest.starts_with('"') && !rest[1..].contains('"') {
                    return Scan::Incomplete;
                }
                let found = rest.chars().next().unwrap_or(' ');
                return Scan::Invalid(
                    format!("unexpected character {:?}", found),
                    end_of_line(text, span.start),
                );
            }
        };

        started = true;
        match token {
            Token::LeftParen => depth += 1,
            Token::RightParen if depth == 0 => {
                return Scan::Invalid("unexpected ')'".to_owned(), end_of_line(text, span.start))
            }
            Token::RightParen => {
                depth -= 1;
                if depth == 0 {
                    return Scan::Complete(span.end);
                }
            }
            Token::Dot if depth == 0 => {
                return Scan::Invalid("unexpected '.'".to_owned(), end_of_line(text, span.start))
            }
            Token::Quote | Token::Dot => {}
            Token::Str(_) | Token::Integer(_) | Token::Symbol(_) => {
                if depth == 0 {
                    return Scan::Complete(span.end);
                }
            }
        }
    }

    if started {
        Scan::Incomplete
    } else {
        Scan::Empty
    }
}

/// Cuts `text` down to `limit` characters.
fn bounded(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => {
            warn!("token of {} characters truncated to {}", text.chars().count(), limit);
            &text[..end]
        }
        None => text,
    }
}

/// Deepest nesting of lists and quotes the parser descends into.
const MAX_NESTING: usize = 1024;

/// Builds heap objects from the tokens of exactly one datum.
struct Parser<'t, 'a> {
    tokens: &'t [Token<'a>],
    position: usize,
    max_token_len: usize,
    depth: usize,
    max_depth: usize,
}

impl<'t, 'a> Parser<'t, 'a> {
    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.position).copied();
        self.position += 1;
        token
    }

    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.position).copied()
    }

    fn datum(&mut self, heap: &mut Heap) -> EvaluationResult {
        // Every level holds at least one live cell, so nesting deeper than
        // the heap could never be built anyway.
        if self.depth >= self.max_depth {
            return Err(LispError::malformed(format!(
                "nesting deeper than {} levels",
                self.max_depth
            )));
        }
        self.depth += 1;
        let datum = self.item(heap);
        self.depth -= 1;
        datum
    }

    fn item(&mut self, heap: &mut Heap) -> EvaluationResult {
        match self.next() {
            Some(Token::LeftParen) => self.list(heap),
            Some(Token::Quote) => {
                let quoted = self.datum(heap)?;
                let quoted = heap.pin(quoted);
                let tail = heap.cons(quoted.get(), heap.nil())?;
                heap.cons(heap.keywords().quote, tail)
            }
            Some(Token::Integer(digits)) => {
                let number = digits
                    .parse()
                    .map_err(|_| LispError::malformed(format!("integer literal {} out of range", digits)))?;
                heap.fixnum(number)
            }
            Some(Token::Symbol(name)) => heap.intern(bounded(name, self.max_token_len)),
            Some(Token::Str(text)) => heap.string(bounded(text, self.max_token_len)),
            Some(Token::RightParen) => Err(LispError::malformed("unexpected ')'")),
            Some(Token::Dot) => Err(LispError::malformed("unexpected '.'")),
            None => Err(LispError::malformed("unexpected end of input")),
        }
    }

    fn list(&mut self, heap: &mut Heap) -> EvaluationResult {
        let head = heap.pin(heap.nil());
        let mut tail = heap.nil();

        loop {
            match self.peek() {
                Some(Token::RightParen) => {
                    self.position += 1;
                    return Ok(head.get());
                }
                Some(Token::Dot) => {
                    if heap.is_nil(tail) {
                        return Err(LispError::malformed("dotted pair without a head"));
                    }
                    self.position += 1;
                    let rest = self.datum(heap)?;
                    heap.set_cdr(tail, rest);
                    return match self.next() {
                        Some(Token::RightParen) => Ok(head.get()),
                        _ => Err(LispError::malformed("expected ')' after dotted tail")),
                    };
                }
                Some(_) => {
                    let element = self.datum(heap)?;
                    let element = heap.pin(element);
                    let cell = heap.cons(element.get(), heap.nil())?;
                    if heap.is_nil(tail) {
                        head.set(cell);
                    } else {
                        heap.set_cdr(tail, cell);
                    }
                    tail = cell;
                }
                None => return Err(LispError::malformed("unexpected end of input in list")),
            }
        }
    }
}

/// Reads one datum at a time from a line-oriented stream.
///
/// Lines are pulled from the input only when the buffered text does not yet
/// hold a complete datum, so an interactive reader blocks exactly as long as
/// the expression is unfinished.
pub struct Reader<R> {
    input: R,
    buffer: String,
    position: usize,
    max_token_len: usize,
}

impl<'s> Reader<&'s [u8]> {
    pub fn from_source(source: &'s str) -> Self {
        Self::new(source.as_bytes())
    }
}

impl<R: BufRead> Reader<R> {
    pub fn new(input: R) -> Self {
        Self {
            input,
            buffer: String::new(),
            position: 0,
            max_token_len: Config::default().max_token_len,
        }
    }

    pub fn with_token_limit(mut self, max_token_len: usize) -> Self {
        self.max_token_len = max_token_len;
        self
    }

    /// Returns the next datum, or `None` once the input is exhausted.
    pub fn read(&mut self, heap: &mut Heap) -> EvaluationResult<Option<Value>> {
        loop {
            match scan(&self.buffer[self.position..]) {
                Scan::Empty => {
                    if !self.fill()? {
                        self.discard();
                        return Ok(None);
                    }
                }
                Scan::Incomplete => {
                    if !self.fill()? {
                        self.discard();
                        return Err(LispError::malformed("unexpected end of input"));
                    }
                }
                Scan::Invalid(reason, skip) => {
                    self.position += skip;
                    return Err(LispError::MalformedInput(reason));
                }
                Scan::Complete(length) => {
                    let text = &self.buffer[self.position..self.position + length];
                    self.position += length;
                    return parse_datum(text, self.max_token_len, heap).map(Some);
                }
            }
        }
    }

    /// Appends the next line to the buffer, returning `false` at end of input.
    fn fill(&mut self) -> EvaluationResult<bool> {
        self.buffer.drain(..self.position);
        self.position = 0;
        let read = self
            .input
            .read_line(&mut self.buffer)
            .map_err(|error| LispError::malformed(format!("read failed: {}", error)))?;
        Ok(read > 0)
    }

    fn discard(&mut self) {
        self.buffer.clear();
        self.position = 0;
    }
}

fn parse_datum(text: &str, max_token_len: usize, heap: &mut Heap) -> EvaluationResult {
    let tokens = Token::lexer(text)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| LispError::malformed("unreadable token"))?;
    let mut parser = Parser {
        tokens: &tokens,
        position: 0,
        max_token_len,
        depth: 0,
        max_depth: heap.capacity().min(MAX_NESTING),
    };
    parser.datum(heap)
}

/// Reads every datum in `source`.
///
/// The data are kept reachable from each other while the rest is read; the
/// returned handles are unrooted like any other result.
pub fn parse_all(source: &str, heap: &mut Heap) -> EvaluationResult<Vec<Value>> {
    let mut reader = Reader::from_source(source);
    let data = heap.pin(heap.nil());
    let mut tail = heap.nil();

    while let Some(datum) = reader.read(heap)? {
        let cell = heap.cons(datum, heap.nil())?;
        if heap.is_nil(tail) {
            data.set(cell);
        } else {
            heap.set_cdr(tail, cell);
        }
        tail = cell;
    }

    Ok(heap.iter_list(data.get()).collect())
}
