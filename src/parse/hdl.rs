use crate::error::{SimError, SimResult};
use crate::parse::{Spanned, StringLexer};

/// A declared input or output bus. Width 1 is a plain pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub width: u8,
}

impl Port {
    pub fn new(name: impl Into<String>, width: u8) -> Self {
        Self {
            name: name.into(),
            width,
        }
    }
}

/// A pin reference with an optional subscript: `a`, `a[3]` or `a[0..7]`.
/// lo == -1 denotes the full-width pin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRef {
    pub name: String,
    pub lo: i32,
    pub hi: i32,
}

impl PinRef {
    pub fn full(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lo: -1,
            hi: -1,
        }
    }
}

/// One `internal = external` binding inside a part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub internal: PinRef,
    pub external: PinRef,
}

/// A sub-chip reference inside a CHIP body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub chip_name: String,
    pub connections: Vec<Connection>,
    pub source_line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChipDef {
    pub name: String,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub is_builtin: bool,
    pub clocked_pins: Vec<String>,
    pub parts: Vec<Part>,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    LBrace,
    RBrace,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Equals,
    DotDot,
    Number(u32),
    Identifier(String),
    KeywordChip,
    KeywordIn,
    KeywordOut,
    KeywordParts,
    KeywordBuiltin,
    KeywordClocked,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Number(n) => n.to_string(),
            Token::Identifier(s) => s.clone(),
            Token::KeywordChip => "CHIP".to_string(),
            Token::KeywordIn => "IN".to_string(),
            Token::KeywordOut => "OUT".to_string(),
            Token::KeywordParts => "PARTS".to_string(),
            Token::KeywordBuiltin => "BUILTIN".to_string(),
            Token::KeywordClocked => "CLOCKED".to_string(),
            Token::Eof => "end of file".to_string(),
            Token::LBrace => "{".to_string(),
            Token::RBrace => "}".to_string(),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::LBracket => "[".to_string(),
            Token::RBracket => "]".to_string(),
            Token::Comma => ",".to_string(),
            Token::Semicolon => ";".to_string(),
            Token::Colon => ":".to_string(),
            Token::Equals => "=".to_string(),
            Token::DotDot => "..".to_string(),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

struct Lexer<'src> {
    walker: StringLexer<'src>,
    filename: String,
}

impl<'src> Lexer<'src> {
    fn new(source: &'src str, filename: &str) -> Self {
        Self {
            walker: StringLexer::new(source),
            filename: filename.to_string(),
        }
    }

    fn tokenize(mut self) -> SimResult<Vec<Spanned<Token>>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.scan_token()?;
            let done = token.content == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn unexpected_end(&self) -> SimError {
        SimError::parse(&self.filename, self.walker.line_nr(), "Unexpected end of file")
    }

    fn scan_token(&mut self) -> SimResult<Spanned<Token>> {
        self.walker.take_chars_while(char::is_whitespace);

        let Some(Spanned {
            content: current,
            start_idx,
            line_nr,
            ..
        }) = self.walker.current_char()
        else {
            let line = self.walker.line_nr();
            return Ok(Spanned::new(0, 0, line, Token::Eof));
        };

        match current {
            '/' => {
                self.walker.advance();
                if self.walker.current_eq('/') {
                    self.walker.take_chars_while(|c| c != '\n');
                    self.scan_token()
                } else if self.walker.current_eq('*') {
                    self.walker.take_until_substr("*/");
                    self.scan_token()
                } else {
                    Err(SimError::parse(
                        &self.filename,
                        line_nr,
                        "Unexpected character: '/'",
                    ))
                }
            }
            '.' => {
                self.walker.advance();
                if self.walker.current_eq('.') {
                    self.walker.advance();
                    Ok(Spanned::new(start_idx, start_idx + 2, line_nr, Token::DotDot))
                } else {
                    Err(SimError::parse(
                        &self.filename,
                        line_nr,
                        "Unexpected character: '.'",
                    ))
                }
            }
            c if c.is_ascii_digit() => {
                let spanned = self
                    .walker
                    .take_chars_while(|c| c.is_ascii_digit())
                    .ok_or_else(|| self.unexpected_end())?;
                let value = spanned.content.parse::<u32>().map_err(|_| {
                    SimError::parse(
                        &self.filename,
                        spanned.line_nr,
                        format!("Integer literal out of range: '{}'", spanned.content),
                    )
                })?;
                Ok(spanned.with_new_content(Token::Number(value)))
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let spanned = self
                    .walker
                    .take_chars_while(is_ident_char)
                    .ok_or_else(|| self.unexpected_end())?;
                let token = match spanned.content {
                    "CHIP" => Token::KeywordChip,
                    "IN" => Token::KeywordIn,
                    "OUT" => Token::KeywordOut,
                    "PARTS" => Token::KeywordParts,
                    "BUILTIN" => Token::KeywordBuiltin,
                    "CLOCKED" => Token::KeywordClocked,
                    ident => Token::Identifier(ident.to_string()),
                };
                Ok(spanned.with_new_content(token))
            }
            _ => {
                let Some(spanned) = self.walker.advance() else {
                    return Err(self.unexpected_end());
                };
                let token = match spanned.content {
                    '{' => Token::LBrace,
                    '}' => Token::RBrace,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    ';' => Token::Semicolon,
                    ':' => Token::Colon,
                    '=' => Token::Equals,
                    c => {
                        return Err(SimError::parse(
                            &self.filename,
                            spanned.line_nr,
                            format!("Unexpected character: '{}'", c),
                        ));
                    }
                };
                Ok(spanned.with_new_content(token))
            }
        }
    }
}

/// Recursive-descent parser for .hdl chip definitions.
///
/// Grammar checks only; wiring and pin semantics are validated when the
/// chip is instantiated.
pub struct HdlParser {
    filename: String,
    tokens: Vec<Spanned<Token>>,
    pos: usize,
}

impl HdlParser {
    pub fn parse_string(source: &str, filename: &str) -> SimResult<ChipDef> {
        let tokens = Lexer::new(source, filename).tokenize()?;
        let mut parser = Self {
            filename: filename.to_string(),
            tokens,
            pos: 0,
        };
        parser.parse_chip()
    }

    pub fn parse_file(path: impl AsRef<std::path::Path>) -> SimResult<ChipDef> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| SimError::file(path.to_string_lossy(), e.to_string()))?;
        Self::parse_string(&source, &path.to_string_lossy())
    }

    fn peek(&self) -> &Spanned<Token> {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> &Spanned<Token> {
        let token = &self.tokens[self.pos];
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn matches(&mut self, expected: Token) -> bool {
        if self.peek().content == expected {
            self.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, expected: Token, context: &str) -> SimResult<()> {
        let token = self.peek();
        if token.content != expected {
            return Err(SimError::parse(
                &self.filename,
                token.line_nr,
                format!("Expected {}, got '{}'", context, token.content.describe()),
            ));
        }
        self.advance();
        Ok(())
    }

    fn expect_identifier(&mut self, context: &str) -> SimResult<String> {
        let token = self.peek();
        if let Token::Identifier(name) = &token.content {
            let name = name.clone();
            self.advance();
            return Ok(name);
        }
        Err(SimError::parse(
            &self.filename,
            token.line_nr,
            format!("Expected {}, got '{}'", context, token.content.describe()),
        ))
    }

    fn expect_number(&mut self, context: &str) -> SimResult<u32> {
        let token = self.peek();
        if let Token::Number(value) = token.content {
            self.advance();
            return Ok(value);
        }
        Err(SimError::parse(
            &self.filename,
            token.line_nr,
            format!("Expected {}, got '{}'", context, token.content.describe()),
        ))
    }

    fn parse_chip(&mut self) -> SimResult<ChipDef> {
        let mut def = ChipDef::default();

        self.expect(Token::KeywordChip, "'CHIP'")?;
        def.name = self.expect_identifier("chip name")?;
        self.expect(Token::LBrace, "'{'")?;

        self.expect(Token::KeywordIn, "'IN'")?;
        def.inputs = self.parse_port_list()?;
        self.expect(Token::Semicolon, "';' after IN ports")?;

        self.expect(Token::KeywordOut, "'OUT'")?;
        def.outputs = self.parse_port_list()?;
        self.expect(Token::Semicolon, "';' after OUT ports")?;

        match &self.peek().content {
            Token::KeywordParts => {
                self.advance();
                self.expect(Token::Colon, "':' after PARTS")?;
                def.parts = self.parse_parts()?;
            }
            Token::KeywordBuiltin => {
                self.advance();
                def.is_builtin = true;
                self.expect_identifier("builtin chip name")?;
                self.expect(Token::Semicolon, "';' after BUILTIN")?;

                if self.matches(Token::KeywordClocked) {
                    loop {
                        def.clocked_pins.push(self.expect_identifier("clocked pin name")?);
                        if !self.matches(Token::Comma) {
                            break;
                        }
                    }
                    self.expect(Token::Semicolon, "';' after CLOCKED")?;
                }
            }
            other => {
                return Err(SimError::parse(
                    &self.filename,
                    self.peek().line_nr,
                    format!("Expected 'PARTS:' or 'BUILTIN', got '{}'", other.describe()),
                ));
            }
        }

        self.expect(Token::RBrace, "'}'")?;
        Ok(def)
    }

    fn parse_port_list(&mut self) -> SimResult<Vec<Port>> {
        let mut ports = vec![self.parse_port()?];
        while self.matches(Token::Comma) {
            ports.push(self.parse_port()?);
        }
        Ok(ports)
    }

    fn parse_port(&mut self) -> SimResult<Port> {
        let name = self.expect_identifier("port name")?;
        let mut width = 1u8;

        if self.matches(Token::LBracket) {
            let line = self.peek().line_nr;
            let value = self.expect_number("bus width")?;
            if value == 0 || value > 16 {
                return Err(SimError::parse(
                    &self.filename,
                    line,
                    format!("Bus width must be 1-16, got {}", value),
                ));
            }
            width = value as u8;
            self.expect(Token::RBracket, "']'")?;
        }

        Ok(Port { name, width })
    }

    fn parse_parts(&mut self) -> SimResult<Vec<Part>> {
        let mut parts = Vec::new();
        while matches!(self.peek().content, Token::Identifier(_)) {
            parts.push(self.parse_part()?);
        }
        Ok(parts)
    }

    fn parse_part(&mut self) -> SimResult<Part> {
        let source_line = self.peek().line_nr;
        let chip_name = self.expect_identifier("part chip name")?;
        self.expect(Token::LParen, "'('")?;

        let mut connections = vec![self.parse_connection()?];
        while self.matches(Token::Comma) {
            connections.push(self.parse_connection()?);
        }

        self.expect(Token::RParen, "')'")?;
        self.expect(Token::Semicolon, "';' after part")?;

        Ok(Part {
            chip_name,
            connections,
            source_line,
        })
    }

    fn parse_connection(&mut self) -> SimResult<Connection> {
        let internal = self.parse_pin_ref()?;
        self.expect(Token::Equals, "'='")?;
        let external = self.parse_pin_ref()?;
        Ok(Connection { internal, external })
    }

    fn parse_pin_ref(&mut self) -> SimResult<PinRef> {
        let name = self.expect_identifier("pin name")?;
        let mut pin = PinRef::full(name);

        if self.matches(Token::LBracket) {
            pin.lo = self.expect_number("bit index")? as i32;
            pin.hi = if self.matches(Token::DotDot) {
                self.expect_number("bit index end")? as i32
            } else {
                pin.lo
            };
            self.expect(Token::RBracket, "']'")?;
        }

        Ok(pin)
    }
}
