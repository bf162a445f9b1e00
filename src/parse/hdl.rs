//! Tokenizer and recursive-descent parser for `.hdl` chip descriptions.
//!
//! ```text
//! CHIP And {
//!     IN a, b;
//!     OUT out;
//!     PARTS:
//!     Nand(a=a, b=b, out=n);
//!     Nand(a=n, b=n, out=out);
//! }
//! ```

use crate::definitions::LineNumber;
use crate::error::{SimError, SimResult};
use crate::parse::StringLexer;

/// A named input or output port with its bus width (1 if unsubscripted).
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

/// A pin reference with an optional sub-bus range. `lo = hi = -1` means the
/// full width. The names `true` and `false` are constants, permitted only on
/// the right-hand side of a connection.
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

    pub fn is_constant(&self) -> bool {
        self.name == "true" || self.name == "false"
    }
}

/// One `internal = external` binding inside a part instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    pub internal: PinRef,
    pub external: PinRef,
}

/// A sub-chip instantiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub chip_name: String,
    pub connections: Vec<Connection>,
    pub source_line: LineNumber,
}

/// A parsed chip: the AST the runtime instantiates chips from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChipDef {
    pub name: String,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub parts: Vec<Part>,
    pub is_builtin: bool,
    pub clocked_pins: Vec<String>,
}

impl ChipDef {
    pub fn input_width(&self, name: &str) -> Option<u8> {
        self.inputs.iter().find(|p| p.name == name).map(|p| p.width)
    }

    pub fn output_width(&self, name: &str) -> Option<u8> {
        self.outputs.iter().find(|p| p.name == name).map(|p| p.width)
    }

    pub fn is_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|p| p.name == name)
    }

    pub fn is_output(&self, name: &str) -> bool {
        self.outputs.iter().any(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenType {
    KeywordChip,
    KeywordIn,
    KeywordOut,
    KeywordParts,
    KeywordBuiltin,
    KeywordClocked,
    Identifier,
    Number,
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
    EndOfFile,
}

#[derive(Debug, Clone)]
struct Token {
    ttype: TokenType,
    text: String,
    line: LineNumber,
}

/// Parse HDL source into a [ChipDef].
pub fn parse_hdl_string(source: &str, filename: &str) -> SimResult<ChipDef> {
    let tokens = tokenize(source, filename)?;
    let mut parser = HdlParser {
        tokens,
        pos: 0,
        filename,
    };
    parser.parse_chip()
}

pub fn parse_hdl_file(path: &str) -> SimResult<ChipDef> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SimError::file(path, format!("Could not open HDL file: {}", e)))?;
    parse_hdl_string(&content, path)
}

// tokenizer

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn tokenize(source: &str, filename: &str) -> SimResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut walker = StringLexer::new(source);

    loop {
        // skip whitespace
        walker.take_chars_while(char::is_whitespace);

        let current = match walker.current_char() {
            Some(spanned) => spanned,
            None => break,
        };
        let line = current.line_nr;

        match current.content {
            '/' => {
                walker.advance();
                if walker.current_eq('/') {
                    walker.take_chars_while(|c| c != '\n');
                } else if walker.current_eq('*') {
                    walker.take_until_substr("*/");
                } else {
                    return Err(SimError::parse(filename, line, "Unexpected character: '/'"));
                }
            }
            c @ ('{' | '}' | '(' | ')' | '[' | ']' | ',' | ';' | ':' | '=') => {
                let ttype = match c {
                    '{' => TokenType::LBrace,
                    '}' => TokenType::RBrace,
                    '(' => TokenType::LParen,
                    ')' => TokenType::RParen,
                    '[' => TokenType::LBracket,
                    ']' => TokenType::RBracket,
                    ',' => TokenType::Comma,
                    ';' => TokenType::Semicolon,
                    ':' => TokenType::Colon,
                    _ => TokenType::Equals,
                };
                walker.advance();
                tokens.push(Token {
                    ttype,
                    text: c.to_string(),
                    line,
                });
            }
            '.' => {
                walker.advance();
                if walker.current_eq('.') {
                    walker.advance();
                    tokens.push(Token {
                        ttype: TokenType::DotDot,
                        text: "..".to_string(),
                        line,
                    });
                } else {
                    return Err(SimError::parse(filename, line, "Unexpected character: '.'"));
                }
            }
            c if c.is_ascii_digit() => {
                if let Some(spanned) = walker.take_chars_while(|c| c.is_ascii_digit()) {
                    tokens.push(Token {
                        ttype: TokenType::Number,
                        text: spanned.content.to_string(),
                        line,
                    });
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                if let Some(spanned) = walker.take_chars_while(is_identifier_char) {
                    let ttype = match spanned.content {
                        "CHIP" => TokenType::KeywordChip,
                        "IN" => TokenType::KeywordIn,
                        "OUT" => TokenType::KeywordOut,
                        "PARTS" => TokenType::KeywordParts,
                        "BUILTIN" => TokenType::KeywordBuiltin,
                        "CLOCKED" => TokenType::KeywordClocked,
                        _ => TokenType::Identifier,
                    };
                    tokens.push(Token {
                        ttype,
                        text: spanned.content.to_string(),
                        line,
                    });
                }
            }
            c => {
                return Err(SimError::parse(
                    filename,
                    line,
                    format!("Unexpected character: '{}'", c),
                ));
            }
        }
    }

    tokens.push(Token {
        ttype: TokenType::EndOfFile,
        text: String::new(),
        line: walker.line_nr(),
    });
    Ok(tokens)
}

// recursive descent

struct HdlParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    filename: &'a str,
}

impl<'a> HdlParser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, ttype: TokenType, context: &str) -> SimResult<Token> {
        if self.peek().ttype != ttype {
            let tok = self.peek();
            return Err(SimError::parse(
                self.filename,
                tok.line,
                format!("Expected {}, got '{}'", context, tok.text),
            ));
        }
        Ok(self.advance())
    }

    fn matches(&mut self, ttype: TokenType) -> bool {
        if self.peek().ttype == ttype {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_chip(&mut self) -> SimResult<ChipDef> {
        let mut def = ChipDef::default();

        self.expect(TokenType::KeywordChip, "'CHIP'")?;
        def.name = self.expect(TokenType::Identifier, "chip name")?.text;
        self.expect(TokenType::LBrace, "'{'")?;

        self.expect(TokenType::KeywordIn, "'IN'")?;
        def.inputs = self.parse_port_list()?;
        self.expect(TokenType::Semicolon, "';' after IN ports")?;

        self.expect(TokenType::KeywordOut, "'OUT'")?;
        def.outputs = self.parse_port_list()?;
        self.expect(TokenType::Semicolon, "';' after OUT ports")?;

        match self.peek().ttype {
            TokenType::KeywordParts => {
                self.advance();
                self.expect(TokenType::Colon, "':' after PARTS")?;
                def.parts = self.parse_parts()?;
                def.is_builtin = false;
            }
            TokenType::KeywordBuiltin => {
                self.advance();
                def.is_builtin = true;
                self.expect(TokenType::Identifier, "builtin chip name")?;
                self.expect(TokenType::Semicolon, "';' after BUILTIN")?;

                if self.peek().ttype == TokenType::KeywordClocked {
                    self.advance();
                    while self.peek().ttype == TokenType::Identifier {
                        def.clocked_pins.push(self.advance().text);
                        if !self.matches(TokenType::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenType::Semicolon, "';' after CLOCKED")?;
                }
            }
            _ => {
                let tok = self.peek();
                return Err(SimError::parse(
                    self.filename,
                    tok.line,
                    format!("Expected 'PARTS:' or 'BUILTIN', got '{}'", tok.text),
                ));
            }
        }

        self.expect(TokenType::RBrace, "'}'")?;
        Ok(def)
    }

    fn parse_port_list(&mut self) -> SimResult<Vec<Port>> {
        let mut ports = vec![self.parse_port()?];
        while self.matches(TokenType::Comma) {
            ports.push(self.parse_port()?);
        }
        Ok(ports)
    }

    fn parse_port(&mut self) -> SimResult<Port> {
        let name = self.expect(TokenType::Identifier, "port name")?.text;
        let mut width = 1;

        if self.matches(TokenType::LBracket) {
            let num = self.expect(TokenType::Number, "bus width")?;
            width = num.text.parse::<u8>().map_err(|_| {
                SimError::parse(
                    self.filename,
                    num.line,
                    format!("Invalid bus width: '{}'", num.text),
                )
            })?;
            self.expect(TokenType::RBracket, "']'")?;
        }

        Ok(Port { name, width })
    }

    fn parse_parts(&mut self) -> SimResult<Vec<Part>> {
        let mut parts = Vec::new();
        while self.peek().ttype == TokenType::Identifier {
            parts.push(self.parse_part()?);
        }
        Ok(parts)
    }

    fn parse_part(&mut self) -> SimResult<Part> {
        let source_line = self.peek().line;
        let chip_name = self.expect(TokenType::Identifier, "part chip name")?.text;
        self.expect(TokenType::LParen, "'('")?;

        let mut connections = vec![self.parse_connection()?];
        while self.matches(TokenType::Comma) {
            connections.push(self.parse_connection()?);
        }

        self.expect(TokenType::RParen, "')'")?;
        self.expect(TokenType::Semicolon, "';' after part")?;

        Ok(Part {
            chip_name,
            connections,
            source_line,
        })
    }

    fn parse_connection(&mut self) -> SimResult<Connection> {
        let internal = self.parse_pin_ref()?;
        self.expect(TokenType::Equals, "'='")?;
        let external = self.parse_pin_ref()?;
        Ok(Connection { internal, external })
    }

    fn parse_pin_ref(&mut self) -> SimResult<PinRef> {
        let name = self.expect(TokenType::Identifier, "pin name")?.text;
        let mut pin = PinRef::full(name);

        if self.matches(TokenType::LBracket) {
            let num = self.expect(TokenType::Number, "bit index")?;
            pin.lo = num.text.parse::<i32>().map_err(|_| {
                SimError::parse(self.filename, num.line, "Invalid bit index")
            })?;
            if self.matches(TokenType::DotDot) {
                let num2 = self.expect(TokenType::Number, "bit index end")?;
                pin.hi = num2.text.parse::<i32>().map_err(|_| {
                    SimError::parse(self.filename, num2.line, "Invalid bit index")
                })?;
            } else {
                pin.hi = pin.lo;
            }
            self.expect(TokenType::RBracket, "']'")?;
        }

        Ok(pin)
    }
}
