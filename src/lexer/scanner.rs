// Garnet Scanner (Lexer)
// Converts source code into tokens

use crate::error::{GarnetError, GarnetResult, Span};
use crate::lexer::token::{Token, TokenKind};

/// Operator method names that may follow ':' in a symbol literal, longest first
const OPERATOR_SYMBOLS: &[&str] = &[
    "[]=", "<=>", "===", "[]", "==", "!=", "<=", ">=", "<<", "**", "+", "-", "*", "/", "%", "<",
    ">", "!",
];

/// Scanner that tokenizes Garnet source code
pub struct Scanner {
    source: Vec<char>,
    tokens: Vec<Token>,
    start: usize,
    current: usize,
    line: usize,
    column: usize,
    start_line: usize,
    start_column: usize,
    file: String,
    /// Open brackets; line breaks inside '(' and '[' are not terminators
    brackets: Vec<char>,
    spaced: bool,
}

impl Scanner {
    pub fn new(source: &str, file: impl Into<String>) -> Self {
        Self {
            source: source.chars().collect(),
            tokens: Vec::new(),
            start: 0,
            current: 0,
            line: 1,
            column: 1,
            start_line: 1,
            start_column: 1,
            file: file.into(),
            brackets: Vec::new(),
            spaced: false,
        }
    }

    /// Scan all tokens from the source
    pub fn scan_tokens(&mut self) -> GarnetResult<Vec<Token>> {
        while !self.is_at_end() {
            self.begin_token();
            self.scan_token()?;
        }

        if !matches!(
            self.tokens.last().map(|t| &t.kind),
            None | Some(TokenKind::Newline)
        ) {
            self.tokens.push(Token::new(
                TokenKind::Newline,
                "",
                Span::single(self.line, self.column, self.current),
            ));
        }

        self.tokens.push(Token::new(
            TokenKind::Eof,
            "",
            Span::single(self.line, self.column, self.current),
        ));

        Ok(std::mem::take(&mut self.tokens))
    }

    fn begin_token(&mut self) {
        self.start = self.current;
        self.start_line = self.line;
        self.start_column = self.column;
    }

    fn scan_token(&mut self) -> GarnetResult<()> {
        let c = self.advance();

        match c {
            ' ' | '\t' | '\r' => self.spaced = true,
            '\\' if self.peek() == '\n' => {
                self.advance();
                self.next_line();
                self.spaced = true;
            }
            '\n' => {
                self.next_line();
                self.line_break();
                if self.peek() == '=' && self.matches_word("=begin") {
                    self.embedded_doc()?;
                }
            }
            '#' => {
                while self.peek() != '\n' && !self.is_at_end() {
                    self.advance();
                }
            }
            '=' if self.start_column == 1 && self.matches_word("=begin") => {
                self.current -= 1;
                self.column -= 1;
                self.embedded_doc()?;
            }

            '(' => {
                self.brackets.push('(');
                self.add_token(TokenKind::LeftParen);
            }
            ')' => {
                self.brackets.pop();
                self.add_token(TokenKind::RightParen);
            }
            '[' => {
                self.brackets.push('[');
                self.add_token(TokenKind::LeftBracket);
            }
            ']' => {
                self.brackets.pop();
                self.add_token(TokenKind::RightBracket);
            }
            '{' => {
                self.brackets.push('{');
                self.add_token(TokenKind::LeftBrace);
            }
            '}' => {
                self.brackets.pop();
                self.add_token(TokenKind::RightBrace);
            }
            ',' => self.add_token(TokenKind::Comma),
            ';' => self.add_token(TokenKind::Semicolon),
            '?' => self.add_token(TokenKind::Question),
            '.' => {
                if self.match_char('.') {
                    if self.match_char('.') {
                        self.add_token(TokenKind::DotDotDot);
                    } else {
                        self.add_token(TokenKind::DotDot);
                    }
                } else {
                    // A leading '.' continues the previous line's method chain
                    if matches!(self.tokens.last().map(|t| &t.kind), Some(TokenKind::Newline)) {
                        self.tokens.pop();
                    }
                    self.add_token(TokenKind::Dot);
                }
            }
            ':' => {
                if self.match_char(':') {
                    self.add_token(TokenKind::ColonColon);
                } else if self.peek().is_alphabetic() || self.peek() == '_' {
                    self.symbol();
                } else if self.peek() == '"' {
                    self.advance();
                    self.quoted_symbol()?;
                } else if let Some(op) = self.operator_symbol() {
                    self.add_token(TokenKind::Symbol(op));
                } else {
                    self.add_token(TokenKind::Colon);
                }
            }
            '|' => {
                let kind = if self.match_char('|') {
                    if self.match_char('=') {
                        TokenKind::OrEqual
                    } else {
                        TokenKind::Or
                    }
                } else {
                    TokenKind::Pipe
                };
                self.add_token(kind);
            }
            '&' => {
                let kind = if self.match_char('&') {
                    if self.match_char('=') {
                        TokenKind::AndEqual
                    } else {
                        TokenKind::And
                    }
                } else {
                    TokenKind::Ampersand
                };
                self.add_token(kind);
            }

            // Operators (potentially multi-character)
            '+' => {
                let kind = if self.match_char('=') {
                    TokenKind::PlusEqual
                } else {
                    TokenKind::Plus
                };
                self.add_token(kind);
            }
            '-' => {
                let kind = if self.match_char('=') {
                    TokenKind::MinusEqual
                } else {
                    TokenKind::Minus
                };
                self.add_token(kind);
            }
            '*' => {
                let kind = if self.match_char('*') {
                    TokenKind::StarStar
                } else if self.match_char('=') {
                    TokenKind::StarEqual
                } else {
                    TokenKind::Star
                };
                self.add_token(kind);
            }
            '/' => {
                let kind = if self.match_char('=') {
                    TokenKind::SlashEqual
                } else {
                    TokenKind::Slash
                };
                self.add_token(kind);
            }
            '%' => {
                let kind = if self.match_char('=') {
                    TokenKind::PercentEqual
                } else {
                    TokenKind::Percent
                };
                self.add_token(kind);
            }
            '=' => {
                let kind = if self.match_char('=') {
                    if self.match_char('=') {
                        TokenKind::EqualEqualEqual
                    } else {
                        TokenKind::EqualEqual
                    }
                } else if self.match_char('>') {
                    TokenKind::Arrow
                } else {
                    TokenKind::Equal
                };
                self.add_token(kind);
            }
            '!' => {
                let kind = if self.match_char('=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.add_token(kind);
            }
            '<' => {
                let kind = if self.match_char('=') {
                    if self.match_char('>') {
                        TokenKind::Spaceship
                    } else {
                        TokenKind::LessEqual
                    }
                } else if self.match_char('<') {
                    TokenKind::LessLess
                } else {
                    TokenKind::Less
                };
                self.add_token(kind);
            }
            '>' => {
                let kind = if self.match_char('=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.add_token(kind);
            }

            '"' => self.string()?,
            '\'' => self.single_quoted_string()?,
            '@' => {
                if self.peek() == '@' {
                    return Err(self
                        .error("Class variables are not supported")
                        .with_help("Use an instance variable on the class instead"));
                }
                let name = self.read_name();
                if name.is_empty() {
                    return Err(self.error("'@' must be followed by a variable name"));
                }
                self.add_token(TokenKind::InstanceVar(format!("@{}", name)));
            }
            '$' => {
                let name = self.read_name();
                if name.is_empty() {
                    return Err(self.error("'$' must be followed by a variable name"));
                }
                self.add_token(TokenKind::GlobalVar(name));
            }

            c if c.is_ascii_digit() => self.number()?,
            c if c.is_alphabetic() || c == '_' => self.identifier(),

            _ => {
                return Err(self.error(&format!("Unexpected character '{}'", c)));
            }
        }

        Ok(())
    }

    /// Record a line break as a statement terminator when it can end one
    fn line_break(&mut self) {
        if matches!(self.brackets.last(), Some('(') | Some('[')) {
            return;
        }
        match self.tokens.last() {
            None => {}
            Some(last) if last.continues_line() || last.kind == TokenKind::Semicolon => {}
            Some(_) => {
                self.tokens.push(Token::new(
                    TokenKind::Newline,
                    "\n",
                    Span::single(self.start_line, self.start_column, self.start),
                ));
            }
        }
    }

    /// Double-quoted string with escapes and `#{}` interpolation
    fn string(&mut self) -> GarnetResult<()> {
        let start_line = self.start_line;
        let start_col = self.start_column;

        let mut current = Vec::new();
        let mut is_first = true;

        while !self.is_at_end() {
            let c = self.peek();

            if c == '"' {
                self.advance();
                if is_first {
                    self.add_token(TokenKind::String(current));
                } else {
                    self.add_token(TokenKind::StringEnd(current));
                }
                return Ok(());
            } else if c == '\\' {
                self.advance();
                self.escape(&mut current)?;
            } else if c == '#' && self.peek_next() == '{' {
                self.advance();
                self.advance();

                let part = std::mem::take(&mut current);
                if is_first {
                    self.add_token(TokenKind::StringStart(part));
                    is_first = false;
                } else {
                    self.add_token(TokenKind::StringPart(part));
                }

                self.interpolation(start_line, start_col)?;
                self.begin_token();
            } else if c == '\n' {
                self.advance();
                self.next_line();
                current.push(b'\n');
            } else {
                self.advance();
                push_char(&mut current, c);
            }
        }

        Err(GarnetError::syntax_error(
            "Unterminated string",
            Span::from_positions(start_line, start_col, self.line, self.column),
            &self.file,
        )
        .with_help("Add a closing double quote to terminate the string"))
    }

    /// Scan the tokens of one `#{ ... }` segment
    fn interpolation(&mut self, start_line: usize, start_col: usize) -> GarnetResult<()> {
        self.brackets.push('(');
        let mut brace_depth = 1;

        while !self.is_at_end() {
            self.begin_token();

            let expr_char = self.peek();
            if expr_char == '}' {
                brace_depth -= 1;
                if brace_depth == 0 {
                    self.advance();
                    self.brackets.pop();
                    return Ok(());
                }
            } else if expr_char == '{' {
                brace_depth += 1;
            }

            self.scan_token()?;
        }

        Err(GarnetError::syntax_error(
            "Unterminated interpolation in string",
            Span::from_positions(start_line, start_col, self.line, self.column),
            &self.file,
        )
        .with_help("Add a closing '}' to end the interpolated expression"))
    }

    fn escape(&mut self, out: &mut Vec<u8>) -> GarnetResult<()> {
        if self.is_at_end() {
            return Err(self.error("Unterminated escape sequence"));
        }
        let c = self.advance();
        match c {
            'n' => out.push(b'\n'),
            't' => out.push(b'\t'),
            'r' => out.push(b'\r'),
            's' => out.push(b' '),
            '0' => out.push(0),
            'e' => out.push(0x1b),
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0c),
            'v' => out.push(0x0b),
            '\n' => self.next_line(),
            'x' => {
                let mut value: u32 = 0;
                let mut digits = 0;
                while digits < 2 && self.peek().is_ascii_hexdigit() {
                    value = value * 16 + self.advance().to_digit(16).unwrap_or(0);
                    digits += 1;
                }
                if digits == 0 {
                    return Err(self.error("Invalid hex escape"));
                }
                out.push(value as u8);
            }
            'u' => {
                let mut value: u32 = 0;
                if self.match_char('{') {
                    while self.peek().is_ascii_hexdigit() {
                        value = value * 16 + self.advance().to_digit(16).unwrap_or(0);
                    }
                    if !self.match_char('}') {
                        return Err(self.error("Unterminated unicode escape"));
                    }
                } else {
                    for _ in 0..4 {
                        if !self.peek().is_ascii_hexdigit() {
                            return Err(self.error("Invalid unicode escape"));
                        }
                        value = value * 16 + self.advance().to_digit(16).unwrap_or(0);
                    }
                }
                let ch = char::from_u32(value)
                    .ok_or_else(|| self.error("Invalid unicode codepoint"))?;
                push_char(out, ch);
            }
            other => push_char(out, other),
        }
        Ok(())
    }

    fn single_quoted_string(&mut self) -> GarnetResult<()> {
        let start_line = self.start_line;
        let start_col = self.start_column;
        let mut current = Vec::new();

        while !self.is_at_end() {
            let c = self.advance();
            match c {
                '\'' => {
                    self.add_token(TokenKind::String(current));
                    return Ok(());
                }
                '\\' if self.peek() == '\'' || self.peek() == '\\' => {
                    let escaped = self.advance();
                    push_char(&mut current, escaped);
                }
                '\n' => {
                    self.next_line();
                    current.push(b'\n');
                }
                other => push_char(&mut current, other),
            }
        }

        Err(GarnetError::syntax_error(
            "Unterminated string",
            Span::from_positions(start_line, start_col, self.line, self.column),
            &self.file,
        )
        .with_help("Add a closing single quote to terminate the string"))
    }

    fn symbol(&mut self) {
        let mut name = self.read_name();
        if matches!(self.peek(), '?' | '!' | '=') && self.peek_next() != '=' {
            name.push(self.advance());
        }
        self.add_token(TokenKind::Symbol(name));
    }

    fn quoted_symbol(&mut self) -> GarnetResult<()> {
        let mut name = Vec::new();
        while !self.is_at_end() && self.peek() != '"' {
            let c = self.advance();
            if c == '\\' {
                self.escape(&mut name)?;
            } else if c == '#' && self.peek() == '{' {
                return Err(self.error("Interpolation is not supported in symbol literals"));
            } else {
                push_char(&mut name, c);
            }
        }
        if !self.match_char('"') {
            return Err(self.error("Unterminated symbol literal"));
        }
        self.add_token(TokenKind::Symbol(String::from_utf8_lossy(&name).into_owned()));
        Ok(())
    }

    fn operator_symbol(&mut self) -> Option<String> {
        for op in OPERATOR_SYMBOLS {
            let len = op.chars().count();
            if self.current + len > self.source.len() {
                continue;
            }
            let candidate: String = self.source[self.current..self.current + len]
                .iter()
                .collect();
            if candidate == *op {
                for _ in 0..len {
                    self.advance();
                }
                return Some(candidate);
            }
        }
        None
    }

    fn number(&mut self) -> GarnetResult<()> {
        let mut is_float = false;
        while self.peek().is_ascii_digit() || (self.peek() == '_' && self.peek_next().is_ascii_digit())
        {
            self.advance();
        }

        // Decimal part; `1..2` stays a range
        if self.peek() == '.' && self.peek_next().is_ascii_digit() {
            is_float = true;
            self.advance();
            while self.peek().is_ascii_digit()
                || (self.peek() == '_' && self.peek_next().is_ascii_digit())
            {
                self.advance();
            }
        }

        if matches!(self.peek(), 'e' | 'E')
            && (self.peek_next().is_ascii_digit()
                || (matches!(self.peek_next(), '+' | '-')
                    && self
                        .source
                        .get(self.current + 2)
                        .map_or(false, |c| c.is_ascii_digit())))
        {
            is_float = true;
            self.advance();
            if matches!(self.peek(), '+' | '-') {
                self.advance();
            }
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        let lexeme: String = self.source[self.start..self.current]
            .iter()
            .filter(|c| **c != '_')
            .collect();

        if is_float {
            let value: f64 = lexeme
                .parse()
                .map_err(|_| self.error(&format!("Invalid number '{}'", lexeme)))?;
            self.add_token(TokenKind::Float(value));
        } else {
            let value = match lexeme.parse::<i64>() {
                Ok(value) => value,
                // `-9223372036854775808`: the parser negates it back to i64::MIN
                Err(_)
                    if self.follows_minus()
                        && lexeme.parse::<u64>() == Ok(i64::MIN.unsigned_abs()) =>
                {
                    i64::MIN
                }
                Err(_) => {
                    return Err(
                        self.error(&format!("Integer literal '{}' is out of range", lexeme))
                    );
                }
            };
            self.add_token(TokenKind::Integer(value));
        }
        Ok(())
    }

    fn identifier(&mut self) {
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            self.advance();
        }
        if matches!(self.peek(), '?' | '!') && self.peek_next() != '=' {
            self.advance();
        }

        let text: String = self.source[self.start..self.current].iter().collect();

        // `key: value`
        if self.peek() == ':' && self.peek_next() != ':' && !text.ends_with('?') {
            self.advance();
            self.add_token(TokenKind::Label(text));
            return;
        }

        // Method names after '.' are never keywords (`obj.class`)
        let after_dot = matches!(self.tokens.last().map(|t| &t.kind), Some(TokenKind::Dot));
        let kind = if after_dot {
            TokenKind::Identifier(text)
        } else {
            keyword_or_identifier(text)
        };
        self.add_token(kind);
    }

    fn read_name(&mut self) -> String {
        let mut name = String::new();
        while self.peek().is_alphanumeric() || self.peek() == '_' {
            name.push(self.advance());
        }
        name
    }

    /// Skip an `=begin` ... `=end` block
    fn embedded_doc(&mut self) -> GarnetResult<()> {
        let start_line = self.line;
        loop {
            while self.peek() != '\n' && !self.is_at_end() {
                self.advance();
            }
            if self.is_at_end() {
                return Err(GarnetError::syntax_error(
                    "Unterminated =begin block",
                    Span::single(start_line, 1, 0),
                    &self.file,
                )
                .with_help("Close the block with '=end' at the start of a line"));
            }
            self.advance();
            self.next_line();
            if self.matches_word("=end") {
                while self.peek() != '\n' && !self.is_at_end() {
                    self.advance();
                }
                return Ok(());
            }
        }
    }

    fn matches_word(&self, word: &str) -> bool {
        let mut offset = self.current;
        if self.source.get(offset.wrapping_sub(1)) == Some(&'=') && word.starts_with('=') {
            offset -= 1;
        }
        word.chars()
            .enumerate()
            .all(|(i, c)| self.source.get(offset + i) == Some(&c))
    }

    fn next_line(&mut self) {
        self.line += 1;
        self.column = 1;
    }

    // Helper methods
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> char {
        let c = self.source[self.current];
        self.current += 1;
        self.column += 1;
        c
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            '\0'
        } else {
            self.source[self.current]
        }
    }

    fn peek_next(&self) -> char {
        if self.current + 1 >= self.source.len() {
            '\0'
        } else {
            self.source[self.current + 1]
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            false
        } else {
            self.current += 1;
            self.column += 1;
            true
        }
    }

    /// The literal being scanned is glued to a preceding `-`
    fn follows_minus(&self) -> bool {
        !self.spaced && matches!(self.tokens.last(), Some(token) if token.kind == TokenKind::Minus)
    }

    fn add_token(&mut self, kind: TokenKind) {
        let lexeme: String = self.source[self.start..self.current].iter().collect();
        let span = Span::from_positions(
            self.start_line,
            self.start_column,
            self.line,
            self.column.saturating_sub(1).max(1),
        );
        let mut token = Token::new(kind, lexeme, span);
        token.spaced = std::mem::take(&mut self.spaced);
        self.tokens.push(token);
    }

    fn error(&self, message: &str) -> GarnetError {
        GarnetError::syntax_error(
            message,
            Span::from_positions(self.start_line, self.start_column, self.line, self.column),
            &self.file,
        )
    }
}

fn push_char(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

fn keyword_or_identifier(text: String) -> TokenKind {
    let keyword = match text.as_str() {
        "def" => Some(TokenKind::Def),
        "end" => Some(TokenKind::End),
        "if" => Some(TokenKind::If),
        "elsif" => Some(TokenKind::Elsif),
        "else" => Some(TokenKind::Else),
        "unless" => Some(TokenKind::Unless),
        "while" => Some(TokenKind::While),
        "until" => Some(TokenKind::Until),
        "do" => Some(TokenKind::Do),
        "then" => Some(TokenKind::Then),
        "return" => Some(TokenKind::Return),
        "class" => Some(TokenKind::Class),
        "module" => Some(TokenKind::Module),
        "self" => Some(TokenKind::SelfKeyword),
        "nil" => Some(TokenKind::Nil),
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        "and" => Some(TokenKind::AndKeyword),
        "or" => Some(TokenKind::OrKeyword),
        "not" => Some(TokenKind::NotKeyword),
        "begin" => Some(TokenKind::Begin),
        "rescue" => Some(TokenKind::Rescue),
        "ensure" => Some(TokenKind::Ensure),
        "yield" => Some(TokenKind::Yield),
        "super" => Some(TokenKind::Super),
        "break" => Some(TokenKind::Break),
        "next" => Some(TokenKind::Next),
        "case" => Some(TokenKind::Case),
        "when" => Some(TokenKind::When),
        _ => None,
    };

    match keyword {
        Some(kind) => kind,
        None if text.starts_with(|c: char| c.is_uppercase()) => TokenKind::Constant(text),
        None => TokenKind::Identifier(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Scanner::new(source, "test.rb")
            .scan_tokens()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_scan_arithmetic() {
        assert_eq!(
            kinds("1 + 2.5"),
            vec![
                TokenKind::Integer(1),
                TokenKind::Plus,
                TokenKind::Float(2.5),
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_newline_suppressed_after_operator_and_in_parens() {
        let k = kinds("a = 1 +\n2\nfoo(1,\n2)\n");
        let newlines = k.iter().filter(|k| **k == TokenKind::Newline).count();
        assert_eq!(newlines, 2);
    }

    #[test]
    fn test_leading_dot_joins_lines() {
        let k = kinds("list\n  .map\n");
        assert_eq!(
            k,
            vec![
                TokenKind::Identifier("list".into()),
                TokenKind::Dot,
                TokenKind::Identifier("map".into()),
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_interpolated_string() {
        let k = kinds("\"a#{x}b\"");
        assert_eq!(
            k[..3],
            [
                TokenKind::StringStart(b"a".to_vec()),
                TokenKind::Identifier("x".into()),
                TokenKind::StringEnd(b"b".to_vec()),
            ]
        );
    }

    #[test]
    fn test_symbols_labels_and_keywords() {
        let k = kinds("{ key: :val, :+ => x.class }");
        assert!(k.contains(&TokenKind::Label("key".into())));
        assert!(k.contains(&TokenKind::Symbol("val".into())));
        assert!(k.contains(&TokenKind::Symbol("+".into())));
        assert!(k.contains(&TokenKind::Identifier("class".into())));
    }

    #[test]
    fn test_hex_escape_keeps_raw_bytes() {
        assert_eq!(kinds("\"\\xff\"")[0], TokenKind::String(vec![0xff]));
    }

    #[test]
    fn test_predicate_method_names() {
        let k = kinds("x.empty? ? 1 : 2");
        assert_eq!(k[2], TokenKind::Identifier("empty?".into()));
        assert_eq!(k[3], TokenKind::Question);
    }

    #[test]
    fn test_most_negative_integer_literal() {
        assert_eq!(
            kinds("-9223372036854775808"),
            vec![
                TokenKind::Minus,
                TokenKind::Integer(i64::MIN),
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
        assert!(Scanner::new("9223372036854775808", "test.rb").scan_tokens().is_err());
        assert!(Scanner::new("- 9223372036854775808", "test.rb").scan_tokens().is_err());
    }

    #[test]
    fn test_case_equality_operator() {
        assert_eq!(
            kinds("a === b"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::EqualEqualEqual,
                TokenKind::Identifier("b".to_string()),
                TokenKind::Newline,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let err = Scanner::new("x = \"abc", "t.rb").scan_tokens().unwrap_err();
        assert_eq!(err.span.start.line, 1);
        assert_eq!(err.span.start.column, 5);
    }
}
