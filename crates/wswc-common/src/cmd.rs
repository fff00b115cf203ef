// cmd.rs -- command line tokenizer
//
// Server and client commands arrive as text lines. The parser yields the
// command token first, then its arguments; '\n' and ';' separate commands
// inside a single line. Every token comes with the 32-bit rolling hash the
// handler registries key on, computed while scanning so that dispatch never
// rescans the name.

use crate::qcommon::MAX_STRING_CHARS;

/// The rolling hash used by every name lookup in this library.
#[inline]
pub fn add_char_to_hash(hash: &mut u32, c: u8) {
    *hash = hash
        .wrapping_mul(31)
        .wrapping_add(((c as u32) << 24) ^ !0u32)
        .wrapping_add(c as u32);
}

pub fn string_hash_and_length(s: &str) -> (u32, usize) {
    let mut hash = 0u32;
    for &c in s.as_bytes() {
        add_char_to_hash(&mut hash, c);
    }
    (hash, s.len())
}

/// A scanned token together with its precomputed hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub hash: u32,
}

impl Token {
    fn empty() -> Self {
        Self { text: String::new(), hash: 0 }
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

pub struct CommandParser<'a> {
    input: &'a [u8],
    pos: usize,
    exhausted: bool,
    in_args: bool,
}

impl<'a> CommandParser<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input: input.as_bytes(),
            pos: 0,
            exhausted: false,
            in_args: false,
        }
    }

    fn make_token(&self, start: usize, end: usize, hash: u32) -> Token {
        let end = end.min(start + MAX_STRING_CHARS);
        let text = String::from_utf8_lossy(&self.input[start..end]).into_owned();
        Token { text, hash }
    }

    /// Returns the next command token. `None` means the input is exhausted;
    /// an empty token stands for an empty command ('\n' or ';' separator).
    pub fn get_command(&mut self) -> Option<Token> {
        if self.exhausted {
            return None;
        }

        self.in_args = false;

        // Strip whitespace, stopping at command separators
        while self.pos < self.input.len() {
            let c = self.input[self.pos];
            if c > b' ' || c == b'\n' {
                break;
            }
            self.pos += 1;
        }

        if self.pos >= self.input.len() {
            self.exhausted = true;
            return None;
        }

        match self.input[self.pos] {
            b'\n' | b';' => {
                self.pos += 1;
                return Some(Token::empty());
            }
            _ => {}
        }

        let start = self.pos;
        let mut hash = 0u32;

        while self.pos < self.input.len() {
            let c = self.input[self.pos];
            if c <= b' ' || c == b';' || c == b'"' {
                break;
            }
            add_char_to_hash(&mut hash, c);
            self.pos += 1;
        }

        let token = self.make_token(start, self.pos, hash);

        if self.pos >= self.input.len() {
            self.exhausted = true;
            return Some(token);
        }

        match self.input[self.pos] {
            // The separator stays put so the next get_command() yields ""
            b'\n' | b';' => {}
            _ => self.in_args = true,
        }
        Some(token)
    }

    /// Returns the next argument of the current command, honouring quoting.
    /// `None` means the command has no further arguments.
    pub fn get_arg(&mut self) -> Option<Token> {
        if self.exhausted || !self.in_args {
            return None;
        }

        // Skip whitespace, stopping at command separators
        while self.pos < self.input.len() {
            let c = self.input[self.pos];
            if c > b' ' || c == b'\n' {
                break;
            }
            self.pos += 1;
        }

        if self.pos >= self.input.len() {
            self.exhausted = true;
            self.in_args = false;
            return None;
        }

        match self.input[self.pos] {
            b'\n' | b';' => {
                self.pos += 1;
                self.in_args = false;
                None
            }
            b'"' => {
                self.pos += 1;
                Some(self.get_quoted_arg())
            }
            _ => Some(self.get_basic_arg()),
        }
    }

    fn get_quoted_arg(&mut self) -> Token {
        let start = self.pos;
        let mut hash = 0u32;

        while self.pos < self.input.len() {
            let c = self.input[self.pos];
            if c == b'"' {
                let token = self.make_token(start, self.pos, hash);
                self.pos += 1;
                return token;
            }
            add_char_to_hash(&mut hash, c);
            self.pos += 1;
        }

        // Unterminated quote: the rest of the input is the argument
        self.exhausted = true;
        self.in_args = false;
        self.make_token(start, self.input.len(), hash)
    }

    fn get_basic_arg(&mut self) -> Token {
        let start = self.pos;
        let mut hash = 0u32;

        while self.pos < self.input.len() {
            let c = self.input[self.pos];
            match c {
                // The quote starts the next argument
                b'"' => {
                    return self.make_token(start, self.pos, hash);
                }
                b'\n' | b';' => {
                    let token = self.make_token(start, self.pos, hash);
                    self.pos += 1;
                    self.in_args = false;
                    return token;
                }
                _ if c <= b' ' => {
                    let token = self.make_token(start, self.pos, hash);
                    self.pos += 1;
                    return token;
                }
                _ => {
                    add_char_to_hash(&mut hash, c);
                    self.pos += 1;
                }
            }
        }

        self.exhausted = true;
        self.in_args = false;
        self.make_token(start, self.input.len(), hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(parser: &mut CommandParser) -> Option<String> {
        parser.get_command().map(|t| t.text)
    }

    fn arg(parser: &mut CommandParser) -> Option<String> {
        parser.get_arg().map(|t| t.text)
    }

    #[test]
    fn yields_command_and_args() {
        let mut parser = CommandParser::new("cs 5 wsw");
        assert_eq!(command(&mut parser), Some("cs".to_string()));
        assert_eq!(arg(&mut parser), Some("5".to_string()));
        assert_eq!(arg(&mut parser), Some("wsw".to_string()));
        assert_eq!(arg(&mut parser), None);
        assert_eq!(command(&mut parser), None);
    }

    #[test]
    fn quoted_args_keep_spaces() {
        let mut parser = CommandParser::new("motd \"welcome to the server\"");
        assert_eq!(command(&mut parser), Some("motd".to_string()));
        assert_eq!(arg(&mut parser), Some("welcome to the server".to_string()));
        assert_eq!(arg(&mut parser), None);
    }

    #[test]
    fn quote_glued_to_basic_token_starts_next_arg() {
        let mut parser = CommandParser::new("ch player\"hello there\"");
        assert_eq!(command(&mut parser), Some("ch".to_string()));
        assert_eq!(arg(&mut parser), Some("player".to_string()));
        assert_eq!(arg(&mut parser), Some("hello there".to_string()));
    }

    #[test]
    fn separators_yield_empty_commands() {
        let mut parser = CommandParser::new(";connect 127.0.0.1\nnext");
        assert_eq!(command(&mut parser), Some(String::new()));
        assert_eq!(command(&mut parser), Some("connect".to_string()));
        assert_eq!(arg(&mut parser), Some("127.0.0.1".to_string()));
        assert_eq!(arg(&mut parser), None);
        assert_eq!(command(&mut parser), Some("next".to_string()));
        assert_eq!(command(&mut parser), None);
    }

    #[test]
    fn semicolon_ends_the_argument_list() {
        let mut parser = CommandParser::new("cmd one;two");
        assert_eq!(command(&mut parser), Some("cmd".to_string()));
        assert_eq!(arg(&mut parser), Some("one".to_string()));
        assert_eq!(arg(&mut parser), None);
        assert_eq!(command(&mut parser), Some("two".to_string()));
    }

    #[test]
    fn unterminated_quote_returns_the_tail() {
        let mut parser = CommandParser::new("pr \"half a message");
        assert_eq!(command(&mut parser), Some("pr".to_string()));
        assert_eq!(arg(&mut parser), Some("half a message".to_string()));
        assert_eq!(arg(&mut parser), None);
    }

    #[test]
    fn token_hash_matches_string_hash() {
        let mut parser = CommandParser::new("challenge 12345");
        let token = parser.get_command().unwrap();
        let (hash, length) = string_hash_and_length("challenge");
        assert_eq!(token.hash, hash);
        assert_eq!(token.len(), length);

        let argument = parser.get_arg().unwrap();
        assert_eq!(argument.hash, string_hash_and_length("12345").0);
    }

    #[test]
    fn whitespace_only_input_is_exhausted() {
        let mut parser = CommandParser::new("   \t ");
        assert_eq!(command(&mut parser), None);
        assert_eq!(command(&mut parser), None);
    }
}
