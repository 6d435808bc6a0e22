use super::ParseError;

/// Lexical token of a demangled symbol path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// `::`
    PathSep,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `,`
    Comma,
    /// `&`
    Amp,
    /// `'a` or `'_`
    Lifetime(char),
    /// Identifier, including the contextual keywords `as`, `for` and `impl`.
    Ident(String),
    /// `{{closure}}` (legacy) or `{closure#N}` (v0).
    Closure(Option<u32>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

/// Split `input` into tokens, dropping whitespace.
pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let c = bytes[pos];
        if c.is_ascii_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let kind = match c {
            b':' => {
                if bytes.get(pos + 1) != Some(&b':') {
                    return Err(ParseError::at(input, start, start + 1, "expected `::`"));
                }
                pos += 2;
                TokenKind::PathSep
            }
            b'<' => {
                pos += 1;
                TokenKind::Lt
            }
            b'>' => {
                pos += 1;
                TokenKind::Gt
            }
            b',' => {
                pos += 1;
                TokenKind::Comma
            }
            b'&' => {
                pos += 1;
                TokenKind::Amp
            }
            b'\'' => {
                let name = bytes.get(pos + 1).copied();
                match name {
                    Some(n) if n.is_ascii_lowercase() || n == b'_' => {
                        pos += 2;
                        if bytes.get(pos).is_some_and(|b| is_ident_continue(*b)) {
                            let end = ident_end(bytes, pos);
                            return Err(ParseError::at(
                                input,
                                start,
                                end,
                                "lifetime must be a single lowercase letter or `_`",
                            ));
                        }
                        TokenKind::Lifetime(n as char)
                    }
                    _ => {
                        let end = input[pos + 1..]
                            .chars()
                            .next()
                            .map_or(pos + 1, |c| pos + 1 + c.len_utf8());
                        return Err(ParseError::at(input, start, end, "malformed lifetime"));
                    }
                }
            }
            b'{' => {
                let (kind, end) = lex_closure(input, start)?;
                pos = end;
                kind
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                pos = ident_end(bytes, pos);
                TokenKind::Ident(input[start..pos].to_string())
            }
            _ => {
                let end = start + input[start..].chars().next().map_or(1, char::len_utf8);
                return Err(ParseError::at(input, start, end, "unexpected character"));
            }
        };

        tokens.push(Token { kind, start, end: pos });
    }

    Ok(tokens)
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn ident_end(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && is_ident_continue(bytes[pos]) {
        pos += 1;
    }
    pos
}

fn lex_closure(input: &str, start: usize) -> Result<(TokenKind, usize), ParseError> {
    let rest = &input[start..];
    if rest.starts_with("{{closure}}") {
        return Ok((TokenKind::Closure(None), start + "{{closure}}".len()));
    }
    if let Some(tail) = rest.strip_prefix("{closure#") {
        let digits = tail.bytes().take_while(u8::is_ascii_digit).count();
        if digits > 0 && tail.as_bytes().get(digits) == Some(&b'}') {
            let index = tail[..digits].parse::<u32>().ok();
            let end = start + "{closure#".len() + digits + 1;
            return Ok((TokenKind::Closure(index), end));
        }
    }
    let end = rest.find('}').map_or(input.len(), |i| start + i + 1);
    Err(ParseError::at(input, start, end, "unsupported compiler-generated segment"))
}
