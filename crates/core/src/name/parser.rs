use super::lexer::{tokenize, Token, TokenKind as Lex};
use super::{
    Class, Declaration, GenericParams, Lifetime, ParseError, Path, PathToken, TokenKind,
    TraitClause, TypeArg,
};

/// Parse a demangled symbol into a [`Declaration`].
///
/// ```
/// let decl = funcmatch_core::name::parse(
///     "<algo::U32X4 as core::ops::MulAssign<u32>>::mul_assign",
/// )
/// .unwrap();
/// assert_eq!(decl.symbol_name(), "mul_assign");
/// ```
pub fn parse(input: &str) -> Result<Declaration, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { input, tokens, pos: 0 };
    let decl = parser.declaration()?;
    if let Some(token) = parser.peek_token() {
        return Err(ParseError::at(input, token.start, input.len(), "unexpected trailing input"));
    }
    Ok(decl)
}

struct Parser<'a> {
    input: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&Lex> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> Option<&Lex> {
        self.tokens.get(self.pos + offset).map(|t| &t.kind)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Lex::Ident(word)) if word == keyword)
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Error spanning the current token, or the end of input.
    fn error_here(&self, message: &str) -> ParseError {
        match self.peek_token() {
            Some(token) => ParseError::at(self.input, token.start, token.end, message),
            None => ParseError::at(self.input, self.input.len(), self.input.len(), message),
        }
    }

    /// Consume a `>` closing the `<` at byte offset `open`.
    fn expect_close(&mut self, open: usize) -> Result<(), ParseError> {
        match self.peek() {
            Some(Lex::Gt) => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.error_here("expected `>`")),
            None => Err(ParseError::at(self.input, open, self.input.len(), "unclosed `<`")),
        }
    }

    fn declaration(&mut self) -> Result<Declaration, ParseError> {
        let mut tokens = Vec::new();
        let mut trait_clause = None;

        let impl_segment = matches!(self.peek_at(1), Some(Lex::Ident(w)) if w == "impl");
        let qualified_head = matches!(self.peek(), Some(Lex::Lt)) && !impl_segment;
        if qualified_head {
            let open = self.bump().map_or(0, |t| t.start);
            let first = self.class()?;
            if self.peek_keyword("as") {
                self.pos += 1;
                let implemented_trait = self.path()?;
                trait_clause = Some(TraitClause { implemented_trait, implementing_type: first });
            } else if self.peek_keyword("for") {
                self.pos += 1;
                let implemented_trait = self.trait_path(first)?;
                let implementing_type = self.class()?;
                trait_clause = Some(TraitClause { implemented_trait, implementing_type });
            } else if first.by_ref {
                return Err(self.error_here("expected `as` or `for` after a reference type"));
            } else {
                // `<Type>::method`: an inherent impl written as a qualified path.
                tokens.extend(first.path.tokens);
            }
            self.expect_close(open)?;
        } else {
            self.segment(&mut tokens)?;
        }

        while matches!(self.peek(), Some(Lex::PathSep)) {
            self.pos += 1;
            self.segment(&mut tokens)?;
        }

        Ok(Declaration { tokens, trait_clause })
    }

    /// Reinterpret a class parsed before `for` as the trait path.
    fn trait_path(&self, class: Class) -> Result<Path, ParseError> {
        if class.by_ref {
            return Err(self.error_here("trait path cannot be a reference"));
        }
        Ok(class.path)
    }

    /// Parse one path segment and append it to `tokens`.
    fn segment(&mut self, tokens: &mut Vec<PathToken>) -> Result<(), ParseError> {
        match self.peek().cloned() {
            Some(Lex::Ident(name)) => {
                if matches!(name.as_str(), "as" | "for" | "impl") {
                    return Err(self.error_here("unexpected keyword"));
                }
                self.pos += 1;
                let generics = match self.peek() {
                    Some(Lex::Lt) => Some(self.generics()?),
                    _ => None,
                };
                tokens.push(PathToken { kind: TokenKind::Name(name), generics });
                Ok(())
            }
            Some(Lex::Closure(index)) => {
                self.pos += 1;
                tokens.push(PathToken { kind: TokenKind::Closure(index), generics: None });
                Ok(())
            }
            Some(Lex::Lt) if matches!(self.peek_at(1), Some(Lex::Ident(w)) if w == "impl") => {
                let open = self.bump().map_or(0, |t| t.start);
                self.pos += 1;
                let first = self.class()?;
                let kind = if self.peek_keyword("for") {
                    self.pos += 1;
                    let implemented_trait = self.trait_path(first)?;
                    let implementing_type = self.class()?;
                    let clause = TraitClause { implemented_trait, implementing_type };
                    TokenKind::TraitImpl(Box::new(clause))
                } else {
                    TokenKind::InherentImpl(first)
                };
                self.expect_close(open)?;
                tokens.push(PathToken { kind, generics: None });
                Ok(())
            }
            Some(Lex::Lt) => {
                // Turbofish `::<T>` belongs to the preceding name.
                let start = self.peek_token().map_or(0, |t| t.start);
                let generics = self.generics()?;
                match tokens.last_mut() {
                    Some(last) if last.generics.is_none() => {
                        last.generics = Some(generics);
                        Ok(())
                    }
                    _ => Err(ParseError::at(
                        self.input,
                        start,
                        self.tokens[self.pos - 1].end,
                        "generic arguments without a preceding name",
                    )),
                }
            }
            _ => Err(self.error_here("expected path segment")),
        }
    }

    fn path(&mut self) -> Result<Path, ParseError> {
        let mut tokens = Vec::new();
        self.segment(&mut tokens)?;
        while matches!(self.peek(), Some(Lex::PathSep)) {
            self.pos += 1;
            self.segment(&mut tokens)?;
        }
        Ok(Path { tokens })
    }

    fn class(&mut self) -> Result<Class, ParseError> {
        let by_ref = matches!(self.peek(), Some(Lex::Amp));
        if by_ref {
            self.pos += 1;
        }
        let path = self.path()?;
        Ok(Class { by_ref, path })
    }

    /// `"<" annotation ("," annotation)* ">"`
    fn generics(&mut self) -> Result<GenericParams, ParseError> {
        let open = self.bump().map_or(0, |t| t.start);
        let mut params = GenericParams::default();
        loop {
            if self.peek().is_none() {
                return Err(ParseError::at(self.input, open, self.input.len(), "unclosed `<`"));
            }
            self.annotation(&mut params)?;
            match self.peek() {
                Some(Lex::Comma) => self.pos += 1,
                _ => break,
            }
        }
        self.expect_close(open)?;
        Ok(params)
    }

    fn annotation(&mut self, params: &mut GenericParams) -> Result<(), ParseError> {
        let by_ref = matches!(self.peek(), Some(Lex::Amp));
        let offset = usize::from(by_ref);

        if let Some(Lex::Lifetime(name)) = self.peek_at(offset) {
            let name = *name;
            self.pos += offset + 1;
            params.lifetimes.push(Lifetime { name, by_ref });
            return Ok(());
        }

        if let Some(Lex::Ident(word)) = self.peek_at(offset) {
            let continues = matches!(self.peek_at(offset + 1), Some(Lex::PathSep | Lex::Lt));
            if is_type_param(word) && !continues {
                let name = word.clone();
                self.pos += offset + 1;
                params.types.push(TypeArg::Param { name, by_ref });
                return Ok(());
            }
        }

        let class = self.class()?;
        params.types.push(TypeArg::Concrete(class));
        Ok(())
    }
}

/// One uppercase letter followed by optional digits.
fn is_type_param(word: &str) -> bool {
    let mut chars = word.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase()) && chars.all(|c| c.is_ascii_digit())
}
