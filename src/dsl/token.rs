//! Tokenizer for the metric expression language.
//!
//! Converts source text into tokens with character positions. The only tricky
//! production is `*`, which is a count-all argument inside `COUNT(*)` but an
//! arithmetic operator everywhere else; it is disambiguated by context at
//! lex time so the parser never has to guess.

use crate::dsl::ast::{AggregateFn, BinaryOp, ComparisonOp};
use crate::dsl::{DslError, DslResult};

/// A token in a metric expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // ========================================================================
    // Atoms
    // ========================================================================
    /// Aggregate function name, normalized to uppercase.
    Function(AggregateFn),
    /// Bare column name, case preserved.
    Identifier(String),
    Number(f64),
    /// Quoted string, quotes and escapes resolved.
    Str(String),

    // ========================================================================
    // Operators
    // ========================================================================
    Op(BinaryOp),
    Comparison(ComparisonOp),
    /// `*` as the count-all argument, never as multiplication.
    Star,

    // ========================================================================
    // Keywords and punctuation
    // ========================================================================
    Where,
    And,
    Group,
    By,
    Distinct,
    LParen,
    RParen,
    Comma,
}

/// A token plus the character offset it started at, for error messages.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub position: usize,
}

pub fn tokenize(input: &str) -> DslResult<Vec<SpannedToken>> {
    Lexer::new(input.trim()).run()
}

struct Lexer {
    chars: Vec<char>,
    position: usize,
    tokens: Vec<SpannedToken>,
}

impl Lexer {
    fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            position: 0,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> DslResult<Vec<SpannedToken>> {
        while self.position < self.chars.len() {
            self.skip_whitespace();
            if self.position >= self.chars.len() {
                break;
            }
            let c = self.chars[self.position];
            match c {
                '(' => self.push_one(Token::LParen),
                ')' => self.push_one(Token::RParen),
                ',' => self.push_one(Token::Comma),
                '*' => self.read_star()?,
                '=' | '!' | '>' | '<' => self.read_comparison()?,
                '+' => self.push_one(Token::Op(BinaryOp::Add)),
                '-' => self.push_one(Token::Op(BinaryOp::Sub)),
                '/' => self.push_one(Token::Op(BinaryOp::Div)),
                '\'' | '"' => self.read_string(c)?,
                c if c.is_ascii_digit() => self.read_number()?,
                c if c.is_ascii_alphabetic() || c == '_' => self.read_identifier(),
                other => {
                    return Err(DslError::UnexpectedCharacter {
                        character: other,
                        position: self.position,
                    });
                }
            }
        }
        Ok(self.tokens)
    }

    fn push(&mut self, token: Token, position: usize) {
        self.tokens.push(SpannedToken { token, position });
    }

    fn push_one(&mut self, token: Token) {
        let position = self.position;
        self.push(token, position);
        self.position += 1;
    }

    fn skip_whitespace(&mut self) {
        while self
            .chars
            .get(self.position)
            .is_some_and(|c| c.is_whitespace())
        {
            self.position += 1;
        }
    }

    fn peek_non_whitespace(&self) -> Option<char> {
        self.chars
            .iter()
            .skip(self.position + 1)
            .copied()
            .find(|c| !c.is_whitespace())
    }

    /// `*` is the count-all argument when a `)` follows, when it opens the
    /// expression, or right after `(`. Otherwise it multiplies.
    fn read_star(&mut self) -> DslResult<()> {
        if self.chars.get(self.position + 1) == Some(&'*') {
            return Err(DslError::UnexpectedCharacter {
                character: '*',
                position: self.position,
            });
        }
        let count_all = self.peek_non_whitespace() == Some(')')
            || self.tokens.is_empty()
            || matches!(self.tokens.last(), Some(t) if t.token == Token::LParen);
        if count_all {
            self.push_one(Token::Star);
        } else {
            self.push_one(Token::Op(BinaryOp::Mul));
        }
        Ok(())
    }

    fn read_comparison(&mut self) -> DslResult<()> {
        let start = self.position;
        let mut text = String::from(self.chars[self.position]);
        self.position += 1;
        if self.chars.get(self.position) == Some(&'=') {
            text.push('=');
            self.position += 1;
        }
        let op = ComparisonOp::parse(&text).ok_or(DslError::InvalidComparison {
            text: text.clone(),
            position: start,
        })?;
        self.push(Token::Comparison(op), start);
        Ok(())
    }

    fn read_string(&mut self, quote: char) -> DslResult<()> {
        let start = self.position;
        self.position += 1;
        let mut value = String::new();
        while self.position < self.chars.len() {
            let c = self.chars[self.position];
            if c == quote {
                self.position += 1;
                self.push(Token::Str(value), start);
                return Ok(());
            }
            if c == '\\' {
                self.position += 1;
                if let Some(&escaped) = self.chars.get(self.position) {
                    value.push(escaped);
                }
            } else {
                value.push(c);
            }
            self.position += 1;
        }
        Err(DslError::UnterminatedString { position: start })
    }

    fn read_number(&mut self) -> DslResult<()> {
        let start = self.position;
        let mut text = String::new();
        while self
            .chars
            .get(self.position)
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            text.push(self.chars[self.position]);
            self.position += 1;
        }
        let value: f64 = text.parse().map_err(|_| DslError::InvalidNumber {
            text: text.clone(),
            position: start,
        })?;
        self.push(Token::Number(value), start);
        Ok(())
    }

    fn read_identifier(&mut self) {
        let start = self.position;
        let mut text = String::new();
        while self
            .chars
            .get(self.position)
            .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_')
        {
            text.push(self.chars[self.position]);
            self.position += 1;
        }
        let token = match text.to_uppercase().as_str() {
            "SUM" => Token::Function(AggregateFn::Sum),
            "AVG" => Token::Function(AggregateFn::Avg),
            "COUNT" => Token::Function(AggregateFn::Count),
            "MIN" => Token::Function(AggregateFn::Min),
            "MAX" => Token::Function(AggregateFn::Max),
            "WHERE" => Token::Where,
            "AND" => Token::And,
            "GROUP" => Token::Group,
            "BY" => Token::By,
            "DISTINCT" => Token::Distinct,
            _ => Token::Identifier(text),
        };
        self.push(token, start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    #[test]
    fn star_inside_count_is_count_all() {
        let tokens = kinds("COUNT(*)");
        assert_eq!(
            tokens,
            vec![
                Token::Function(AggregateFn::Count),
                Token::LParen,
                Token::Star,
                Token::RParen,
            ]
        );
    }

    #[test]
    fn star_between_aggregates_multiplies() {
        let tokens = kinds("SUM(prezzo) * SUM(qta)");
        assert!(tokens.contains(&Token::Op(BinaryOp::Mul)));
        assert!(!tokens.contains(&Token::Star));
    }

    #[test]
    fn two_char_comparisons_are_greedy() {
        let tokens = kinds("qta >= 10");
        assert_eq!(tokens[1], Token::Comparison(ComparisonOp::Gte));
        let tokens = kinds("stato != 'chiuso'");
        assert_eq!(tokens[1], Token::Comparison(ComparisonOp::Neq));
    }

    #[test]
    fn quoted_strings_and_escapes() {
        let tokens = kinds(r#"categoria = "ci\"bo""#);
        assert_eq!(tokens[2], Token::Str("ci\"bo".to_string()));
    }

    #[test]
    fn keywords_are_case_insensitive_identifiers_are_not() {
        let tokens = kinds("sum(Importo) where Importo > 0");
        assert_eq!(tokens[0], Token::Function(AggregateFn::Sum));
        assert_eq!(tokens[2], Token::Identifier("Importo".to_string()));
        assert_eq!(tokens[4], Token::Where);
    }

    #[test]
    fn bad_character_is_reported_with_position() {
        let err = tokenize("SUM(importo) § 2").unwrap_err();
        match err {
            DslError::UnexpectedCharacter { character, .. } => assert_eq!(character, '§'),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_number_is_rejected() {
        assert!(tokenize("SUM(importo) / 1.2.3").is_err());
    }
}
