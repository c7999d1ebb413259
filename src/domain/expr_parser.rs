//! Expression parser.
//!
//! Recursive descent over a cursor, producing [`Expr`] trees with meaningful
//! error messages including character offset and the original input.
//! Operators become canonical uppercase call nodes, so serialization and
//! reparsing are mutually stable.

use crate::domain::ast::Expr;
use crate::domain::error::ParseError;

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.remaining().chars().nth(offset)
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
            position: self.pos,
            input: self.input.to_string(),
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(self.err(format!("expected '{}', found '{}'", expected, ch))),
            None => Err(self.err(format!("expected '{}', found end of input", expected))),
        }
    }

    fn consume_exact(&mut self, s: &str) -> bool {
        if self.remaining().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    /// Case-insensitive keyword match that refuses to fire inside a longer
    /// identifier (`andrew` never matches `and`).
    fn consume_keyword_ci(&mut self, keyword: &str) -> bool {
        let remaining = self.remaining();
        if remaining.len() < keyword.len() || !remaining.is_char_boundary(keyword.len()) {
            return false;
        }
        if !remaining[..keyword.len()].eq_ignore_ascii_case(keyword) {
            return false;
        }
        let boundary = remaining[keyword.len()..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric() && c != '_')
            .unwrap_or(true);
        if boundary {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn peek_word(&self) -> String {
        let mut word = String::new();
        for ch in self.remaining().chars() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                word.push(ch);
            } else {
                break;
            }
        }
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word
        }
    }

    fn parse_word(&mut self) -> Result<String, ParseError> {
        let word = self.peek_word();
        let is_identifier = !word.is_empty()
            && word.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && self.remaining().starts_with(word.as_str());
        if !is_identifier {
            return Err(self.err(format!("expected identifier, found '{}'", word)));
        }
        self.pos += word.len();
        Ok(word)
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        if self.peek() == Some('-') || self.peek() == Some('+') {
            self.advance();
        }

        let mut digits = 0;
        let mut has_dot = false;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }
        if digits == 0 {
            self.pos = start;
            return Err(self.err("expected number"));
        }

        // exponent notation, only when it is actually one
        if matches!(self.peek(), Some('e') | Some('E')) {
            let after_e = match self.peek_at(1) {
                Some('+') | Some('-') => self.peek_at(2),
                other => other,
            };
            if after_e.map(|c| c.is_ascii_digit()).unwrap_or(false) {
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.advance();
                }
                while self.peek().map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    self.advance();
                }
            }
        }

        let num_str = &self.input[start..self.pos];
        num_str
            .parse::<f64>()
            .map_err(|_| self.err(format!("invalid number: {}", num_str)))
    }

    fn parse_string(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        let delim = match self.advance() {
            Some(ch @ ('"' | '\'')) => ch,
            _ => return Err(self.err("expected string literal")),
        };
        let mut raw = String::new();
        loop {
            match self.advance() {
                None => {
                    return Err(self.err(format!(
                        "unterminated string starting at position {}",
                        start
                    )));
                }
                Some('\\') => match self.advance() {
                    None => {
                        return Err(self.err(format!(
                            "unterminated string starting at position {}",
                            start
                        )));
                    }
                    Some(ch) if ch == delim => raw.push(delim),
                    Some(ch) => {
                        raw.push('\\');
                        raw.push(ch);
                    }
                },
                Some(ch) if ch == delim => break,
                Some(ch) => raw.push(ch),
            }
        }
        // round-trip the content through a JSON string so escapes carry
        // exactly JSON semantics
        let mut json = String::with_capacity(raw.len() + 2);
        json.push('"');
        for ch in raw.chars() {
            if ch == '"' {
                json.push_str("\\\"");
            } else {
                json.push(ch);
            }
        }
        json.push('"');
        serde_json::from_str::<String>(&json).map_err(|_| {
            ParseError {
                message: format!("invalid string literal: {}", &self.input[start..self.pos]),
                position: start,
                input: self.input.to_string(),
            }
        })
    }

    fn parse_call_args(&mut self, name: String) -> Result<Expr, ParseError> {
        self.expect_char('(')?;
        let literal_tail = name.contains('.');
        let mut args = Vec::new();
        self.skip_whitespace();
        if self.peek() == Some(')') {
            self.advance();
            return Ok(Expr::Call(name, args));
        }
        loop {
            // an interval-qualified call takes numeric literals after the
            // first argument
            let arg = if literal_tail && !args.is_empty() {
                Expr::Number(self.parse_number()?)
            } else {
                self.parse_or()?
            };
            args.push(arg);
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.advance();
                break;
            }
            self.expect_char(',')?;
        }
        Ok(Expr::Call(name, args))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some('(') => {
                self.advance();
                let expr = self.parse_or()?;
                self.expect_char(')')?;
                Ok(expr)
            }
            Some('"') | Some('\'') => Ok(Expr::Text(self.parse_string()?)),
            Some(ch) if ch.is_ascii_digit() => Ok(Expr::Number(self.parse_number()?)),
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {
                let mut token = self.parse_word()?;
                if self.peek() == Some('.') {
                    self.advance();
                    let name = self.parse_word()?;
                    token = format!("{token}.{name}");
                }
                self.skip_whitespace();
                if self.peek() == Some('(') {
                    self.parse_call_args(token)
                } else {
                    Ok(Expr::Field(token))
                }
            }
            _ => {
                let found = self.peek_word();
                Err(self.err(format!("expected expression, found '{}'", found)))
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some('!') => {
                self.advance();
                Ok(Expr::Call("NOT".to_string(), vec![self.parse_unary()?]))
            }
            Some('+') => {
                self.advance();
                self.parse_unary()
            }
            Some('-') => {
                // a minus glued to a digit is a negative literal
                if self.peek_at(1).map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    Ok(Expr::Number(self.parse_number()?))
                } else {
                    self.advance();
                    Ok(Expr::Call("NEGATIVE".to_string(), vec![self.parse_unary()?]))
                }
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            self.skip_whitespace();
            let tag = match self.peek() {
                Some('*') | Some('×') => "PRODUCT",
                Some('/') => "DIVIDE",
                Some('%') => "MOD",
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Call(tag.to_string(), vec![lhs, rhs]);
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            self.skip_whitespace();
            let tag = match self.peek() {
                Some('+') => "ADD",
                Some('-') => "SUBTRACT",
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Call(tag.to_string(), vec![lhs, rhs]);
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;
        self.skip_whitespace();
        let tag = if self.consume_exact("!=") || self.consume_exact("<>") {
            "NOT_EQUAL"
        } else if self.consume_exact("<=") {
            "NOT_GREATER_THAN"
        } else if self.consume_exact(">=") {
            "NOT_LESS_THAN"
        } else if self.consume_exact("=") {
            "EQUALS"
        } else if self.consume_exact("<") {
            "LESS_THAN"
        } else if self.consume_exact(">") {
            "GREATER_THAN"
        } else {
            return Ok(lhs);
        };
        let rhs = self.parse_relational()?;
        Ok(Expr::Call(tag.to_string(), vec![lhs, rhs]))
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_relational()?;
        self.skip_whitespace();
        if self.consume_keyword_ci("and") {
            let rhs = self.parse_and()?;
            Ok(Expr::Call("AND".to_string(), vec![lhs, rhs]))
        } else {
            Ok(lhs)
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_and()?;
        self.skip_whitespace();
        if self.consume_keyword_ci("or") {
            let rhs = self.parse_or()?;
            Ok(Expr::Call("OR".to_string(), vec![lhs, rhs]))
        } else {
            Ok(lhs)
        }
    }

    fn parse_top(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_or()?;
        self.skip_whitespace();
        if self.consume_keyword_ci("as") {
            self.skip_whitespace();
            let name = match self.peek() {
                Some('"') | Some('\'') => self.parse_string()?,
                _ => self.parse_word()?,
            };
            Ok(Expr::As(Box::new(expr), name))
        } else {
            Ok(expr)
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut exprs = vec![self.parse_top()?];
        loop {
            self.skip_whitespace();
            if self.peek() == Some(',') {
                self.advance();
                exprs.push(self.parse_top()?);
            } else {
                break;
            }
        }
        if self.pos < self.input.len() {
            return Err(self.err(format!(
                "unexpected input after expression: '{}'",
                self.remaining()
            )));
        }
        Ok(exprs)
    }
}

/// Parse a comma-separated list of expressions, each optionally renamed with
/// a trailing `AS`.
pub fn parse_expressions(input: &str) -> Result<Vec<Expr>, ParseError> {
    Parser::new(input).parse_list()
}

/// Parse exactly one expression.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    let mut parser = Parser::new(input);
    let exprs = parser.parse_list()?;
    if exprs.len() != 1 {
        return Err(ParseError {
            message: format!("expected one expression, found {}", exprs.len()),
            position: 0,
            input: input.to_string(),
        });
    }
    Ok(exprs.into_iter().next().unwrap_or(Expr::Number(0.0)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(name.to_string(), args)
    }

    #[test]
    fn parse_addition() {
        let expr = parse_expression("1 + 1").unwrap();
        assert_eq!(expr, call("ADD", vec![Expr::Number(1.0), Expr::Number(1.0)]));
    }

    #[test]
    fn multiplicative_binds_tighter_than_additive() {
        let expr = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            call(
                "ADD",
                vec![
                    Expr::Number(1.0),
                    call("PRODUCT", vec![Expr::Number(2.0), Expr::Number(3.0)])
                ]
            )
        );
    }

    #[test]
    fn modulo_binds_tighter_than_additive() {
        let expr = parse_expression("1 + 5 % 2").unwrap();
        assert_eq!(
            expr,
            call(
                "ADD",
                vec![
                    Expr::Number(1.0),
                    call("MOD", vec![Expr::Number(5.0), Expr::Number(2.0)])
                ]
            )
        );
    }

    #[test]
    fn left_associative_subtraction() {
        let expr = parse_expression("8 - 2 - 1").unwrap();
        assert_eq!(
            expr,
            call(
                "SUBTRACT",
                vec![
                    call("SUBTRACT", vec![Expr::Number(8.0), Expr::Number(2.0)]),
                    Expr::Number(1.0)
                ]
            )
        );
    }

    #[test]
    fn negative_literal_folds() {
        let expr = parse_expression("-4.2 * (2 + 3.5)").unwrap();
        assert_eq!(
            expr,
            call(
                "PRODUCT",
                vec![
                    Expr::Number(-4.2),
                    call("ADD", vec![Expr::Number(2.0), Expr::Number(3.5)])
                ]
            )
        );
    }

    #[test]
    fn negative_expression_wraps_in_negative() {
        let expr = parse_expression("-close").unwrap();
        assert_eq!(
            expr,
            call("NEGATIVE", vec![Expr::Field("close".to_string())])
        );
    }

    #[test]
    fn unary_not_and_plus() {
        assert_eq!(
            parse_expression("!1").unwrap(),
            call("NOT", vec![Expr::Number(1.0)])
        );
        assert_eq!(parse_expression("+5").unwrap(), Expr::Number(5.0));
    }

    #[test]
    fn exponent_notation() {
        assert_eq!(parse_expression("2.5e2").unwrap(), Expr::Number(250.0));
        assert_eq!(parse_expression("1E-2").unwrap(), Expr::Number(0.01));
    }

    #[test]
    fn relational_operators() {
        for (text, tag) in [
            ("1 = 2", "EQUALS"),
            ("1 != 2", "NOT_EQUAL"),
            ("1 <> 2", "NOT_EQUAL"),
            ("1 <= 2", "NOT_GREATER_THAN"),
            ("1 >= 2", "NOT_LESS_THAN"),
            ("1 < 2", "LESS_THAN"),
            ("1 > 2", "GREATER_THAN"),
        ] {
            let expr = parse_expression(text).unwrap();
            assert_eq!(
                expr,
                call(tag, vec![Expr::Number(1.0), Expr::Number(2.0)]),
                "{text}"
            );
        }
    }

    #[test]
    fn relational_is_right_associative() {
        let expr = parse_expression("1 < 2 < 3").unwrap();
        assert_eq!(
            expr,
            call(
                "LESS_THAN",
                vec![
                    Expr::Number(1.0),
                    call("LESS_THAN", vec![Expr::Number(2.0), Expr::Number(3.0)])
                ]
            )
        );
    }

    #[test]
    fn and_or_keywords_case_insensitive() {
        let expr = parse_expression("1 AND 2 or 3").unwrap();
        assert_eq!(
            expr,
            call(
                "AND",
                vec![
                    Expr::Number(1.0),
                    call("OR", vec![Expr::Number(2.0), Expr::Number(3.0)])
                ]
            )
        );
    }

    #[test]
    fn identifier_starting_with_and_is_a_field() {
        let expr = parse_expression("andrew").unwrap();
        assert_eq!(expr, Expr::Field("andrew".to_string()));
    }

    #[test]
    fn and_requires_word_boundary() {
        let expr = parse_expression("close and volume").unwrap();
        assert_eq!(
            expr,
            call(
                "AND",
                vec![
                    Expr::Field("close".to_string()),
                    Expr::Field("volume".to_string())
                ]
            )
        );
    }

    #[test]
    fn interval_qualified_field() {
        let expr = parse_expression("day.close").unwrap();
        assert_eq!(expr, Expr::Field("day.close".to_string()));
    }

    #[test]
    fn function_call_with_args() {
        let expr = parse_expression("SMA(20, close)").unwrap();
        assert_eq!(
            expr,
            call(
                "SMA",
                vec![Expr::Number(20.0), Expr::Field("close".to_string())]
            )
        );
    }

    #[test]
    fn empty_argument_list() {
        let expr = parse_expression("day.obv()").unwrap();
        assert_eq!(expr, call("day.obv", vec![]));
    }

    #[test]
    fn dotted_call_tail_args_are_numbers_only() {
        let expr = parse_expression("day.atr(close, 14)").unwrap();
        assert_eq!(
            expr,
            call(
                "day.atr",
                vec![Expr::Field("close".to_string()), Expr::Number(14.0)]
            )
        );
        let err = parse_expression("day.atr(close, volume)").unwrap_err();
        assert!(err.message.contains("expected number"));
    }

    #[test]
    fn string_literals_both_delimiters() {
        assert_eq!(
            parse_expression("\"hello\"").unwrap(),
            Expr::Text("hello".to_string())
        );
        assert_eq!(
            parse_expression("'world'").unwrap(),
            Expr::Text("world".to_string())
        );
    }

    #[test]
    fn string_escapes_are_json_semantics() {
        assert_eq!(
            parse_expression(r#""a\nb""#).unwrap(),
            Expr::Text("a\nb".to_string())
        );
        assert_eq!(
            parse_expression(r#"'don\'t'"#).unwrap(),
            Expr::Text("don't".to_string())
        );
        assert_eq!(
            parse_expression(r#""quote \" inside""#).unwrap(),
            Expr::Text("quote \" inside".to_string())
        );
    }

    #[test]
    fn unterminated_string_errors() {
        let err = parse_expression("\"oops").unwrap_err();
        assert!(err.message.contains("unterminated string"));
    }

    #[test]
    fn as_renames_top_level() {
        let expr = parse_expression("close AS last").unwrap();
        assert_eq!(
            expr,
            Expr::As(Box::new(Expr::Field("close".to_string())), "last".to_string())
        );
        let expr = parse_expression("close as \"Last Price\"").unwrap();
        assert_eq!(
            expr,
            Expr::As(
                Box::new(Expr::Field("close".to_string())),
                "Last Price".to_string()
            )
        );
    }

    #[test]
    fn comma_separated_list() {
        let exprs = parse_expressions("open, close AS c, SMA(20,close)").unwrap();
        assert_eq!(exprs.len(), 3);
        assert!(matches!(exprs[1], Expr::As(_, _)));
    }

    #[test]
    fn error_on_trailing_input() {
        let err = parse_expression("1 + 1 garbage").unwrap_err();
        assert!(err.message.contains("unexpected input"));
        assert!(err.input.contains("garbage"));
    }

    #[test]
    fn error_on_missing_operand() {
        let err = parse_expression("1 +").unwrap_err();
        assert!(err.message.contains("expected expression"));
    }

    #[test]
    fn error_on_unbalanced_paren() {
        let err = parse_expression("(1 + 2").unwrap_err();
        assert!(err.message.contains("expected ')'"));
    }

    #[test]
    fn error_on_multiple_when_one_expected() {
        let err = parse_expression("1, 2").unwrap_err();
        assert!(err.message.contains("expected one expression"));
    }

    #[test]
    fn serialization_round_trips() {
        for text in [
            "1 + 1",
            "-4.2 * (2 + 3.5)",
            "SMA(20,day.close) + 2*STDEV(20,day.close)",
            "close > 100 and volume > 0",
            "!(open = close)",
            "'text' AS label",
        ] {
            let first = parse_expressions(text).unwrap();
            let serialized = first
                .iter()
                .map(|e| e.serialize())
                .collect::<Vec<_>>()
                .join(",");
            let second = parse_expressions(&serialized).unwrap();
            assert_eq!(first, second, "{text} vs {serialized}");
        }
    }

    #[test]
    fn whitespace_everywhere() {
        let expr = parse_expression("  SMA ( 20 ,  close )  ").unwrap();
        assert_eq!(
            expr,
            call(
                "SMA",
                vec![Expr::Number(20.0), Expr::Field("close".to_string())]
            )
        );
    }

    #[test]
    fn times_sign_is_product() {
        let expr = parse_expression("2 × 3").unwrap();
        assert_eq!(
            expr,
            call("PRODUCT", vec![Expr::Number(2.0), Expr::Number(3.0)])
        );
    }
}
