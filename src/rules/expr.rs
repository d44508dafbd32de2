//! Restricted expression evaluator for user-defined rules.
//!
//! Custom rules are expressions, not programs: the only bindings are `value`
//! (the cell being transformed) and `row` (the full result row, indexed as
//! `row["Field"]`), combined with literals, arithmetic, comparison and
//! logical operators, `cond ? a : b`, and a whitelisted function set. There
//! is no assignment, no loops, and no access to anything beyond the two
//! bindings, which is what makes user-supplied rules safe to evaluate.

use crate::rules::{value_number, value_text, RowContext, RuleError};
use serde_json::{Number, Value};

/// Evaluates a rule expression against a value and its row context.
pub fn evaluate(code: &str, value: &Value, row: &RowContext) -> Result<Value, RuleError> {
    let tokens = tokenize(code)?;
    let mut parser = Parser { tokens, position: 0 };
    let expression = parser.parse_expression()?;
    parser.expect_end()?;
    expression.eval(value, row)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Punct(&'static str),
}

fn tokenize(code: &str) -> Result<Vec<Token>, RuleError> {
    let mut tokens = Vec::new();
    let mut chars = code.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' | '\r' | '\n' => {
                chars.next();
            }
            '0'..='9' => {
                let mut literal = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse()
                    .map_err(|_| RuleError::Parse(format!("bad number literal '{}'", literal)))?;
                tokens.push(Token::Number(number));
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('n') => literal.push('\n'),
                            Some('t') => literal.push('\t'),
                            Some(escaped) => literal.push(escaped),
                            None => {
                                return Err(RuleError::Parse("unterminated string".to_owned()))
                            }
                        },
                        Some(c) if c == quote => break,
                        Some(c) => literal.push(c),
                        None => return Err(RuleError::Parse("unterminated string".to_owned())),
                    }
                }
                tokens.push(Token::Text(literal));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '&' | '|' => {
                chars.next();
                if chars.peek() == Some(&c) {
                    chars.next();
                    tokens.push(Token::Punct(if c == '&' { "&&" } else { "||" }));
                } else {
                    return Err(RuleError::Parse(format!("unexpected character '{}'", c)));
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Punct("=="));
                } else {
                    return Err(RuleError::Parse("assignment is not allowed".to_owned()));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Punct("!="));
                } else {
                    tokens.push(Token::Punct("!"));
                }
            }
            '<' | '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Punct(if c == '<' { "<=" } else { ">=" }));
                } else {
                    tokens.push(Token::Punct(if c == '<' { "<" } else { ">" }));
                }
            }
            '+' | '-' | '*' | '/' | '%' | '(' | ')' | '[' | ']' | ',' | '?' | ':' => {
                chars.next();
                tokens.push(Token::Punct(match c {
                    '+' => "+",
                    '-' => "-",
                    '*' => "*",
                    '/' => "/",
                    '%' => "%",
                    '(' => "(",
                    ')' => ")",
                    '[' => "[",
                    ']' => "]",
                    ',' => ",",
                    '?' => "?",
                    _ => ":",
                }));
            }
            other => {
                return Err(RuleError::Parse(format!("unexpected character '{}'", other)))
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug)]
enum Expr {
    Literal(Value),
    ValueBinding,
    RowBinding,
    Index(Box<Expr>, Box<Expr>),
    Unary(&'static str, Box<Expr>),
    Binary(&'static str, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn eat(&mut self, punct: &'static str) -> bool {
        if self.peek() == Some(&Token::Punct(punct)) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &'static str) -> Result<(), RuleError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(RuleError::Parse(format!("expected '{}'", punct)))
        }
    }

    fn expect_end(&self) -> Result<(), RuleError> {
        if self.position == self.tokens.len() {
            Ok(())
        } else {
            Err(RuleError::Parse("trailing input after expression".to_owned()))
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, RuleError> {
        let condition = self.parse_or()?;
        if self.eat("?") {
            let when_true = self.parse_expression()?;
            self.expect(":")?;
            let when_false = self.parse_expression()?;
            return Ok(Expr::Ternary(
                Box::new(condition),
                Box::new(when_true),
                Box::new(when_false),
            ));
        }
        Ok(condition)
    }

    fn parse_or(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_and()?;
        while self.eat("||") {
            let right = self.parse_and()?;
            left = Expr::Binary("||", Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_equality()?;
        while self.eat("&&") {
            let right = self.parse_equality()?;
            left = Expr::Binary("&&", Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_comparison()?;
        loop {
            let operator = match self.peek() {
                Some(Token::Punct(op @ ("==" | "!="))) => *op,
                _ => break,
            };
            self.position += 1;
            let right = self.parse_comparison()?;
            left = Expr::Binary(operator, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_additive()?;
        loop {
            let operator = match self.peek() {
                Some(Token::Punct(op @ ("<" | "<=" | ">" | ">="))) => *op,
                _ => break,
            };
            self.position += 1;
            let right = self.parse_additive()?;
            left = Expr::Binary(operator, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let operator = match self.peek() {
                Some(Token::Punct(op @ ("+" | "-"))) => *op,
                _ => break,
            };
            self.position += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(operator, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, RuleError> {
        let mut left = self.parse_unary()?;
        loop {
            let operator = match self.peek() {
                Some(Token::Punct(op @ ("*" | "/" | "%"))) => *op,
                _ => break,
            };
            self.position += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(operator, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, RuleError> {
        if self.eat("-") {
            return Ok(Expr::Unary("-", Box::new(self.parse_unary()?)));
        }
        if self.eat("!") {
            return Ok(Expr::Unary("!", Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, RuleError> {
        let mut expression = self.parse_primary()?;
        while self.eat("[") {
            let index = self.parse_expression()?;
            self.expect("]")?;
            expression = Expr::Index(Box::new(expression), Box::new(index));
        }
        Ok(expression)
    }

    fn parse_primary(&mut self) -> Result<Expr, RuleError> {
        match self.next() {
            Some(Token::Number(number)) => Ok(Expr::Literal(
                Number::from_f64(number)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            )),
            Some(Token::Text(text)) => Ok(Expr::Literal(Value::String(text))),
            Some(Token::Ident(ident)) => match ident.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                "value" => Ok(Expr::ValueBinding),
                "row" => Ok(Expr::RowBinding),
                name => {
                    if self.eat("(") {
                        let mut arguments = Vec::new();
                        if !self.eat(")") {
                            loop {
                                arguments.push(self.parse_expression()?);
                                if self.eat(")") {
                                    break;
                                }
                                self.expect(",")?;
                            }
                        }
                        Ok(Expr::Call(name.to_owned(), arguments))
                    } else {
                        Err(RuleError::Parse(format!("unknown identifier '{}'", name)))
                    }
                }
            },
            Some(Token::Punct("(")) => {
                let expression = self.parse_expression()?;
                self.expect(")")?;
                Ok(expression)
            }
            other => Err(RuleError::Parse(format!("unexpected token {:?}", other))),
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Value::String(text) => !text.is_empty(),
        _ => true,
    }
}

fn number_value(number: f64) -> Result<Value, RuleError> {
    Number::from_f64(number)
        .map(Value::Number)
        .ok_or_else(|| RuleError::Eval("arithmetic produced a non-finite number".to_owned()))
}

fn require_number(value: &Value) -> Result<f64, RuleError> {
    value_number(value)
        .ok_or_else(|| RuleError::Eval(format!("'{}' is not a number", value_text(value))))
}

impl Expr {
    fn eval(&self, value: &Value, row: &RowContext) -> Result<Value, RuleError> {
        match self {
            Expr::Literal(literal) => Ok(literal.clone()),
            Expr::ValueBinding => Ok(value.clone()),
            Expr::RowBinding => Ok(Value::Object(row.clone())),
            Expr::Index(target, index) => {
                let target = target.eval(value, row)?;
                let key = index.eval(value, row)?;
                match target {
                    Value::Object(map) => {
                        Ok(map.get(&value_text(&key)).cloned().unwrap_or(Value::Null))
                    }
                    _ => Err(RuleError::Eval("only row can be indexed".to_owned())),
                }
            }
            Expr::Unary(operator, operand) => {
                let operand = operand.eval(value, row)?;
                match *operator {
                    "-" => number_value(-require_number(&operand)?),
                    _ => Ok(Value::Bool(!truthy(&operand))),
                }
            }
            Expr::Binary(operator, left, right) => {
                // Short-circuit the logical operators before evaluating the right side.
                if *operator == "&&" {
                    let left = left.eval(value, row)?;
                    if !truthy(&left) {
                        return Ok(Value::Bool(false));
                    }
                    return Ok(Value::Bool(truthy(&right.eval(value, row)?)));
                }
                if *operator == "||" {
                    let left = left.eval(value, row)?;
                    if truthy(&left) {
                        return Ok(Value::Bool(true));
                    }
                    return Ok(Value::Bool(truthy(&right.eval(value, row)?)));
                }

                let left = left.eval(value, row)?;
                let right = right.eval(value, row)?;
                match *operator {
                    "+" => {
                        if left.is_string() || right.is_string() {
                            Ok(Value::String(format!(
                                "{}{}",
                                value_text(&left),
                                value_text(&right)
                            )))
                        } else {
                            number_value(require_number(&left)? + require_number(&right)?)
                        }
                    }
                    "-" => number_value(require_number(&left)? - require_number(&right)?),
                    "*" => number_value(require_number(&left)? * require_number(&right)?),
                    "/" => {
                        let divisor = require_number(&right)?;
                        if divisor == 0.0 {
                            return Err(RuleError::Eval("division by zero".to_owned()));
                        }
                        number_value(require_number(&left)? / divisor)
                    }
                    "%" => {
                        let divisor = require_number(&right)?;
                        if divisor == 0.0 {
                            return Err(RuleError::Eval("division by zero".to_owned()));
                        }
                        number_value(require_number(&left)? % divisor)
                    }
                    "==" => Ok(Value::Bool(loose_equals(&left, &right))),
                    "!=" => Ok(Value::Bool(!loose_equals(&left, &right))),
                    comparison => {
                        let ordering = compare(&left, &right)?;
                        Ok(Value::Bool(match comparison {
                            "<" => ordering.is_lt(),
                            "<=" => ordering.is_le(),
                            ">" => ordering.is_gt(),
                            _ => ordering.is_ge(),
                        }))
                    }
                }
            }
            Expr::Ternary(condition, when_true, when_false) => {
                if truthy(&condition.eval(value, row)?) {
                    when_true.eval(value, row)
                } else {
                    when_false.eval(value, row)
                }
            }
            Expr::Call(name, arguments) => {
                let arguments: Vec<Value> = arguments
                    .iter()
                    .map(|argument| argument.eval(value, row))
                    .collect::<Result<_, _>>()?;
                call_function(name, &arguments)
            }
        }
    }
}

fn loose_equals(left: &Value, right: &Value) -> bool {
    if left.is_null() || right.is_null() {
        return left.is_null() && right.is_null();
    }
    match (value_number(left), value_number(right)) {
        (Some(left), Some(right)) => left == right,
        _ => value_text(left) == value_text(right),
    }
}

fn compare(left: &Value, right: &Value) -> Result<std::cmp::Ordering, RuleError> {
    match (value_number(left), value_number(right)) {
        (Some(left), Some(right)) => left
            .partial_cmp(&right)
            .ok_or_else(|| RuleError::Eval("values are not comparable".to_owned())),
        _ => Ok(value_text(left).cmp(&value_text(right))),
    }
}

fn call_function(name: &str, arguments: &[Value]) -> Result<Value, RuleError> {
    let argument = |index: usize| -> Result<&Value, RuleError> {
        arguments
            .get(index)
            .ok_or_else(|| RuleError::Eval(format!("{}: missing argument {}", name, index + 1)))
    };

    match name {
        "upper" => Ok(Value::String(value_text(argument(0)?).to_uppercase())),
        "lower" => Ok(Value::String(value_text(argument(0)?).to_lowercase())),
        "trim" => Ok(Value::String(value_text(argument(0)?).trim().to_owned())),
        "len" => number_value(value_text(argument(0)?).chars().count() as f64),
        "num" => number_value(require_number(argument(0)?)?),
        "str" => Ok(Value::String(value_text(argument(0)?))),
        "abs" => number_value(require_number(argument(0)?)?.abs()),
        "round" => {
            let number = require_number(argument(0)?)?;
            let digits = match arguments.get(1) {
                Some(digits) => require_number(digits)? as i32,
                None => 0,
            };
            let factor = 10f64.powi(digits);
            number_value((number * factor).round() / factor)
        }
        "replace" => Ok(Value::String(value_text(argument(0)?).replace(
            &value_text(argument(1)?),
            &value_text(argument(2)?),
        ))),
        "concat" => Ok(Value::String(
            arguments.iter().map(value_text).collect::<String>(),
        )),
        "contains" => Ok(Value::Bool(
            value_text(argument(0)?).contains(&value_text(argument(1)?)),
        )),
        "substr" => {
            let text = value_text(argument(0)?);
            let start = require_number(argument(1)?)?.max(0.0) as usize;
            let taken: String = match arguments.get(2) {
                Some(length) => text
                    .chars()
                    .skip(start)
                    .take(require_number(length)?.max(0.0) as usize)
                    .collect(),
                None => text.chars().skip(start).collect(),
            };
            Ok(Value::String(taken))
        }
        other => Err(RuleError::Eval(format!("unknown function '{}'", other))),
    }
}
