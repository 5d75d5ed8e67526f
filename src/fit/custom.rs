//! User-authored fit equations.
//!
//! An equation is a single expression over one independent variable and a
//! declared, ordered parameter list. Compilation enforces a strict token
//! whitelist (numbers, the declared names, `+ - * / ^ ( ) .`, and a fixed
//! set of functions), then builds an AST evaluated by the fitting engine.
//! Anything outside the whitelist is a ruleset error, so a definition file
//! can never smuggle arbitrary code into the pipeline.

use super::Model;
use crate::error::{AssayError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// Functions an equation may call. `log` and `ln` are both the natural
/// logarithm.
const FUNCTIONS: [&str; 7] = ["exp", "log", "ln", "sqrt", "sin", "cos", "tan"];

fn number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][+-]?[0-9]+)?").unwrap()
    })
}

fn ident_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*").unwrap())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn invalid(message: String) -> AssayError {
    AssayError::RulesetInvalid(message)
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = source;
    while !rest.is_empty() {
        let c = rest.chars().next().unwrap();
        if c.is_whitespace() {
            rest = &rest[c.len_utf8()..];
            continue;
        }
        let simple = match c {
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '^' => Some(Token::Caret),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push(token);
            rest = &rest[1..];
            continue;
        }
        if let Some(m) = number_regex().find(rest) {
            let text = m.as_str();
            let value = text
                .parse::<f64>()
                .map_err(|_| invalid(format!("malformed number '{}'", text)))?;
            tokens.push(Token::Number(value));
            rest = &rest[text.len()..];
            continue;
        }
        if let Some(m) = ident_regex().find(rest) {
            let text = m.as_str();
            tokens.push(Token::Ident(text.to_string()));
            rest = &rest[text.len()..];
            continue;
        }
        return Err(invalid(format!(
            "character '{}' is not permitted in equations",
            c
        )));
    }
    if tokens.is_empty() {
        return Err(invalid("equation is empty".to_string()));
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Exp,
    Ln,
    Sqrt,
    Sin,
    Cos,
    Tan,
}

impl Func {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "exp" => Some(Self::Exp),
            "log" | "ln" => Some(Self::Ln),
            "sqrt" => Some(Self::Sqrt),
            "sin" => Some(Self::Sin),
            "cos" => Some(Self::Cos),
            "tan" => Some(Self::Tan),
            _ => None,
        }
    }

    fn apply(&self, v: f64) -> f64 {
        match self {
            Self::Exp => v.exp(),
            Self::Ln => v.ln(),
            Self::Sqrt => v.sqrt(),
            Self::Sin => v.sin(),
            Self::Cos => v.cos(),
            Self::Tan => v.tan(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone)]
enum Expr {
    Number(f64),
    Var,
    Param(usize),
    Neg(Box<Expr>),
    Binary(Op, Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

impl Expr {
    fn eval(&self, x: f64, pars: &[f64]) -> f64 {
        match self {
            Self::Number(v) => *v,
            Self::Var => x,
            Self::Param(i) => pars[*i],
            Self::Neg(e) => -e.eval(x, pars),
            Self::Binary(op, a, b) => {
                let (a, b) = (a.eval(x, pars), b.eval(x, pars));
                match op {
                    Op::Add => a + b,
                    Op::Sub => a - b,
                    Op::Mul => a * b,
                    Op::Div => a / b,
                    Op::Pow => a.powf(b),
                }
            }
            Self::Call(func, e) => func.apply(e.eval(x, pars)),
        }
    }
}

/// Recursive descent with precedence `^` > unary minus > `* /` > `+ -`.
struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    parameters: &'a [String],
    independent: &'a str,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        while let Some(op) = match self.peek() {
            Some(Token::Plus) => Some(Op::Add),
            Some(Token::Minus) => Some(Op::Sub),
            _ => None,
        } {
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some(op) = match self.peek() {
            Some(Token::Star) => Some(Op::Mul),
            Some(Token::Slash) => Some(Op::Div),
            _ => None,
        } {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.atom()?;
        if matches!(self.peek(), Some(Token::Caret)) {
            self.pos += 1;
            // Right-associative; the exponent may carry its own sign.
            let exponent = self.unary()?;
            return Ok(Expr::Binary(
                Op::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.bump() {
            Some(Token::Number(v)) => Ok(Expr::Number(*v)),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(invalid("missing closing parenthesis".to_string())),
                }
            }
            Some(Token::Ident(name)) => {
                let name = name.clone();
                if let Some(func) = Func::from_name(&name) {
                    match self.bump() {
                        Some(Token::LParen) => {}
                        _ => {
                            return Err(invalid(format!(
                                "function '{}' needs a parenthesised argument",
                                name
                            )))
                        }
                    }
                    let argument = self.expr()?;
                    return match self.bump() {
                        Some(Token::RParen) => Ok(Expr::Call(func, Box::new(argument))),
                        _ => Err(invalid("missing closing parenthesis".to_string())),
                    };
                }
                if name == self.independent {
                    return Ok(Expr::Var);
                }
                if let Some(index) = self.parameters.iter().position(|p| p == &name) {
                    return Ok(Expr::Param(index));
                }
                Err(invalid(format!(
                    "'{}' is neither the independent variable, a declared parameter, nor a permitted function",
                    name
                )))
            }
            other => Err(invalid(format!(
                "unexpected {}",
                match other {
                    Some(token) => format!("token {:?}", token),
                    None => "end of equation".to_string(),
                }
            ))),
        }
    }
}

/// A compiled equation, usable anywhere a [`Model`] is.
#[derive(Debug, Clone)]
pub struct CompiledEquation {
    ast: Expr,
    parameters: Vec<String>,
    source: String,
}

impl CompiledEquation {
    /// The expression text this equation was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl Model for CompiledEquation {
    fn n_params(&self) -> usize {
        self.parameters.len()
    }

    fn names(&self) -> Vec<String> {
        self.parameters.clone()
    }

    fn eval(&self, x: f64, pars: &[f64]) -> f64 {
        self.ast.eval(x, pars)
    }

    fn initial_guess(&self, _xs: &[f64], _ys: &[f64]) -> Vec<f64> {
        vec![1.0; self.parameters.len()]
    }
}

/// Compile a whitelisted expression into a fit model.
///
/// Every identifier must be the independent variable, one of the declared
/// parameters, or a permitted function; parameter names must be unique and
/// must not shadow a function or the independent variable.
pub fn compile_equation(
    function: &str,
    parameters: &[String],
    independent: &str,
) -> Result<CompiledEquation> {
    if independent.is_empty() {
        return Err(invalid("no independent variable declared".to_string()));
    }
    if parameters.is_empty() {
        return Err(invalid("no parameters declared".to_string()));
    }
    for (i, name) in parameters.iter().enumerate() {
        if FUNCTIONS.contains(&name.as_str()) {
            return Err(invalid(format!(
                "parameter '{}' shadows a permitted function",
                name
            )));
        }
        if name == independent {
            return Err(invalid(format!(
                "parameter '{}' shadows the independent variable",
                name
            )));
        }
        if parameters[..i].contains(name) {
            return Err(invalid(format!("parameter '{}' declared twice", name)));
        }
    }

    let tokens = tokenize(function)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        parameters,
        independent,
    };
    let ast = parser.expr()?;
    if parser.pos != tokens.len() {
        return Err(invalid("trailing tokens after expression".to_string()));
    }
    Ok(CompiledEquation {
        ast,
        parameters: parameters.to_vec(),
        source: function.to_string(),
    })
}
