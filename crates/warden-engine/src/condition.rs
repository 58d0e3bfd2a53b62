use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use warden_core::{Attribute, AttributeType};

use crate::error::{EngineError, EngineResult};
use crate::handler::{
    assert_have_same, match_any, match_single, AttributeHandler, ResourceHandler, SubjectHandler,
};

// ---------------------------------------------------------------------------
// Condition language
//
// A restricted boolean-expression grammar bound to three names at
// execution time: `subject`, `resource` (attribute handlers), and
// `match` (cross-handler value matching). Evaluated by a tree-walking
// interpreter; there is no general-purpose scripting engine to sandbox.
// Anything outside the grammar fails to parse, and a denylist of
// runtime/reflection identifiers produces a dedicated error so that
// e.g. `System.exit(0)` is rejected as forbidden, not merely as a
// syntax error.
//
//   condition := or
//   or        := and ( '||' and )*
//   and       := unary ( '&&' unary )*
//   unary     := '!' unary | primary
//   primary   := 'true' | 'false' | '(' condition ')'
//              | handler '.has(' criteria ')'
//              | handler '.and(' handler ').haveSame(' str ',' str ')'
//              | 'match.any(' list ',' list ')'
//              | 'match.single(' list ',' value ')'
//              | value ('==' | '!=') value
//   criteria  := 'type(' str ',' str ')'
//              | 'attribute(' str ',' str ',' str ')'
//              | 'scoped(' attribute ',' type ')'
//   list      := handler '.valuesOf(' str ',' str ')'
//   value     := string | 'resource.uriVariable(' str ')'
//   handler   := 'subject' | 'resource'
// ---------------------------------------------------------------------------

/// Identifiers that invoke process control, reflection, dynamic code
/// loading, or the host shell in the scripting languages this grammar
/// replaces. Rejected with `EngineError::ForbiddenConstruct`.
const FORBIDDEN_IDENTIFIERS: &[&str] = &[
    "exit", "halt", "exec", "eval", "system", "runtime", "thread", "class", "getclass", "forname",
    "processbuilder", "spawn", "fork", "shell", "import", "require", "load", "reflect",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    // No grammar rule accepts a number; it lexes so that expressions
    // like `exit(0)` reach the parser, where the identifier gets
    // classified as forbidden instead of dying on the digit.
    Number(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Bang,
    AndAnd,
    OrOr,
    EqEq,
    NotEq,
}

fn lex(source: &str) -> EngineResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '.' => {
                chars.next();
                tokens.push(Token::Dot);
            }
            '&' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '&')) => {
                        chars.next();
                        tokens.push(Token::AndAnd);
                    }
                    _ => return Err(parse_error("expected '&&'")),
                }
            }
            '|' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '|')) => {
                        chars.next();
                        tokens.push(Token::OrOr);
                    }
                    _ => return Err(parse_error("expected '||'")),
                }
            }
            '=' => {
                chars.next();
                match chars.peek() {
                    Some(&(_, '=')) => {
                        chars.next();
                        tokens.push(Token::EqEq);
                    }
                    _ => return Err(parse_error("expected '=='")),
                }
            }
            '!' => {
                chars.next();
                if let Some(&(_, '=')) = chars.peek() {
                    chars.next();
                    tokens.push(Token::NotEq);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == quote {
                        closed = true;
                        break;
                    }
                    value.push(c);
                }
                if !closed {
                    return Err(parse_error("unterminated string literal"));
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut end = i;
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Number(source[start..end].to_string()));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                let mut end = i;
                while let Some(&(j, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = j + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(source[start..end].to_string()));
            }
            c => {
                return Err(parse_error(&format!("unexpected character '{}'", c)));
            }
        }
    }
    Ok(tokens)
}

fn parse_error(message: &str) -> EngineError {
    EngineError::ConditionParse(message.to_string())
}

/// Classify an identifier the grammar does not recognize: forbidden
/// constructs get their dedicated error.
fn unknown_identifier(name: &str) -> EngineError {
    if FORBIDDEN_IDENTIFIERS.contains(&name.to_ascii_lowercase().as_str()) {
        EngineError::ForbiddenConstruct(name.to_string())
    } else {
        parse_error(&format!("unknown identifier '{}'", name))
    }
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandlerRef {
    Subject,
    Resource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Criteria {
    Type(AttributeType),
    Exact(Attribute),
    Scoped {
        base: Attribute,
        scope_type: AttributeType,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Literal(String),
    UriVariable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ListValue {
    handler: HandlerRef,
    attribute_type: AttributeType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Literal(bool),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare {
        left: Value,
        op: CompareOp,
        right: Value,
    },
    Has {
        handler: HandlerRef,
        criteria: Criteria,
    },
    HaveSame {
        left: HandlerRef,
        right: HandlerRef,
        attribute_type: AttributeType,
    },
    MatchAny {
        source: ListValue,
        target: ListValue,
    },
    MatchSingle {
        values: ListValue,
        constant: Value,
    },
}

// ---------------------------------------------------------------------------
// Parser — recursive descent over the token stream
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> EngineResult<Token> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or_else(|| parse_error("unexpected end of condition"))?;
        self.pos += 1;
        Ok(token)
    }

    fn expect(&mut self, expected: Token, what: &str) -> EngineResult<()> {
        let token = self.next()?;
        if token == expected {
            Ok(())
        } else {
            Err(parse_error(&format!("expected {}", what)))
        }
    }

    fn expect_string(&mut self) -> EngineResult<String> {
        match self.next()? {
            Token::Str(s) => Ok(s),
            _ => Err(parse_error("expected string literal")),
        }
    }

    fn expect_ident(&mut self) -> EngineResult<String> {
        match self.next()? {
            Token::Ident(s) => Ok(s),
            _ => Err(parse_error("expected identifier")),
        }
    }

    fn parse_condition(mut self) -> EngineResult<Expr> {
        let expr = self.parse_or()?;
        if self.pos != self.tokens.len() {
            return Err(parse_error("trailing tokens after condition"));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> EngineResult<Expr> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::OrOr) {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> EngineResult<Expr> {
        let mut left = self.parse_unary()?;
        while self.peek() == Some(&Token::AndAnd) {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> EngineResult<Expr> {
        if self.peek() == Some(&Token::Bang) {
            self.pos += 1;
            let inner = self.parse_unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> EngineResult<Expr> {
        match self.next()? {
            Token::LParen => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(expr)
            }
            Token::Str(s) => self.parse_comparison(Value::Literal(s)),
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(true)),
                "false" => Ok(Expr::Literal(false)),
                "subject" => self.parse_handler_chain(HandlerRef::Subject),
                "resource" => self.parse_handler_chain(HandlerRef::Resource),
                "match" => self.parse_matcher(),
                other => Err(unknown_identifier(other)),
            },
            _ => Err(parse_error("expected expression")),
        }
    }

    fn parse_comparison(&mut self, left: Value) -> EngineResult<Expr> {
        let op = match self.next()? {
            Token::EqEq => CompareOp::Eq,
            Token::NotEq => CompareOp::Ne,
            _ => return Err(parse_error("expected '==' or '!='")),
        };
        let right = self.parse_value()?;
        Ok(Expr::Compare { left, op, right })
    }

    fn parse_handler_chain(&mut self, handler: HandlerRef) -> EngineResult<Expr> {
        self.expect(Token::Dot, "'.'")?;
        let method = self.expect_ident()?;
        match method.as_str() {
            "has" => {
                self.expect(Token::LParen, "'('")?;
                let criteria = self.parse_criteria()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::Has { handler, criteria })
            }
            "and" => {
                self.expect(Token::LParen, "'('")?;
                let other = self.parse_handler_ref()?;
                self.expect(Token::RParen, "')'")?;
                self.expect(Token::Dot, "'.'")?;
                let chained = self.expect_ident()?;
                if chained != "haveSame" {
                    return Err(unknown_identifier(&chained));
                }
                self.expect(Token::LParen, "'('")?;
                let issuer = self.expect_string()?;
                self.expect(Token::Comma, "','")?;
                let attr_name = self.expect_string()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::HaveSame {
                    left: handler,
                    right: other,
                    attribute_type: AttributeType::new(issuer, attr_name),
                })
            }
            "uriVariable" => {
                if handler != HandlerRef::Resource {
                    return Err(parse_error("only 'resource' has uriVariable"));
                }
                self.expect(Token::LParen, "'('")?;
                let variable = self.expect_string()?;
                self.expect(Token::RParen, "')'")?;
                self.parse_comparison(Value::UriVariable(variable))
            }
            "valuesOf" => Err(parse_error(
                "valuesOf is only valid inside match.any or match.single",
            )),
            other => Err(unknown_identifier(other)),
        }
    }

    fn parse_matcher(&mut self) -> EngineResult<Expr> {
        self.expect(Token::Dot, "'.'")?;
        let method = self.expect_ident()?;
        match method.as_str() {
            "any" => {
                self.expect(Token::LParen, "'('")?;
                let source = self.parse_list_value()?;
                self.expect(Token::Comma, "','")?;
                let target = self.parse_list_value()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::MatchAny { source, target })
            }
            "single" => {
                self.expect(Token::LParen, "'('")?;
                let values = self.parse_list_value()?;
                self.expect(Token::Comma, "','")?;
                let constant = self.parse_value()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Expr::MatchSingle { values, constant })
            }
            other => Err(unknown_identifier(other)),
        }
    }

    fn parse_handler_ref(&mut self) -> EngineResult<HandlerRef> {
        match self.expect_ident()?.as_str() {
            "subject" => Ok(HandlerRef::Subject),
            "resource" => Ok(HandlerRef::Resource),
            other => Err(unknown_identifier(other)),
        }
    }

    fn parse_list_value(&mut self) -> EngineResult<ListValue> {
        let handler = self.parse_handler_ref()?;
        self.expect(Token::Dot, "'.'")?;
        let method = self.expect_ident()?;
        if method != "valuesOf" {
            return Err(unknown_identifier(&method));
        }
        self.expect(Token::LParen, "'('")?;
        let issuer = self.expect_string()?;
        self.expect(Token::Comma, "','")?;
        let name = self.expect_string()?;
        self.expect(Token::RParen, "')'")?;
        Ok(ListValue {
            handler,
            attribute_type: AttributeType::new(issuer, name),
        })
    }

    fn parse_value(&mut self) -> EngineResult<Value> {
        match self.next()? {
            Token::Str(s) => Ok(Value::Literal(s)),
            Token::Ident(name) if name == "resource" => {
                self.expect(Token::Dot, "'.'")?;
                let method = self.expect_ident()?;
                if method != "uriVariable" {
                    return Err(unknown_identifier(&method));
                }
                self.expect(Token::LParen, "'('")?;
                let variable = self.expect_string()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Value::UriVariable(variable))
            }
            _ => Err(parse_error(
                "expected string literal or resource.uriVariable",
            )),
        }
    }

    fn parse_criteria(&mut self) -> EngineResult<Criteria> {
        match self.expect_ident()?.as_str() {
            "type" => Ok(Criteria::Type(self.parse_type_literal()?)),
            "attribute" => Ok(Criteria::Exact(self.parse_attribute_literal()?)),
            "scoped" => {
                self.expect(Token::LParen, "'('")?;
                let keyword = self.expect_ident()?;
                if keyword != "attribute" {
                    return Err(parse_error("expected attribute(...) in scoped criteria"));
                }
                let base = self.parse_attribute_literal()?;
                self.expect(Token::Comma, "','")?;
                let keyword = self.expect_ident()?;
                if keyword != "type" {
                    return Err(parse_error("expected type(...) in scoped criteria"));
                }
                let scope_type = self.parse_type_literal()?;
                self.expect(Token::RParen, "')'")?;
                Ok(Criteria::Scoped { base, scope_type })
            }
            other => Err(unknown_identifier(other)),
        }
    }

    /// `( str , str )` following the `type` keyword.
    fn parse_type_literal(&mut self) -> EngineResult<AttributeType> {
        self.expect(Token::LParen, "'('")?;
        let issuer = self.expect_string()?;
        self.expect(Token::Comma, "','")?;
        let name = self.expect_string()?;
        self.expect(Token::RParen, "')'")?;
        Ok(AttributeType::new(issuer, name))
    }

    /// `( str , str , str )` following the `attribute` keyword.
    fn parse_attribute_literal(&mut self) -> EngineResult<Attribute> {
        self.expect(Token::LParen, "'('")?;
        let issuer = self.expect_string()?;
        self.expect(Token::Comma, "','")?;
        let name = self.expect_string()?;
        self.expect(Token::Comma, "','")?;
        let value = self.expect_string()?;
        self.expect(Token::RParen, "')'")?;
        Ok(Attribute::new(issuer, name, value))
    }
}

// ---------------------------------------------------------------------------
// CompiledCondition — immutable, shareable across concurrent executions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CompiledCondition {
    source: String,
    expr: Expr,
}

/// Execution bindings for one matched policy.
pub struct ConditionContext<'a> {
    pub subject: &'a SubjectHandler,
    pub resource: &'a ResourceHandler,
}

impl CompiledCondition {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against the bound handlers. Assertion failures make the
    /// condition false; only unexpected errors surface as `Err`.
    pub fn execute(&self, ctx: &ConditionContext<'_>) -> EngineResult<bool> {
        eval(&self.expr, ctx)
    }
}

/// Compile a condition source string without caching.
pub fn compile(source: &str) -> EngineResult<CompiledCondition> {
    let tokens = lex(source)?;
    if tokens.is_empty() {
        return Err(parse_error("condition is empty"));
    }
    let expr = Parser::new(tokens).parse_condition()?;
    Ok(CompiledCondition {
        source: source.to_string(),
        expr,
    })
}

fn eval(expr: &Expr, ctx: &ConditionContext<'_>) -> EngineResult<bool> {
    match expr {
        Expr::Literal(value) => Ok(*value),
        Expr::Not(inner) => Ok(!eval(inner, ctx)?),
        Expr::And(left, right) => Ok(eval(left, ctx)? && eval(right, ctx)?),
        Expr::Or(left, right) => Ok(eval(left, ctx)? || eval(right, ctx)?),
        Expr::Compare { left, op, right } => {
            let (left, right) = match (eval_value(left, ctx), eval_value(right, ctx)) {
                (Ok(left), Ok(right)) => (left, right),
                // Failed extraction is an assertion failure: condition false.
                _ => return Ok(false),
            };
            Ok(match op {
                CompareOp::Eq => left == right,
                CompareOp::Ne => left != right,
            })
        }
        Expr::Has { handler, criteria } => {
            let this = resolve_handler(*handler, ctx);
            let other = resolve_handler(handler.opposite(), ctx);
            let outcome = match criteria {
                Criteria::Type(attribute_type) => this.assert_has_type(attribute_type),
                Criteria::Exact(attribute) => this.assert_has(attribute),
                Criteria::Scoped { base, scope_type } => {
                    this.assert_has_scoped(base, scope_type, other)
                }
            };
            Ok(outcome.is_ok())
        }
        Expr::HaveSame {
            left,
            right,
            attribute_type,
        } => {
            let left = resolve_handler(*left, ctx);
            let right = resolve_handler(*right, ctx);
            Ok(assert_have_same(left, right, attribute_type).is_ok())
        }
        Expr::MatchAny { source, target } => {
            let source = eval_list(source, ctx);
            let target = eval_list(target, ctx);
            Ok(match_any(&source, &target))
        }
        Expr::MatchSingle { values, constant } => {
            let values = eval_list(values, ctx);
            match eval_value(constant, ctx) {
                Ok(constant) => Ok(match_single(&values, &constant)),
                Err(_) => Ok(false),
            }
        }
    }
}

impl HandlerRef {
    fn opposite(self) -> Self {
        match self {
            HandlerRef::Subject => HandlerRef::Resource,
            HandlerRef::Resource => HandlerRef::Subject,
        }
    }
}

fn resolve_handler<'c>(
    handler: HandlerRef,
    ctx: &'c ConditionContext<'_>,
) -> &'c dyn AttributeHandler {
    match handler {
        HandlerRef::Subject => ctx.subject,
        HandlerRef::Resource => ctx.resource,
    }
}

fn eval_value(
    value: &Value,
    ctx: &ConditionContext<'_>,
) -> Result<String, crate::error::AssertionFailure> {
    match value {
        Value::Literal(s) => Ok(s.clone()),
        Value::UriVariable(name) => ctx.resource.uri_variable(name),
    }
}

fn eval_list(list: &ListValue, ctx: &ConditionContext<'_>) -> Vec<String> {
    resolve_handler(list.handler, ctx).values_of(&list.attribute_type)
}

// ---------------------------------------------------------------------------
// ConditionCompiler — memoizes compiled conditions by source text
//
// Compilation is comparatively expensive; the compiled AST is immutable
// and safely reusable read-only across concurrent executions.
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ConditionCompiler {
    compiled: Mutex<HashMap<String, Arc<CompiledCondition>>>,
}

impl ConditionCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&self, source: &str) -> EngineResult<Arc<CompiledCondition>> {
        if let Some(condition) = self
            .compiled
            .lock()
            .expect("condition cache lock poisoned")
            .get(source)
        {
            return Ok(Arc::clone(condition));
        }

        let condition = Arc::new(compile(source)?);
        self.compiled
            .lock()
            .expect("condition cache lock poisoned")
            .insert(source.to_string(), Arc::clone(&condition));
        Ok(condition)
    }
}
