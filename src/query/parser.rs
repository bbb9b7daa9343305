//! Lexer and recursive-descent parser for executable documents.

use super::ast::{
    Argument, Directive, Document, Field, Fragment, FragmentSpread, InlineFragment, Name,
    Operation, OperationType, Selection, TypeRef, Value, VariableDefinition,
};
use crate::error::{Location, QueryError, Result};
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Punct(char),
    Spread,
    Name(String),
    Int(String),
    Float(String),
    Str(String),
    Eof,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Punct(c) => write!(f, "{:?}", c.to_string()),
            Token::Spread => f.write_str("\"...\""),
            Token::Name(n) => write!(f, "Name {:?}", n),
            Token::Int(i) => write!(f, "Int {:?}", i),
            Token::Float(x) => write!(f, "Float {:?}", x),
            Token::Str(s) => write!(f, "String {:?}", s),
            Token::Eof => f.write_str("<EOF>"),
        }
    }
}

fn syntax_error(message: impl fmt::Display, loc: Location) -> QueryError {
    QueryError::new(format!("syntax error: {}", message)).at(loc)
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn location(&self) -> Location {
        Location {
            line: self.line,
            column: self.column,
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_ignored(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\n' | '\r' | ',' | '\u{feff}' => {
                    self.bump();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                _ => break,
            }
        }
    }

    fn next_token(&mut self) -> Result<(Token, Location)> {
        self.skip_ignored();
        let loc = self.location();
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok((Token::Eof, loc)),
        };

        let token = match c {
            '!' | '$' | '(' | ')' | ':' | '=' | '@' | '[' | ']' | '{' | '|' | '}' | '&' => {
                self.bump();
                Token::Punct(c)
            }
            '.' => {
                if !self.starts_with("...") {
                    return Err(syntax_error("unexpected \".\", expecting \"...\"", loc));
                }
                for _ in 0..3 {
                    self.bump();
                }
                Token::Spread
            }
            '"' => self.lex_string(loc)?,
            '-' | '0'..='9' => self.lex_number(loc)?,
            c if c == '_' || c.is_ascii_alphabetic() => {
                let start = self.pos;
                while let Some(c) = self.peek() {
                    if c == '_' || c.is_ascii_alphanumeric() {
                        self.bump();
                    } else {
                        break;
                    }
                }
                Token::Name(self.src[start..self.pos].to_string())
            }
            other => {
                return Err(syntax_error(
                    format!("unexpected character {:?}", other.to_string()),
                    loc,
                ))
            }
        };
        Ok((token, loc))
    }

    fn lex_number(&mut self, loc: Location) -> Result<Token> {
        let start = self.pos;
        let mut float = false;
        if self.peek() == Some('-') {
            self.bump();
        }
        self.digits(loc)?;
        if self.peek() == Some('.') {
            float = true;
            self.bump();
            self.digits(loc)?;
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            float = true;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            self.digits(loc)?;
        }
        let text = self.src[start..self.pos].to_string();
        Ok(if float { Token::Float(text) } else { Token::Int(text) })
    }

    fn digits(&mut self, loc: Location) -> Result<()> {
        let start = self.pos;
        while matches!(self.peek(), Some('0'..='9')) {
            self.bump();
        }
        if self.pos == start {
            return Err(syntax_error("invalid number, expecting digit", loc));
        }
        Ok(())
    }

    fn lex_string(&mut self, loc: Location) -> Result<Token> {
        if self.starts_with("\"\"\"") {
            return self.lex_block_string(loc);
        }
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => return Err(syntax_error("unterminated string", loc)),
                Some('"') => return Ok(Token::Str(out)),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('b') => '\u{8}',
                        Some('f') => '\u{c}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('u') => self.lex_unicode(loc)?,
                        Some(other) => {
                            return Err(syntax_error(
                                format!("invalid escape sequence \\{}", other),
                                loc,
                            ))
                        }
                        None => return Err(syntax_error("unterminated string", loc)),
                    };
                    out.push(escaped);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn lex_unicode(&mut self, loc: Location) -> Result<char> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| syntax_error("invalid unicode escape sequence", loc))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| syntax_error("invalid unicode escape sequence", loc))
    }

    fn lex_block_string(&mut self, loc: Location) -> Result<Token> {
        for _ in 0..3 {
            self.bump();
        }
        let mut raw = String::new();
        loop {
            if self.starts_with("\\\"\"\"") {
                for _ in 0..4 {
                    self.bump();
                }
                raw.push_str("\"\"\"");
                continue;
            }
            if self.starts_with("\"\"\"") {
                for _ in 0..3 {
                    self.bump();
                }
                return Ok(Token::Str(block_string_value(&raw)));
            }
            match self.bump() {
                Some(c) => raw.push(c),
                None => return Err(syntax_error("unterminated block string", loc)),
            }
        }
    }
}

/// Strip the common indentation and surrounding blank lines of a block string.
fn block_string_value(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let indent = lines
        .iter()
        .skip(1)
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out: Vec<&str> = lines
        .iter()
        .enumerate()
        .map(|(i, l)| match l.get(indent..) {
            Some(rest) if i > 0 => rest,
            _ => l.trim_start_matches(&[' ', '\t'][..]),
        })
        .collect();
    while out.first().is_some_and(|l| l.trim().is_empty()) {
        out.remove(0);
    }
    while out.last().is_some_and(|l| l.trim().is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Deepest allowed nesting of selection sets, list and object values and
/// list types.
pub(crate) const MAX_NESTING: usize = 256;

struct Parser<'a> {
    lexer: Lexer<'a>,
    token: Token,
    loc: Location,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Result<Self> {
        let mut lexer = Lexer::new(src);
        let (token, loc) = lexer.next_token()?;
        Ok(Self {
            lexer,
            token,
            loc,
            depth: 0,
        })
    }

    /// Run `f` one nesting level deeper.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= MAX_NESTING {
            return Err(syntax_error(
                format!("query nested too deeply (limit {})", MAX_NESTING),
                self.loc,
            ));
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn advance(&mut self) -> Result<Token> {
        let (token, loc) = self.lexer.next_token()?;
        self.loc = loc;
        Ok(std::mem::replace(&mut self.token, token))
    }

    fn unexpected(&self, expecting: &str) -> QueryError {
        syntax_error(format!("unexpected {}, expecting {}", self.token, expecting), self.loc)
    }

    fn peek_punct(&self, c: char) -> bool {
        self.token == Token::Punct(c)
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(&self.token, Token::Name(n) if n == keyword)
    }

    fn skip_punct(&mut self, c: char) -> Result<bool> {
        if self.peek_punct(c) {
            self.advance()?;
            return Ok(true);
        }
        Ok(false)
    }

    fn expect_punct(&mut self, c: char) -> Result<()> {
        if !self.skip_punct(c)? {
            return Err(self.unexpected(&format!("{:?}", c.to_string())));
        }
        Ok(())
    }

    fn expect_name(&mut self) -> Result<Name> {
        let loc = self.loc;
        if !matches!(self.token, Token::Name(_)) {
            return Err(self.unexpected("Name"));
        }
        match self.advance()? {
            Token::Name(name) => Ok(Name { name, loc }),
            other => Err(syntax_error(format!("unexpected {}, expecting Name", other), loc)),
        }
    }

    fn parse_document(&mut self) -> Result<Document> {
        let mut doc = Document::default();
        loop {
            if self.token == Token::Eof {
                if doc.operations.is_empty() && doc.fragments.is_empty() {
                    return Err(self.unexpected("\"{\""));
                }
                return Ok(doc);
            }
            if self.peek_punct('{') {
                let loc = self.loc;
                let selections = self.parse_selection_set()?;
                doc.operations.push(Operation {
                    ty: OperationType::Query,
                    name: None,
                    vars: Vec::new(),
                    directives: Vec::new(),
                    selections,
                    loc,
                });
                continue;
            }
            let keyword = self.expect_name()?;
            match keyword.name.as_str() {
                "query" => doc.operations.push(self.parse_operation(OperationType::Query, keyword.loc)?),
                "mutation" => doc.operations.push(self.parse_operation(OperationType::Mutation, keyword.loc)?),
                "subscription" => {
                    doc.operations.push(self.parse_operation(OperationType::Subscription, keyword.loc)?)
                }
                "fragment" => doc.fragments.push(self.parse_fragment(keyword.loc)?),
                other => {
                    return Err(syntax_error(
                        format!("unexpected {:?}, expecting \"fragment\"", other),
                        keyword.loc,
                    ))
                }
            }
        }
    }

    fn parse_operation(&mut self, ty: OperationType, loc: Location) -> Result<Operation> {
        let name = match self.token {
            Token::Name(_) => Some(self.expect_name()?),
            _ => None,
        };
        let mut vars = Vec::new();
        if self.skip_punct('(')? {
            while !self.skip_punct(')')? {
                vars.push(self.parse_variable_definition()?);
            }
        }
        let directives = self.parse_directives()?;
        let selections = self.parse_selection_set()?;
        Ok(Operation {
            ty,
            name,
            vars,
            directives,
            selections,
            loc,
        })
    }

    fn parse_variable_definition(&mut self) -> Result<VariableDefinition> {
        let loc = self.loc;
        self.expect_punct('$')?;
        let name = self.expect_name()?;
        self.expect_punct(':')?;
        let ty = self.parse_type()?;
        let default = if self.skip_punct('=')? {
            Some(self.parse_value(true)?)
        } else {
            None
        };
        // Directives on variable definitions are accepted and ignored.
        self.parse_directives()?;
        Ok(VariableDefinition {
            name,
            ty,
            default,
            loc,
        })
    }

    fn parse_fragment(&mut self, loc: Location) -> Result<Fragment> {
        let name = self.expect_name()?;
        if name.name == "on" {
            return Err(syntax_error("unexpected \"on\", expecting fragment name", name.loc));
        }
        if !self.peek_keyword("on") {
            return Err(self.unexpected("\"on\""));
        }
        self.advance()?;
        let on = self.expect_name()?;
        let directives = self.parse_directives()?;
        let selections = self.parse_selection_set()?;
        Ok(Fragment {
            name,
            on,
            directives,
            selections,
            loc,
        })
    }

    fn parse_selection_set(&mut self) -> Result<Vec<Selection>> {
        self.nested(|p| {
            p.expect_punct('{')?;
            let mut selections = Vec::new();
            loop {
                selections.push(p.parse_selection()?);
                if p.skip_punct('}')? {
                    return Ok(selections);
                }
            }
        })
    }

    fn parse_selection(&mut self) -> Result<Selection> {
        if self.token != Token::Spread {
            return Ok(Selection::Field(self.parse_field()?));
        }
        let loc = self.loc;
        self.advance()?;
        if self.peek_keyword("on") {
            self.advance()?;
            let on = Some(self.expect_name()?);
            let directives = self.parse_directives()?;
            let selections = self.parse_selection_set()?;
            return Ok(Selection::InlineFragment(InlineFragment {
                on,
                directives,
                selections,
                loc,
            }));
        }
        if let Token::Name(_) = self.token {
            let name = self.expect_name()?;
            let directives = self.parse_directives()?;
            return Ok(Selection::FragmentSpread(FragmentSpread {
                name,
                directives,
                loc,
            }));
        }
        let directives = self.parse_directives()?;
        let selections = self.parse_selection_set()?;
        Ok(Selection::InlineFragment(InlineFragment {
            on: None,
            directives,
            selections,
            loc,
        }))
    }

    fn parse_field(&mut self) -> Result<Field> {
        let loc = self.loc;
        let first = self.expect_name()?;
        let (alias, name) = if self.skip_punct(':')? {
            (first, self.expect_name()?)
        } else {
            (first.clone(), first)
        };
        let arguments = self.parse_arguments(false)?;
        let directives = self.parse_directives()?;
        let selections = if self.peek_punct('{') {
            self.parse_selection_set()?
        } else {
            Vec::new()
        };
        Ok(Field {
            alias,
            name,
            arguments,
            directives,
            selections,
            loc,
        })
    }

    fn parse_arguments(&mut self, constant: bool) -> Result<Vec<Argument>> {
        let mut args = Vec::new();
        if self.skip_punct('(')? {
            while !self.skip_punct(')')? {
                let name = self.expect_name()?;
                self.expect_punct(':')?;
                let value = self.parse_value(constant)?;
                args.push(Argument { name, value });
            }
        }
        Ok(args)
    }

    fn parse_directives(&mut self) -> Result<Vec<Directive>> {
        let mut directives = Vec::new();
        while self.skip_punct('@')? {
            let name = self.expect_name()?;
            let arguments = self.parse_arguments(false)?;
            directives.push(Directive { name, arguments });
        }
        Ok(directives)
    }

    fn parse_type(&mut self) -> Result<TypeRef> {
        let ty = if self.skip_punct('[')? {
            let inner = self.nested(|p| p.parse_type())?;
            self.expect_punct(']')?;
            TypeRef::List(Box::new(inner))
        } else {
            TypeRef::Named(self.expect_name()?.name)
        };
        if self.skip_punct('!')? {
            return Ok(TypeRef::NonNull(Box::new(ty)));
        }
        Ok(ty)
    }

    fn parse_value(&mut self, constant: bool) -> Result<Value> {
        let loc = self.loc;
        match self.token.clone() {
            Token::Punct('$') if !constant => {
                self.advance()?;
                Ok(Value::Variable(self.expect_name()?.name))
            }
            Token::Punct('[') => self.nested(|p| {
                p.advance()?;
                let mut items = Vec::new();
                while !p.skip_punct(']')? {
                    items.push(p.parse_value(constant)?);
                }
                Ok(Value::List(items))
            }),
            Token::Punct('{') => self.nested(|p| {
                p.advance()?;
                let mut fields = Vec::new();
                while !p.skip_punct('}')? {
                    let name = p.expect_name()?;
                    p.expect_punct(':')?;
                    fields.push((name.name, p.parse_value(constant)?));
                }
                Ok(Value::Object(fields))
            }),
            Token::Int(text) => {
                self.advance()?;
                text.parse()
                    .map(Value::Int)
                    .map_err(|_| syntax_error(format!("invalid Int {:?}", text), loc))
            }
            Token::Float(text) => {
                self.advance()?;
                text.parse()
                    .map(Value::Float)
                    .map_err(|_| syntax_error(format!("invalid Float {:?}", text), loc))
            }
            Token::Str(s) => {
                self.advance()?;
                Ok(Value::String(s))
            }
            Token::Name(name) => {
                self.advance()?;
                Ok(match name.as_str() {
                    "true" => Value::Boolean(true),
                    "false" => Value::Boolean(false),
                    "null" => Value::Null,
                    _ => Value::Enum(name),
                })
            }
            _ => Err(self.unexpected("Value")),
        }
    }
}

/// Parse an executable document.
pub fn parse(text: &str) -> Result<Document> {
    Parser::new(text)?.parse_document()
}

/// Parse a type reference such as `[String!]!`.
pub fn parse_type(text: &str) -> Result<TypeRef> {
    let mut parser = Parser::new(text)?;
    let ty = parser.parse_type()?;
    if parser.token != Token::Eof {
        return Err(parser.unexpected("<EOF>"));
    }
    Ok(ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(sel: &Selection) -> &Field {
        match sel {
            Selection::Field(f) => f,
            other => panic!("expected field, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_subscription() {
        let doc = parse(
            r#"
            # watch greetings
            subscription OnGreeting($name: String = "world", $n: [Int!]!) {
                hello: greeting(name: $name, times: 3, ratio: -1.5e2) @include(if: true) {
                    text
                }
            }
            "#,
        )
        .unwrap();

        assert_eq!(doc.operations.len(), 1);
        let op = &doc.operations[0];
        assert_eq!(op.ty, OperationType::Subscription);
        assert_eq!(op.display_name(), Some("OnGreeting"));
        assert_eq!(op.vars.len(), 2);
        assert_eq!(op.vars[0].default, Some(Value::String("world".into())));
        assert_eq!(op.vars[1].ty.to_string(), "[Int!]!");

        let f = field(&op.selections[0]);
        assert_eq!(f.alias.name, "hello");
        assert_eq!(f.name.name, "greeting");
        assert_eq!(f.arguments[0].value, Value::Variable("name".into()));
        assert_eq!(f.arguments[1].value, Value::Int(3));
        assert_eq!(f.arguments[2].value, Value::Float(-150.0));
        assert_eq!(f.directives[0].name.name, "include");
        assert_eq!(field(&f.selections[0]).name.name, "text");
        assert_eq!(f.loc, Location { line: 4, column: 17 });
    }

    #[test]
    fn test_parse_shorthand_query_and_fragments() {
        let doc = parse(
            "{ ...Parts ... on Query { b } ... @skip(if: false) { c } }
             fragment Parts on Query { a }",
        )
        .unwrap();
        let op = &doc.operations[0];
        assert_eq!(op.ty, OperationType::Query);
        assert!(matches!(&op.selections[0], Selection::FragmentSpread(s) if s.name.name == "Parts"));
        assert!(matches!(&op.selections[1], Selection::InlineFragment(f) if f.on.as_ref().unwrap().name == "Query"));
        assert!(matches!(&op.selections[2], Selection::InlineFragment(f) if f.on.is_none()));
        assert_eq!(doc.fragment("Parts").unwrap().on.name, "Query");
    }

    #[test]
    fn test_parse_values() {
        let doc = parse(r#"{ f(a: [1, "two", ENUM, null], b: {x: false, y: "A\n"}) }"#).unwrap();
        let f = field(&doc.operations[0].selections[0]);
        assert_eq!(
            f.arguments[0].value,
            Value::List(vec![
                Value::Int(1),
                Value::String("two".into()),
                Value::Enum("ENUM".into()),
                Value::Null,
            ])
        );
        assert_eq!(
            f.arguments[1].value,
            Value::Object(vec![
                ("x".into(), Value::Boolean(false)),
                ("y".into(), Value::String("A\n".into())),
            ])
        );
    }

    #[test]
    fn test_parse_block_string() {
        let doc = parse("{ f(s: \"\"\"\n    hello\n      world\n    \"\"\") }").unwrap();
        let f = field(&doc.operations[0].selections[0]);
        assert_eq!(f.arguments[0].value, Value::String("hello\n  world".into()));
    }

    #[test]
    fn test_syntax_error_location() {
        let err = parse("subscription {\n  greeting(\n}").unwrap_err();
        assert_eq!(err.message, "syntax error: unexpected \"}\", expecting Name");
        assert_eq!(err.locations, vec![Location { line: 3, column: 1 }]);
    }

    #[test]
    fn test_empty_document_is_error() {
        let err = parse("  # nothing here\n").unwrap_err();
        assert_eq!(err.message, "syntax error: unexpected <EOF>, expecting \"{\"");
    }

    #[test]
    fn test_variables_not_allowed_in_defaults() {
        let err = parse("query ($a: Int = $b) { f }").unwrap_err();
        assert!(err.message.starts_with("syntax error: unexpected \"$\""), "{}", err.message);
    }

    #[test]
    fn test_unterminated_string() {
        let err = parse("{ f(a: \"abc) }").unwrap_err();
        assert_eq!(err.message, "syntax error: unterminated string");
    }

    #[test]
    fn test_parse_type() {
        assert_eq!(parse_type("[String!]!").unwrap().to_string(), "[String!]!");
        assert_eq!(parse_type("Int").unwrap(), TypeRef::Named("Int".into()));
        assert!(parse_type("[Int").is_err());
        assert!(parse_type("Int Int").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep_list = format!("subscription {{ greeting(x: {}) }}", "[".repeat(5000));
        let err = parse(&deep_list).unwrap_err();
        assert!(err.message.contains("nested too deeply"), "{}", err.message);

        let deep_selection = format!("subscription {}{}", "{ a ".repeat(5000), "}".repeat(5000));
        let err = parse(&deep_selection).unwrap_err();
        assert!(err.message.contains("nested too deeply"), "{}", err.message);

        let deep_object = format!("subscription {{ a(x: {}) }}", "{y: ".repeat(5000));
        assert!(parse(&deep_object).unwrap_err().message.contains("nested too deeply"));

        assert!(parse_type(&format!("{}Int{}", "[".repeat(5000), "]".repeat(5000))).is_err());

        let ok = format!("subscription {}{}", "{ a ".repeat(MAX_NESTING), "}".repeat(MAX_NESTING));
        assert!(parse(&ok).is_ok());
        let over = format!("subscription {}{}", "{ a ".repeat(MAX_NESTING + 1), "}".repeat(MAX_NESTING + 1));
        assert!(parse(&over).is_err());
    }
}
