//! The recursive-descent parser.
//!
//! Statements are classified at their first token: declaration keywords
//! dispatch directly, and anything else is decided by an explicit predicate
//! over the first two tokens (using the blank-after flags) as either an
//! expression statement or a shell command. The parser owns the lexer and
//! requests tokens in whichever lexicon the current construct needs,
//! rewinding the lexer when a tentative classification is abandoned.

use std::rc::Rc;

use crate::ast::{
    AndOrOp, AssignOp, BinaryOp, Block, CaseClause, CatchClause, ClassDecl, ClassMember, Cmd,
    CmdPiece, Expr, ExprKind, FuncDecl, IfaceDecl, IoRedirect, Literal, Param, Program, RedirKind,
    SimpleCmd, Stmt, StmtKind, UnaryOp,
};
use crate::error::{unexpected, ParseDiagnostic, ParseError};
use crate::lexer::Lexer;
use crate::token::{SourcePosition, Token, TokenKind, TokenValue};

/// Parses a source text into a program.
pub fn parse(source: &str) -> Result<Program, ParseError> {
    Parser::new(source).parse_program()
}

/// The parser state.
pub struct Parser {
    lexer: Lexer,
    /// Current (unconsumed) token, pulled with the expression lexicon.
    tok: Token,
    /// Lexer state just before `tok` was pulled; used to re-lex the current
    /// token in the command lexicon.
    before_tok: crate::lexer::LexerCheckpoint,
    diagnostics: Vec<ParseDiagnostic>,
    /// Blank-after flag of the `)` closing the most recent command
    /// substitution.
    last_rparen_blank: bool,
}

impl Parser {
    /// Returns a new parser over the given source text.
    pub fn new(source: &str) -> Self {
        let mut lexer = Lexer::new(source);
        let before_tok = lexer.checkpoint();
        let tok = lexer.next_token();
        Self {
            lexer,
            tok,
            before_tok,
            diagnostics: vec![],
            last_rparen_blank: false,
        }
    }

    /// Parses the whole input. All recorded diagnostics are reported
    /// together; parsing continues past errors to maximize messages per run.
    pub fn parse_program(mut self) -> Result<Program, ParseError> {
        let mut body = vec![];

        loop {
            self.skip_separators();
            if self.at(TokenKind::Eof) {
                break;
            }

            match self.parse_statement() {
                Some(stmt) => body.push(stmt),
                None => self.synchronize(),
            }
        }

        if let Some(lex_error) = self.lexer.errors().first() {
            return Err(ParseError::Lex(lex_error.clone()));
        }

        if self.diagnostics.is_empty() {
            Ok(Program { body })
        } else {
            tracing::debug!(target: "parse", "{} syntax error(s)", self.diagnostics.len());
            Err(ParseError::Syntax(self.diagnostics))
        }
    }

    //
    // Token plumbing.
    //

    fn advance(&mut self) {
        self.before_tok = self.lexer.checkpoint();
        self.tok = self.lexer.next_token();
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.tok.kind == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Option<Token> {
        if self.at(kind) {
            let tok = self.tok.clone();
            self.advance();
            Some(tok)
        } else {
            self.error_here(kind.describe());
            None
        }
    }

    fn error_here(&mut self, expected: &str) {
        self.diagnostics.push(unexpected(&self.tok, expected));
    }

    fn error_at(&mut self, pos: SourcePosition, message: impl Into<String>) {
        self.diagnostics.push(ParseDiagnostic {
            message: message.into(),
            pos,
            at_end_of_input: false,
        });
    }

    fn pos(&self) -> SourcePosition {
        self.tok.pos
    }

    /// Skips statement separators (newlines and semicolons).
    fn skip_separators(&mut self) {
        while self.at(TokenKind::NewLine) || self.at(TokenKind::Semicolon) {
            self.advance();
        }
    }

    /// Skips newlines; used inside bracketed constructs where line breaks
    /// are insignificant.
    fn skip_newlines(&mut self) {
        while self.at(TokenKind::NewLine) {
            self.advance();
        }
    }

    /// Skips to the next statement boundary after an error.
    fn synchronize(&mut self) {
        loop {
            match self.tok.kind {
                TokenKind::NewLine | TokenKind::Semicolon => {
                    self.advance();
                    return;
                }
                TokenKind::RBrace | TokenKind::Eof => return,
                _ => self.advance(),
            }
        }
    }

    //
    // Statement dispatch.
    //

    fn parse_statement(&mut self) -> Option<Stmt> {
        let pos = self.pos();

        match self.tok.kind {
            TokenKind::KwFunc => self.parse_func_decl_statement(),
            TokenKind::KwClass => self.parse_class_decl(),
            TokenKind::KwInterface => self.parse_iface_decl(),
            TokenKind::KwCmd => self.parse_cmd_decl(),
            TokenKind::KwAlias => self.parse_alias_decl(),
            TokenKind::KwImport => self.parse_import(),
            TokenKind::KwIf => self.parse_if(),
            TokenKind::KwWhile => self.parse_while(),
            TokenKind::KwFor => self.parse_for_in(),
            TokenKind::KwSwitch => self.parse_switch(),
            TokenKind::KwTry => self.parse_try(),
            TokenKind::KwThrow => {
                self.advance();
                let expr = self.parse_expression()?;
                Some(Stmt {
                    kind: StmtKind::Throw(expr),
                    pos,
                })
            }
            TokenKind::KwDefer => {
                self.advance();
                let inner = self.parse_statement()?;
                Some(Stmt {
                    kind: StmtKind::Defer(Box::new(inner)),
                    pos,
                })
            }
            TokenKind::KwReturn => self.parse_return(),
            TokenKind::KwBreak => {
                self.advance();
                Some(Stmt {
                    kind: StmtKind::Break,
                    pos,
                })
            }
            TokenKind::KwContinue => {
                self.advance();
                Some(Stmt {
                    kind: StmtKind::Continue,
                    pos,
                })
            }
            TokenKind::KwDel => {
                self.advance();
                let exprs = self.parse_expression_list()?;
                Some(Stmt {
                    kind: StmtKind::Del(exprs),
                    pos,
                })
            }
            TokenKind::KwVarenv => self.parse_varenv(),
            TokenKind::KwGlobal => {
                self.advance();
                self.parse_assignment_or_expression(true)
            }
            TokenKind::LBrace => {
                let block = self.parse_block()?;
                Some(Stmt {
                    kind: StmtKind::Block(block),
                    pos,
                })
            }
            // A statement opening with a path fragment is a file-path
            // command (`./build.sh`, `/bin/ls`, `../tool`).
            TokenKind::Slash | TokenKind::Dot | TokenKind::DotDot => {
                self.parse_command_statement(None)
            }
            TokenKind::Identifier => {
                if self.looks_like_command() {
                    let first = self.tok.clone();
                    // Continue lexing after the name in command-word mode.
                    self.parse_command_statement(Some(first))
                } else {
                    self.parse_assignment_or_expression(false)
                }
            }
            _ => self.parse_assignment_or_expression(false),
        }
    }

    /// The command-vs-expression predicate for statements that open with an
    /// identifier. Inspects only the following token.
    fn looks_like_command(&mut self) -> bool {
        let after_first = self.lexer.checkpoint();
        let second = self.lexer.next_token();
        self.lexer.rewind(after_first);

        let first_blank = self.tok.blank_after;

        match second.kind {
            // Unambiguously an expression or assignment.
            TokenKind::Assign
            | TokenKind::PlusAssign
            | TokenKind::MinusAssign
            | TokenKind::StarAssign
            | TokenKind::SlashAssign
            | TokenKind::PercentAssign
            | TokenKind::AndAssign
            | TokenKind::OrAssign
            | TokenKind::XorAssign
            | TokenKind::LParen
            | TokenKind::Dot
            | TokenKind::Comma
            | TokenKind::Question
            | TokenKind::DotDot => false,

            // Shell operators at statement level only make sense after a
            // command name (`ls | wc`, `make && ./run`, `sleep 9 &`).
            TokenKind::BitOr
            | TokenKind::PipeAnd
            | TokenKind::AndAnd
            | TokenKind::OrOr
            | TokenKind::BitAnd
            | TokenKind::Greater
            | TokenKind::Shr
            | TokenKind::Less
            | TokenKind::AmpGreater
            | TokenKind::HereString => true,

            // A bare name is a command invocation.
            TokenKind::NewLine | TokenKind::Semicolon | TokenKind::Eof | TokenKind::RBrace => true,

            // Indexing binds without a blank; a blank means a glob word.
            TokenKind::LBracket => first_blank,

            // `x - 1` is arithmetic, `ls -la` is a flag: the operator's own
            // blank-after flag separates them.
            TokenKind::Plus
            | TokenKind::Minus
            | TokenKind::Star
            | TokenKind::Slash
            | TokenKind::Percent
            | TokenKind::StarStar
            | TokenKind::Equal
            | TokenKind::NotEqual
            | TokenKind::LessEqual
            | TokenKind::GreaterEqual
            | TokenKind::Shl
            | TokenKind::BitXor
            | TokenKind::BitNot
            | TokenKind::Not => !second.blank_after,

            // A second word after a blank reads as a command argument.
            TokenKind::Identifier
            | TokenKind::IntLiteral
            | TokenKind::RealLiteral
            | TokenKind::StringLiteral
            | TokenKind::Variable
            | TokenKind::DollarParen
            | TokenKind::DollarBrace => first_blank,

            _ => false,
        }
    }

    //
    // Simple statements.
    //

    fn parse_assignment_or_expression(&mut self, global: bool) -> Option<Stmt> {
        let pos = self.pos();
        let first = self.parse_expression()?;

        let mut targets = vec![first];
        while self.eat(TokenKind::Comma) {
            self.skip_newlines();
            targets.push(self.parse_expression()?);
        }

        let op = match self.tok.kind {
            TokenKind::Assign => Some(AssignOp::Assign),
            TokenKind::PlusAssign => Some(AssignOp::Add),
            TokenKind::MinusAssign => Some(AssignOp::Sub),
            TokenKind::StarAssign => Some(AssignOp::Mul),
            TokenKind::SlashAssign => Some(AssignOp::Div),
            TokenKind::PercentAssign => Some(AssignOp::Mod),
            TokenKind::AndAssign => Some(AssignOp::BitAnd),
            TokenKind::OrAssign => Some(AssignOp::BitOr),
            TokenKind::XorAssign => Some(AssignOp::BitXor),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            self.skip_newlines();
            let values = self.parse_expression_list()?;
            return Some(Stmt {
                kind: StmtKind::Assignment {
                    targets,
                    op,
                    values,
                    global,
                },
                pos,
            });
        }

        if global {
            self.error_at(pos, "'global' requires an assignment");
            return None;
        }

        if targets.len() > 1 {
            self.error_here("'=' after expression list");
            return None;
        }

        let expr = targets.into_iter().next()?;
        Some(Stmt {
            kind: StmtKind::Expression(expr),
            pos,
        })
    }

    fn parse_expression_list(&mut self) -> Option<Vec<Expr>> {
        let mut exprs = vec![self.parse_expression()?];
        while self.eat(TokenKind::Comma) {
            self.skip_newlines();
            exprs.push(self.parse_expression()?);
        }
        Some(exprs)
    }

    fn parse_return(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let exprs = if matches!(
            self.tok.kind,
            TokenKind::NewLine | TokenKind::Semicolon | TokenKind::RBrace | TokenKind::Eof
        ) {
            vec![]
        } else {
            self.parse_expression_list()?
        };

        Some(Stmt {
            kind: StmtKind::Return(exprs),
            pos,
        })
    }

    fn parse_varenv(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let name_tok = self.expect(TokenKind::Identifier)?;
        let name = name_tok.text().to_string();
        self.expect(TokenKind::Assign)?;
        let value = self.parse_expression()?;

        Some(Stmt {
            kind: StmtKind::Varenv { name, value },
            pos,
        })
    }

    fn parse_import(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let path_tok = self.expect(TokenKind::StringLiteral)?;
        let path = path_tok.text().to_string();
        self.expect(TokenKind::KwAs)?;
        let alias_tok = self.expect(TokenKind::Identifier)?;
        let alias = alias_tok.text().to_string();

        Some(Stmt {
            kind: StmtKind::Import { path, alias },
            pos,
        })
    }

    //
    // Blocks and compound statements.
    //

    fn parse_block(&mut self) -> Option<Block> {
        let pos = self.pos();
        self.expect(TokenKind::LBrace)?;

        let mut body = vec![];
        loop {
            self.skip_separators();
            if self.at(TokenKind::RBrace) {
                self.advance();
                break;
            }
            if self.at(TokenKind::Eof) {
                self.error_here("'}'");
                return None;
            }

            match self.parse_statement() {
                Some(stmt) => body.push(stmt),
                None => self.synchronize(),
            }
        }

        Some(Block { body, pos })
    }

    fn parse_if(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let cond = self.parse_expression()?;
        let then_block = self.parse_block()?;

        let else_branch = if self.eat(TokenKind::KwElse) {
            if self.at(TokenKind::KwIf) {
                Some(Box::new(self.parse_if()?))
            } else {
                let block_pos = self.pos();
                let block = self.parse_block()?;
                Some(Box::new(Stmt {
                    kind: StmtKind::Block(block),
                    pos: block_pos,
                }))
            }
        } else {
            None
        };

        Some(Stmt {
            kind: StmtKind::If {
                cond,
                then_block,
                else_branch,
            },
            pos,
        })
    }

    fn parse_while(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let cond = self.parse_expression()?;
        let body = self.parse_block()?;

        Some(Stmt {
            kind: StmtKind::While { cond, body },
            pos,
        })
    }

    fn parse_for_in(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let targets = self.parse_expression_list()?;
        self.expect(TokenKind::KwIn)?;
        let iterables = self.parse_expression_list()?;
        let body = self.parse_block()?;

        Some(Stmt {
            kind: StmtKind::ForIn {
                targets,
                iterables,
                body,
            },
            pos,
        })
    }

    fn parse_switch(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let subject = if self.at(TokenKind::LBrace) {
            None
        } else {
            Some(self.parse_expression()?)
        };

        self.expect(TokenKind::LBrace)?;

        let mut cases = vec![];
        let mut default = None;

        loop {
            self.skip_separators();
            match self.tok.kind {
                TokenKind::KwCase => {
                    let case_pos = self.pos();
                    self.advance();
                    let exprs = self.parse_expression_list()?;
                    let body = self.parse_block()?;
                    cases.push(CaseClause {
                        exprs,
                        body,
                        pos: case_pos,
                    });
                }
                TokenKind::KwDefault => {
                    self.advance();
                    let body = self.parse_block()?;
                    if default.replace(body).is_some() {
                        self.error_at(pos, "duplicate 'default' clause in switch");
                    }
                }
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                _ => {
                    self.error_here("'case', 'default', or '}'");
                    return None;
                }
            }
        }

        Some(Stmt {
            kind: StmtKind::Switch {
                subject,
                cases,
                default,
            },
            pos,
        })
    }

    fn parse_try(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let body = self.parse_block()?;

        let mut catches = vec![];
        while self.at(TokenKind::KwCatch) {
            let catch_pos = self.pos();
            self.advance();

            let types = self.parse_expression_list()?;
            let var = if self.eat(TokenKind::KwAs) {
                let name_tok = self.expect(TokenKind::Identifier)?;
                Some(name_tok.text().to_string())
            } else {
                None
            };

            let body = self.parse_block()?;
            catches.push(CatchClause {
                types,
                var,
                body,
                pos: catch_pos,
            });
        }

        let finally = if self.eat(TokenKind::KwFinally) {
            Some(self.parse_block()?)
        } else {
            None
        };

        if catches.is_empty() && finally.is_none() {
            self.error_at(pos, "'try' requires at least one 'catch' or 'finally'");
            return None;
        }

        Some(Stmt {
            kind: StmtKind::Try {
                body,
                catches,
                finally,
            },
            pos,
        })
    }

    //
    // Declarations.
    //

    fn parse_func_decl_statement(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        let decl = self.parse_func_decl(false, true)?;
        Some(Stmt {
            kind: StmtKind::FuncDecl(Rc::new(decl)),
            pos,
        })
    }

    /// Parses a `func` declaration. `is_static` marks class statics;
    /// `require_body` is false only for interface signatures.
    fn parse_func_decl(&mut self, is_static: bool, require_body: bool) -> Option<FuncDecl> {
        let pos = self.pos();
        self.expect(TokenKind::KwFunc)?;

        let name = if self.at(TokenKind::Identifier) {
            let tok = self.tok.clone();
            self.advance();
            tok.text().to_string()
        } else {
            String::new()
        };

        let params = self.parse_params()?;

        let body = if require_body || self.at(TokenKind::LBrace) {
            Some(self.parse_block()?)
        } else {
            None
        };

        Some(FuncDecl {
            name,
            params,
            body,
            is_static,
            pos,
        })
    }

    fn parse_params(&mut self) -> Option<Vec<Param>> {
        self.expect(TokenKind::LParen)?;
        self.skip_newlines();

        let mut params = vec![];
        if !self.at(TokenKind::RParen) {
            loop {
                let param_pos = self.pos();
                let name_tok = self.expect(TokenKind::Identifier)?;
                let name = name_tok.text().to_string();

                let variadic = self.eat(TokenKind::Ellipsis);

                let default = if self.eat(TokenKind::Assign) {
                    Some(self.parse_expression()?)
                } else {
                    None
                };

                params.push(Param {
                    name,
                    default,
                    variadic,
                    pos: param_pos,
                });

                self.skip_newlines();
                if !self.eat(TokenKind::Comma) {
                    break;
                }
                self.skip_newlines();
            }
        }

        self.expect(TokenKind::RParen)?;
        Some(params)
    }

    fn parse_class_decl(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        let decl = self.parse_class_decl_inner()?;
        Some(Stmt {
            kind: StmtKind::ClassDecl(Rc::new(decl)),
            pos,
        })
    }

    fn parse_class_decl_inner(&mut self) -> Option<ClassDecl> {
        let pos = self.pos();
        self.expect(TokenKind::KwClass)?;

        let name_tok = self.expect(TokenKind::Identifier)?;
        let name = name_tok.text().to_string();

        let parents = if self.eat(TokenKind::LParen) {
            self.skip_newlines();
            let mut parents = vec![];
            if !self.at(TokenKind::RParen) {
                parents = self.parse_expression_list()?;
            }
            self.expect(TokenKind::RParen)?;
            parents
        } else {
            vec![]
        };

        self.expect(TokenKind::LBrace)?;

        let mut members = vec![];
        loop {
            self.skip_separators();
            match self.tok.kind {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::Eof => {
                    self.error_here("'}'");
                    return None;
                }
                TokenKind::KwStatic => {
                    self.advance();
                    let method = self.parse_func_decl(true, true)?;
                    members.push(ClassMember::Method(Rc::new(method)));
                }
                TokenKind::KwFunc => {
                    let method = self.parse_func_decl(false, true)?;
                    members.push(ClassMember::Method(Rc::new(method)));
                }
                TokenKind::KwClass => {
                    let nested = self.parse_class_decl_inner()?;
                    members.push(ClassMember::NestedClass(Rc::new(nested)));
                }
                TokenKind::Identifier => {
                    let attr_pos = self.pos();
                    let attr_name = self.tok.text().to_string();
                    self.advance();
                    self.expect(TokenKind::Assign)?;
                    let value = self.parse_expression()?;
                    members.push(ClassMember::Attribute {
                        name: attr_name,
                        value,
                        pos: attr_pos,
                    });
                }
                _ => {
                    self.error_here("class member");
                    return None;
                }
            }
        }

        Some(ClassDecl {
            name,
            parents,
            members,
            pos,
        })
    }

    fn parse_iface_decl(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let name_tok = self.expect(TokenKind::Identifier)?;
        let name = name_tok.text().to_string();

        let parents = if self.eat(TokenKind::LParen) {
            self.skip_newlines();
            let mut parents = vec![];
            if !self.at(TokenKind::RParen) {
                parents = self.parse_expression_list()?;
            }
            self.expect(TokenKind::RParen)?;
            parents
        } else {
            vec![]
        };

        self.expect(TokenKind::LBrace)?;

        let mut methods = vec![];
        loop {
            self.skip_separators();
            match self.tok.kind {
                TokenKind::RBrace => {
                    self.advance();
                    break;
                }
                TokenKind::KwFunc => {
                    let sig = self.parse_func_decl(false, false)?;
                    if sig.body.is_some() {
                        self.error_at(sig.pos, "interface methods cannot have bodies");
                    }
                    methods.push(Rc::new(sig));
                }
                _ => {
                    self.error_here("'func' signature or '}'");
                    return None;
                }
            }
        }

        Some(Stmt {
            kind: StmtKind::IfaceDecl(Rc::new(IfaceDecl {
                name,
                parents,
                methods,
                pos,
            })),
            pos,
        })
    }

    fn parse_cmd_decl(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let name_tok = self.expect(TokenKind::Identifier)?;
        let name = name_tok.text().to_string();
        let body = self.parse_block()?;

        Some(Stmt {
            kind: StmtKind::CmdDecl { name, body },
            pos,
        })
    }

    fn parse_alias_decl(&mut self) -> Option<Stmt> {
        let pos = self.pos();
        self.advance();

        let name_tok = self.expect(TokenKind::Identifier)?;
        let name = name_tok.text().to_string();

        if !self.at(TokenKind::Assign) {
            self.error_here("'='");
            return None;
        }

        // The replacement text is lexed as command words.
        let mut words = vec![];
        loop {
            let tok = self.lexer.next_cmd_token();
            match tok.kind {
                TokenKind::Word | TokenKind::StringLiteral => {
                    words.push(CmdPiece::Literal {
                        text: tok.text().to_string(),
                        blank_after: tok.blank_after,
                        quoted: tok.kind == TokenKind::StringLiteral,
                        pos: tok.pos,
                    });
                }
                TokenKind::NewLine | TokenKind::Semicolon | TokenKind::Eof => {
                    self.tok = tok;
                    break;
                }
                _ => {
                    self.diagnostics.push(unexpected(&tok, "alias word"));
                    self.tok = tok;
                    break;
                }
            }
        }

        if words.is_empty() {
            self.error_at(pos, "alias requires at least one word");
            return None;
        }

        Some(Stmt {
            kind: StmtKind::AliasDecl { name, words },
            pos,
        })
    }

    //
    // Expressions.
    //

    fn parse_expression(&mut self) -> Option<Expr> {
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> Option<Expr> {
        let pos = self.pos();
        let cond = self.parse_range()?;

        if self.eat(TokenKind::Question) {
            self.skip_newlines();
            let then_value = self.parse_expression()?;
            self.expect(TokenKind::Colon)?;
            self.skip_newlines();
            let else_value = self.parse_expression()?;
            return Some(Expr {
                kind: ExprKind::Conditional {
                    cond: Box::new(cond),
                    then_value: Box::new(then_value),
                    else_value: Box::new(else_value),
                },
                pos,
            });
        }

        Some(cond)
    }

    fn parse_range(&mut self) -> Option<Expr> {
        let pos = self.pos();
        let start = self.parse_logical_or()?;

        if self.eat(TokenKind::DotDot) {
            let end = self.parse_logical_or()?;
            return Some(Expr {
                kind: ExprKind::Range {
                    start: Box::new(start),
                    end: Box::new(end),
                },
                pos,
            });
        }

        Some(start)
    }

    fn parse_binary_level<F>(
        &mut self,
        mut next: F,
        table: &[(TokenKind, BinaryOp)],
    ) -> Option<Expr>
    where
        F: FnMut(&mut Self) -> Option<Expr>,
    {
        let pos = self.pos();
        let mut left = next(self)?;

        'outer: loop {
            for (kind, op) in table {
                if self.at(*kind) {
                    self.advance();
                    self.skip_newlines();
                    let right = next(self)?;
                    left = Expr {
                        kind: ExprKind::Binary {
                            op: *op,
                            left: Box::new(left),
                            right: Box::new(right),
                        },
                        pos,
                    };
                    continue 'outer;
                }
            }
            break;
        }

        Some(left)
    }

    fn parse_logical_or(&mut self) -> Option<Expr> {
        self.parse_binary_level(Self::parse_logical_and, &[(TokenKind::OrOr, BinaryOp::Or)])
    }

    fn parse_logical_and(&mut self) -> Option<Expr> {
        self.parse_binary_level(Self::parse_bit_or, &[(TokenKind::AndAnd, BinaryOp::And)])
    }

    fn parse_bit_or(&mut self) -> Option<Expr> {
        self.parse_binary_level(Self::parse_bit_xor, &[(TokenKind::BitOr, BinaryOp::BitOr)])
    }

    fn parse_bit_xor(&mut self) -> Option<Expr> {
        self.parse_binary_level(Self::parse_bit_and, &[(TokenKind::BitXor, BinaryOp::BitXor)])
    }

    fn parse_bit_and(&mut self) -> Option<Expr> {
        self.parse_binary_level(Self::parse_equality, &[(TokenKind::BitAnd, BinaryOp::BitAnd)])
    }

    fn parse_equality(&mut self) -> Option<Expr> {
        self.parse_binary_level(
            Self::parse_comparison,
            &[
                (TokenKind::Equal, BinaryOp::Eq),
                (TokenKind::NotEqual, BinaryOp::NotEq),
            ],
        )
    }

    fn parse_comparison(&mut self) -> Option<Expr> {
        self.parse_binary_level(
            Self::parse_shift,
            &[
                (TokenKind::LessEqual, BinaryOp::LessEq),
                (TokenKind::GreaterEqual, BinaryOp::GreaterEq),
                (TokenKind::Less, BinaryOp::Less),
                (TokenKind::Greater, BinaryOp::Greater),
                (TokenKind::KwIn, BinaryOp::In),
            ],
        )
    }

    fn parse_shift(&mut self) -> Option<Expr> {
        self.parse_binary_level(
            Self::parse_additive,
            &[
                (TokenKind::Shl, BinaryOp::Shl),
                (TokenKind::Shr, BinaryOp::Shr),
            ],
        )
    }

    fn parse_additive(&mut self) -> Option<Expr> {
        self.parse_binary_level(
            Self::parse_multiplicative,
            &[
                (TokenKind::Plus, BinaryOp::Add),
                (TokenKind::Minus, BinaryOp::Sub),
            ],
        )
    }

    fn parse_multiplicative(&mut self) -> Option<Expr> {
        self.parse_binary_level(
            Self::parse_unary,
            &[
                (TokenKind::Star, BinaryOp::Mul),
                (TokenKind::Slash, BinaryOp::Div),
                (TokenKind::Percent, BinaryOp::Mod),
            ],
        )
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        let pos = self.pos();
        let op = match self.tok.kind {
            TokenKind::Not => Some(UnaryOp::Not),
            TokenKind::Minus => Some(UnaryOp::Neg),
            TokenKind::Plus => Some(UnaryOp::Pos),
            TokenKind::BitNot => Some(UnaryOp::BitNot),
            _ => None,
        };

        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Some(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                pos,
            });
        }

        self.parse_power()
    }

    fn parse_power(&mut self) -> Option<Expr> {
        let pos = self.pos();
        let base = self.parse_postfix()?;

        if self.eat(TokenKind::StarStar) {
            // Right-associative.
            let exponent = self.parse_unary()?;
            return Some(Expr {
                kind: ExprKind::Binary {
                    op: BinaryOp::Pow,
                    left: Box::new(base),
                    right: Box::new(exponent),
                },
                pos,
            });
        }

        Some(base)
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let pos = self.pos();
        let mut expr = self.parse_primary()?;

        loop {
            match self.tok.kind {
                TokenKind::LParen => {
                    self.advance();
                    self.skip_newlines();

                    let mut args = vec![];
                    let mut kwargs = vec![];

                    if !self.at(TokenKind::RParen) {
                        loop {
                            // `name = value` is a keyword argument.
                            let kwarg_name = if self.at(TokenKind::Identifier) {
                                let after_name = self.lexer.checkpoint();
                                let next = self.lexer.next_token();
                                self.lexer.rewind(after_name);
                                if next.kind == TokenKind::Assign {
                                    let name = self.tok.text().to_string();
                                    self.advance();
                                    self.advance();
                                    Some(name)
                                } else {
                                    None
                                }
                            } else {
                                None
                            };

                            let value = self.parse_expression()?;
                            match kwarg_name {
                                Some(name) => kwargs.push((name, value)),
                                None => {
                                    if !kwargs.is_empty() {
                                        self.error_at(
                                            value.pos,
                                            "positional argument after keyword argument",
                                        );
                                    }
                                    args.push(value);
                                }
                            }

                            self.skip_newlines();
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                            self.skip_newlines();
                        }
                    }

                    self.expect(TokenKind::RParen)?;
                    expr = Expr {
                        kind: ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                            kwargs,
                        },
                        pos,
                    };
                }
                TokenKind::LBracket => {
                    self.advance();
                    self.skip_newlines();

                    // Slices allow either bound to be omitted.
                    let start = if self.at(TokenKind::Colon) {
                        None
                    } else {
                        Some(Box::new(self.parse_expression()?))
                    };

                    if self.eat(TokenKind::Colon) {
                        let end = if self.at(TokenKind::RBracket) {
                            None
                        } else {
                            Some(Box::new(self.parse_expression()?))
                        };
                        self.expect(TokenKind::RBracket)?;
                        expr = Expr {
                            kind: ExprKind::Slice {
                                obj: Box::new(expr),
                                start,
                                end,
                            },
                            pos,
                        };
                    } else {
                        self.expect(TokenKind::RBracket)?;
                        let Some(index) = start else {
                            self.error_at(pos, "index expression required");
                            return None;
                        };
                        expr = Expr {
                            kind: ExprKind::Index {
                                obj: Box::new(expr),
                                index,
                            },
                            pos,
                        };
                    }
                }
                TokenKind::Dot => {
                    self.advance();
                    let name_tok = self.expect(TokenKind::Identifier)?;
                    expr = Expr {
                        kind: ExprKind::Attr {
                            obj: Box::new(expr),
                            name: name_tok.text().to_string(),
                        },
                        pos,
                    };
                }
                _ => break,
            }
        }

        Some(expr)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let pos = self.pos();

        match self.tok.kind {
            TokenKind::IntLiteral => {
                let value = match self.tok.value {
                    TokenValue::Integer(n) => n,
                    _ => 0,
                };
                self.advance();
                Some(Expr {
                    kind: ExprKind::Literal(Literal::Int(value)),
                    pos,
                })
            }
            TokenKind::RealLiteral => {
                let value = match self.tok.value {
                    TokenValue::Real(v) => v,
                    _ => 0.0,
                };
                self.advance();
                Some(Expr {
                    kind: ExprKind::Literal(Literal::Real(value)),
                    pos,
                })
            }
            TokenKind::StringLiteral => {
                let value = self.tok.text().to_string();
                self.advance();
                Some(Expr {
                    kind: ExprKind::Literal(Literal::Str(value)),
                    pos,
                })
            }
            TokenKind::KwTrue => {
                self.advance();
                Some(Expr {
                    kind: ExprKind::Literal(Literal::Bool(true)),
                    pos,
                })
            }
            TokenKind::KwFalse => {
                self.advance();
                Some(Expr {
                    kind: ExprKind::Literal(Literal::Bool(false)),
                    pos,
                })
            }
            TokenKind::KwNil => {
                self.advance();
                Some(Expr {
                    kind: ExprKind::Literal(Literal::Nil),
                    pos,
                })
            }
            TokenKind::Identifier => {
                let name = self.tok.text().to_string();
                self.advance();
                Some(Expr {
                    kind: ExprKind::Ident(name),
                    pos,
                })
            }
            TokenKind::LParen => {
                self.advance();
                self.skip_newlines();
                let first = self.parse_expression()?;
                self.skip_newlines();

                if self.eat(TokenKind::Comma) {
                    self.skip_newlines();
                    let mut items = vec![first];
                    if !self.at(TokenKind::RParen) {
                        items.extend(self.parse_expression_list()?);
                        self.skip_newlines();
                    }
                    self.expect(TokenKind::RParen)?;
                    Some(Expr {
                        kind: ExprKind::TupleLit(items),
                        pos,
                    })
                } else {
                    self.expect(TokenKind::RParen)?;
                    Some(first)
                }
            }
            TokenKind::LBracket => {
                self.advance();
                self.skip_newlines();

                let mut items = vec![];
                if !self.at(TokenKind::RBracket) {
                    loop {
                        items.push(self.parse_expression()?);
                        self.skip_newlines();
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                        self.skip_newlines();
                        if self.at(TokenKind::RBracket) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket)?;

                Some(Expr {
                    kind: ExprKind::ArrayLit(items),
                    pos,
                })
            }
            TokenKind::LBrace => {
                self.advance();
                self.skip_newlines();

                let mut entries = vec![];
                if !self.at(TokenKind::RBrace) {
                    loop {
                        let key = self.parse_expression()?;
                        self.expect(TokenKind::Colon)?;
                        self.skip_newlines();
                        let value = self.parse_expression()?;
                        entries.push((key, value));
                        self.skip_newlines();
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                        self.skip_newlines();
                        if self.at(TokenKind::RBrace) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBrace)?;

                Some(Expr {
                    kind: ExprKind::MapLit(entries),
                    pos,
                })
            }
            TokenKind::KwFunc => {
                let decl = self.parse_func_decl(false, true)?;
                Some(Expr {
                    kind: ExprKind::FuncLit(Rc::new(decl)),
                    pos,
                })
            }
            TokenKind::DollarParen => {
                let cmd = self.parse_cmd_substitution()?;
                // Refill the expression lookahead past the substitution.
                self.advance();
                Some(Expr {
                    kind: ExprKind::CmdSub(Box::new(cmd)),
                    pos,
                })
            }
            _ => {
                self.error_here("expression");
                None
            }
        }
    }

    //
    // Command parsing (command-word lexicon).
    //

    /// Pulls the next command token.
    fn next_cmd(&mut self) -> Token {
        self.lexer.next_cmd_token()
    }

    /// Parses a command statement. `first` carries the already-pulled name
    /// token when classification happened after an identifier.
    fn parse_command_statement(&mut self, first: Option<Token>) -> Option<Stmt> {
        let pos = first.as_ref().map_or_else(|| self.pos(), |t| t.pos);

        let first_piece = first.map(|tok| CmdPiece::Literal {
            text: tok.text().to_string(),
            blank_after: tok.blank_after,
            quoted: false,
            pos: tok.pos,
        });

        if first_piece.is_none() {
            // The leading path fragment was lexed with the expression
            // lexicon; rewind so the command lexer sees it whole.
            self.lexer.rewind(self.before_tok);
        }

        let (cmd, terminator) = self.parse_and_or(first_piece)?;

        let (cmd, terminator) = if terminator.kind == TokenKind::BitAnd {
            let t = self.next_cmd();
            (Cmd::Background(Box::new(cmd)), t)
        } else {
            (cmd, terminator)
        };

        match terminator.kind {
            TokenKind::NewLine | TokenKind::Semicolon | TokenKind::Eof | TokenKind::RBrace => {
                // Hand the terminator back to the statement loop.
                self.tok = terminator;
            }
            _ => {
                self.diagnostics
                    .push(unexpected(&terminator, "end of command"));
                self.tok = terminator;
            }
        }

        Some(Stmt {
            kind: StmtKind::Command(cmd),
            pos,
        })
    }

    /// `and_or := pipeline (('&&' | '||') pipeline)*`
    fn parse_and_or(&mut self, first_piece: Option<CmdPiece>) -> Option<(Cmd, Token)> {
        let (mut cmd, mut terminator) = self.parse_pipeline(first_piece)?;

        loop {
            let op = match terminator.kind {
                TokenKind::AndAnd => AndOrOp::And,
                TokenKind::OrOr => AndOrOp::Or,
                _ => break,
            };

            let (right, t) = self.parse_pipeline(None)?;
            cmd = Cmd::AndOr {
                op,
                left: Box::new(cmd),
                right: Box::new(right),
            };
            terminator = t;
        }

        Some((cmd, terminator))
    }

    /// `pipeline := command (('|' | '|&') command)*`
    fn parse_pipeline(&mut self, first_piece: Option<CmdPiece>) -> Option<(Cmd, Token)> {
        let (mut cmd, mut terminator) = self.parse_redirected(first_piece)?;

        loop {
            let stderr_too = match terminator.kind {
                TokenKind::BitOr => false,
                TokenKind::PipeAnd => true,
                _ => break,
            };

            let (right, t) = self.parse_redirected(None)?;
            cmd = Cmd::Pipe {
                left: Box::new(cmd),
                right: Box::new(right),
                stderr_too,
            };
            terminator = t;
        }

        Some((cmd, terminator))
    }

    /// `command := simple-cmd (io-redirect)*`
    fn parse_redirected(&mut self, first_piece: Option<CmdPiece>) -> Option<(Cmd, Token)> {
        let (mut pieces, mut terminator) = self.parse_cmd_pieces(first_piece)?;

        let mut redirects = vec![];
        loop {
            let kind = match terminator.kind {
                TokenKind::Greater => RedirKind::Out,
                TokenKind::Shr => RedirKind::Append,
                TokenKind::Less => RedirKind::In,
                TokenKind::AmpGreater => RedirKind::OutErr,
                TokenKind::HereString => RedirKind::HereString,
                _ => break,
            };

            // `2> file`: an adjacent all-digit word supplies the fd.
            let fd = {
                let candidate = match (kind, pieces.last()) {
                    (
                        RedirKind::Out | RedirKind::Append | RedirKind::In,
                        Some(CmdPiece::Literal {
                            text, blank_after, ..
                        }),
                    ) if !blank_after
                        && !text.is_empty()
                        && text.chars().all(|c| c.is_ascii_digit()) =>
                    {
                        text.parse::<u32>().ok()
                    }
                    _ => None,
                };
                if candidate.is_some() {
                    pieces.pop();
                }
                candidate
            };

            let (target, t) = self.parse_redirect_target(terminator.pos)?;
            redirects.push(IoRedirect {
                fd,
                kind,
                target,
                pos: terminator.pos,
            });
            terminator = t;
        }

        if pieces.is_empty() {
            self.error_at(terminator.pos, "empty command");
            return None;
        }

        let is_path = matches!(
            pieces.first(),
            Some(CmdPiece::Literal { text, .. }) if text.contains('/')
        );

        let pos = pieces.first().map(CmdPiece::pos).unwrap_or(terminator.pos);
        let simple = SimpleCmd { pieces, pos };
        let mut cmd = if is_path {
            Cmd::FilePath(simple)
        } else {
            Cmd::Simple(simple)
        };

        if !redirects.is_empty() {
            cmd = Cmd::Redirected {
                cmd: Box::new(cmd),
                redirects,
            };
        }

        Some((cmd, terminator))
    }

    /// Collects word pieces until a non-piece token; returns the pieces and
    /// the terminating token.
    fn parse_cmd_pieces(
        &mut self,
        first_piece: Option<CmdPiece>,
    ) -> Option<(Vec<CmdPiece>, Token)> {
        let mut pieces: Vec<CmdPiece> = first_piece.into_iter().collect();

        loop {
            let tok = self.next_cmd();
            match tok.kind {
                TokenKind::Word | TokenKind::StringLiteral => pieces.push(CmdPiece::Literal {
                    text: tok.text().to_string(),
                    blank_after: tok.blank_after,
                    quoted: tok.kind == TokenKind::StringLiteral,
                    pos: tok.pos,
                }),
                TokenKind::Variable => pieces.push(CmdPiece::Var {
                    name: tok.text().to_string(),
                    blank_after: tok.blank_after,
                    pos: tok.pos,
                }),
                TokenKind::DollarBrace => {
                    let piece = self.parse_expr_interpolation(tok.pos)?;
                    pieces.push(piece);
                }
                TokenKind::DollarParen => {
                    let quoted = self.lexer.in_double_quote();
                    let cmd = self.parse_cmd_substitution_inner()?;
                    let blank_after = self.last_rparen_blank && !quoted;
                    pieces.push(CmdPiece::CmdSub {
                        cmd: Box::new(cmd),
                        blank_after,
                        quoted,
                        pos: tok.pos,
                    });
                }
                _ => return Some((pieces, tok)),
            }
        }
    }

    /// Parses `${expr}` inside a command word.
    fn parse_expr_interpolation(&mut self, pos: SourcePosition) -> Option<CmdPiece> {
        // Pull expression tokens; the interpolated expression ends at `}`.
        self.advance_into_expression();
        let expr = self.parse_expression()?;

        if self.tok.kind != TokenKind::RBrace {
            self.error_here("'}'");
            return None;
        }
        // Interpolations inside double quotes never split words.
        let blank_after = self.tok.blank_after && !self.lexer.in_double_quote();

        Some(CmdPiece::Expr {
            expr: Box::new(expr),
            blank_after,
            pos,
        })
    }

    /// Refills the expression lookahead from the current lexer position.
    fn advance_into_expression(&mut self) {
        self.before_tok = self.lexer.checkpoint();
        self.tok = self.lexer.next_token();
    }

    /// Parses `$(cmd)` starting just after the opener; used from expression
    /// context.
    fn parse_cmd_substitution(&mut self) -> Option<Cmd> {
        self.parse_cmd_substitution_inner()
    }

    fn parse_cmd_substitution_inner(&mut self) -> Option<Cmd> {
        let (cmd, terminator) = self.parse_and_or(None)?;

        if terminator.kind != TokenKind::RParen {
            self.diagnostics.push(unexpected(&terminator, "')'"));
            return None;
        }
        self.last_rparen_blank = terminator.blank_after;

        Some(cmd)
    }

    /// Parses the single word naming a redirection target.
    fn parse_redirect_target(
        &mut self,
        pos: SourcePosition,
    ) -> Option<(Vec<CmdPiece>, Token)> {
        let mut target = vec![];

        loop {
            let tok = self.next_cmd();
            match tok.kind {
                TokenKind::Word | TokenKind::StringLiteral => {
                    let done = tok.blank_after;
                    target.push(CmdPiece::Literal {
                        text: tok.text().to_string(),
                        blank_after: tok.blank_after,
                        quoted: tok.kind == TokenKind::StringLiteral,
                        pos: tok.pos,
                    });
                    if done {
                        return Some((target, self.next_cmd()));
                    }
                }
                TokenKind::Variable => {
                    let done = tok.blank_after;
                    target.push(CmdPiece::Var {
                        name: tok.text().to_string(),
                        blank_after: tok.blank_after,
                        pos: tok.pos,
                    });
                    if done {
                        return Some((target, self.next_cmd()));
                    }
                }
                TokenKind::DollarBrace => {
                    let piece = self.parse_expr_interpolation(tok.pos)?;
                    let done = piece.blank_after();
                    target.push(piece);
                    if done {
                        return Some((target, self.next_cmd()));
                    }
                }
                _ => {
                    if target.is_empty() {
                        self.error_at(pos, "redirection requires a target");
                        return None;
                    }
                    return Some((target, tok));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;

    fn parse_one(src: &str) -> Stmt {
        let program = parse(src).expect("parse failed");
        assert_eq!(program.body.len(), 1, "expected one statement");
        program.body.into_iter().next().unwrap()
    }

    #[test]
    fn empty_input_parses_to_empty_program() {
        let program = parse("").unwrap();
        assert!(program.body.is_empty());

        let program = parse("\n\n  \n").unwrap();
        assert!(program.body.is_empty());
    }

    #[test]
    fn assignment_vs_command_word() {
        // `x = a/b` is a division on the right-hand side.
        let stmt = parse_one("x = a/b");
        assert_matches!(
            stmt.kind,
            StmtKind::Assignment { ref targets, ref values, .. } if targets.len() == 1 && values.len() == 1
        );
        let StmtKind::Assignment { values, .. } = stmt.kind else {
            unreachable!()
        };
        assert_matches!(
            values[0].kind,
            ExprKind::Binary {
                op: BinaryOp::Div,
                ..
            }
        );

        // `ls a/b` is a command with a single path argument.
        let stmt = parse_one("ls a/b");
        let StmtKind::Command(Cmd::Simple(simple)) = stmt.kind else {
            panic!("expected simple command");
        };
        assert_eq!(simple.pieces.len(), 2);
        assert_matches!(&simple.pieces[1], CmdPiece::Literal { text, .. } if text == "a/b");
    }

    #[test]
    fn bare_identifier_is_a_command() {
        let stmt = parse_one("ls");
        assert_matches!(stmt.kind, StmtKind::Command(Cmd::Simple(_)));
    }

    #[test]
    fn call_is_an_expression_statement() {
        let stmt = parse_one("print(\"hello\")");
        let StmtKind::Expression(expr) = stmt.kind else {
            panic!("expected expression statement");
        };
        assert_matches!(expr.kind, ExprKind::Call { .. });
    }

    #[test]
    fn arithmetic_with_blanks_is_an_expression() {
        let stmt = parse_one("x - 1");
        assert_matches!(stmt.kind, StmtKind::Expression(_));
    }

    #[test]
    fn flag_argument_is_a_command() {
        let stmt = parse_one("ls -la");
        let StmtKind::Command(Cmd::Simple(simple)) = stmt.kind else {
            panic!("expected simple command");
        };
        assert_matches!(&simple.pieces[1], CmdPiece::Literal { text, .. } if text == "-la");
    }

    #[test]
    fn file_path_command() {
        let stmt = parse_one("./build.sh release");
        assert_matches!(stmt.kind, StmtKind::Command(Cmd::FilePath(_)));
    }

    #[test]
    fn precedence_mul_binds_tighter_than_add() {
        let stmt = parse_one("x = 1 + 2 * 3");
        let StmtKind::Assignment { values, .. } = stmt.kind else {
            panic!()
        };
        let ExprKind::Binary { op, right, .. } = &values[0].kind else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Add);
        assert_matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Mul,
                ..
            }
        );
    }

    #[test]
    fn power_is_right_associative() {
        let stmt = parse_one("x = 2 ** 3 ** 2");
        let StmtKind::Assignment { values, .. } = stmt.kind else {
            panic!()
        };
        let ExprKind::Binary { op, right, .. } = &values[0].kind else {
            panic!()
        };
        assert_eq!(*op, BinaryOp::Pow);
        assert_matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Pow,
                ..
            }
        );
    }

    #[test]
    fn multi_target_assignment() {
        let stmt = parse_one("a, b = 1, 2");
        let StmtKind::Assignment {
            targets, values, ..
        } = stmt.kind
        else {
            panic!()
        };
        assert_eq!(targets.len(), 2);
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn compound_assignment() {
        let stmt = parse_one("x += 1");
        assert_matches!(
            stmt.kind,
            StmtKind::Assignment {
                op: AssignOp::Add,
                ..
            }
        );
    }

    #[test]
    fn if_else_chain() {
        let stmt = parse_one("if a { b() } else if c { d() } else { e() }");
        let StmtKind::If { else_branch, .. } = stmt.kind else {
            panic!()
        };
        let inner = else_branch.expect("expected else branch");
        let StmtKind::If { else_branch, .. } = inner.kind else {
            panic!("expected chained if");
        };
        assert_matches!(else_branch.unwrap().kind, StmtKind::Block(_));
    }

    #[test]
    fn for_in_parallel_iteration() {
        let stmt = parse_one("for x, y in a, b { print(x) }");
        let StmtKind::ForIn {
            targets, iterables, ..
        } = stmt.kind
        else {
            panic!()
        };
        assert_eq!(targets.len(), 2);
        assert_eq!(iterables.len(), 2);
    }

    #[test]
    fn switch_with_cases_and_default() {
        let stmt = parse_one("switch x { case 1, 2 { a() } case 3 { b() } default { c() } }");
        let StmtKind::Switch { cases, default, .. } = stmt.kind else {
            panic!()
        };
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].exprs.len(), 2);
        assert!(default.is_some());
    }

    #[test]
    fn try_catch_finally() {
        let stmt = parse_one("try { f() } catch TypeA, TypeB as e { g(e) } finally { h() }");
        let StmtKind::Try {
            catches, finally, ..
        } = stmt.kind
        else {
            panic!()
        };
        assert_eq!(catches.len(), 1);
        assert_eq!(catches[0].types.len(), 2);
        assert_eq!(catches[0].var.as_deref(), Some("e"));
        assert!(finally.is_some());
    }

    #[test]
    fn func_decl_with_defaults_and_variadic() {
        let stmt = parse_one("func f(a, b = 2, rest...) { return a }");
        let StmtKind::FuncDecl(decl) = stmt.kind else {
            panic!()
        };
        assert_eq!(decl.name, "f");
        assert_eq!(decl.params.len(), 3);
        assert!(decl.params[1].default.is_some());
        assert!(decl.params[2].variadic);
    }

    #[test]
    fn class_decl_members() {
        let stmt = parse_one(
            "class Point(Base, IShow) {\n  x = 0\n  func __init__(x) { this.x = x }\n  static func origin() { return Point(0) }\n  class Inner { }\n}",
        );
        let StmtKind::ClassDecl(decl) = stmt.kind else {
            panic!()
        };
        assert_eq!(decl.name, "Point");
        assert_eq!(decl.parents.len(), 2);
        assert_eq!(decl.members.len(), 4);
        assert_matches!(decl.members[0], ClassMember::Attribute { .. });
        assert_matches!(decl.members[3], ClassMember::NestedClass(_));

        let ClassMember::Method(ref m) = decl.members[2] else {
            panic!()
        };
        assert!(m.is_static);
    }

    #[test]
    fn interface_decl_signatures() {
        let stmt = parse_one("interface IShow {\n  func show(indent)\n  func hide()\n}");
        let StmtKind::IfaceDecl(decl) = stmt.kind else {
            panic!()
        };
        assert_eq!(decl.methods.len(), 2);
        assert!(decl.methods[0].body.is_none());
    }

    #[test]
    fn pipeline_and_logical_chain() {
        let stmt = parse_one("echo foo | tr f b && echo ok");
        let StmtKind::Command(Cmd::AndOr { op, left, .. }) = stmt.kind else {
            panic!("expected and-or command");
        };
        assert_eq!(op, AndOrOp::And);
        assert_matches!(*left, Cmd::Pipe { stderr_too: false, .. });
    }

    #[test]
    fn pipe_with_stderr() {
        let stmt = parse_one("make |& tee log");
        assert_matches!(
            stmt.kind,
            StmtKind::Command(Cmd::Pipe {
                stderr_too: true,
                ..
            })
        );
    }

    #[test]
    fn background_command() {
        let stmt = parse_one("sleep 10 &");
        assert_matches!(stmt.kind, StmtKind::Command(Cmd::Background(_)));
    }

    #[test]
    fn redirections_with_fd_numbers() {
        let stmt = parse_one("prog 2> err.log >> out.log");
        let StmtKind::Command(Cmd::Redirected { redirects, cmd }) = stmt.kind else {
            panic!("expected redirected command");
        };
        assert_eq!(redirects.len(), 2);
        assert_eq!(redirects[0].fd, Some(2));
        assert_eq!(redirects[0].kind, RedirKind::Out);
        assert_eq!(redirects[1].fd, None);
        assert_eq!(redirects[1].kind, RedirKind::Append);

        // The fd digits must not remain in the argv words.
        let Cmd::Simple(simple) = *cmd else { panic!() };
        assert_eq!(simple.pieces.len(), 1);
    }

    #[test]
    fn redirect_all_and_here_string() {
        let stmt = parse_one("prog &> both.log <<< input");
        let StmtKind::Command(Cmd::Redirected { redirects, .. }) = stmt.kind else {
            panic!()
        };
        assert_eq!(redirects[0].kind, RedirKind::OutErr);
        assert_eq!(redirects[1].kind, RedirKind::HereString);
    }

    #[test]
    fn command_substitution_in_command() {
        let stmt = parse_one("echo $(pwd)");
        let StmtKind::Command(Cmd::Simple(simple)) = stmt.kind else {
            panic!()
        };
        assert_matches!(simple.pieces[1], CmdPiece::CmdSub { quoted: false, .. });
    }

    #[test]
    fn command_substitution_in_expression() {
        let stmt = parse_one("x = $(hostname)");
        let StmtKind::Assignment { values, .. } = stmt.kind else {
            panic!()
        };
        assert_matches!(values[0].kind, ExprKind::CmdSub(_));
    }

    #[test]
    fn expression_interpolation_in_command() {
        let stmt = parse_one("echo ${x + 1}");
        let StmtKind::Command(Cmd::Simple(simple)) = stmt.kind else {
            panic!()
        };
        assert_matches!(simple.pieces[1], CmdPiece::Expr { .. });
    }

    #[test]
    fn every_node_position_is_one_indexed() {
        let program = parse("x = 1\ny = 2").unwrap();
        for stmt in &program.body {
            assert!(stmt.pos.line >= 1);
            assert!(stmt.pos.column >= 1);
        }
        assert_eq!(program.body[1].pos.line, 2);
    }

    #[test]
    fn unclosed_brace_reports_incomplete() {
        let err = parse("if true {").unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn trailing_operator_reports_incomplete() {
        let err = parse("x = 1 +").unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn unterminated_string_reports_incomplete() {
        let err = parse("x = \"abc").unwrap_err();
        assert!(err.is_incomplete());
    }

    #[test]
    fn complete_bad_input_is_not_incomplete() {
        let err = parse("x = = 1").unwrap_err();
        assert!(!err.is_incomplete());
    }

    #[test]
    fn recovery_reports_multiple_errors() {
        let err = parse("x = = 1\ny = = 2").unwrap_err();
        assert!(err.diagnostics().len() >= 2);
    }

    #[test]
    fn global_assignment() {
        let stmt = parse_one("global counter = 0");
        assert_matches!(stmt.kind, StmtKind::Assignment { global: true, .. });
    }

    #[test]
    fn varenv_statement() {
        let stmt = parse_one("varenv PATH = \"/bin\"");
        assert_matches!(stmt.kind, StmtKind::Varenv { ref name, .. } if name == "PATH");
    }

    #[test]
    fn import_statement() {
        let stmt = parse_one("import \"helpers.sl\" as helpers");
        assert_matches!(
            stmt.kind,
            StmtKind::Import { ref path, ref alias } if path == "helpers.sl" && alias == "helpers"
        );
    }

    #[test]
    fn alias_declaration() {
        let stmt = parse_one("alias ll = ls -la");
        let StmtKind::AliasDecl { name, words } = stmt.kind else {
            panic!()
        };
        assert_eq!(name, "ll");
        assert_eq!(words.len(), 2);
    }

    #[test]
    fn cmd_declaration() {
        let stmt = parse_one("cmd greet { print(\"hi\") }");
        assert_matches!(stmt.kind, StmtKind::CmdDecl { ref name, .. } if name == "greet");
    }

    #[test]
    fn defer_statement() {
        let stmt = parse_one("defer print(\"bye\")");
        let StmtKind::Defer(inner) = stmt.kind else {
            panic!()
        };
        assert_matches!(inner.kind, StmtKind::Expression(_));
    }

    #[test]
    fn del_statement() {
        let stmt = parse_one("del x, a[0]");
        let StmtKind::Del(exprs) = stmt.kind else {
            panic!()
        };
        assert_eq!(exprs.len(), 2);
        assert_matches!(exprs[1].kind, ExprKind::Index { .. });
    }

    #[test]
    fn slice_expression() {
        let stmt = parse_one("x = a[1:3]");
        let StmtKind::Assignment { values, .. } = stmt.kind else {
            panic!()
        };
        assert_matches!(values[0].kind, ExprKind::Slice { .. });
    }

    #[test]
    fn range_expression() {
        let stmt = parse_one("x = 1..5");
        let StmtKind::Assignment { values, .. } = stmt.kind else {
            panic!()
        };
        assert_matches!(values[0].kind, ExprKind::Range { .. });
    }

    #[test]
    fn anonymous_function_literal() {
        let stmt = parse_one("f = func (x) { return x * 2 }");
        let StmtKind::Assignment { values, .. } = stmt.kind else {
            panic!()
        };
        assert_matches!(values[0].kind, ExprKind::FuncLit(_));
    }

    #[test]
    fn call_with_keyword_arguments() {
        let stmt = parse_one("print(\"a\", end = \"\")");
        let StmtKind::Expression(expr) = stmt.kind else {
            panic!()
        };
        let ExprKind::Call { args, kwargs, .. } = expr.kind else {
            panic!()
        };
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs.len(), 1);
        assert_eq!(kwargs[0].0, "end");
    }

    #[test]
    fn return_multiple_values() {
        let program = parse("func f() { return 1, 2 }").unwrap();
        let StmtKind::FuncDecl(ref decl) = program.body[0].kind else {
            panic!()
        };
        let body = decl.body.as_ref().unwrap();
        let StmtKind::Return(ref exprs) = body.body[0].kind else {
            panic!()
        };
        assert_eq!(exprs.len(), 2);
    }

    #[test]
    fn commands_terminate_at_block_close() {
        let program = parse("if true { ls }").unwrap();
        let StmtKind::If { ref then_block, .. } = program.body[0].kind else {
            panic!()
        };
        assert_matches!(then_block.body[0].kind, StmtKind::Command(_));
    }

    #[test]
    fn unparse_round_trips_canonical_expressions() {
        for source in [
            "x = 1 + 2 * 3",
            "x = (a && b) || !c",
            "x = f(1, n = 2).attr[0]",
            "x = a[1:3] + [1, 2]",
            "x = cond ? 1 : 2",
        ] {
            let StmtKind::Assignment { values, .. } = parse_one(source).kind else {
                panic!()
            };
            let rendered = format!("x = {}", values[0]);
            let StmtKind::Assignment { values: reparsed, .. } = parse_one(&rendered).kind
            else {
                panic!("unparse produced unparsable output: {rendered}")
            };
            assert_eq!(strip_positions(&values[0]), strip_positions(&reparsed[0]));
        }
    }

    // Structural comparison that ignores source positions.
    fn strip_positions(expr: &Expr) -> String {
        format!("{expr}")
    }

    #[test]
    fn statements_split_on_semicolons() {
        let program = parse("x = 1; y = 2; echo done").unwrap();
        assert_eq!(program.body.len(), 3);
    }
}
