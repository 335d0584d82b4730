//! Parser for recipe text.
//!
//! A recipe looks like:
//! ```text
//! # git-build-recipe format 0.4 deb-version 1.0+{revno}
//! https://example.com/base.git
//! merge packaging https://example.com/packaging.git tag:1.0
//! nest artwork https://example.com/images.git images
//!   merge fixes https://example.com/images-fixes.git revid:9f1c2e
//! ```
//!
//! Indentation is two spaces per level and attaches a line to the
//! nearest preceding instruction one level shallower.

use crate::error::{Error, ParseError, Result};
use crate::types::{
    CURRENT_FORMAT, ChildBranch, Directive, Header, LEGACY_TOOL_NAME, Recipe, RecipeBranch,
    RevisionSpec, TOOL_NAME,
};
use std::path::Path;

/// Name used in diagnostics when the recipe has no file name.
pub const DEFAULT_FILENAME: &str = "recipe";

const INDENT_WIDTH: usize = 2;

/// Parse a recipe from a file path.
pub fn parse_file(path: &Path) -> Result<Recipe> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_named(&content, &path.display().to_string())?)
}

/// Parse a recipe from a string.
pub fn parse_string(content: &str) -> std::result::Result<Recipe, ParseError> {
    parse_named(content, DEFAULT_FILENAME)
}

/// Parse a recipe, naming it `filename` in diagnostics.
pub fn parse_named(content: &str, filename: &str) -> std::result::Result<Recipe, ParseError> {
    RecipeParser::new(content, filename).parse()
}

type ParseResult<T> = std::result::Result<T, ParseError>;

/// Cursor over the recipe, one line at a time.
struct RecipeParser<'a> {
    filename: String,
    lines: Vec<&'a str>,
    line_index: usize,
    line: Vec<char>,
    index: usize,
}

impl<'a> RecipeParser<'a> {
    fn new(text: &'a str, filename: &str) -> Self {
        let lines: Vec<&str> = text.split('\n').map(|l| l.trim_end_matches('\r')).collect();
        let line = lines.first().map(|l| l.chars().collect()).unwrap_or_default();
        Self {
            filename: filename.to_string(),
            lines,
            line_index: 0,
            line,
            index: 0,
        }
    }

    fn parse(mut self) -> ParseResult<Recipe> {
        let header = self.parse_header()?;

        let mut base: Option<RecipeBranch> = None;
        let mut instructions: Vec<(usize, ChildBranch)> = Vec::new();
        let mut last_depth: Option<usize> = None;

        while self.line_index < self.lines.len() {
            let indent = self.take_whitespace();
            if matches!(self.peek_char(0), None | Some('#')) {
                self.advance_line();
                continue;
            }
            let depth = self.indent_depth(&indent)?;

            if base.is_none() {
                if depth > 0 {
                    return Err(self.error("Not allowed to indent the base branch"));
                }
                let url = self.take_to_whitespace("the branch to start from")?;
                let revspec = self.parse_optional_revspec()?;
                self.new_line()?;
                base = Some(RecipeBranch::new(url).with_revspec(revspec));
                continue;
            }

            if depth > 0 {
                match last_depth {
                    None => {
                        return Err(self.error(
                            "Not allowed to indent unless after a 'merge' or 'nest' line",
                        ));
                    }
                    Some(previous) if depth > previous + 1 => {
                        return Err(self.error("Indented by more than two spaces at once"));
                    }
                    Some(_) => {}
                }
            }

            let child = self.parse_instruction_line()?;
            instructions.push((depth, child));
            last_depth = Some(depth);
        }

        let Some(mut base) = base else {
            return Err(ParseError {
                filename: self.filename.clone(),
                line: self.lines.len(),
                column: 1,
                problem: "Empty recipe".to_string(),
            });
        };

        base.attach_instructions(instructions);
        Ok(Recipe { header, base })
    }

    // ------------------------------------------------------------------
    // Lines
    // ------------------------------------------------------------------

    fn parse_header(&mut self) -> ParseResult<Header> {
        self.parse_char('#')?;
        self.take_whitespace();
        let tool = self.take_to_whitespace(&format!("'{TOOL_NAME}'"))?;
        if tool != TOOL_NAME && tool != LEGACY_TOOL_NAME {
            self.index -= tool.chars().count();
            return Err(self.error(&format!("Expecting '{TOOL_NAME}', got '{tool}'")));
        }
        self.parse_word("format")?;
        let format = self.parse_format_version()?;

        let mut version_template = None;
        self.take_whitespace();
        if let Some(word) = self.peek_to_whitespace() {
            if word != "deb-version" {
                return Err(self.error(&format!("Expecting 'deb-version', got '{word}'")));
            }
            self.take_chars(word.chars().count());
            self.parse_whitespace("a value for 'deb-version'")?;
            version_template = Some(self.take_to_whitespace("a value for 'deb-version'")?);
        }
        self.new_line()?;

        Ok(Header {
            format,
            version_template,
        })
    }

    fn parse_instruction_line(&mut self) -> ParseResult<ChildBranch> {
        let keyword = match self.peek_to_whitespace() {
            Some(word) if word == "merge" || word == "nest" => word,
            Some(word) => {
                return Err(self.error(&format!("Expecting 'merge' or 'nest', got '{word}'")));
            }
            None => return Err(self.error("End of line while looking for 'merge' or 'nest'")),
        };
        self.take_chars(keyword.len());

        self.parse_whitespace("the branch nickname")?;
        let nickname = self.take_to_whitespace("the branch nickname")?;
        self.parse_whitespace("the branch url")?;
        let url = self.take_to_whitespace("the branch url")?;

        let directive = if keyword == "nest" {
            self.parse_whitespace("the location to nest")?;
            Directive::Nest {
                location: self.take_to_whitespace("the location to nest")?,
            }
        } else {
            Directive::Merge
        };

        let revspec = self.parse_optional_revspec()?;
        self.new_line()?;

        Ok(ChildBranch {
            nickname,
            directive,
            branch: RecipeBranch::new(url).with_revspec(revspec),
        })
    }

    fn parse_optional_revspec(&mut self) -> ParseResult<RevisionSpec> {
        self.take_whitespace();
        let Some(token) = self.peek_to_whitespace() else {
            return Ok(RevisionSpec::Tip);
        };
        let spec = RevisionSpec::parse(&token).map_err(|problem| self.error(&problem))?;
        self.take_chars(token.chars().count());
        Ok(spec)
    }

    fn parse_format_version(&mut self) -> ParseResult<String> {
        self.parse_whitespace("format version")?;
        let token = self.peek_to_whitespace().unwrap_or_default();

        let (whole, fraction) = match token.split_once('.') {
            Some((whole, fraction)) => (whole, Some(fraction)),
            None => (token.as_str(), None),
        };
        let is_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if !is_digits(whole) || fraction.is_some_and(|f| !is_digits(f)) {
            return Err(self.error(&format!("Expecting a float, got '{token}'")));
        }

        let newest: f64 = CURRENT_FORMAT.parse().unwrap_or(f64::MAX);
        if token.parse::<f64>().is_ok_and(|v| v > newest) {
            return Err(self.error(&format!(
                "Unknown format '{token}', newest supported is {CURRENT_FORMAT}"
            )));
        }

        self.take_chars(token.len());
        Ok(token)
    }

    fn indent_depth(&self, indent: &str) -> ParseResult<usize> {
        if indent.contains('\t') {
            return Err(self.error("Indents may not be done by tabs"));
        }
        if indent.len() % INDENT_WIDTH != 0 {
            return Err(self.error("Indent not a multiple of two spaces"));
        }
        Ok(indent.len() / INDENT_WIDTH)
    }

    /// Require nothing but whitespace until the end of the line, then move on.
    fn new_line(&mut self) -> ParseResult<()> {
        self.take_whitespace();
        if let Some(remaining) = self.peek_to_whitespace() {
            return Err(self.error(&format!("Expecting the end of the line, got '{remaining}'")));
        }
        self.advance_line();
        Ok(())
    }

    fn advance_line(&mut self) {
        self.line_index += 1;
        self.index = 0;
        self.line = self
            .lines
            .get(self.line_index)
            .map(|l| l.chars().collect())
            .unwrap_or_default();
    }

    // ------------------------------------------------------------------
    // Characters and words
    // ------------------------------------------------------------------

    fn peek_char(&self, skip: usize) -> Option<char> {
        self.line.get(self.index + skip).copied()
    }

    fn take_chars(&mut self, count: usize) {
        self.index = (self.index + count).min(self.line.len());
    }

    fn take_whitespace(&mut self) -> String {
        let mut taken = String::new();
        while let Some(c) = self.peek_char(0).filter(|c| is_whitespace(*c)) {
            taken.push(c);
            self.index += 1;
        }
        taken
    }

    fn parse_whitespace(&mut self, looking_for: &str) -> ParseResult<()> {
        match self.peek_char(0) {
            None => Err(self.error(&format!("End of line while looking for {looking_for}"))),
            Some(c) if !is_whitespace(c) => Err(self.error(&format!(
                "Expecting whitespace before {looking_for}, got '{c}'"
            ))),
            Some(_) => {
                self.take_whitespace();
                Ok(())
            }
        }
    }

    fn parse_char(&mut self, expected: char) -> ParseResult<()> {
        match self.peek_char(0) {
            None => Err(self.error(&format!("End of line while looking for '{expected}'"))),
            Some(c) if c == expected => {
                self.index += 1;
                Ok(())
            }
            Some(c) => Err(self.error(&format!("Expecting '{expected}', got '{c}'"))),
        }
    }

    fn parse_word(&mut self, expected: &str) -> ParseResult<()> {
        self.parse_whitespace(&format!("'{expected}'"))?;
        match self.peek_to_whitespace() {
            Some(word) if word == expected => {
                self.take_chars(word.chars().count());
                Ok(())
            }
            Some(word) => Err(self.error(&format!("Expecting '{expected}', got '{word}'"))),
            None => Err(self.error(&format!("End of line while looking for '{expected}'"))),
        }
    }

    fn peek_to_whitespace(&self) -> Option<String> {
        let rest = self.line.get(self.index..)?;
        if rest.is_empty() {
            return None;
        }
        Some(rest.iter().take_while(|c| !is_whitespace(**c)).collect())
    }

    fn take_to_whitespace(&mut self, looking_for: &str) -> ParseResult<String> {
        match self.peek_to_whitespace() {
            Some(word) if !word.is_empty() => {
                self.take_chars(word.chars().count());
                Ok(word)
            }
            _ => Err(self.error(&format!("End of line while looking for {looking_for}"))),
        }
    }

    fn error(&self, problem: &str) -> ParseError {
        ParseError {
            filename: self.filename.clone(),
            line: self.line_index + 1,
            column: self.index + 1,
            problem: problem.to_string(),
        }
    }
}

fn is_whitespace(c: char) -> bool {
    c == ' ' || c == '\t'
}
