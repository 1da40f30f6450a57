//! Response template expansion.
//!
//! A template is scanned once, left to right. Text outside tags is copied as
//! is; each tag is replaced by its value:
//!
//! | tag                              | value                                        |
//! |----------------------------------|----------------------------------------------|
//! | `<star>`, `<starN>`              | capture N (1-based, `<star>` is `<star1>`), or "" |
//! | `<id>`                           | the current user id                         |
//! | `<bot NAME>`                     | bot variable, or `undefined`                |
//! | `<get NAME>`                     | user variable, or `undefined`               |
//! | `<set NAME=VALUE>`               | stores VALUE (expanded first), inserts ""   |
//! | `<add NAME=N>` (`sub`/`mult`/`div`) | integer arithmetic on a user variable, inserts "" |
//! | `<call>...</call>`               | result of the object macro                  |
//! | `{random}a\|b{/random}`          | one option, chosen at random                |
//! | `{formal}...{/formal}`           | Title Case (`sentence`, `uppercase`, `lowercase` likewise) |
//! | `<formal>` etc.                  | shorthand for `{formal}<star>{/formal}`     |
//! | `{@TEXT}`, `<@>`                 | the reply to TEXT (or `<star>`) as a new turn |
//! | anything else                    | copied verbatim, brackets included           |
//!
//! Tags may nest (`<set name=<star>>`), so the closing `>` of a tag is found by
//! counting brackets. A `<` followed by whitespace or without a closing `>` is
//! plain text. Inside `<call>` only the non-call tags are expanded; the first
//! `</call>` closes the call. A macro's output is inserted verbatim and never
//! scanned again.

use super::dispatch::{Dispatcher, MacroContext};
use crate::error::ExpansionError;
use tracing::{debug, warn};

/// Value of `<bot>`/`<get>` for a variable that is not set.
pub(crate) const UNDEFINED: &str = "undefined";

const CALL_END: &str = "</call>";

const FORMATS: [&str; 4] = ["formal", "sentence", "uppercase", "lowercase"];

/// Turn-level services the expander calls back into.
pub(crate) trait ReplyHost {
    /// An index in `0..n` for a `{random}` choice. `n` is at least 1.
    fn pick(&self, n: usize) -> usize;

    /// The reply to `input` for the same user, as for `{@...}`.
    fn redirect(&self, input: &str) -> Result<String, ExpansionError>;
}

pub(crate) struct Expander<'a> {
    captures: &'a [String],
    ctx: &'a MacroContext,
    dispatcher: &'a Dispatcher<'a>,
    host: &'a dyn ReplyHost,
    macro_error_text: Option<&'a str>,
}

impl<'a> Expander<'a> {
    pub fn new(
        captures: &'a [String],
        ctx: &'a MacroContext,
        dispatcher: &'a Dispatcher<'a>,
        host: &'a dyn ReplyHost,
    ) -> Self {
        Expander { captures, ctx, dispatcher, host, macro_error_text: None }
    }

    /// Substitute `text` for a failed `<call>` instead of returning the error.
    pub fn macro_error_text(mut self, text: Option<&'a str>) -> Self {
        self.macro_error_text = text;
        self
    }

    pub fn expand(&self, template: &str) -> Result<String, ExpansionError> {
        self.expand_text(template, true)
    }

    fn expand_text(&self, text: &str, calls: bool) -> Result<String, ExpansionError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(open) = rest.find(['<', '{']) {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            rest = if rest[open..].starts_with('{') {
                self.brace(after, calls, &mut out)?
            } else {
                self.angle(after, calls, &mut out)?
            };
        }

        out.push_str(rest);
        Ok(out)
    }

    /// Handle a `<...>` tag whose `<` precedes `after`; returns the unscanned remainder.
    fn angle<'t>(&self, after: &'t str, calls: bool, out: &mut String) -> Result<&'t str, ExpansionError> {
        let Some(close) = tag_end(after) else {
            out.push('<');
            return Ok(after);
        };
        let tag = &after[..close];
        let rest = &after[close + 1..];

        if calls && tag == "call" {
            return Ok(match rest.find(CALL_END) {
                Some(end) => {
                    out.push_str(&self.call(&rest[..end])?);
                    &rest[end + CALL_END.len()..]
                }
                None => {
                    out.push_str("<call>");
                    rest
                }
            });
        }

        match self.tag(tag, calls)? {
            Some(value) => out.push_str(&value),
            None => {
                out.push('<');
                out.push_str(tag);
                out.push('>');
            }
        }
        Ok(rest)
    }

    /// Handle a `{...}` block whose `{` precedes `after`; returns the unscanned remainder.
    fn brace<'t>(&self, after: &'t str, calls: bool, out: &mut String) -> Result<&'t str, ExpansionError> {
        if let Some(target) = after.strip_prefix('@') {
            if let Some(end) = target.find('}') {
                let input = self.expand_text(&target[..end], false)?;
                out.push_str(&self.host.redirect(input.trim())?);
                return Ok(&target[end + 1..]);
            }
        }

        for name in std::iter::once("random").chain(FORMATS) {
            let Some(body) = after.strip_prefix(name).and_then(|b| b.strip_prefix('}')) else {
                continue;
            };
            let end_tag = format!("{{/{name}}}");
            let Some(end) = body.find(&end_tag) else {
                break;
            };
            let inner = &body[..end];
            if name == "random" {
                out.push_str(&self.random(inner, calls)?);
            } else {
                out.push_str(&format_text(name, &self.expand_text(inner, calls)?));
            }
            return Ok(&body[end + end_tag.len()..]);
        }

        out.push('{');
        Ok(after)
    }

    /// Value of a simple tag, or `None` if the tag is not recognized.
    fn tag(&self, tag: &str, calls: bool) -> Result<Option<String>, ExpansionError> {
        let (name, arg) = match tag.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (tag, ""),
        };

        let value = match (name, arg.is_empty()) {
            ("star", true) => self.star(1),
            ("id", true) => self.ctx.current_user().to_string(),
            ("@", true) => self.host.redirect(self.star(1).trim())?,
            (style, true) if FORMATS.contains(&style) => format_text(style, &self.star(1)),
            ("bot", false) => {
                let var = self.expand_text(arg, false)?;
                self.ctx.bot_var(&var).unwrap_or(UNDEFINED).to_string()
            }
            ("get", false) => {
                let var = self.expand_text(arg, false)?;
                self.ctx.get_uservar(self.ctx.current_user(), &var).unwrap_or_else(|| UNDEFINED.to_string())
            }
            ("set", false) => {
                let Some((var, value)) = arg.split_once('=') else {
                    return Ok(None);
                };
                let var = self.expand_text(var.trim(), false)?;
                let value = self.expand_text(value.trim(), calls)?;
                self.ctx.set_uservar(self.ctx.current_user(), &var, &value);
                String::new()
            }
            ("add" | "sub" | "mult" | "div", false) => return self.math(name, arg, calls),
            (_, true) => match name.strip_prefix("star").and_then(|n| n.parse::<usize>().ok()) {
                Some(n) => self.star(n),
                None => return Ok(None),
            },
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    fn star(&self, n: usize) -> String {
        n.checked_sub(1).and_then(|i| self.captures.get(i)).cloned().unwrap_or_default()
    }

    /// `<add|sub|mult|div NAME=VALUE>`. Bad operands insert an error message instead.
    fn math(&self, op: &str, arg: &str, calls: bool) -> Result<Option<String>, ExpansionError> {
        let Some((var, value)) = arg.split_once('=') else {
            return Ok(None);
        };
        let var = self.expand_text(var.trim(), false)?;
        let value = self.expand_text(value.trim(), calls)?;
        let user = self.ctx.current_user();

        let Ok(operand) = value.parse::<i64>() else {
            return Ok(Some(format!("[ERR: Math can't '{op}' non-numeric value '{value}']")));
        };
        let current = self.ctx.get_uservar(user, &var).filter(|v| v != UNDEFINED).unwrap_or_else(|| "0".to_string());
        let result = current.parse::<i64>().ok().and_then(|current| match op {
            "add" => current.checked_add(operand),
            "sub" => current.checked_sub(operand),
            "mult" => current.checked_mul(operand),
            _ => floor_div(current, operand),
        });

        match result {
            Some(result) => {
                debug!(var = %var, op, result, "math tag");
                self.ctx.set_uservar(user, &var, &result.to_string());
                Ok(Some(String::new()))
            }
            None => Ok(Some(format!("[ERR: Math couldn't '{op}' to value '{current}']"))),
        }
    }

    /// `{random}` body: options split on `|`, or on whitespace when there is no `|`.
    fn random(&self, inner: &str, calls: bool) -> Result<String, ExpansionError> {
        let options: Vec<&str> =
            if inner.contains('|') { inner.split('|').collect() } else { inner.split_whitespace().collect() };
        if options.is_empty() {
            return Ok(String::new());
        }
        let choice = options[self.host.pick(options.len()).min(options.len() - 1)];
        self.expand_text(choice, calls)
    }

    fn call(&self, inner: &str) -> Result<String, ExpansionError> {
        let inner = self.expand_text(inner, false)?;
        let mut words = inner.split_whitespace();
        let Some(name) = words.next() else {
            warn!("empty <call> tag");
            return Ok(String::new());
        };
        let args: Vec<String> = words.map(str::to_string).collect();

        match self.dispatcher.invoke(name, &args, self.ctx) {
            Ok(text) => Ok(text),
            Err(err) => match self.macro_error_text {
                Some(text) => {
                    warn!(object = name, error = %err, "object macro failed, substituting error text");
                    Ok(text.to_string())
                }
                None => Err(err.into()),
            },
        }
    }
}

/// Byte offset of the `>` closing a tag whose `<` precedes `text`.
///
/// `None` when `text` can't start a tag (empty or leading whitespace) or the
/// tag is never closed. Only a `<` directly followed by a non-space opens a
/// nested tag.
fn tag_end(text: &str) -> Option<usize> {
    if !text.starts_with(|c: char| !c.is_whitespace()) {
        return None;
    }
    let bytes = text.as_bytes();
    let mut depth = 1usize;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'<' if bytes.get(i + 1).is_some_and(|next| !next.is_ascii_whitespace()) => depth += 1,
            b'>' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// `a / b` rounded towards negative infinity.
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) { Some(q - 1) } else { Some(q) }
}

fn format_text(style: &str, text: &str) -> String {
    match style {
        "uppercase" => text.to_uppercase(),
        "lowercase" => text.to_lowercase(),
        "sentence" => capitalize(text),
        _ => text.split_whitespace().map(capitalize).collect::<Vec<_>>().join(" "),
    }
}

/// First character upper case, the rest lower case.
fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}
