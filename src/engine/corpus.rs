//! Corpus text parser.
//!
//! The corpus format is line oriented. Each non-blank line outside a macro
//! block starts with a one-character command:
//!
//! ```text
//! ! version = 2.0          directive (version, var, sub, local)
//! + what is # plus #       trigger: starts a rule
//! - <star1> + <star2> = <call>add <star1> <star2></call>
//! ^ continued text         appended to the previous + or - line
//! @ what is your name      redirect: short for `- {@what is your name}`
//! > object add perl        macro block start; body kept verbatim
//!     return $a + $b;
//! < object                 macro block end
//! // comment               (also /* ... */ blocks and trailing " // ...")
//! ```
//!
//! Parsing is a single top-to-bottom pass with no recovery: the first
//! malformed line aborts the document with a line-numbered error. Anything
//! the matcher cannot honour (alternations, optionals, topics, conditions)
//! is rejected instead of being silently ignored.

use crate::error::{LoadError, ParseError, VersionError};
use crate::{MacroDefinition, Options, Response, Rule, Trigger, TriggerToken, WildcardKind};
use tracing::{debug, warn};

use super::trigger::normalize_word;

/// Highest corpus format version this parser understands.
pub(crate) const SUPPORTED_VERSION: f64 = 2.0;

/// Everything one document contributes to the engine.
#[derive(Debug, Default)]
pub(crate) struct Document {
    /// Rules in definition order; `Rule::order` is the index within this document.
    pub rules: Vec<Rule>,
    pub macros: Vec<MacroDefinition>,
    /// `! var` assignments in order; `None` deletes the variable.
    pub bot_vars: Vec<(String, Option<String>)>,
    /// `! sub` definitions in order; `None` deletes the substitution.
    pub subs: Vec<(String, Option<String>)>,
}

/// Join string for `^` continuation lines (`! local concat = ...`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Concat {
    None,
    Space,
    Newline,
}

impl Concat {
    fn separator(self) -> &'static str {
        match self {
            Concat::None => "",
            Concat::Space => " ",
            Concat::Newline => "\n",
        }
    }
}

/// A `+` block still collecting responses.
struct RuleDraft {
    line: usize,
    pattern: String,
    responses: Vec<(usize, String)>,
}

/// An open `> object` block.
struct ObjectDraft<'t> {
    line: usize,
    name: String,
    language: String,
    body: Vec<&'t str>,
}

struct DocumentParser<'t> {
    options: &'t Options,
    doc: Document,
    rule: Option<RuleDraft>,
    object: Option<ObjectDraft<'t>>,
    in_comment: bool,
    concat: Concat,
    version_seen: bool,
}

/// Parse one corpus document.
pub(crate) fn parse_document(text: &str, options: &Options) -> Result<Document, LoadError> {
    let mut parser = DocumentParser {
        options,
        doc: Document::default(),
        rule: None,
        object: None,
        in_comment: false,
        concat: Concat::None,
        version_seen: false,
    };

    for (idx, line) in text.lines().enumerate() {
        parser.line(idx + 1, line)?;
    }
    parser.finish()
}

impl<'t> DocumentParser<'t> {
    fn line(&mut self, lineno: usize, raw: &'t str) -> Result<(), LoadError> {
        // Macro bodies are kept byte for byte, blank lines included.
        if let Some(object) = self.object.as_mut() {
            if regex!(r"^\s*<\s*object\b").is_match(raw) {
                self.close_object();
            } else {
                object.body.push(raw);
            }
            return Ok(());
        }

        let line = raw.trim();
        if line.is_empty() {
            return Ok(());
        }

        if self.in_comment {
            if line.contains("*/") {
                self.in_comment = false;
            }
            return Ok(());
        }
        if line.starts_with("//") {
            return Ok(());
        }
        if line.starts_with("/*") {
            if !line.contains("*/") {
                self.in_comment = true;
            }
            return Ok(());
        }

        let mut chars = line.chars();
        let cmd = chars.next().unwrap_or_default();
        let mut data = chars.as_str().trim();
        if let Some(idx) = data.find(" //") {
            data = data[..idx].trim();
        }
        if data.is_empty() {
            return Err(ParseError::new(lineno, format!("'{cmd}' command without data")).into());
        }

        match cmd {
            '!' => self.directive(lineno, data),
            '+' => {
                self.check_version(lineno)?;
                self.finish_rule()?;
                self.rule = Some(RuleDraft { line: lineno, pattern: data.to_string(), responses: Vec::new() });
                Ok(())
            }
            '-' => match self.rule.as_mut() {
                Some(rule) => {
                    rule.responses.push((lineno, data.to_string()));
                    Ok(())
                }
                None => Err(ParseError::new(lineno, "response without a preceding trigger").into()),
            },
            '^' => self.continuation(lineno, data),
            '@' => match self.rule.as_mut() {
                Some(rule) => {
                    rule.responses.push((lineno, format!("{{@{data}}}")));
                    Ok(())
                }
                None => Err(ParseError::new(lineno, "redirect without a preceding trigger").into()),
            },
            '>' => self.open_object(lineno, data),
            '<' => Err(ParseError::new(lineno, format!("'< {data}' without a matching '> {data}'")).into()),
            '%' | '*' => Err(ParseError::new(lineno, format!("unsupported command '{cmd}'")).into()),
            other => Err(ParseError::new(lineno, format!("unknown command '{other}'")).into()),
        }
    }

    fn directive(&mut self, lineno: usize, data: &str) -> Result<(), LoadError> {
        let Some((left, value)) = data.split_once('=') else {
            return Err(ParseError::new(lineno, "definition without '='").into());
        };
        let value = value.trim();
        let mut left = left.split_whitespace();
        let kind = left.next().unwrap_or_default();
        let name = left.collect::<Vec<_>>().join(" ");

        match kind {
            "version" => {
                let supported = value.parse::<f64>().map(|v| v <= SUPPORTED_VERSION).unwrap_or(false);
                if !supported {
                    return Err(VersionError::Unsupported { line: lineno, found: value.to_string() }.into());
                }
                self.version_seen = true;
            }
            "local" if name == "concat" => {
                self.concat = match value {
                    "none" => Concat::None,
                    "space" => Concat::Space,
                    "newline" => Concat::Newline,
                    other => {
                        warn!(line = lineno, value = other, "unknown concat mode, using 'none'");
                        Concat::None
                    }
                };
            }
            "var" => {
                if name.is_empty() {
                    return Err(ParseError::new(lineno, "bot variable without a name").into());
                }
                let value = (value != "<undef>").then(|| value.to_string());
                self.doc.bot_vars.push((name, value));
            }
            "sub" => {
                if name.is_empty() {
                    return Err(ParseError::new(lineno, "substitution without a pattern").into());
                }
                let value = (value != "<undef>").then(|| value.to_string());
                self.doc.subs.push((name, value));
            }
            other => {
                warn!(line = lineno, kind = other, "ignoring unsupported definition");
            }
        }
        Ok(())
    }

    fn continuation(&mut self, lineno: usize, data: &str) -> Result<(), LoadError> {
        let separator = self.concat.separator();
        let Some(rule) = self.rule.as_mut() else {
            return Err(ParseError::new(lineno, "continuation without a preceding trigger or response").into());
        };
        let target = match rule.responses.last_mut() {
            Some((_, response)) => response,
            None => &mut rule.pattern,
        };
        target.push_str(separator);
        target.push_str(data);
        Ok(())
    }

    fn open_object(&mut self, lineno: usize, data: &str) -> Result<(), LoadError> {
        let mut fields = data.split_whitespace();
        match fields.next() {
            Some("object") => {}
            Some(label) => return Err(ParseError::new(lineno, format!("unsupported block '> {label}'")).into()),
            None => return Err(ParseError::new(lineno, "block without a label").into()),
        }
        let (Some(name), Some(language)) = (fields.next(), fields.next()) else {
            return Err(ParseError::new(lineno, "'> object' needs a name and a language").into());
        };

        self.check_version(lineno)?;
        self.finish_rule()?;
        self.object = Some(ObjectDraft {
            line: lineno,
            name: name.to_string(),
            language: language.to_lowercase(),
            body: Vec::new(),
        });
        Ok(())
    }

    fn close_object(&mut self) {
        if let Some(object) = self.object.take() {
            debug!(name = %object.name, language = %object.language, "parsed object macro");
            self.doc.macros.push(MacroDefinition {
                name: object.name,
                language: object.language,
                body: object.body.join("\n"),
                line: object.line,
            });
        }
    }

    fn check_version(&self, lineno: usize) -> Result<(), LoadError> {
        if self.options.require_version && !self.version_seen {
            return Err(VersionError::Missing { line: lineno }.into());
        }
        Ok(())
    }

    fn finish_rule(&mut self) -> Result<(), LoadError> {
        let Some(draft) = self.rule.take() else {
            return Ok(());
        };
        if draft.responses.is_empty() {
            return Err(ParseError::new(draft.line, format!("trigger '{}' has no responses", draft.pattern)).into());
        }

        let trigger = parse_trigger(&draft.pattern, draft.line)?;
        let responses = draft
            .responses
            .into_iter()
            .map(|(line, text)| parse_response(&text, line))
            .collect::<Result<Vec<_>, _>>()?;

        let order = self.doc.rules.len();
        self.doc.rules.push(Rule { order, line: draft.line, trigger, responses });
        Ok(())
    }

    fn finish(mut self) -> Result<Document, LoadError> {
        if let Some(object) = &self.object {
            return Err(ParseError::new(object.line, format!("object '{}' is missing '< object'", object.name)).into());
        }
        self.finish_rule()?;
        Ok(self.doc)
    }
}

/// Strip a `{weight=N}` tag from `text`, returning the weight if present.
fn take_weight(text: &str, line: usize) -> Result<(String, Option<u32>), ParseError> {
    if !text.contains("{weight") {
        return Ok((text.to_string(), None));
    }
    let Some(caps) = regex!(r"\s*\{weight=(\d+)\}\s*").captures(text) else {
        return Err(ParseError::new(line, "malformed {weight} tag"));
    };
    let weight = caps[1].parse::<u32>().ok().filter(|w| *w > 0);
    let Some(weight) = weight else {
        return Err(ParseError::new(line, format!("weight must be a positive integer, got '{}'", &caps[1])));
    };
    let whole = caps.get(0).map(|m| m.range()).unwrap_or_default();
    let mut stripped = String::with_capacity(text.len());
    stripped.push_str(&text[..whole.start]);
    if whole.start > 0 && whole.end < text.len() {
        stripped.push(' ');
    }
    stripped.push_str(&text[whole.end..]);
    Ok((stripped, Some(weight)))
}

/// Parse the text after `+` into trigger tokens.
pub(crate) fn parse_trigger(pattern: &str, line: usize) -> Result<Trigger, ParseError> {
    let (text, weight) = take_weight(pattern, line)?;
    let mut tokens = Vec::new();

    for raw in text.split_whitespace() {
        if let Some(kind) = WildcardKind::from_symbol(raw) {
            tokens.push(TriggerToken::Wildcard(kind));
            continue;
        }
        if let Some(bad) = raw.chars().find(|c| "*#_()[]|@<>{}".contains(*c)) {
            return Err(ParseError::new(line, format!("unsupported trigger syntax '{bad}' in '{raw}'")));
        }
        let word = normalize_word(raw);
        if !word.is_empty() {
            tokens.push(TriggerToken::Literal(word));
        }
    }

    if tokens.is_empty() {
        return Err(ParseError::new(line, format!("trigger '{pattern}' has no words")));
    }
    Ok(Trigger::new(pattern.to_string(), tokens, weight.unwrap_or(0)))
}

fn parse_response(text: &str, line: usize) -> Result<Response, ParseError> {
    let (template, weight) = take_weight(text, line)?;
    Ok(Response { template, weight: weight.unwrap_or(1) })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Document, LoadError> {
        parse_document(text, &Options::default())
    }

    fn parse_err(text: &str) -> ParseError {
        match parse(text) {
            Err(LoadError::Parse(err)) => err,
            other => panic!("expected a parse error, got {other:?}"),
        }
    }

    #[test]
    fn parses_rules_and_macros() {
        let doc = parse(
            "! version = 2.0\n\
             // a comment\n\
             \n\
             > object add perl\n\
             \tmy ($rs, @args) = @_;\n\
             \n\
             \treturn $args[0] + $args[1];\n\
             < object\n\
             \n\
             + add * plus *\n\
             - <star1> + <star2> = <call>add <star1> <star2></call>\n",
        )
        .unwrap();

        assert_eq!(doc.rules.len(), 1);
        let rule = &doc.rules[0];
        assert_eq!(rule.line, 10);
        assert_eq!(rule.trigger.pattern, "add * plus *");
        assert_eq!(rule.trigger.specificity.literals, 2);
        assert_eq!(rule.trigger.specificity.wildcards, 2);
        assert_eq!(rule.responses[0].template, "<star1> + <star2> = <call>add <star1> <star2></call>");

        assert_eq!(doc.macros.len(), 1);
        let def = &doc.macros[0];
        assert_eq!(def.name, "add");
        assert_eq!(def.language, "perl");
        assert_eq!(def.body, "\tmy ($rs, @args) = @_;\n\n\treturn $args[0] + $args[1];");
    }

    #[test]
    fn multiple_responses_and_weights() {
        let doc = parse("+ hello\n- Hi!\n- Hey there {weight=3}\n- {weight=2} Yo\n").unwrap();
        let responses = &doc.rules[0].responses;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0], Response { template: "Hi!".into(), weight: 1 });
        assert_eq!(responses[1], Response { template: "Hey there".into(), weight: 3 });
        assert_eq!(responses[2], Response { template: "Yo".into(), weight: 2 });
    }

    #[test]
    fn trigger_weight() {
        let doc = parse("+ * {weight=5}\n- anything\n").unwrap();
        assert_eq!(doc.rules[0].trigger.specificity.weight, 5);
        assert_eq!(doc.rules[0].trigger.tokens, vec![TriggerToken::Wildcard(WildcardKind::Any)]);
    }

    #[test]
    fn continuation_uses_concat_mode() {
        let doc = parse("+ tell me\n- one\n^ two\n! local concat = space\n+ again\n- three\n^ four\n").unwrap();
        assert_eq!(doc.rules[0].responses[0].template, "onetwo");
        assert_eq!(doc.rules[1].responses[0].template, "three four");
    }

    #[test]
    fn continuation_extends_trigger() {
        let doc = parse("! local concat = space\n+ how are\n^ you\n- fine\n").unwrap();
        assert_eq!(doc.rules[0].trigger.tokens.len(), 3);
    }

    #[test]
    fn block_and_inline_comments() {
        let doc = parse("/* skipped\n+ not a rule\n*/\n+ hi // greeting\n- hello // reply\n").unwrap();
        assert_eq!(doc.rules.len(), 1);
        assert_eq!(doc.rules[0].trigger.pattern, "hi");
        assert_eq!(doc.rules[0].responses[0].template, "hello");
    }

    #[test]
    fn bot_vars() {
        let doc = parse("! var name = Parley\n! var mood = <undef>\n").unwrap();
        assert_eq!(doc.bot_vars, vec![("name".into(), Some("Parley".into())), ("mood".into(), None)]);
    }

    #[test]
    fn trigger_literals_are_normalized() {
        let doc = parse("+ What's UP\n- x\n").unwrap();
        assert_eq!(
            doc.rules[0].trigger.tokens,
            vec![TriggerToken::Literal("whats".into()), TriggerToken::Literal("up".into())]
        );
    }

    #[test]
    fn response_without_trigger() {
        let err = parse_err("! version = 2.0\n- orphan\n");
        assert_eq!(err.line, 2);
    }

    #[test]
    fn trigger_without_response() {
        let err = parse_err("+ hello\n+ bye\n- ok\n");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn unterminated_object() {
        let err = parse_err("+ a\n- b\n> object x python\n  return 1\n");
        assert_eq!(err.line, 3);
    }

    #[test]
    fn stray_object_end() {
        let err = parse_err("< object\n");
        assert_eq!(err.line, 1);
    }

    #[test]
    fn malformed_object_header() {
        assert_eq!(parse_err("> object onlyname\n< object\n").line, 1);
        assert_eq!(parse_err("> topic sports\n< topic\n").line, 1);
    }

    #[test]
    fn unsupported_trigger_syntax() {
        assert_eq!(parse_err("+ (hi|hello) bot\n- x\n").line, 1);
        assert_eq!(parse_err("+ hi [there]\n- x\n").line, 1);
        assert_eq!(parse_err("+ foo*\n- x\n").line, 1);
    }

    #[test]
    fn bad_weight() {
        assert_eq!(parse_err("+ a\n- b {weight=0}\n").line, 2);
        assert_eq!(parse_err("+ a {weight=x}\n- b\n").line, 1);
    }

    #[test]
    fn unsupported_commands() {
        assert_eq!(parse_err("+ a\n- b\n% previous\n").line, 3);
        assert_eq!(parse_err("+ a\n- b\n* <get x> == y => z\n").line, 3);
    }

    #[test]
    fn redirect_command() {
        let doc = parse("+ hey\n@ hello there\n").unwrap();
        assert_eq!(doc.rules[0].responses, vec![Response { template: "{@hello there}".into(), weight: 1 }]);
        assert_eq!(parse_err("@ hello\n").line, 1);
    }

    #[test]
    fn substitutions() {
        let doc = parse("! sub what's = what is\n! sub i'm = <undef>\n").unwrap();
        assert_eq!(doc.subs, vec![("what's".into(), Some("what is".into())), ("i'm".into(), None)]);
        assert_eq!(parse_err("! sub = nothing\n").line, 1);
    }

    #[test]
    fn version_checks() {
        assert!(matches!(parse("! version = 2.5\n"), Err(LoadError::Version(VersionError::Unsupported { line: 1, .. }))));
        assert!(matches!(parse("! version = two\n"), Err(LoadError::Version(_))));
        assert!(parse("! version = 1.0\n+ a\n- b\n").is_ok());

        let strict = Options { require_version: true, ..Options::default() };
        assert!(matches!(
            parse_document("+ a\n- b\n", &strict),
            Err(LoadError::Version(VersionError::Missing { line: 1 }))
        ));
        assert!(parse_document("! version = 2.0\n+ a\n- b\n", &strict).is_ok());
        assert!(parse_document("// no rules at all\n", &strict).is_ok());
    }
}
