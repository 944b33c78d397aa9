//! Format-string template parsing and caching (spec §4.3, §4.5).
//!
//! A macro call site's format string (`"{} connected from {ip}"`) is parsed
//! once — the first time the backend sees a given [`crate::level::MacroMetadata`]
//! pointer — into a [`ParsedTemplate`], then cached by that pointer for
//! every subsequent record from the same call site. This mirrors the
//! source's per-callsite `fmtquill::format` caching rather than
//! re-parsing the template on every call.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use super::DecodedValue;

/// One chunk of a parsed template: either literal text to copy verbatim,
/// or a placeholder referring to the Nth positional argument.
#[derive(Debug, Clone)]
enum Chunk {
  Literal(String),
  /// Index into the decoded argument list. Named placeholders (`{name}`)
  /// are resolved to a positional index at parse time since structured
  /// logging (spec §4.5) needs the name separately, not at format time.
  Arg(usize),
}

/// A format string split into literal runs and argument placeholders.
#[derive(Debug, Clone)]
pub struct ParsedTemplate {
  chunks: Vec<Chunk>,
  /// Names captured for `{name}`-style placeholders, in the order they
  /// were first referenced; `None` entries correspond to bare `{}`.
  pub field_names: Vec<Option<String>>,
}

impl ParsedTemplate {
  /// Parses a template. `{}` placeholders consume arguments left to
  /// right; `{name}` placeholders also consume arguments left to right
  /// (matching the source's behavior: names are labels for structured
  /// output, not a re-ordering mechanism) but additionally record `name`
  /// for [`Self::field_names`].
  pub fn parse(template: &str) -> Self {
    let mut chunks = Vec::new();
    let mut field_names = Vec::new();
    let mut literal = String::new();
    let mut arg_index = 0;
    let mut chars = template.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
      match c {
        '{' if chars.peek().map(|(_, c)| *c) == Some('{') => {
          chars.next();
          literal.push('{');
        }
        '}' if chars.peek().map(|(_, c)| *c) == Some('}') => {
          chars.next();
          literal.push('}');
        }
        '{' => {
          if !literal.is_empty() {
            chunks.push(Chunk::Literal(std::mem::take(&mut literal)));
          }
          let mut name = String::new();
          for (_, c) in chars.by_ref() {
            if c == '}' {
              break;
            }
            name.push(c);
          }
          chunks.push(Chunk::Arg(arg_index));
          field_names.push(if name.is_empty() { None } else { Some(name) });
          arg_index += 1;
        }
        other => literal.push(other),
      }
    }
    if !literal.is_empty() {
      chunks.push(Chunk::Literal(literal));
    }

    ParsedTemplate { chunks, field_names }
  }

  pub fn arg_count(&self) -> usize {
    self.field_names.len()
  }

  /// Renders the template against already-decoded argument values,
  /// appending to `out`. Fails only if a user-supplied `Blob`/`UserPod`
  /// formatter itself returns `Err` (spec §4.3/§7) — every built-in
  /// argument type's `Display` is infallible.
  pub fn render(&self, args: &[DecodedValue<'_>], out: &mut String) -> fmt::Result {
    for chunk in &self.chunks {
      match chunk {
        Chunk::Literal(s) => out.push_str(s),
        Chunk::Arg(i) => {
          if let Some(v) = args.get(*i) {
            write!(out, "{v}")?;
          }
        }
      }
    }
    Ok(())
  }

  /// Structured-logging variant (spec §4.5): instead of interpolating
  /// literal text, emits `name=value` pairs separated by the sentinel
  /// byte `\x1F` (ASCII unit separator), which a structured sink splits
  /// on without needing to re-parse the template.
  pub fn render_structured(&self, args: &[DecodedValue<'_>], out: &mut String) {
    let mut first = true;
    for (i, name) in self.field_names.iter().enumerate() {
      if !first {
        out.push('\x1F');
      }
      first = false;
      let label = name.as_deref().unwrap_or("arg");
      if let Some(v) = args.get(i) {
        let _ = write!(out, "{label}={v}");
      }
    }
  }

  /// True if at least one placeholder in this template was named
  /// (`{name}` rather than bare `{}`) — the trigger for handing a sink
  /// the structured `(key, value)` list alongside the formatted message
  /// (spec §4.5/§4.6 "structured_args?").
  pub fn has_named_fields(&self) -> bool {
    self.field_names.iter().any(Option::is_some)
  }

  /// The `[(key, value), ...]` pair list a structured sink receives
  /// (spec §4.5). Unnamed placeholders fall back to the label `"arg"`.
  pub fn structured_pairs(&self, args: &[DecodedValue<'_>]) -> Vec<(String, String)> {
    self
      .field_names
      .iter()
      .enumerate()
      .map(|(i, name)| {
        let label = name.clone().unwrap_or_else(|| "arg".to_string());
        let value = args.get(i).map(ToString::to_string).unwrap_or_default();
        (label, value)
      })
      .collect()
  }
}

/// Caches a [`ParsedTemplate`] per call-site metadata pointer so the
/// backend parses each distinct format string exactly once (spec §4.3
/// "cached, keyed by the call site").
#[derive(Default)]
pub struct TemplateCache {
  cache: HashMap<usize, ParsedTemplate>,
}

impl TemplateCache {
  pub fn get_or_parse(&mut self, key: usize, template: &str) -> &ParsedTemplate {
    self.cache.entry(key).or_insert_with(|| ParsedTemplate::parse(template))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_positional_and_named_placeholders() {
    let t = ParsedTemplate::parse("{} connected from {ip}, retries={retries}");
    assert_eq!(t.arg_count(), 3);
    assert_eq!(t.field_names, vec![None, Some("ip".to_string()), Some("retries".to_string())]);
  }

  #[test]
  fn renders_in_argument_order() {
    let t = ParsedTemplate::parse("user {} from {ip}");
    let args = vec![DecodedValue::Str("alice"), DecodedValue::Str("10.0.0.1")];
    let mut out = String::new();
    t.render(&args, &mut out).unwrap();
    assert_eq!(out, "user alice from 10.0.0.1");
  }

  #[test]
  fn escapes_doubled_braces() {
    let t = ParsedTemplate::parse("{{literal}} {}");
    let args = vec![DecodedValue::I64(7)];
    let mut out = String::new();
    t.render(&args, &mut out).unwrap();
    assert_eq!(out, "{literal} 7");
  }

  #[test]
  fn render_propagates_a_failing_user_formatter() {
    fn failing_formatter(_bytes: &[u8], _f: &mut fmt::Formatter<'_>) -> fmt::Result {
      Err(fmt::Error)
    }
    let t = ParsedTemplate::parse("broken: {}");
    let args = vec![DecodedValue::Blob(&[], failing_formatter)];
    let mut out = String::new();
    assert!(t.render(&args, &mut out).is_err());
  }

  #[test]
  fn structured_render_uses_unit_separator() {
    let t = ParsedTemplate::parse("{a} and {b}");
    let args = vec![DecodedValue::I64(1), DecodedValue::I64(2)];
    let mut out = String::new();
    t.render_structured(&args, &mut out);
    assert_eq!(out, "a=1\u{1F}b=2");
  }

  #[test]
  fn cache_reuses_parsed_template_for_same_key() {
    let mut cache = TemplateCache::default();
    let key = 0x1000usize;
    let first_ptr = cache.get_or_parse(key, "{}") as *const _;
    let second_ptr = cache.get_or_parse(key, "{}") as *const _;
    assert_eq!(first_ptr, second_ptr);
  }
}
