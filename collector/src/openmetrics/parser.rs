use super::{
    MetricFamily,
    MetricType,
    ParseError,
    ParseErrorReason,
    Sample,
};

/// Line state machine turning exposition lines into [`MetricFamily`] values.
///
/// A family stays open while its samples are read. It is closed, and
/// returned, when a directive names a different metric, when a directive
/// arrives for a family that already has samples, when a directive word
/// repeats for the same family, or when a sample line does not belong to it.
/// `# EOF` closes nothing; [`FamilyParser::finish`] flushes whatever is
/// still open.
#[derive(Debug, Default)]
pub struct FamilyParser {
    line: usize,
    open: Option<OpenFamily>,
}

#[derive(Debug)]
struct OpenFamily {
    family: MetricFamily,
    seen: SeenDirectives,
}

#[derive(Debug, Default)]
struct SeenDirectives {
    help: bool,
    type_: bool,
    unit: bool,
}

#[derive(Debug, Clone, Copy)]
enum Directive {
    Help,
    Type,
    Unit,
}

impl SeenDirectives {
    fn flag(&mut self, directive: Directive) -> &mut bool {
        match directive {
            Directive::Help => &mut self.help,
            Directive::Type => &mut self.type_,
            Directive::Unit => &mut self.unit,
        }
    }
}

impl OpenFamily {
    fn new(name: &str) -> Self {
        Self {
            family: MetricFamily {
                name: name.to_string(),
                ..MetricFamily::default()
            },
            seen: SeenDirectives::default(),
        }
    }

    /// Still collecting metadata, and this directive word has not been seen.
    fn accepts(&mut self, name: &str, directive: Directive) -> bool {
        self.family.name == name && self.family.samples.is_empty() && !*self.seen.flag(directive)
    }
}

impl FamilyParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (without its terminator). Returns the family this line
    /// closed, if any.
    pub fn push_line(&mut self, line: &str) -> Result<Option<MetricFamily>, ParseError> {
        self.line += 1;
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() {
            return Ok(None);
        }
        let result = match line.strip_prefix('#') {
            Some(comment) => self.push_directive(comment),
            None => self.push_sample(line),
        };
        result.map_err(|reason| ParseError {
            line: self.line,
            reason,
            text: line.to_string(),
        })
    }

    /// Flushes the family still open at the end of the stream.
    pub fn finish(&mut self) -> Option<MetricFamily> {
        self.open.take().map(|open| open.family)
    }

    fn push_directive(&mut self, comment: &str) -> Result<Option<MetricFamily>, ParseErrorReason> {
        let comment = comment.strip_prefix(' ').unwrap_or(comment);
        let (word, rest) = comment.split_once(' ').unwrap_or((comment, ""));
        let directive = match word {
            "EOF" if rest.trim().is_empty() => return Ok(None),
            "HELP" => Directive::Help,
            "TYPE" => Directive::Type,
            "UNIT" => Directive::Unit,
            other => return Err(ParseErrorReason::UnknownDirective(other.to_string())),
        };
        let (name, text) = rest.split_once(' ').unwrap_or((rest, ""));
        if name.is_empty() {
            return Err(ParseErrorReason::MissingDirectiveName);
        }

        let continues = self.open.as_mut().is_some_and(|open| open.accepts(name, directive));
        let mut flushed = None;
        if !continues {
            flushed = self.open.take().map(|open| open.family);
            self.open = Some(OpenFamily::new(name));
        }
        let Some(open) = self.open.as_mut() else {
            return Ok(flushed);
        };

        *open.seen.flag(directive) = true;
        match directive {
            Directive::Help => open.family.help = Some(text.to_string()),
            Directive::Type => open.family.metric_type = MetricType::from_type_word(text),
            Directive::Unit => open.family.unit = Some(text.to_string()),
        }
        Ok(flushed)
    }

    fn push_sample(&mut self, line: &str) -> Result<Option<MetricFamily>, ParseErrorReason> {
        let parsed = parse_sample_line(line)?;

        let submetric = self
            .open
            .as_ref()
            .and_then(|open| submetric_of(&open.family.name, parsed.name))
            .map(str::to_string);
        let mut flushed = None;
        let submetric = match submetric {
            Some(submetric) => submetric,
            None => {
                flushed = self.open.take().map(|open| open.family);
                self.open = Some(OpenFamily::new(parsed.name));
                String::new()
            }
        };
        let Some(open) = self.open.as_mut() else {
            return Ok(flushed);
        };

        let facets = parsed.labels.iter().cloned().collect();
        open.family.samples.push(Sample {
            submetric,
            labels: parsed.labels,
            facets,
            label_text: parsed.label_text.to_string(),
            value: parsed.value,
            raw_value: parsed.raw_value.to_string(),
            timestamp: parsed.timestamp.map(str::to_string),
        });
        Ok(flushed)
    }
}

fn submetric_of<'a>(family: &str, sample: &'a str) -> Option<&'a str> {
    if sample == family {
        return Some("");
    }
    sample.strip_prefix(family)?.strip_prefix('_')
}

struct ParsedSample<'a> {
    name: &'a str,
    label_text: &'a str,
    labels: Vec<(String, String)>,
    value: f64,
    raw_value: &'a str,
    timestamp: Option<&'a str>,
}

/// `name{key="value",...} value [timestamp]`
fn parse_sample_line(line: &str) -> Result<ParsedSample<'_>, ParseErrorReason> {
    let name_end = line
        .find(|c: char| c == '{' || c.is_ascii_whitespace())
        .ok_or(ParseErrorReason::MalformedSample)?;
    let name = &line[..name_end];
    if name.is_empty() {
        return Err(ParseErrorReason::MalformedSample);
    }

    let mut rest = &line[name_end..];
    let (label_text, labels) = match rest.strip_prefix('{') {
        Some(inner) => {
            let (labels, close) = parse_labels(inner)?;
            rest = &inner[close + 1..];
            (&inner[..close], labels)
        }
        None => ("", Vec::new()),
    };

    if !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        return Err(ParseErrorReason::MalformedSample);
    }
    let mut fields = rest.split_ascii_whitespace();
    let raw_value = fields.next().ok_or(ParseErrorReason::MalformedSample)?;
    let timestamp = fields.next();
    if fields.next().is_some() {
        return Err(ParseErrorReason::MalformedSample);
    }
    let value = raw_value
        .parse::<f64>()
        .map_err(|_| ParseErrorReason::InvalidValue(raw_value.to_string()))?;
    if timestamp.is_some_and(|ts| ts.parse::<f64>().is_err()) {
        return Err(ParseErrorReason::MalformedSample);
    }

    Ok(ParsedSample {
        name,
        label_text,
        labels,
        value,
        raw_value,
        timestamp,
    })
}

/// Parses the inside of a label set, starting right after `{`. Returns the
/// pairs and the byte offset of the closing `}`.
fn parse_labels(text: &str) -> Result<(Vec<(String, String)>, usize), ParseErrorReason> {
    let mut labels = Vec::new();
    let mut chars = text.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_ascii_whitespace()).is_some() {}
        let start = match chars.peek() {
            None => return Err(ParseErrorReason::MalformedLabels("unterminated label set")),
            Some(&(pos, '}')) => return Ok((labels, pos)),
            Some(&(pos, _)) => pos,
        };

        let eq = loop {
            match chars.next() {
                Some((pos, '=')) => break pos,
                Some((_, '"' | ',' | '}')) | None => {
                    return Err(ParseErrorReason::MalformedLabels("expected `key=\"value\"`"))
                }
                Some(_) => {}
            }
        };
        let key = text[start..eq].trim();
        if key.is_empty() || key.contains(|c: char| c.is_ascii_whitespace()) {
            return Err(ParseErrorReason::MalformedLabels("invalid label name"));
        }

        if !matches!(chars.next(), Some((_, '"'))) {
            return Err(ParseErrorReason::MalformedLabels("label value must be quoted"));
        }
        let mut value = String::new();
        loop {
            match chars.next() {
                Some((_, '"')) => break,
                Some((_, '\\')) => match chars.next() {
                    Some((_, 'n')) => value.push('\n'),
                    Some((_, '"')) => value.push('"'),
                    Some((_, '\\')) => value.push('\\'),
                    Some((_, other)) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(ParseErrorReason::MalformedLabels("unterminated label value")),
                },
                Some((_, c)) => value.push(c),
                None => return Err(ParseErrorReason::MalformedLabels("unterminated label value")),
            }
        }
        labels.push((key.to_string(), value));

        while chars.next_if(|(_, c)| c.is_ascii_whitespace()).is_some() {}
        match chars.next() {
            Some((_, ',')) => {}
            Some((pos, '}')) => return Ok((labels, pos)),
            _ => return Err(ParseErrorReason::MalformedLabels("expected `,` or `}` after label value")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openmetrics::parse_families;
    use pretty_assertions::assert_eq;

    fn names(text: &str) -> Vec<(String, MetricType, usize)> {
        parse_families(text)
            .unwrap()
            .into_iter()
            .map(|f| (f.name, f.metric_type, f.samples.len()))
            .collect()
    }

    #[test]
    fn flushes_family_on_next_directive() {
        let mut parser = FamilyParser::new();
        assert_eq!(parser.push_line("# TYPE a gauge").unwrap(), None);
        assert_eq!(parser.push_line("a 1").unwrap(), None);
        let flushed = parser.push_line("# TYPE b gauge").unwrap().unwrap();
        assert_eq!(flushed.name, "a");
        assert_eq!(flushed.samples.len(), 1);
        assert_eq!(parser.push_line("b 2").unwrap(), None);
        assert_eq!(parser.finish().unwrap().name, "b");
        assert_eq!(parser.finish(), None);
    }

    #[test]
    fn histogram_submetrics() {
        let text = "\
# HELP req_seconds Request latency.
# TYPE req_seconds histogram
# UNIT req_seconds seconds
req_seconds_bucket{le=\"0.1\"} 3
req_seconds_bucket{le=\"+Inf\"} 4
req_seconds_sum 0.7
req_seconds_count 4
";
        let families = parse_families(text).unwrap();
        assert_eq!(families.len(), 1);
        let family = &families[0];
        assert_eq!(family.unit.as_deref(), Some("seconds"));
        assert_eq!(family.metric_type, MetricType::Histogram);
        let submetrics: Vec<_> = family.samples.iter().map(|s| s.submetric.as_str()).collect();
        assert_eq!(submetrics, vec!["bucket", "bucket", "sum", "count"]);
        assert_eq!(family.samples[1].facet("le"), Some("+Inf"));
    }

    #[test]
    fn eof_does_not_close_family() {
        assert_eq!(
            names("# TYPE a counter\n# EOF\na_total 1\n"),
            vec![("a".to_string(), MetricType::Counter, 1)]
        );
    }

    #[test]
    fn repeated_directive_after_samples_starts_new_block() {
        let text = "\
# TYPE a gauge
a 1
# TYPE a gauge
a 2
";
        assert_eq!(
            names(text),
            vec![
                ("a".to_string(), MetricType::Gauge, 1),
                ("a".to_string(), MetricType::Gauge, 1)
            ]
        );
    }

    #[test]
    fn repeated_directive_word_starts_new_block() {
        let text = "\
# HELP a first
# HELP a second
a 1
";
        let families = parse_families(text).unwrap();
        assert_eq!(families.len(), 2);
        assert_eq!(families[0].help.as_deref(), Some("first"));
        assert!(families[0].samples.is_empty());
        assert_eq!(families[1].help.as_deref(), Some("second"));
        assert_eq!(families[1].samples.len(), 1);
    }

    #[test]
    fn foreign_sample_opens_implicit_family() {
        let text = "\
# TYPE a gauge
a 1
b{x=\"y\"} 2
";
        assert_eq!(
            names(text),
            vec![
                ("a".to_string(), MetricType::Gauge, 1),
                ("b".to_string(), MetricType::Unknown, 1)
            ]
        );
        assert_eq!(names("orphan 3\n"), vec![("orphan".to_string(), MetricType::Unknown, 1)]);
    }

    #[test]
    fn label_parsing() {
        let families =
            parse_families("m{path=\"/a,b\",msg=\"say \\\"hi\\\"\\n\",dup=\"1\",dup=\"2\",} 1.5e3 1700000000\n").unwrap();
        let sample = &families[0].samples[0];
        assert_eq!(
            sample.labels,
            vec![
                ("path".to_string(), "/a,b".to_string()),
                ("msg".to_string(), "say \"hi\"\n".to_string()),
                ("dup".to_string(), "1".to_string()),
                ("dup".to_string(), "2".to_string()),
            ]
        );
        assert_eq!(sample.facet("dup"), Some("2"));
        assert_eq!(sample.facets.len(), 3);
        assert_eq!(sample.value, 1500.0);
        assert_eq!(sample.raw_value, "1.5e3");
        assert_eq!(sample.timestamp.as_deref(), Some("1700000000"));
    }

    #[test]
    fn special_values() {
        let families = parse_families("m{a=\"1\"} +Inf\nm{a=\"2\"} -Inf\nm{a=\"3\"} NaN\n").unwrap();
        let values: Vec<f64> = families[0].samples.iter().map(|s| s.value).collect();
        assert_eq!(values[0], f64::INFINITY);
        assert_eq!(values[1], f64::NEG_INFINITY);
        assert!(values[2].is_nan());
    }

    #[test]
    fn skips_blank_lines_and_carriage_returns() {
        assert_eq!(
            names("# TYPE a gauge\r\n\r\na 1\r\n\n"),
            vec![("a".to_string(), MetricType::Gauge, 1)]
        );
    }

    #[test]
    fn rejects_unknown_directive() {
        let err = parse_families("# TYPE a gauge\na 1\n# NOTE whatever\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.reason, ParseErrorReason::UnknownDirective("NOTE".to_string()));
    }

    #[test]
    fn rejects_malformed_samples() {
        for line in [
            "m{a=1} 2",
            "m{a=\"1\" 2",
            "m{=\"1\"} 2",
            "m{a=\"1\"}2",
            "m",
            "m abc",
            "m 1 2 3",
            "m 1 later",
        ] {
            assert!(parse_families(line).is_err(), "{line:?} should be rejected");
        }
    }

    #[test]
    fn help_without_text() {
        let families = parse_families("# HELP a\na 1\n").unwrap();
        assert_eq!(families[0].help.as_deref(), Some(""));
    }
}
