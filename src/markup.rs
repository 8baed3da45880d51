//! Console markup.
//!
//! Output of the external client is stored as text annotated with a small set of
//! HTML-like tags: colour spans (`<span class='console-section'>…</span>`), line
//! breaks (`<br />`) and run separators (`<hr />`). Literal `<`, `>` and `&` in the
//! captured text are entity-escaped so the markup always parses back losslessly.
//!
//! [`AnsiTranslator`] turns raw chunks into markup. It keeps incomplete escape
//! sequences (and a trailing `\r`) pending until the next chunk, so colour codes
//! split across reads render correctly.

pub const LINE_BREAK: &str = "<br />";
pub const SEPARATOR: &str = "<hr />";
const CLOSE_SPAN: &str = "</span>";

/// Longest parameter run accepted inside a CSI sequence before it is treated as garbage.
const MAX_CSI_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Section,
    Warning,
    Error,
    Info,
    /// Standard-error output of the run.
    Stderr,
}

impl Tone {
    pub fn class(self) -> &'static str {
        match self {
            Tone::Section => "console-section",
            Tone::Warning => "console-warning",
            Tone::Error => "console-error",
            Tone::Info => "console-info",
            Tone::Stderr => "red",
        }
    }

    pub fn from_class(class: &str) -> Option<Self> {
        match class {
            "console-section" => Some(Tone::Section),
            "console-warning" => Some(Tone::Warning),
            "console-error" => Some(Tone::Error),
            "console-info" => Some(Tone::Info),
            "red" => Some(Tone::Stderr),
            _ => None,
        }
    }

    fn open_tag(self) -> String {
        format!("<span class='{}'>", self.class())
    }
}

enum Sgr {
    Open(Tone),
    Reset,
}

fn sgr_param(param: &str) -> Option<Sgr> {
    match param {
        "" | "0" => Some(Sgr::Reset),
        "92" => Some(Sgr::Open(Tone::Section)),
        "93" => Some(Sgr::Open(Tone::Warning)),
        "91" => Some(Sgr::Open(Tone::Error)),
        "32" => Some(Sgr::Open(Tone::Info)),
        _ => None,
    }
}

/// Stateful ANSI-to-markup translator for one output stream.
#[derive(Debug, Default)]
pub struct AnsiTranslator {
    pending: String,
    open: Vec<Tone>,
}

impl AnsiTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Translate the next chunk. Anything that could be the start of an escape
    /// sequence or a `\r\n` pair is held back until more input arrives.
    pub fn push(&mut self, chunk: &str) -> String {
        let mut input = std::mem::take(&mut self.pending);
        input.push_str(chunk);
        if let Some(cut) = incomplete_tail(&input) {
            self.pending = input.split_off(cut);
        }
        self.translate(&input)
    }

    /// Flush pending input and close any span left open by the stream.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        let mut out = self.translate(&rest);
        for _ in self.open.drain(..) {
            out.push_str(CLOSE_SPAN);
        }
        out
    }

    /// Like [`push`](Self::push), but the result nests on its own: tones still
    /// open from earlier chunks are reopened first and closed again at the end.
    /// Used where every chunk gets wrapped in an outer span.
    pub fn push_balanced(&mut self, chunk: &str) -> String {
        let reopen = self.reopen_tags();
        let body = self.push(chunk);
        self.balanced(reopen, body)
    }

    /// [`finish`](Self::finish) counterpart of [`push_balanced`](Self::push_balanced).
    pub fn finish_balanced(&mut self) -> String {
        let reopen = self.reopen_tags();
        let rest = std::mem::take(&mut self.pending);
        let body = self.translate(&rest);
        let out = self.balanced(reopen, body);
        self.open.clear();
        out
    }

    fn reopen_tags(&self) -> String {
        self.open.iter().map(|tone| tone.open_tag()).collect()
    }

    fn balanced(&self, reopen: String, body: String) -> String {
        if body.is_empty() {
            return body;
        }
        let mut out = reopen;
        out.push_str(&body);
        for _ in &self.open {
            out.push_str(CLOSE_SPAN);
        }
        out
    }

    fn translate(&mut self, input: &str) -> String {
        let mut out = String::with_capacity(input.len() + 16);
        let mut rest = input;
        while let Some(c) = rest.chars().next() {
            rest = &rest[c.len_utf8()..];
            match c {
                '\u{1b}' => {
                    rest = self.escape(rest, &mut out);
                }
                '\r' => {
                    if let Some(after) = rest.strip_prefix('\n') {
                        rest = after;
                    }
                    out.push_str(LINE_BREAK);
                }
                '\n' => out.push_str(LINE_BREAK),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                '&' => out.push_str("&amp;"),
                _ => out.push(c),
            }
        }
        out
    }

    /// Consume an escape sequence (the ESC is already consumed). Colour codes
    /// become spans; every other sequence is dropped.
    fn escape<'a>(&mut self, rest: &'a str, out: &mut String) -> &'a str {
        let Some(body) = rest.strip_prefix('[') else {
            return rest;
        };
        let Some(end) = body.find(|c: char| ('\u{40}'..='\u{7e}').contains(&c)) else {
            return "";
        };
        let params = &body[..end];
        let final_byte = &body[end..end + 1];
        if final_byte == "m" {
            for param in params.split(';') {
                match sgr_param(param) {
                    Some(Sgr::Open(tone)) => {
                        out.push_str(&tone.open_tag());
                        self.open.push(tone);
                    }
                    Some(Sgr::Reset) => {
                        for _ in self.open.drain(..) {
                            out.push_str(CLOSE_SPAN);
                        }
                    }
                    None => {}
                }
            }
        }
        &body[end + 1..]
    }
}

/// Byte offset where an unfinished escape sequence or lone trailing `\r` starts.
fn incomplete_tail(input: &str) -> Option<usize> {
    let mut cut = None;
    if let Some(esc) = input.rfind('\u{1b}') {
        let tail = &input[esc + 1..];
        let unfinished = match tail.strip_prefix('[') {
            None => tail.is_empty(),
            Some(params) => {
                params.len() <= MAX_CSI_LEN
                    && params.chars().all(|c| ('\u{20}'..='\u{3f}').contains(&c))
            }
        };
        if unfinished {
            cut = Some(esc);
        }
    }
    if input.ends_with('\r') {
        let at = input.len() - 1;
        cut = Some(cut.map_or(at, |c: usize| c.min(at)));
    }
    cut
}

/// Translate a self-contained chunk (all spans closed at the end).
pub fn translate(chunk: &str) -> String {
    let mut translator = AnsiTranslator::new();
    let mut out = translator.push(chunk);
    out.push_str(&translator.finish());
    out
}

/// Markup for a chunk of standard-error output.
pub fn stderr_span(chunk: &str) -> String {
    stderr_wrap(&translate(chunk))
}

/// Wrap already translated standard-error markup.
pub fn stderr_wrap(markup: &str) -> String {
    format!("{}{}{}", Tone::Stderr.open_tag(), markup, CLOSE_SPAN)
}

/// Remove ANSI escape sequences from raw text.
pub fn strip_ansi(raw: &str) -> String {
    to_plain(&translate(raw))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Text(String),
    Open(Tone),
    Close,
    Break,
    Separator,
}

/// Split markup into tokens. Unknown tags are kept as literal text.
pub fn tokens(markup: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut text = String::new();
    let mut rest = markup;

    let flush = |text: &mut String, out: &mut Vec<Token>| {
        if !text.is_empty() {
            out.push(Token::Text(unescape(text)));
            text.clear();
        }
    };

    while !rest.is_empty() {
        if let Some((token, after)) = tag(rest) {
            flush(&mut text, &mut out);
            out.push(token);
            rest = after;
            continue;
        }
        let c = rest.chars().next().unwrap_or_default();
        text.push(c);
        rest = &rest[c.len_utf8()..];
    }
    flush(&mut text, &mut out);
    out
}

fn tag(input: &str) -> Option<(Token, &str)> {
    if !input.starts_with('<') {
        return None;
    }
    for (literal, token) in [
        (LINE_BREAK, Token::Break),
        ("<br>", Token::Break),
        (SEPARATOR, Token::Separator),
        ("<hr>", Token::Separator),
        (CLOSE_SPAN, Token::Close),
    ] {
        if let Some(after) = input.strip_prefix(literal) {
            return Some((token, after));
        }
    }
    let body = input.strip_prefix("<span class='")?;
    let end = body.find("'>")?;
    let tone = Tone::from_class(&body[..end])?;
    Some((Token::Open(tone), &body[end + 2..]))
}

fn unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// A run of text sharing one tone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub tone: Option<Tone>,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkupLine {
    pub segments: Vec<Segment>,
    pub separator: bool,
}

/// Lay markup out as display lines. Nested spans use the innermost tone.
pub fn lines(markup: &str) -> Vec<MarkupLine> {
    let mut out = Vec::new();
    let mut current = MarkupLine::default();
    let mut stack: Vec<Tone> = Vec::new();

    for token in tokens(markup) {
        match token {
            Token::Text(text) => current.segments.push(Segment {
                tone: stack.last().copied(),
                text,
            }),
            Token::Open(tone) => stack.push(tone),
            Token::Close => {
                stack.pop();
            }
            Token::Break => out.push(std::mem::take(&mut current)),
            Token::Separator => {
                if !current.segments.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                out.push(MarkupLine {
                    segments: Vec::new(),
                    separator: true,
                });
            }
        }
    }
    if !current.segments.is_empty() {
        out.push(current);
    }
    out
}

/// Plain text of a markup body: tags removed, breaks as newlines.
pub fn to_plain(markup: &str) -> String {
    let mut out = String::new();
    for token in tokens(markup) {
        match token {
            Token::Text(text) => out.push_str(&text),
            Token::Break | Token::Separator => out.push('\n'),
            Token::Open(_) | Token::Close => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colour_codes_map_to_spans() {
        assert_eq!(
            translate("\u{1b}[92mok\u{1b}[0m"),
            "<span class='console-section'>ok</span>"
        );
        assert_eq!(
            translate("\u{1b}[93mw\u{1b}[0m \u{1b}[91me\u{1b}[0m \u{1b}[32mi\u{1b}[0m"),
            "<span class='console-warning'>w</span> <span class='console-error'>e</span> <span class='console-info'>i</span>"
        );
    }

    #[test]
    fn line_breaks_become_markers() {
        assert_eq!(translate("a\nb\r\nc\rd"), "a<br />b<br />c<br />d");
    }

    #[test]
    fn literal_angle_brackets_are_escaped_and_restored() {
        let body = translate("if a < b && c > d\n");
        assert_eq!(body, "if a &lt; b &amp;&amp; c &gt; d<br />");
        assert_eq!(to_plain(&body), "if a < b && c > d\n");
    }

    #[test]
    fn escape_split_across_chunks_renders_once() {
        let mut t = AnsiTranslator::new();
        let mut out = t.push("start \u{1b}[9");
        out.push_str(&t.push("2mgreen\u{1b}"));
        out.push_str(&t.push("[0m end"));
        out.push_str(&t.finish());
        assert_eq!(out, "start <span class='console-section'>green</span> end");
    }

    #[test]
    fn wrapped_stream_keeps_split_escapes_and_nesting() {
        let mut t = AnsiTranslator::new();
        assert_eq!(t.push_balanced("\u{1b}[9"), "");
        let first = t.push_balanced("1mboom");
        assert_eq!(first, "<span class='console-error'>boom</span>");
        let second = t.push_balanced(" again\u{1b}[0m\n");
        assert_eq!(second, "<span class='console-error'> again</span><br />");
        assert_eq!(t.finish_balanced(), "");

        let body = format!("{}{}", stderr_wrap(&first), stderr_wrap(&second));
        assert_eq!(to_plain(&body), "boom again\n");
        assert!(!body.contains("1m"));
    }

    #[test]
    fn balanced_finish_closes_tones_opened_in_the_tail() {
        let mut t = AnsiTranslator::new();
        assert_eq!(t.push_balanced("x\u{1b}[93"), "x");
        assert_eq!(t.finish_balanced(), "");
        let mut t = AnsiTranslator::new();
        assert_eq!(
            t.push_balanced("\u{1b}[92mok"),
            "<span class='console-section'>ok</span>"
        );
        assert_eq!(t.finish_balanced(), "");
    }

    #[test]
    fn crlf_split_across_chunks_is_one_break() {
        let mut t = AnsiTranslator::new();
        let mut out = t.push("line\r");
        out.push_str(&t.push("\nnext"));
        out.push_str(&t.finish());
        assert_eq!(out, "line<br />next");
    }

    #[test]
    fn unterminated_spans_are_closed_on_finish() {
        assert_eq!(
            translate("\u{1b}[91mboom"),
            "<span class='console-error'>boom</span>"
        );
    }

    #[test]
    fn unknown_sequences_are_dropped_and_stray_resets_ignored() {
        assert_eq!(translate("\u{1b}[1mbold\u{1b}[0m\u{1b}[2K"), "bold");
        assert_eq!(translate("\u{1b}[0mplain"), "plain");
    }

    #[test]
    fn combined_parameters_open_the_known_tone() {
        assert_eq!(
            translate("\u{1b}[1;93mhey\u{1b}[m"),
            "<span class='console-warning'>hey</span>"
        );
    }

    #[test]
    fn stderr_chunks_are_wrapped() {
        assert_eq!(stderr_span("boom\n"), "<span class='red'>boom<br /></span>");
    }

    #[test]
    fn lines_follow_breaks_tones_and_separators() {
        let body = format!(
            "{}{}",
            translate("\u{1b}[92mSection\u{1b}[0m\nplain <x>\n"),
            SEPARATOR
        );
        let laid = lines(&body);
        assert_eq!(laid.len(), 3);
        assert_eq!(
            laid[0].segments,
            vec![Segment {
                tone: Some(Tone::Section),
                text: "Section".into()
            }]
        );
        assert_eq!(laid[1].segments[0].text, "plain <x>");
        assert!(laid[2].separator);
    }

    #[test]
    fn strip_ansi_yields_plain_text() {
        assert_eq!(strip_ansi("\u{1b}[91merror:\u{1b}[0m bad\n"), "error: bad\n");
    }
}
